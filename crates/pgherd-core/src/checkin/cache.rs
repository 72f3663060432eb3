//! On-disk snapshot cache.
//!
//! One JSON file per (host, name, port) holding the last projection the
//! registry accepted. Files are replaced atomically through a `.tmp` sibling.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::projection::Projection;

/// Error type for snapshot persistence.
#[derive(Debug)]
pub enum CacheError {
    Io(PathBuf, io::Error),
    Encode(serde_json::Error),
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::Io(path, e) => write!(f, "snapshot cache {}: {}", path.display(), e),
            CacheError::Encode(e) => write!(f, "snapshot cache encoding: {}", e),
        }
    }
}

impl std::error::Error for CacheError {}

/// File content: the projection plus when it was accepted.
#[derive(Debug, Serialize, Deserialize)]
struct CachedSnapshot {
    /// Unix timestamp (seconds) of the successful checkin.
    reported_at: i64,
    projection: Projection,
}

/// Directory of last-transmitted projections.
#[derive(Debug, Clone)]
pub struct SnapshotCache {
    dir: PathBuf,
}

impl SnapshotCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the snapshot file for (host, name, port).
    pub fn path_for(&self, host: &str, name: &str, port: u16) -> PathBuf {
        self.dir.join(format!(
            "pgherd.{}.{}.{}.json",
            sanitize(host),
            sanitize(name),
            port
        ))
    }

    /// Loads the prior snapshot, if any.
    ///
    /// A missing file is the normal first-run case. An unreadable or corrupt
    /// file is logged and treated as missing, so the next checkin sends the
    /// full projection and rewrites it.
    pub fn load(&self, host: &str, name: &str, port: u16) -> Option<Projection> {
        let path = self.path_for(host, name, port);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read snapshot, ignoring");
                return None;
            }
        };

        match serde_json::from_str::<CachedSnapshot>(&content) {
            Ok(cached) if cached.projection.host == host
                && cached.projection.name == name
                && cached.projection.port == port =>
            {
                Some(cached.projection)
            }
            Ok(_) => {
                warn!(path = %path.display(), "snapshot identity mismatch, ignoring");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "corrupt snapshot, ignoring");
                None
            }
        }
    }

    /// Persists `projection` as the new snapshot for its identity, replacing
    /// any previous one.
    pub fn store(&self, projection: &Projection) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|e| CacheError::Io(self.dir.clone(), e))?;

        let path = self.path_for(&projection.host, &projection.name, projection.port);
        let cached = CachedSnapshot {
            reported_at: chrono::Utc::now().timestamp(),
            projection: projection.clone(),
        };
        let data = serde_json::to_vec_pretty(&cached).map_err(CacheError::Encode)?;

        let tmp_path = path.with_extension("json.tmp");
        let write = || -> io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(&data)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        };
        if let Err(e) = write() {
            let _ = fs::remove_file(&tmp_path);
            return Err(CacheError::Io(path, e));
        }

        debug!(path = %path.display(), "snapshot stored");
        Ok(())
    }
}

/// Keeps file names to a safe character set.
fn sanitize(component: &str) -> String {
    component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
