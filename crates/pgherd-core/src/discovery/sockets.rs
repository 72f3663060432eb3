//! Live-socket detection strategy.
//!
//! A running postmaster leaves `.s.PGSQL.<port>.lock` next to its Unix socket.
//! The lock file is plain text; line 1 (0-based) is the data directory and
//! line 3 the port. Lock files are advisory and may be stale, truncated or
//! unreadable, so any file that does not parse is skipped.

use std::path::{Path, PathBuf};

use tracing::{debug, trace};

use crate::model::{Seed, parse_port};
use crate::traits::FileSystem;
use crate::util::UserResolver;

const LOCK_PREFIX: &str = ".s.PGSQL.";
const LOCK_SUFFIX: &str = ".lock";

const DATA_DIRECTORY_LINE: usize = 1;
const PORT_LINE: usize = 3;

/// Returns true if `path` is named like a per-port socket lock file.
pub fn is_lock_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| n.strip_prefix(LOCK_PREFIX))
        .and_then(|n| n.strip_suffix(LOCK_SUFFIX))
        .is_some_and(|port| !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()))
}

/// Parses lock file content into (data directory, port).
pub fn parse_lock_file(content: &str) -> Option<(PathBuf, u16)> {
    let lines: Vec<&str> = content.lines().collect();
    let data_directory = lines.get(DATA_DIRECTORY_LINE)?.trim();
    let port = parse_port(lines.get(PORT_LINE)?)?;
    if data_directory.is_empty() {
        return None;
    }
    Some((PathBuf::from(data_directory), port))
}

/// Scans `socket_dirs` for lock files and returns one seed per lock file found.
///
/// Missing directories contribute nothing. The same port may be returned more
/// than once if it has lock files in several directories; the engine's merge
/// collapses those.
pub fn scan_socket_dirs(
    fs: &impl FileSystem,
    socket_dirs: &[PathBuf],
    users: &UserResolver,
) -> Vec<Seed> {
    let mut seeds = Vec::new();

    for dir in socket_dirs {
        if !fs.exists(dir) {
            trace!(dir = %dir.display(), "socket directory absent");
            continue;
        }
        let mut entries = match fs.read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "socket directory unreadable");
                continue;
            }
        };
        entries.sort();

        for path in entries.into_iter().filter(|p| is_lock_file(p)) {
            if let Some(seed) = read_lock_file(fs, dir, &path, users) {
                seeds.push(seed);
            }
        }
    }

    seeds
}

fn read_lock_file(
    fs: &impl FileSystem,
    dir: &Path,
    path: &Path,
    users: &UserResolver,
) -> Option<Seed> {
    let content = match fs.read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "skipping unreadable lock file");
            return None;
        }
    };
    let Some((data_directory, port)) = parse_lock_file(&content) else {
        debug!(path = %path.display(), "skipping malformed lock file");
        return None;
    };
    let user = match fs.owner_uid(path) {
        Ok(uid) => Some(users.resolve(uid)),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "lock file owner unknown");
            None
        }
    };

    trace!(port, data_directory = %data_directory.display(), "lock file found");

    Some(Seed {
        user,
        data_directory: Some(data_directory),
        online: Some(true),
        socket_dir: Some(dir.to_path_buf()),
        ..Seed::new(port)
    })
}
