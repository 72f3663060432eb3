//! Abstractions for filesystem access to enable testing and mocking.
//!
//! Discovery and resolution read lock files, version markers and recovery
//! configuration through the `FileSystem` trait, so the whole pipeline can run
//! against an in-memory [`MockFs`](crate::mock::MockFs) in tests.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

/// Abstraction for the filesystem operations discovery needs.
pub trait FileSystem {
    /// Reads the entire contents of a file as a string.
    fn read_to_string(&self, path: &Path) -> io::Result<String>;

    /// Checks if a path exists.
    fn exists(&self, path: &Path) -> bool;

    /// Lists entries in a directory.
    ///
    /// # Returns
    /// Full paths of the directory's entries, or an I/O error.
    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>>;

    /// Returns the numeric uid owning `path`.
    fn owner_uid(&self, path: &Path) -> io::Result<u32>;
}

/// Real filesystem implementation that delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(path)?;
        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(paths)
    }

    fn owner_uid(&self, path: &Path) -> io::Result<u32> {
        Ok(std::fs::metadata(path)?.uid())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_real_fs_read_to_string() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("PG_VERSION");
        std::fs::write(&path, "13\n").unwrap();

        let fs = RealFs::new();
        assert_eq!(fs.read_to_string(&path).unwrap(), "13\n");
    }

    #[test]
    fn test_real_fs_exists() {
        let dir = tempdir().unwrap();
        let fs = RealFs::new();
        assert!(fs.exists(dir.path()));
        assert!(!fs.exists(Path::new("/nonexistent/path/12345")));
    }

    #[test]
    fn test_real_fs_read_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".s.PGSQL.5432.lock"), "").unwrap();

        let fs = RealFs::new();
        let entries = fs.read_dir(dir.path()).unwrap();
        assert_eq!(entries, vec![dir.path().join(".s.PGSQL.5432.lock")]);
    }

    #[test]
    fn test_real_fs_owner_uid_matches_metadata() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("owned");
        std::fs::write(&path, "x").unwrap();

        let fs = RealFs::new();
        let expected = std::fs::metadata(&path).unwrap().uid();
        assert_eq!(fs.owner_uid(&path).unwrap(), expected);
        assert!(fs.owner_uid(&dir.path().join("missing")).is_err());
    }
}
