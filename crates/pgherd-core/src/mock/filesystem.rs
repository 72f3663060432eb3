//! In-memory mock filesystem for testing discovery without a real host.
//!
//! `MockFs` simulates files, directories, file owners and unreadable files,
//! which covers every kind of evidence the detection strategies look at.

use crate::traits::FileSystem;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

/// Uid reported for files added without an explicit owner.
const DEFAULT_OWNER_UID: u32 = 0;

/// In-memory filesystem for testing.
#[derive(Debug, Clone, Default)]
pub struct MockFs {
    /// Map from path to file contents.
    files: HashMap<PathBuf, String>,
    /// Set of directories (for read_dir support).
    directories: HashSet<PathBuf>,
    /// Owner uid per file.
    owners: HashMap<PathBuf, u32>,
    /// Files that exist but fail to read with `PermissionDenied`.
    unreadable: HashSet<PathBuf>,
}

impl MockFs {
    /// Creates a new empty mock filesystem.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a file with the given content, owned by root.
    ///
    /// Parent directories are automatically created.
    pub fn add_file(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        self.add_file_owned(path, content, DEFAULT_OWNER_UID);
    }

    /// Adds a file with the given content and owner uid.
    pub fn add_file_owned(&mut self, path: impl AsRef<Path>, content: impl Into<String>, uid: u32) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.owners.insert(path.clone(), uid);
        self.files.insert(path, content.into());
    }

    /// Adds a file that exists but cannot be read by the current user.
    pub fn add_unreadable_file(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_file(&path, "");
        self.unreadable.insert(path);
    }

    /// Adds an empty directory.
    pub fn add_dir(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        self.add_parents(&path);
        self.directories.insert(path);
    }

    /// Adds a `postmaster.pid`-style socket lock file for `port` in `socket_dir`.
    pub fn add_lock_file(
        &mut self,
        socket_dir: impl AsRef<Path>,
        port: u16,
        data_directory: &str,
        uid: u32,
    ) {
        let path = socket_dir
            .as_ref()
            .join(format!(".s.PGSQL.{}.lock", port));
        let content = format!(
            "12345\n{}\n1700000000\n{}\n{}\n",
            data_directory,
            port,
            socket_dir.as_ref().display()
        );
        self.add_file_owned(path, content, uid);
    }

    /// Adds a data directory holding a `PG_VERSION` marker.
    pub fn add_data_directory(&mut self, path: impl AsRef<Path>, version: &str) {
        let path = path.as_ref();
        self.add_dir(path);
        self.add_file(path.join("PG_VERSION"), format!("{}\n", version));
    }

    fn add_parents(&mut self, path: &Path) {
        let mut parent = path.parent();
        while let Some(p) = parent {
            if !p.as_os_str().is_empty() {
                self.directories.insert(p.to_path_buf());
            }
            parent = p.parent();
        }
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        if self.unreadable.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("permission denied: {:?}", path),
            ));
        }
        self.files.get(path).cloned().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("file not found: {:?}", path),
            )
        })
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path) || self.directories.contains(path)
    }

    fn read_dir(&self, path: &Path) -> io::Result<Vec<PathBuf>> {
        if !self.directories.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("directory not found: {:?}", path),
            ));
        }

        let mut entries = BTreeSet::new();

        for file_path in self.files.keys() {
            if file_path.parent().is_some_and(|parent| parent == path) {
                entries.insert(file_path.clone());
            }
        }

        for dir_path in &self.directories {
            if dir_path.parent().is_some_and(|parent| parent == path) && dir_path != path {
                entries.insert(dir_path.clone());
            }
        }

        Ok(entries.into_iter().collect())
    }

    fn owner_uid(&self, path: &Path) -> io::Result<u32> {
        if let Some(uid) = self.owners.get(path) {
            return Ok(*uid);
        }
        if self.directories.contains(path) {
            return Ok(DEFAULT_OWNER_UID);
        }
        Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("file not found: {:?}", path),
        ))
    }
}
