//! Cluster-manager detection strategy.
//!
//! Debian-derived systems ship `pg_lsclusters`, which lists every cluster it
//! manages whether or not it is running. Its output is whitespace-delimited:
//!
//! ```text
//! 13  main     5432 online           postgres /var/lib/postgresql/13/main     /var/log/...
//! 13  replica  5433 online,recovery  postgres /var/lib/postgresql/13/replica  /var/log/...
//! ```

use std::env;
use std::ffi::OsString;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, trace};

use crate::model::{Role, Seed, parse_port};

/// Default cluster-listing tool.
pub const DEFAULT_CLUSTER_TOOL: &str = "pg_lsclusters";

/// Source of the cluster manager's listing.
pub trait ClusterLister {
    /// Returns the raw listing, or `None` when the tool is not installed.
    fn list_clusters(&self) -> io::Result<Option<String>>;
}

/// Finds an executable named `program` in a `PATH`-style search list.
pub fn find_in_path(program: &str, search_path: &OsString) -> Option<PathBuf> {
    env::split_paths(search_path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

/// Runs a `pg_lsclusters`-compatible tool found on `PATH`.
#[derive(Debug, Clone)]
pub struct CommandClusterLister {
    program: String,
    search_path: Option<OsString>,
}

impl CommandClusterLister {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            search_path: env::var_os("PATH"),
        }
    }

    /// Overrides the directories searched for the tool.
    pub fn with_search_path(mut self, search_path: impl Into<OsString>) -> Self {
        self.search_path = Some(search_path.into());
        self
    }
}

impl ClusterLister for CommandClusterLister {
    fn list_clusters(&self) -> io::Result<Option<String>> {
        let Some(executable) = self
            .search_path
            .as_ref()
            .and_then(|p| find_in_path(&self.program, p))
        else {
            trace!(tool = %self.program, "cluster tool not on PATH");
            return Ok(None);
        };

        let output = Command::new(&executable).arg("--no-header").output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{} exited with {}: {}",
                executable.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        String::from_utf8(output.stdout)
            .map(Some)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Parses cluster listing output into one seed per well-formed row.
///
/// Rows need at least six fields (version, name, port, status, owner,
/// data directory); extra fields are ignored. Rows with fewer fields or an
/// invalid port are skipped.
pub fn parse_cluster_listing(output: &str) -> Vec<Seed> {
    let mut seeds = Vec::new();

    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        let &[_version, name, port, status, owner, data_directory, ..] = fields.as_slice() else {
            debug!(line, "skipping short cluster listing row");
            continue;
        };
        let Some(port) = parse_port(port) else {
            debug!(line, "skipping cluster listing row with invalid port");
            continue;
        };

        seeds.push(Seed {
            name: Some(name.to_string()),
            user: Some(owner.to_string()),
            data_directory: Some(PathBuf::from(data_directory)),
            online: Some(status.contains("online")),
            role: Some(if status.contains("recovery") {
                Role::Slave
            } else {
                Role::Master
            }),
            ..Seed::new(port)
        });
    }

    seeds
}
