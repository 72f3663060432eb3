//! Per-instance attribute resolution.
//!
//! Resolution is a single synchronous pass with two phases and no retries:
//!
//! 1. Offline evidence from the data directory: `PG_VERSION` gives the
//!    version (or marks the instance invalid), `recovery.conf` gives the
//!    replication role and upstream.
//! 2. Online evidence from a live connection through an [`InstanceProbe`]:
//!    the server version overrides the marker, the replay position and the
//!    reachable databases are recorded. A failed connection records the reason
//!    and leaves the phase-1 values in place.

mod probe;
mod recovery;

pub use probe::{
    ConnectionAttempt, InstanceProbe, LiveFacts, PostgresProbe, ProbeTarget, TEMPLATE_PREFIX,
    build_replay_position_query, connectable_databases, effective_role,
};
pub use recovery::{
    RECOVERY_MARKER, UpstreamTarget, find_primary_conninfo, parse_primary_conninfo,
    read_recovery_marker,
};

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::{debug, trace, warn};

use crate::model::{
    DEFAULT_INSTANCE_NAME, DEFAULT_INSTANCE_USER, DEFAULT_PORT, InstanceRecord, Role, Seed,
};
use crate::traits::FileSystem;

/// Socket directory assumed when none is configured.
pub const DEFAULT_SOCKET_DIR: &str = "/var/run/postgresql";

/// Upstream name used for local replicas when the hostname is unknown.
pub const FALLBACK_HOSTNAME: &str = "localhost";

/// Name of the version marker inside a data directory.
pub const VERSION_MARKER: &str = "PG_VERSION";

/// Reads the first line of `PG_VERSION` from `data_directory`.
///
/// Returns `None` for an empty data directory path, a missing or unreadable
/// marker, or a blank first line.
pub fn read_version_marker(fs: &impl FileSystem, data_directory: &Path) -> Option<String> {
    if data_directory.as_os_str().is_empty() {
        return None;
    }
    let path = data_directory.join(VERSION_MARKER);
    let content = match fs.read_to_string(&path) {
        Ok(content) => content,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "version marker unreadable");
            return None;
        }
    };
    let version = content.lines().next().unwrap_or("").trim();
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}

/// Turns seeds into fully resolved [`InstanceRecord`]s.
pub struct AttributeResolver<F: FileSystem, P: InstanceProbe> {
    fs: F,
    probe: P,
    local_hostname: String,
    /// Overrides the seeded user for connections.
    connect_user: Option<String>,
    /// Socket directory used when the seed does not know one.
    default_socket_dir: PathBuf,
}

impl<F: FileSystem, P: InstanceProbe> AttributeResolver<F, P> {
    /// A blank `local_hostname` is replaced by [`FALLBACK_HOSTNAME`] so a
    /// replica's upstream is never empty.
    pub fn new(fs: F, probe: P, local_hostname: impl Into<String>) -> Self {
        let mut local_hostname = local_hostname.into().trim().to_string();
        if local_hostname.is_empty() {
            warn!("local hostname unknown, using {}", FALLBACK_HOSTNAME);
            local_hostname = FALLBACK_HOSTNAME.to_string();
        }
        Self {
            fs,
            probe,
            local_hostname,
            connect_user: None,
            default_socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
        }
    }

    /// Connects as `user` instead of the instance owner.
    pub fn with_connect_user(mut self, user: Option<String>) -> Self {
        self.connect_user = user;
        self
    }

    /// Sets the socket directory for seeds that were not found via a lock file.
    pub fn with_default_socket_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.default_socket_dir = dir.into();
        self
    }

    pub fn local_hostname(&self) -> &str {
        &self.local_hostname
    }

    /// Resolves one seed. Never fails: missing evidence degrades the record
    /// (`invalid`, `online == false`, `error`) instead.
    pub fn resolve(&self, seed: &Seed) -> InstanceRecord {
        let data_directory = seed.data_directory.clone().unwrap_or_default();
        let mut record = InstanceRecord {
            name: seed
                .name
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTANCE_NAME.to_string()),
            port: seed.port,
            user: seed
                .user
                .clone()
                .unwrap_or_else(|| DEFAULT_INSTANCE_USER.to_string()),
            role: seed.role.unwrap_or_default(),
            online: false,
            version: None,
            data_directory,
            invalid: false,
            master_host: None,
            master_port: None,
            replay_position: None,
            databases: BTreeSet::new(),
            error: None,
        };

        let marker_role = self.apply_offline_evidence(&mut record);
        self.apply_online_evidence(&mut record, seed, marker_role);

        if record.role == Role::Slave && record.master_host.is_none() {
            record.master_host = Some(self.local_hostname.clone());
            record.master_port = Some(DEFAULT_PORT);
        }

        debug!(
            port = record.port,
            name = %record.name,
            role = %record.role,
            online = record.online,
            invalid = record.invalid,
            version = ?record.version,
            "instance resolved"
        );

        record
    }

    /// Phase 1. Returns `Some(Role::Slave)` when `recovery.conf` settled the role.
    fn apply_offline_evidence(&self, record: &mut InstanceRecord) -> Option<Role> {
        match read_version_marker(&self.fs, &record.data_directory) {
            Some(version) => record.version = Some(version),
            None => record.invalid = true,
        }

        let upstream = read_recovery_marker(&self.fs, &record.data_directory)?;
        trace!(port = record.port, upstream = ?upstream, "primary_conninfo found");

        record.role = Role::Slave;
        record.master_host = Some(
            upstream
                .host
                .filter(|host| host != "localhost")
                .unwrap_or_else(|| self.local_hostname.clone()),
        );
        record.master_port = Some(upstream.port.unwrap_or(DEFAULT_PORT));
        Some(Role::Slave)
    }

    /// Phase 2.
    fn apply_online_evidence(
        &self,
        record: &mut InstanceRecord,
        seed: &Seed,
        marker_role: Option<Role>,
    ) {
        let user = self.connect_user.as_deref().unwrap_or(&record.user);
        let socket_dir = seed
            .socket_dir
            .as_deref()
            .unwrap_or(&self.default_socket_dir);
        let target = ProbeTarget {
            port: record.port,
            user,
            socket_dir,
            marker_role,
        };

        match self.probe.probe(&target) {
            ConnectionAttempt::Online(facts) => {
                record.online = true;
                record.error = None;
                if facts.version.is_some() {
                    record.version = facts.version;
                }
                record.role = effective_role(marker_role, facts.in_recovery);
                record.replay_position = facts.replay_position;
                record.databases = facts.databases;
            }
            ConnectionAttempt::Offline(reason) => {
                if seed.online == Some(true) {
                    warn!(port = record.port, reason = %reason,
                        "instance detected as running but connection failed");
                } else {
                    debug!(port = record.port, reason = %reason, "instance offline");
                }
                record.online = false;
                record.error = Some(reason);
            }
        }
    }
}
