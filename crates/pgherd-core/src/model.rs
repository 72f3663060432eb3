//! Instance data model.
//!
//! A [`Seed`] is what a detection strategy could learn about an instance
//! without talking to it. The resolver turns a seed into an
//! [`InstanceRecord`], which is never modified afterwards: every discovery
//! cycle builds fresh records.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Instance name used when no strategy supplied one.
pub const DEFAULT_INSTANCE_NAME: &str = "main";

/// Owner assumed when no strategy could tell who owns the data directory.
pub const DEFAULT_INSTANCE_USER: &str = "postgres";

/// Default PostgreSQL port, also the upstream port of a replica whose
/// `primary_conninfo` does not name one.
pub const DEFAULT_PORT: u16 = 5432;

/// Replication role of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Master,
    Slave,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Slave => "slave",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a decimal port number, rejecting 0 and anything above 65535.
pub fn parse_port(s: &str) -> Option<u16> {
    s.trim().parse::<u16>().ok().filter(|p| *p != 0)
}

/// Partial attributes produced by one detection strategy.
///
/// `None` means "this strategy could not tell", which is what lets
/// [`Seed::overlay`] merge two detections of the same port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seed {
    pub port: u16,
    pub name: Option<String>,
    pub user: Option<String>,
    pub data_directory: Option<PathBuf>,
    /// Provisional running state. Only the live check decides `online`; a
    /// `Some(true)` hint that the check contradicts is logged.
    pub online: Option<bool>,
    /// Provisional role; recovery markers and the live check supersede it.
    pub role: Option<Role>,
    /// Unix socket directory the instance was seen listening in.
    pub socket_dir: Option<PathBuf>,
}

impl Seed {
    /// Creates a seed that knows nothing but its port.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            name: None,
            user: None,
            data_directory: None,
            online: None,
            role: None,
            socket_dir: None,
        }
    }

    /// Returns this seed with every field `other` knows replaced by
    /// `other`'s value. Fields `other` left blank keep their current value.
    pub fn overlay(self, other: Seed) -> Seed {
        debug_assert_eq!(self.port, other.port);
        Seed {
            port: self.port,
            name: other.name.or(self.name),
            user: other.user.or(self.user),
            data_directory: other.data_directory.or(self.data_directory),
            online: other.online.or(self.online),
            role: other.role.or(self.role),
            socket_dir: other.socket_dir.or(self.socket_dir),
        }
    }
}

/// Fully resolved description of one PostgreSQL instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceRecord {
    pub name: String,
    pub port: u16,
    /// OS account owning the data directory; used as the connection user.
    pub user: String,
    pub role: Role,
    /// True only when a live connection succeeded.
    pub online: bool,
    /// Marker-file version, replaced by the server-reported one when online.
    pub version: Option<String>,
    /// Empty when no strategy knew the data directory.
    pub data_directory: PathBuf,
    /// No readable version marker. Independent of `online`.
    pub invalid: bool,
    pub master_host: Option<String>,
    pub master_port: Option<u16>,
    /// WAL byte offset: current write position on a master, last replayed
    /// position on a slave.
    pub replay_position: Option<i64>,
    pub databases: BTreeSet<String>,
    pub error: Option<String>,
}

impl InstanceRecord {
    pub fn is_slave(&self) -> bool {
        self.role == Role::Slave
    }
}
