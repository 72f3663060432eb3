//! Live connection probe.
//!
//! The probe connects to an instance's administrative database over its
//! Unix socket and reads the facts only a running server can report.
//! Connection failure is an ordinary outcome ([`ConnectionAttempt::Offline`]),
//! never an error.

use std::collections::BTreeSet;
use std::path::Path;

use postgres::{Client, NoTls};
use tracing::{debug, warn};

use crate::model::Role;
use crate::util::format_postgres_error;

/// Name prefix of template databases, which are never connected to.
pub const TEMPLATE_PREFIX: &str = "template";

/// Where and as whom to connect.
#[derive(Debug, Clone, Copy)]
pub struct ProbeTarget<'a> {
    pub port: u16,
    pub user: &'a str,
    /// Unix socket directory. Local instances are never reached over TCP.
    pub socket_dir: &'a Path,
    /// Role already decided by on-disk replication evidence, if any.
    pub marker_role: Option<Role>,
}

/// Facts reported by a running server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveFacts {
    pub version: Option<String>,
    pub in_recovery: bool,
    pub replay_position: Option<i64>,
    pub databases: BTreeSet<String>,
}

/// Outcome of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAttempt {
    Online(LiveFacts),
    /// Carries the failure detail.
    Offline(String),
}

/// Source of live evidence about an instance.
pub trait InstanceProbe {
    fn probe(&self, target: &ProbeTarget<'_>) -> ConnectionAttempt;
}

/// Role used to pick the replay-position function: on-disk evidence first,
/// then what the server says about itself.
pub fn effective_role(marker_role: Option<Role>, in_recovery: bool) -> Role {
    marker_role.unwrap_or(if in_recovery { Role::Slave } else { Role::Master })
}

/// Drops template databases from a `pg_database` listing.
pub fn connectable_databases(names: impl IntoIterator<Item = String>) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| !name.starts_with(TEMPLATE_PREFIX))
        .collect()
}

/// Builds the version-aware query returning the WAL byte offset for `role`.
///
/// PostgreSQL 10 renamed the `xlog` functions to `wal`.
pub fn build_replay_position_query(server_version_num: Option<i32>, role: Role) -> String {
    let (diff_fn, position_fn) = if server_version_num.unwrap_or(0) >= 100000 {
        match role {
            Role::Master => ("pg_wal_lsn_diff", "pg_current_wal_lsn()"),
            Role::Slave => ("pg_wal_lsn_diff", "pg_last_wal_replay_lsn()"),
        }
    } else {
        match role {
            Role::Master => ("pg_xlog_location_diff", "pg_current_xlog_location()"),
            Role::Slave => ("pg_xlog_location_diff", "pg_last_xlog_replay_location()"),
        }
    };
    format!("SELECT {}({}, '0/0')::bigint", diff_fn, position_fn)
}

const VERSION_QUERY: &str = r"SELECT substring(version() FROM '\d+(?:\.\d+){1,2}')";

/// Probe backed by real PostgreSQL connections.
#[derive(Debug, Clone)]
pub struct PostgresProbe {
    admin_database: String,
}

impl PostgresProbe {
    pub fn new(admin_database: impl Into<String>) -> Self {
        Self {
            admin_database: admin_database.into(),
        }
    }

    fn connect(target: &ProbeTarget<'_>, database: &str) -> Result<Client, postgres::Error> {
        postgres::Config::new()
            .host_path(target.socket_dir)
            .port(target.port)
            .user(target.user)
            .dbname(database)
            .connect(NoTls)
    }

    fn collect(&self, client: &mut Client, target: &ProbeTarget<'_>) -> Result<LiveFacts, String> {
        let version = client
            .query_one(VERSION_QUERY, &[])
            .and_then(|row| row.try_get::<_, Option<String>>(0))
            .map_err(|e| format_postgres_error(&e))?;

        let in_recovery = client
            .query_one("SELECT pg_is_in_recovery()", &[])
            .and_then(|row| row.try_get::<_, bool>(0))
            .map_err(|e| format_postgres_error(&e))?;

        let server_version_num = client
            .query_one("SHOW server_version_num", &[])
            .ok()
            .and_then(|row| row.try_get::<_, String>(0).ok())
            .and_then(|v| v.parse::<i32>().ok());

        let role = effective_role(target.marker_role, in_recovery);
        let query = build_replay_position_query(server_version_num, role);
        let replay_position = match client.query_one(query.as_str(), &[]) {
            Ok(row) => row.try_get::<_, Option<i64>>(0).ok().flatten(),
            Err(e) => {
                warn!(port = target.port, error = %format_postgres_error(&e),
                    "failed to read replay position");
                None
            }
        };

        let names = match client.query("SELECT datname FROM pg_database ORDER BY datname", &[]) {
            Ok(rows) => rows.iter().map(|row| row.get::<_, String>(0)).collect(),
            Err(e) => {
                warn!(port = target.port, error = %format_postgres_error(&e),
                    "failed to list databases");
                Vec::new()
            }
        };

        Ok(LiveFacts {
            version,
            in_recovery,
            replay_position,
            databases: self.reachable_databases(target, connectable_databases(names)),
        })
    }

    /// Opens one connection per database and closes it again, keeping the
    /// names that accepted a connection.
    fn reachable_databases(
        &self,
        target: &ProbeTarget<'_>,
        names: Vec<String>,
    ) -> BTreeSet<String> {
        let mut reachable = BTreeSet::new();
        for name in names {
            match Self::connect(target, &name) {
                Ok(client) => {
                    if let Err(e) = client.close() {
                        debug!(database = %name, error = %format_postgres_error(&e),
                            "error closing database connection");
                    }
                    reachable.insert(name);
                }
                Err(e) => {
                    debug!(port = target.port, database = %name,
                        error = %format_postgres_error(&e), "database not connectable");
                }
            }
        }
        reachable
    }
}

impl InstanceProbe for PostgresProbe {
    fn probe(&self, target: &ProbeTarget<'_>) -> ConnectionAttempt {
        let mut client = match Self::connect(target, &self.admin_database) {
            Ok(client) => client,
            Err(e) => return ConnectionAttempt::Offline(format_postgres_error(&e)),
        };

        let result = self.collect(&mut client, target);
        if let Err(e) = client.close() {
            debug!(port = target.port, error = %format_postgres_error(&e),
                "error closing admin connection");
        }

        match result {
            Ok(facts) => ConnectionAttempt::Online(facts),
            Err(reason) => ConnectionAttempt::Offline(reason),
        }
    }
}
