//! Remote registry: the stored procedure receiving checkins.

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use postgres::types::ToSql;
use postgres::{Client, NoTls};
use regex::Regex;
use tracing::trace;

use super::projection::{CheckinPayload, ParamValue};
use crate::util::format_postgres_error;

/// Default checkin procedure.
pub const DEFAULT_PROCEDURE: &str = "utility.sp_instance_checkin";

static PROCEDURE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$")
        .expect("procedure pattern is valid")
});

/// True if `name` is a plain, optionally schema-qualified SQL identifier.
///
/// The procedure name is spliced into SQL text, so nothing else is accepted.
pub fn is_valid_procedure_name(name: &str) -> bool {
    PROCEDURE_PATTERN.is_match(name)
}

/// Error type for registry calls.
#[derive(Debug)]
pub enum RegistryError {
    /// Connecting to the registry database failed.
    Connect(String),
    /// The checkin call itself failed.
    Checkin(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::Connect(msg) => write!(f, "registry connection: {}", msg),
            RegistryError::Checkin(msg) => write!(f, "registry checkin: {}", msg),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Receiver of checkin calls.
pub trait Registry {
    /// Performs one idempotent upsert keyed by host, name and port.
    fn checkin(&mut self, payload: &CheckinPayload) -> Result<(), RegistryError>;
}

/// Builds `SELECT <procedure>(p1 := $1::type, ...)` for `payload`.
///
/// Placeholders carry the bound type explicitly. The server then resolves the
/// procedure through implicit casts, so a procedure declaring `nXlog numeric`
/// or `nPort bigint` accepts the call.
pub fn build_checkin_sql(procedure: &str, payload: &CheckinPayload) -> String {
    let args: Vec<String> = payload
        .params()
        .iter()
        .enumerate()
        .map(|(i, p)| format!("{} := ${}::{}", p.name, i + 1, p.value.sql_type()))
        .collect();
    format!("SELECT {}({})", procedure, args.join(", "))
}

/// Connection parameters for the registry database.
#[derive(Debug, Clone)]
pub struct RegistryTarget<'a> {
    /// Empty or `localhost` means the local Unix socket in `socket_dir`.
    pub host: &'a str,
    pub port: u16,
    pub user: &'a str,
    pub database: &'a str,
    pub socket_dir: &'a Path,
}

/// Registry reached through a PostgreSQL connection.
pub struct PostgresRegistry {
    client: Client,
    procedure: String,
}

impl PostgresRegistry {
    pub fn connect(target: &RegistryTarget<'_>, procedure: &str) -> Result<Self, RegistryError> {
        let mut config = postgres::Config::new();
        if target.host.is_empty() || target.host == "localhost" {
            config.host_path(target.socket_dir);
        } else {
            config.host(target.host);
        }
        config
            .port(target.port)
            .user(target.user)
            .dbname(target.database);

        let client = config
            .connect(NoTls)
            .map_err(|e| RegistryError::Connect(format_postgres_error(&e)))?;

        Ok(Self {
            client,
            procedure: procedure.to_string(),
        })
    }

    pub fn close(self) -> Result<(), RegistryError> {
        self.client
            .close()
            .map_err(|e| RegistryError::Connect(format_postgres_error(&e)))
    }
}

impl Registry for PostgresRegistry {
    fn checkin(&mut self, payload: &CheckinPayload) -> Result<(), RegistryError> {
        let sql = build_checkin_sql(&self.procedure, payload);
        let values: Vec<Box<dyn ToSql + Sync>> = payload
            .params()
            .iter()
            .map(|p| -> Box<dyn ToSql + Sync> {
                match &p.value {
                    ParamValue::Text(v) => Box::new(v.clone()),
                    ParamValue::Int(v) => Box::new(*v),
                    ParamValue::BigInt(v) => Box::new(*v),
                    ParamValue::Bool(v) => Box::new(*v),
                }
            })
            .collect();
        let params: Vec<&(dyn ToSql + Sync)> = values.iter().map(|v| &**v).collect();

        trace!(sql = %sql, "checkin");
        self.client
            .execute(sql.as_str(), &params)
            .map(|_| ())
            .map_err(|e| RegistryError::Checkin(format_postgres_error(&e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkin::projection::Projection;

    #[test]
    fn test_procedure_names() {
        assert!(is_valid_procedure_name("utility.sp_instance_checkin"));
        assert!(is_valid_procedure_name("sp_checkin"));
        assert!(!is_valid_procedure_name("a.b.c"));
        assert!(!is_valid_procedure_name("x(); DROP TABLE t; --"));
        assert!(!is_valid_procedure_name(""));
        assert!(!is_valid_procedure_name("1abc"));
    }

    #[test]
    fn test_checkin_sql_uses_named_notation() {
        let payload = Projection {
            host: "db01".to_string(),
            name: "main".to_string(),
            port: 5432,
            version: Some("13.4".to_string()),
            online: true,
            data_directory: "/srv".to_string(),
            master_host: None,
            replay_position: None,
        }
        .full_payload();

        assert_eq!(
            build_checkin_sql(DEFAULT_PROCEDURE, &payload),
            "SELECT utility.sp_instance_checkin(sHost := $1::text, sHerd := $2::text, \
             nPort := $3::integer, sVer := $4::text, bOnline := $5::boolean, \
             sDataDir := $6::text, sMasterHost := $7::text, nXlog := $8::bigint)"
        );
    }

    #[test]
    fn test_delta_sql_numbers_placeholders_densely() {
        let prior = Projection {
            host: "db01".to_string(),
            name: "main".to_string(),
            port: 5432,
            version: Some("13.4".to_string()),
            online: true,
            data_directory: "/srv".to_string(),
            master_host: None,
            replay_position: Some(10),
        };
        let current = Projection {
            replay_position: Some(20),
            ..prior.clone()
        };

        assert_eq!(
            build_checkin_sql("sp_checkin", &current.delta_payload(&prior)),
            "SELECT sp_checkin(sHost := $1::text, sHerd := $2::text, nPort := $3::integer, \
             nXlog := $4::bigint)"
        );
    }
}
