//! Typed TOML configuration.
//!
//! Every table and field is optional; a missing file at the default location
//! means built-in defaults. Unknown keys are rejected so typos surface early.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checkin::{DEFAULT_PROCEDURE, is_valid_procedure_name};
use crate::discovery::{DEFAULT_CLUSTER_TOOL, DEFAULT_SOCKET_DIRS};
use crate::model::DEFAULT_PORT;
use crate::resolver::DEFAULT_SOCKET_DIR;

/// Location read when no `--config` is given.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/pgherd/report.toml";

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Read(PathBuf, io::Error),
    Parse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(path, e) => {
                write!(f, "failed to read config file {}: {}", path.display(), e)
            }
            ConfigError::Parse(path, e) => {
                write!(f, "failed to parse config file {}: {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Host identity reported to the registry; local hostname when unset.
    pub host_name: Option<String>,
    pub registry: RegistryConfig,
    pub discovery: DiscoveryConfig,
    pub cache: CacheConfig,
}

/// Where checkins are sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RegistryConfig {
    /// Empty means the local Unix socket.
    pub host: String,
    pub port: u16,
    pub user: String,
    pub database: String,
    pub procedure: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            user: "util_user".to_string(),
            database: "utility".to_string(),
            procedure: DEFAULT_PROCEDURE.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    pub socket_dirs: Vec<PathBuf>,
    /// Cluster manager listing command, looked up on `PATH`.
    pub cluster_tool: String,
    /// Database used for the per-instance live probe.
    pub admin_database: String,
    /// Connects as this user instead of the instance owner.
    pub connect_user: Option<String>,
    /// Socket directory for instances whose lock file was not found.
    pub default_socket_dir: PathBuf,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            socket_dirs: DEFAULT_SOCKET_DIRS.iter().map(PathBuf::from).collect(),
            cluster_tool: DEFAULT_CLUSTER_TOOL.to_string(),
            admin_database: "template1".to_string(),
            connect_user: None,
            default_socket_dir: PathBuf::from(DEFAULT_SOCKET_DIR),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding one snapshot file per reported instance.
    pub dir: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/var/tmp/pgherd"),
        }
    }
}

impl Config {
    /// Loads and validates the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.into(), e))?;
        let parsed: Self =
            toml::from_str(&content).map_err(|e| ConfigError::Parse(path.into(), e))?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Loads `explicit_path` if given (it must exist), otherwise the default
    /// location if present, otherwise built-in defaults.
    pub fn discover(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let default_path = Path::new(DEFAULT_CONFIG_PATH);
        if default_path.exists() {
            return Self::load(default_path);
        }

        info!(path = DEFAULT_CONFIG_PATH, "no config file, using defaults");
        Ok(Self::default())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.registry.port == 0 {
            return Err(ConfigError::Invalid("registry.port must be non-zero".to_string()));
        }
        if self.registry.user.is_empty() {
            return Err(ConfigError::Invalid("registry.user must not be empty".to_string()));
        }
        if self.registry.database.is_empty() {
            return Err(ConfigError::Invalid(
                "registry.database must not be empty".to_string(),
            ));
        }
        if !is_valid_procedure_name(&self.registry.procedure) {
            return Err(ConfigError::Invalid(format!(
                "registry.procedure `{}` is not a valid identifier",
                self.registry.procedure
            )));
        }
        if let Some(dir) = self.discovery.socket_dirs.iter().find(|d| d.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "discovery.socket_dirs contains an empty path ({:?})",
                dir
            )));
        }
        if self.discovery.admin_database.is_empty() {
            return Err(ConfigError::Invalid(
                "discovery.admin_database must not be empty".to_string(),
            ));
        }
        if self.discovery.default_socket_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid(
                "discovery.default_socket_dir must not be empty".to_string(),
            ));
        }
        if self.cache.dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("cache.dir must not be empty".to_string()));
        }
        if let Some(host) = &self.host_name
            && host.trim().is_empty()
        {
            return Err(ConfigError::Invalid("host_name must not be blank".to_string()));
        }
        Ok(())
    }
}
