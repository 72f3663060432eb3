//! Reportable projection of an instance and the checkin payload built from it.

use serde::{Deserialize, Serialize};

use crate::model::InstanceRecord;

/// Remote parameter names, in call order.
pub const PARAM_HOST: &str = "sHost";
pub const PARAM_NAME: &str = "sHerd";
pub const PARAM_PORT: &str = "nPort";
pub const PARAM_VERSION: &str = "sVer";
pub const PARAM_ONLINE: &str = "bOnline";
pub const PARAM_DATA_DIR: &str = "sDataDir";
pub const PARAM_MASTER_HOST: &str = "sMasterHost";
pub const PARAM_REPLAY_POSITION: &str = "nXlog";

/// The subset of an [`InstanceRecord`] the registry tracks, plus the host
/// identity. This is also what the snapshot cache stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Projection {
    pub host: String,
    pub name: String,
    pub port: u16,
    pub version: Option<String>,
    pub online: bool,
    pub data_directory: String,
    pub master_host: Option<String>,
    pub replay_position: Option<i64>,
}

impl Projection {
    pub fn from_record(host: &str, record: &InstanceRecord) -> Self {
        Self {
            host: host.to_string(),
            name: record.name.clone(),
            port: record.port,
            version: record.version.clone(),
            online: record.online,
            data_directory: record.data_directory.to_string_lossy().into_owned(),
            master_host: record.master_host.clone(),
            replay_position: record.replay_position,
        }
    }

    /// Payload carrying every field.
    pub fn full_payload(&self) -> CheckinPayload {
        let mut payload = self.identity_payload();
        payload.push(PARAM_VERSION, ParamValue::Text(self.version.clone()));
        payload.push(PARAM_ONLINE, ParamValue::Bool(self.online));
        payload.push(PARAM_DATA_DIR, ParamValue::Text(Some(self.data_directory.clone())));
        payload.push(PARAM_MASTER_HOST, ParamValue::Text(self.master_host.clone()));
        payload.push(PARAM_REPLAY_POSITION, ParamValue::BigInt(self.replay_position));
        payload
    }

    /// Payload carrying identity plus every field that differs from `prior`.
    pub fn delta_payload(&self, prior: &Projection) -> CheckinPayload {
        let mut payload = self.identity_payload();
        if self.version != prior.version {
            payload.push(PARAM_VERSION, ParamValue::Text(self.version.clone()));
        }
        if self.online != prior.online {
            payload.push(PARAM_ONLINE, ParamValue::Bool(self.online));
        }
        if self.data_directory != prior.data_directory {
            payload.push(PARAM_DATA_DIR, ParamValue::Text(Some(self.data_directory.clone())));
        }
        if self.master_host != prior.master_host {
            payload.push(PARAM_MASTER_HOST, ParamValue::Text(self.master_host.clone()));
        }
        if self.replay_position != prior.replay_position {
            payload.push(PARAM_REPLAY_POSITION, ParamValue::BigInt(self.replay_position));
        }
        payload
    }

    fn identity_payload(&self) -> CheckinPayload {
        let mut payload = CheckinPayload::default();
        payload.push(PARAM_HOST, ParamValue::Text(Some(self.host.clone())));
        payload.push(PARAM_NAME, ParamValue::Text(Some(self.name.clone())));
        payload.push(PARAM_PORT, ParamValue::Int(i32::from(self.port)));
        payload
    }
}

/// Typed value of one named parameter. `None` is sent as SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(Option<String>),
    Int(i32),
    BigInt(Option<i64>),
    Bool(bool),
}

impl ParamValue {
    /// SQL type the value is bound as.
    pub fn sql_type(&self) -> &'static str {
        match self {
            ParamValue::Text(_) => "text",
            ParamValue::Int(_) => "integer",
            ParamValue::BigInt(_) => "bigint",
            ParamValue::Bool(_) => "boolean",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckinParam {
    pub name: &'static str,
    pub value: ParamValue,
}

/// Named parameters for one checkin call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckinPayload {
    params: Vec<CheckinParam>,
}

impl CheckinPayload {
    /// Number of identity parameters every payload starts with.
    pub const IDENTITY_LEN: usize = 3;

    fn push(&mut self, name: &'static str, value: ParamValue) {
        self.params.push(CheckinParam { name, value });
    }

    pub fn params(&self) -> &[CheckinParam] {
        &self.params
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.params.iter().map(|p| p.name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.iter().find(|p| p.name == name).map(|p| &p.value)
    }

    /// True when the payload carries nothing beyond host, name and port.
    pub fn is_identity_only(&self) -> bool {
        self.params.len() <= Self::IDENTITY_LEN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use std::collections::BTreeSet;
    use std::path::PathBuf;

    fn projection() -> Projection {
        Projection {
            host: "db01".to_string(),
            name: "main".to_string(),
            port: 5432,
            version: Some("13.4".to_string()),
            online: true,
            data_directory: "/var/lib/postgresql/13/main".to_string(),
            master_host: None,
            replay_position: Some(1000),
        }
    }

    #[test]
    fn test_from_record_copies_reported_fields() {
        let record = InstanceRecord {
            name: "replica".to_string(),
            port: 5433,
            user: "postgres".to_string(),
            role: Role::Slave,
            online: false,
            version: Some("12".to_string()),
            data_directory: PathBuf::from("/srv/replica"),
            invalid: false,
            master_host: Some("10.0.0.5".to_string()),
            master_port: Some(5433),
            replay_position: None,
            databases: BTreeSet::new(),
            error: Some("connection refused".to_string()),
        };

        let p = Projection::from_record("db01", &record);
        assert_eq!(p.host, "db01");
        assert_eq!(p.name, "replica");
        assert_eq!(p.port, 5433);
        assert_eq!(p.data_directory, "/srv/replica");
        assert_eq!(p.master_host.as_deref(), Some("10.0.0.5"));
        assert!(!p.online);
    }

    #[test]
    fn test_full_payload_has_every_param() {
        let payload = projection().full_payload();
        assert_eq!(
            payload.names(),
            vec![
                PARAM_HOST,
                PARAM_NAME,
                PARAM_PORT,
                PARAM_VERSION,
                PARAM_ONLINE,
                PARAM_DATA_DIR,
                PARAM_MASTER_HOST,
                PARAM_REPLAY_POSITION
            ]
        );
        assert_eq!(payload.get(PARAM_PORT), Some(&ParamValue::Int(5432)));
        assert_eq!(payload.get(PARAM_MASTER_HOST), Some(&ParamValue::Text(None)));
        assert!(!payload.is_identity_only());
    }

    #[test]
    fn test_delta_of_identical_projection_is_identity_only() {
        let p = projection();
        let payload = p.delta_payload(&p.clone());
        assert!(payload.is_identity_only());
        assert_eq!(payload.names(), vec![PARAM_HOST, PARAM_NAME, PARAM_PORT]);
    }

    #[test]
    fn test_delta_carries_changed_fields_only() {
        let prior = projection();
        let current = Projection {
            online: false,
            replay_position: None,
            ..projection()
        };

        let payload = current.delta_payload(&prior);
        assert_eq!(
            payload.names(),
            vec![PARAM_HOST, PARAM_NAME, PARAM_PORT, PARAM_ONLINE, PARAM_REPLAY_POSITION]
        );
        assert_eq!(payload.get(PARAM_ONLINE), Some(&ParamValue::Bool(false)));
        assert_eq!(payload.get(PARAM_REPLAY_POSITION), Some(&ParamValue::BigInt(None)));
    }

    #[test]
    fn test_projection_round_trips_through_json() {
        let p = projection();
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(serde_json::from_str::<Projection>(&json).unwrap(), p);
    }
}
