//! Change-detecting checkin reporter.
//!
//! For every valid instance the reporter compares the current [`Projection`]
//! with the last one the registry accepted (the snapshot cache) and calls the
//! registry only when something changed. The payload carries host, name and
//! port plus the changed fields. After a successful call the full projection
//! becomes the new snapshot; after a failed call the snapshot is left alone so
//! the next run diffs against the same baseline and retries.

mod cache;
mod projection;
mod registry;

pub use cache::{CacheError, SnapshotCache};
pub use projection::{
    CheckinParam, CheckinPayload, PARAM_DATA_DIR, PARAM_HOST, PARAM_MASTER_HOST, PARAM_NAME,
    PARAM_ONLINE, PARAM_PORT, PARAM_REPLAY_POSITION, PARAM_VERSION, ParamValue, Projection,
};
pub use registry::{
    DEFAULT_PROCEDURE, PostgresRegistry, Registry, RegistryError, RegistryTarget,
    build_checkin_sql, is_valid_procedure_name,
};

use std::fmt;

use tracing::{debug, error, info, warn};

use crate::model::InstanceRecord;

/// Per-instance reporting failure.
#[derive(Debug)]
pub enum ReportError {
    Registry(RegistryError),
    Cache(CacheError),
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Registry(e) => write!(f, "{}", e),
            ReportError::Cache(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ReportError {}

impl From<RegistryError> for ReportError {
    fn from(e: RegistryError) -> Self {
        ReportError::Registry(e)
    }
}

impl From<CacheError> for ReportError {
    fn from(e: CacheError) -> Self {
        ReportError::Cache(e)
    }
}

/// What happened to one instance during a reporting pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinOutcome {
    /// No readable version marker; never reported.
    SkippedInvalid,
    /// Nothing changed since the last accepted checkin.
    Unchanged,
    /// Registry accepted the payload and the snapshot was updated.
    Sent(CheckinPayload),
}

/// Counters for one reporting pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub sent: usize,
    pub unchanged: usize,
    pub skipped_invalid: usize,
    pub failed: usize,
}

impl ReportSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Reports resolved instances to a [`Registry`].
pub struct CheckinReporter<R: Registry> {
    registry: R,
    cache: SnapshotCache,
    host: String,
}

impl<R: Registry> CheckinReporter<R> {
    /// `host` is the identity reported for every instance on this machine.
    pub fn new(registry: R, cache: SnapshotCache, host: impl Into<String>) -> Self {
        Self {
            registry,
            cache,
            host: host.into(),
        }
    }

    /// Gives the registry back, e.g. to close its connection.
    pub fn into_registry(self) -> R {
        self.registry
    }

    /// Computes the payload for `record`, or `None` when nothing needs sending.
    pub fn pending_payload(&self, record: &InstanceRecord) -> Option<(Projection, CheckinPayload)> {
        let current = Projection::from_record(&self.host, record);
        let payload = match self.cache.load(&current.host, &current.name, current.port) {
            Some(prior) => current.delta_payload(&prior),
            None => current.full_payload(),
        };
        if payload.is_identity_only() {
            None
        } else {
            Some((current, payload))
        }
    }

    /// Reports one instance.
    ///
    /// A registry failure returns early without touching the snapshot. A
    /// snapshot write failure after an accepted call is returned as well; the
    /// next run then resends, which the upsert tolerates.
    pub fn report_one(&mut self, record: &InstanceRecord) -> Result<CheckinOutcome, ReportError> {
        if record.invalid {
            debug!(port = record.port, name = %record.name, "skipping invalid instance");
            return Ok(CheckinOutcome::SkippedInvalid);
        }

        let Some((current, payload)) = self.pending_payload(record) else {
            debug!(port = record.port, name = %record.name, "unchanged since last checkin");
            return Ok(CheckinOutcome::Unchanged);
        };

        debug!(
            port = record.port,
            name = %record.name,
            params = ?payload.names(),
            "sending checkin"
        );
        self.registry.checkin(&payload)?;
        self.cache.store(&current)?;

        Ok(CheckinOutcome::Sent(payload))
    }

    /// Reports every record, continuing past per-instance failures.
    pub fn report(&mut self, records: &[InstanceRecord]) -> ReportSummary {
        let mut summary = ReportSummary::default();

        for record in records {
            match self.report_one(record) {
                Ok(CheckinOutcome::Sent(_)) => summary.sent += 1,
                Ok(CheckinOutcome::Unchanged) => summary.unchanged += 1,
                Ok(CheckinOutcome::SkippedInvalid) => summary.skipped_invalid += 1,
                Err(ReportError::Cache(e)) => {
                    // The registry has the data; only the baseline is stale.
                    warn!(port = record.port, name = %record.name, error = %e,
                        "checkin sent but snapshot not saved");
                    summary.sent += 1;
                }
                Err(e) => {
                    error!(port = record.port, name = %record.name, error = %e, "checkin failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            sent = summary.sent,
            unchanged = summary.unchanged,
            skipped_invalid = summary.skipped_invalid,
            failed = summary.failed,
            "checkin pass complete"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Role;
    use std::collections::BTreeSet;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    /// Registry recording payloads; fails while `fail` is set.
    #[derive(Default)]
    struct RecordingRegistry {
        calls: Vec<CheckinPayload>,
        fail: bool,
    }

    impl Registry for RecordingRegistry {
        fn checkin(&mut self, payload: &CheckinPayload) -> Result<(), RegistryError> {
            if self.fail {
                return Err(RegistryError::Checkin(
                    "ERROR: function does not exist".to_string(),
                ));
            }
            self.calls.push(payload.clone());
            Ok(())
        }
    }

    fn new_reporter(cache_dir: &Path) -> CheckinReporter<RecordingRegistry> {
        CheckinReporter::new(RecordingRegistry::default(), SnapshotCache::new(cache_dir), "db01")
    }

    fn record() -> InstanceRecord {
        InstanceRecord {
            name: "main".to_string(),
            port: 5432,
            user: "postgres".to_string(),
            role: Role::Master,
            online: true,
            version: Some("13.4".to_string()),
            data_directory: PathBuf::from("/var/lib/postgresql/13/main"),
            invalid: false,
            master_host: None,
            master_port: None,
            replay_position: Some(1000),
            databases: BTreeSet::new(),
            error: None,
        }
    }

    #[test]
    fn test_first_run_sends_full_projection_then_nothing() {
        let dir = tempdir().unwrap();
        let mut reporter = new_reporter(dir.path());

        let first = reporter.report(&[record()]);
        assert_eq!(first.sent, 1);
        assert_eq!(reporter.registry.calls.len(), 1);
        assert_eq!(reporter.registry.calls[0].params().len(), 8);
        assert_eq!(
            reporter.cache.load("db01", "main", 5432),
            Some(Projection::from_record("db01", &record()))
        );

        let second = reporter.report(&[record()]);
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.sent, 0);
        assert_eq!(reporter.registry.calls.len(), 1);
    }

    #[test]
    fn test_online_flip_sends_identity_plus_online() {
        let dir = tempdir().unwrap();
        let mut reporter = new_reporter(dir.path());
        reporter.report(&[record()]);

        let offline = InstanceRecord {
            online: false,
            ..record()
        };
        let summary = reporter.report(&[offline]);

        assert_eq!(summary.sent, 1);
        assert_eq!(reporter.registry.calls.len(), 2);
        let payload = &reporter.registry.calls[1];
        assert_eq!(
            payload.names(),
            vec![PARAM_HOST, PARAM_NAME, PARAM_PORT, PARAM_ONLINE]
        );
        assert_eq!(payload.get(PARAM_ONLINE), Some(&ParamValue::Bool(false)));
        assert_eq!(payload.get(PARAM_HOST), Some(&ParamValue::Text(Some("db01".to_string()))));
    }

    #[test]
    fn test_snapshot_holds_full_projection_after_delta() {
        let dir = tempdir().unwrap();
        let mut reporter = new_reporter(dir.path());
        reporter.report(&[record()]);

        let moved = InstanceRecord {
            replay_position: Some(2000),
            ..record()
        };
        reporter.report(&[moved.clone()]);

        let stored = reporter.cache.load("db01", "main", 5432).unwrap();
        assert_eq!(stored, Projection::from_record("db01", &moved));
        assert_eq!(stored.version.as_deref(), Some("13.4"));
    }

    #[test]
    fn test_invalid_instances_are_never_sent() {
        let dir = tempdir().unwrap();
        let mut reporter = new_reporter(dir.path());

        let invalid = InstanceRecord {
            invalid: true,
            ..record()
        };
        let summary = reporter.report(&[invalid]);
        assert_eq!(summary.skipped_invalid, 1);
        assert!(reporter.registry.calls.is_empty());
        assert_eq!(reporter.cache.load("db01", "main", 5432), None);
    }

    #[test]
    fn test_failed_checkin_keeps_baseline_and_retries() {
        let dir = tempdir().unwrap();
        let mut reporter = new_reporter(dir.path());
        reporter.report(&[record()]);
        let baseline = reporter.cache.load("db01", "main", 5432);

        let offline = InstanceRecord {
            online: false,
            ..record()
        };
        reporter.registry.fail = true;
        let summary = reporter.report(&[offline.clone()]);
        assert_eq!(summary.failed, 1);
        assert!(!summary.is_success());
        assert_eq!(reporter.cache.load("db01", "main", 5432), baseline);

        reporter.registry.fail = false;
        let retry = reporter.report(&[offline]);
        assert_eq!(retry.sent, 1);
        assert_eq!(reporter.registry.calls.last().unwrap().names().len(), 4);
    }

    #[test]
    fn test_failure_on_one_instance_does_not_stop_others() {
        let dir = tempdir().unwrap();
        let registry = RecordingRegistry {
            fail: true,
            ..Default::default()
        };
        let mut reporter = CheckinReporter::new(registry, SnapshotCache::new(dir.path()), "db01");

        let replica = InstanceRecord {
            name: "replica".to_string(),
            port: 5433,
            invalid: true,
            ..record()
        };
        let summary = reporter.report(&[record(), replica]);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped_invalid, 1);
    }

    #[test]
    fn test_pending_payload_is_none_when_unchanged() {
        let dir = tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path());
        cache.store(&Projection::from_record("db01", &record())).unwrap();

        let reporter = CheckinReporter::new(RecordingRegistry::default(), cache, "db01");
        assert_eq!(reporter.pending_payload(&record()), None);
    }

    #[test]
    fn test_snapshots_are_keyed_by_host() {
        let dir = tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path());
        cache.store(&Projection::from_record("db01", &record())).unwrap();

        let reporter = CheckinReporter::new(RecordingRegistry::default(), cache, "db02");
        let (_, payload) = reporter.pending_payload(&record()).unwrap();
        assert_eq!(payload.params().len(), 8);
    }
}
