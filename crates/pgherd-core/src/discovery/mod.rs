//! Local PostgreSQL instance discovery.
//!
//! Two independent strategies produce [`Seed`]s:
//!
//! - [`sockets`]: `.s.PGSQL.<port>.lock` files in well-known socket
//!   directories (running instances only)
//! - [`clusters`]: the cluster manager's listing (all managed clusters,
//!   running or not)
//!
//! Seeds are merged by port, cluster-manager fields overlaying lock-file
//! fields, and each merged seed is handed to the
//! [`AttributeResolver`](crate::resolver::AttributeResolver) exactly once.
//! Finding nothing is a valid outcome.

pub mod clusters;
pub mod sockets;

pub use clusters::{
    ClusterLister, CommandClusterLister, DEFAULT_CLUSTER_TOOL, find_in_path, parse_cluster_listing,
};
pub use sockets::{is_lock_file, parse_lock_file, scan_socket_dirs};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::model::{InstanceRecord, Seed};
use crate::resolver::{AttributeResolver, InstanceProbe};
use crate::traits::FileSystem;
use crate::util::UserResolver;

/// Default directories searched for socket lock files.
pub const DEFAULT_SOCKET_DIRS: &[&str] = &["/tmp", "/var/run/postgresql"];

/// Merges socket-derived and cluster-manager-derived seeds into one seed per
/// port, ordered by port.
pub fn merge_seeds(socket_seeds: Vec<Seed>, cluster_seeds: Vec<Seed>) -> Vec<Seed> {
    let mut by_port: BTreeMap<u16, Seed> = BTreeMap::new();

    for seed in socket_seeds.into_iter().chain(cluster_seeds) {
        let merged = match by_port.remove(&seed.port) {
            Some(existing) => existing.overlay(seed),
            None => seed,
        };
        by_port.insert(merged.port, merged);
    }

    by_port.into_values().collect()
}

/// Runs the detection strategies and resolves what they find.
pub struct DiscoveryEngine<F: FileSystem> {
    fs: F,
    socket_dirs: Vec<PathBuf>,
    cluster_lister: Option<Box<dyn ClusterLister>>,
    user_resolver: UserResolver,
}

impl<F: FileSystem> DiscoveryEngine<F> {
    /// Creates an engine scanning `socket_dirs` for lock files.
    ///
    /// Lock file owners are resolved through `/etc/passwd` read from `fs`.
    pub fn new(fs: F, socket_dirs: Vec<PathBuf>) -> Self {
        let mut user_resolver = UserResolver::new();
        if let Ok(passwd_content) = fs.read_to_string(Path::new("/etc/passwd")) {
            user_resolver.load_from_content(&passwd_content);
        }

        Self {
            fs,
            socket_dirs,
            cluster_lister: None,
            user_resolver,
        }
    }

    /// Enables the cluster-manager strategy.
    pub fn with_cluster_lister(mut self, lister: impl ClusterLister + 'static) -> Self {
        self.cluster_lister = Some(Box::new(lister));
        self
    }

    /// Returns the merged seed set, one seed per detected port.
    pub fn detect(&self) -> Vec<Seed> {
        let socket_seeds = scan_socket_dirs(&self.fs, &self.socket_dirs, &self.user_resolver);
        let cluster_seeds = self.cluster_seeds();
        debug!(
            sockets = socket_seeds.len(),
            clusters = cluster_seeds.len(),
            "detection strategies finished"
        );
        merge_seeds(socket_seeds, cluster_seeds)
    }

    fn cluster_seeds(&self) -> Vec<Seed> {
        let Some(lister) = &self.cluster_lister else {
            return Vec::new();
        };
        match lister.list_clusters() {
            Ok(Some(output)) => parse_cluster_listing(&output),
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "cluster listing failed, ignoring cluster manager");
                Vec::new()
            }
        }
    }

    /// Detects seeds and resolves each into an [`InstanceRecord`].
    pub fn discover<G, P>(&self, resolver: &AttributeResolver<G, P>) -> Vec<InstanceRecord>
    where
        G: FileSystem,
        P: InstanceProbe,
    {
        let seeds = self.detect();
        if seeds.is_empty() {
            info!("no PostgreSQL instances found");
            return Vec::new();
        }

        let records: Vec<InstanceRecord> =
            seeds.iter().map(|seed| resolver.resolve(seed)).collect();
        info!(
            instances = records.len(),
            online = records.iter().filter(|r| r.online).count(),
            "discovery complete"
        );
        records
    }
}
