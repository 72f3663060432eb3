//! pgherd-core — local PostgreSQL instance discovery and registry checkin.
//!
//! Provides:
//! - `model` — seeds and resolved instance records
//! - `traits` — filesystem abstraction (real or mock)
//! - `mock` — in-memory filesystem and canned host layouts for tests
//! - `discovery` — lock-file and cluster-manager detection, merged by port
//! - `resolver` — per-instance resolution from on-disk markers and a live connection
//! - `checkin` — change detection against cached snapshots and the remote checkin call
//! - `config` — typed TOML configuration
//! - `util` — passwd lookup, hostname, PostgreSQL error formatting

pub mod checkin;
pub mod config;
pub mod discovery;
pub mod mock;
pub mod model;
pub mod resolver;
pub mod traits;
pub mod util;
