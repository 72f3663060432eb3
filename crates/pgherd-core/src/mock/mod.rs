//! Mock filesystem implementations for testing.
//!
//! This module provides `MockFs` and pre-built host layouts for exercising
//! discovery and resolution without real lock files or data directories.

mod filesystem;
mod scenarios;

pub use filesystem::MockFs;
pub use scenarios::POSTGRES_UID;
