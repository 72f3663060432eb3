//! Utility helpers shared by discovery, resolution and reporting.

mod passwd;

pub use passwd::{UserResolver, parse_passwd};

use std::path::Path;
use std::process;

use crate::traits::FileSystem;

/// Returns the machine hostname.
///
/// Asks the `hostname` command first, then falls back to `/etc/hostname`.
/// Returns an empty string when neither works.
pub fn local_hostname(fs: &impl FileSystem) -> String {
    choose_hostname(hostname_from_command(), fs)
}

fn hostname_from_command() -> Option<String> {
    let out = process::Command::new("hostname").output().ok()?;
    if !out.status.success() {
        return None;
    }
    String::from_utf8(out.stdout).ok()
}

/// Picks the command's answer if non-blank, else the first line of `/etc/hostname`.
fn choose_hostname(from_command: Option<String>, fs: &impl FileSystem) -> String {
    from_command
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            fs.read_to_string(Path::new("/etc/hostname"))
                .ok()
                .and_then(|s| s.lines().next().map(|l| l.trim().to_string()))
        })
        .unwrap_or_default()
}

/// Formats PostgreSQL error message for display.
pub fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("No such file or directory") {
            "no socket listening".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else if msg.contains("does not exist") {
            msg.split("FATAL:")
                .last()
                .unwrap_or(&msg)
                .trim()
                .to_string()
        } else {
            msg
        }
    }
}
