//! Replication evidence from `recovery.conf`.
//!
//! Only the `primary_conninfo` directive matters here. Its presence makes the
//! instance a replica; the `host` and `port` keywords inside it name the
//! upstream. Nothing else in the file is interpreted.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::traits::FileSystem;

/// Name of the replication-configuration marker inside a data directory.
pub const RECOVERY_MARKER: &str = "recovery.conf";

const PRIMARY_CONNINFO: &str = "primary_conninfo";

static HOST_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bhost\s*=\s*([\w.\-]+)").expect("host pattern is valid")
});

static PORT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\bport\s*=\s*(\d+)").expect("port pattern is valid")
});

/// Upstream named by a `primary_conninfo` line. Either part may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub host: Option<String>,
    pub port: Option<u16>,
}

/// Extracts `host=` and `port=` tokens from a `primary_conninfo` line.
///
/// Whitespace around `=` is optional. A port that does not fit in `u16`
/// (or is 0) is treated as absent.
pub fn parse_primary_conninfo(line: &str) -> UpstreamTarget {
    let host = HOST_PATTERN
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string());
    let port = PORT_PATTERN
        .captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| crate::model::parse_port(m.as_str()));
    UpstreamTarget { host, port }
}

/// Scans recovery configuration content for the `primary_conninfo`
/// directive. The last occurrence wins, as it does for the server.
/// Commented-out directives do not count.
pub fn find_primary_conninfo(content: &str) -> Option<UpstreamTarget> {
    content
        .lines()
        .map(str::trim_start)
        .rfind(|line| line.starts_with(PRIMARY_CONNINFO))
        .map(parse_primary_conninfo)
}

/// Reads `recovery.conf` from `data_directory`.
///
/// Returns `None` when the file is missing, unreadable, or has no
/// `primary_conninfo` directive: all of these mean "no replication configured".
pub fn read_recovery_marker(
    fs: &impl FileSystem,
    data_directory: &Path,
) -> Option<UpstreamTarget> {
    if data_directory.as_os_str().is_empty() {
        return None;
    }
    let path = data_directory.join(RECOVERY_MARKER);
    if !fs.exists(&path) {
        return None;
    }
    match fs.read_to_string(&path) {
        Ok(content) => find_primary_conninfo(&content),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "recovery marker unreadable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockFs;

    #[test]
    fn test_parses_host_and_port() {
        let target =
            parse_primary_conninfo("primary_conninfo = 'host=10.0.0.5 port=5433 user=repl'");
        assert_eq!(target.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(target.port, Some(5433));
    }

    #[test]
    fn test_tolerates_spaces_around_equals() {
        let target =
            parse_primary_conninfo("primary_conninfo='host = db-01.example.com port =6432'");
        assert_eq!(target.host.as_deref(), Some("db-01.example.com"));
        assert_eq!(target.port, Some(6432));
    }

    #[test]
    fn test_missing_tokens_are_none() {
        let target = parse_primary_conninfo("primary_conninfo = 'user=repl application_name=x'");
        assert_eq!(target, UpstreamTarget::default());
    }

    #[test]
    fn test_hostaddr_is_not_host() {
        let target = parse_primary_conninfo("primary_conninfo = 'hostaddr=10.1.1.1 port=5432'");
        assert_eq!(target.host, None);
        assert_eq!(target.port, Some(5432));
    }

    #[test]
    fn test_oversized_port_is_ignored() {
        let target = parse_primary_conninfo("primary_conninfo = 'host=a port=99999'");
        assert_eq!(target.host.as_deref(), Some("a"));
        assert_eq!(target.port, None);
    }

    #[test]
    fn test_commented_directive_does_not_count() {
        let content = "standby_mode = 'on'\n# primary_conninfo = 'host=old'\n";
        assert_eq!(find_primary_conninfo(content), None);
    }

    #[test]
    fn test_last_directive_wins() {
        let content = "primary_conninfo = 'host=old-primary port=5432'\n\
                       standby_mode = 'on'\n\
                       primary_conninfo = 'host=new-primary port=5433'\n";
        let target = find_primary_conninfo(content).unwrap();
        assert_eq!(target.host.as_deref(), Some("new-primary"));
        assert_eq!(target.port, Some(5433));
    }

    #[test]
    fn test_last_directive_wins_from_marker_file() {
        let mut fs = MockFs::new();
        fs.add_file(
            "/srv/pg/recovery.conf",
            "primary_conninfo = 'host=old-primary'\n# primary_conninfo = 'host=ignored'\n\
             primary_conninfo = 'host=new-primary port=6432'\n",
        );
        let target = read_recovery_marker(&fs, Path::new("/srv/pg")).unwrap();
        assert_eq!(target.host.as_deref(), Some("new-primary"));
        assert_eq!(target.port, Some(6432));
    }

    #[test]
    fn test_unreadable_marker_means_no_replication() {
        let mut fs = MockFs::new();
        fs.add_unreadable_file("/srv/pg/recovery.conf");
        assert_eq!(read_recovery_marker(&fs, Path::new("/srv/pg")), None);
    }

    #[test]
    fn test_empty_data_directory_means_no_replication() {
        let mut fs = MockFs::new();
        fs.add_file("recovery.conf", "primary_conninfo = 'host=x'\n");
        assert_eq!(read_recovery_marker(&fs, Path::new("")), None);
    }
}
