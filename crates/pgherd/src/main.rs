//! pgherd-report - discovers local PostgreSQL instances and checks them in
//! with a central registry.
//!
//! One invocation is one pass: detect, resolve, report changes, exit.
//! Intended to be run periodically (cron, systemd timer).

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Mutex;

use clap::Parser;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use pgherd_core::checkin::{CheckinReporter, PostgresRegistry, RegistryTarget, SnapshotCache};
use pgherd_core::config::Config;
use pgherd_core::discovery::{CommandClusterLister, DiscoveryEngine};
use pgherd_core::model::InstanceRecord;
use pgherd_core::resolver::{AttributeResolver, PostgresProbe};
use pgherd_core::traits::RealFs;
use pgherd_core::util::local_hostname;

const FAILURE_MESSAGE: &str = "Requested operation has failed. Please check log.";

/// PostgreSQL instance discovery and registry checkin.
#[derive(Parser)]
#[command(
    name = "pgherd-report",
    about = "Discover local PostgreSQL instances and report them to the registry",
    version
)]
struct Args {
    /// Configuration file. Defaults to /etc/pgherd/report.toml if present.
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    quiet: bool,

    /// Append log output to this file instead of stderr.
    #[arg(short = 'L', long = "log", value_name = "PATH")]
    log: Option<PathBuf>,

    /// Print discovered instances as JSON and exit without reporting.
    #[arg(long)]
    discover_only: bool,
}

/// Initializes the tracing subscriber with the appropriate log level.
/// Default level is INFO. Use -q for quiet mode (errors only).
fn init_logging(verbose: u8, quiet: bool, log: Option<&Path>) -> Result<(), String> {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["pgherd", "pgherd_core"] {
        let directive = format!("{}={}", target, level)
            .parse()
            .map_err(|e| format!("invalid log directive: {}", e))?;
        filter = filter.add_directive(directive);
    }

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match log {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| format!("cannot open log file {}: {}", path.display(), e))?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => builder.with_writer(std::io::stderr).init(),
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose, args.quiet, args.log.as_deref()) {
        eprintln!("{}", e);
        eprintln!("{}", FAILURE_MESSAGE);
        return ExitCode::FAILURE;
    }

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "pgherd-report failed");
            eprintln!("{}", FAILURE_MESSAGE);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), String> {
    let config = Config::discover(args.config.as_deref()).map_err(|e| e.to_string())?;
    debug!(?config, "configuration loaded");

    let host = match &config.host_name {
        Some(name) => name.clone(),
        None => local_hostname(&RealFs::new()),
    };
    let records = discover(&config, &host);

    if args.discover_only {
        let json = serde_json::to_string_pretty(&records)
            .map_err(|e| format!("failed to encode instances: {}", e))?;
        println!("{}", json);
        return Ok(());
    }

    report(&config, &host, &records)
}

fn discover(config: &Config, host: &str) -> Vec<InstanceRecord> {
    let discovery = &config.discovery;

    let resolver = AttributeResolver::new(
        RealFs::new(),
        PostgresProbe::new(discovery.admin_database.clone()),
        host,
    )
    .with_connect_user(discovery.connect_user.clone())
    .with_default_socket_dir(discovery.default_socket_dir.clone());

    let engine = DiscoveryEngine::new(RealFs::new(), discovery.socket_dirs.clone())
        .with_cluster_lister(CommandClusterLister::new(discovery.cluster_tool.clone()));

    engine.discover(&resolver)
}

fn report(config: &Config, host: &str, records: &[InstanceRecord]) -> Result<(), String> {
    if records.is_empty() {
        return Ok(());
    }
    check_host_identity(host)?;

    let registry_config = &config.registry;
    let target = RegistryTarget {
        host: &registry_config.host,
        port: registry_config.port,
        user: &registry_config.user,
        database: &registry_config.database,
        socket_dir: &config.discovery.default_socket_dir,
    };
    let registry =
        PostgresRegistry::connect(&target, &registry_config.procedure).map_err(|e| e.to_string())?;
    info!(
        host = %registry_config.host,
        port = registry_config.port,
        database = %registry_config.database,
        "connected to registry"
    );

    let mut reporter = CheckinReporter::new(registry, SnapshotCache::new(&config.cache.dir), host);
    let summary = reporter.report(records);

    if let Err(e) = reporter.into_registry().close() {
        warn!(error = %e, "failed to close registry connection");
    }

    if summary.is_success() {
        Ok(())
    } else {
        Err(format!("{} of {} checkins failed", summary.failed, records.len()))
    }
}

/// The registry keys instances by host, so an unknown hostname cannot be reported.
fn check_host_identity(host: &str) -> Result<(), String> {
    if host.trim().is_empty() {
        Err("local hostname unknown, set host_name in the configuration".to_string())
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_short_flags() {
        let args = Args::try_parse_from([
            "pgherd-report",
            "-c",
            "/etc/pgherd/alt.toml",
            "-vv",
            "-L",
            "/var/log/pgherd.log",
        ])
        .unwrap();
        assert_eq!(args.config, Some(PathBuf::from("/etc/pgherd/alt.toml")));
        assert_eq!(args.verbose, 2);
        assert_eq!(args.log, Some(PathBuf::from("/var/log/pgherd.log")));
        assert!(!args.discover_only);
        assert!(!args.quiet);
    }

    #[test]
    fn test_parses_discover_only() {
        let args = Args::try_parse_from(["pgherd-report", "--discover-only", "-q"]).unwrap();
        assert!(args.discover_only);
        assert!(args.quiet);
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_blank_host_identity_is_rejected() {
        assert!(check_host_identity("").is_err());
        assert!(check_host_identity("   ").is_err());
        assert!(check_host_identity("db01").is_ok());
    }

    #[test]
    fn test_rejects_unknown_flags() {
        assert!(Args::try_parse_from(["pgherd-report", "--daemon"]).is_err());
    }
}
