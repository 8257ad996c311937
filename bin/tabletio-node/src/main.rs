//! TabletIO Node - Storage node daemon
//!
//! Opens the configured data directories, recovers their tablets and runs the
//! maintenance workers until interrupted.

use anyhow::{Result, bail};
use clap::Parser;
use std::path::Path;
use tabletio_common::{Config, DataDirConfig, StorageMedium};
use tabletio_storage::StorageEngine;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "tabletio-node")]
#[command(about = "TabletIO storage node")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/tabletio/node.toml")]
    config: String,

    /// Data directories as PATH or PATH:MEDIUM (hdd or ssd)
    #[arg(long)]
    dirs: Vec<String>,

    /// Host name used in directory path hashes
    #[arg(long, env = "TABLETIO_HOST")]
    host: Option<String>,

    /// Keep starting when some tablet metas fail to load
    #[arg(long)]
    ignore_load_tablet_failure: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn parse_dir(arg: &str) -> Result<DataDirConfig> {
    let (path, medium) = match arg.rsplit_once(':') {
        Some((path, "hdd")) => (path, StorageMedium::Hdd),
        Some((path, "ssd")) => (path, StorageMedium::Ssd),
        _ => (arg, StorageMedium::Hdd),
    };
    if path.is_empty() {
        bail!("empty data dir path in {:?}", arg);
    }
    Ok(DataDirConfig::new(path, medium))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config file if it exists
    let mut config: Config = if Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {}", e);
            Config::default()
        })
    } else {
        Config::default()
    };

    // Merge CLI args with config file (CLI takes precedence)
    if !args.dirs.is_empty() {
        config.storage.dirs = args
            .dirs
            .iter()
            .map(String::as_str)
            .map(parse_dir)
            .collect::<Result<_>>()?;
    }
    if args.ignore_load_tablet_failure {
        config.storage.ignore_load_tablet_failure = true;
    }
    let host = args.host.or(config.node.host.clone());
    let log_level = if args.log_level != "info" {
        args.log_level
    } else {
        config.logging.level.clone()
    };

    // Initialize logging
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| log_level.clone().into());
    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting TabletIO node");
    info!("Config file: {}", args.config);
    debug!("Effective storage config: {}", serde_json::to_string(&config.storage)?);

    if config.storage.dirs.is_empty() {
        error!("No data dirs specified. Use --dirs or configure in {}", args.config);
        std::process::exit(1);
    }
    for dir in &config.storage.dirs {
        info!("Data dir: {} ({})", dir.path.display(), dir.medium);
    }

    let engine = match StorageEngine::open(config.storage, host) {
        Ok(engine) => engine,
        Err(e) => {
            error!("Failed to open storage engine: {}", e);
            std::process::exit(1);
        }
    };

    let reports = match engine.load() {
        Ok(reports) => reports,
        Err(e) => {
            error!("Failed to load data dirs: {}", e);
            std::process::exit(1);
        }
    };
    for (dir, report) in engine.stores().iter().zip(&reports) {
        info!(
            "{}: {} tablets, {} failed, {}/{} rowset errors{}",
            dir.path().display(),
            report.tablet_ids.len(),
            report.failed_tablets.len(),
            report.rowset_errors,
            report.rowset_total,
            if report.walk_timed_out { " (walk retried after timeout)" } else { "" }
        );
    }

    engine.start_bg_workers()?;
    info!("Node ready with {} tablets", engine.tablet_manager().tablet_count());

    tokio::signal::ctrl_c().await.ok();
    info!("Shutting down...");

    // Joining the workers blocks
    tokio::task::spawn_blocking(move || engine.stop()).await?;

    info!("Node shut down gracefully");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dir() {
        let dir = parse_dir("/data1:ssd").unwrap();
        assert_eq!(dir.path, Path::new("/data1"));
        assert_eq!(dir.medium, StorageMedium::Ssd);

        let dir = parse_dir("/data2").unwrap();
        assert_eq!(dir.path, Path::new("/data2"));
        assert_eq!(dir.medium, StorageMedium::Hdd);

        let dir = parse_dir("/mnt/a:b").unwrap();
        assert_eq!(dir.path, Path::new("/mnt/a:b"));

        assert!(parse_dir(":ssd").is_err());
    }
}
