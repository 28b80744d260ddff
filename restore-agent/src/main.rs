//! Restore Agent - Main entry point
//!
//! Restores a backup into a running cluster over the snapshotter protocol.

use anyhow::Result;
use clap::Parser;
use restore_agent::config::Settings;
use restore_agent::{utils, RestoreExecutor, RestoreOptions};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory holding the backup files
    #[arg(value_name = "PATH")]
    path: Option<PathBuf>,

    /// Snapshotter address (host:port)
    #[arg(long)]
    host: Option<String>,

    /// Metastore directory (accepted for compatibility, unused by live restore)
    #[arg(long)]
    metadir: Option<PathBuf>,

    /// Data directory (accepted for compatibility, unused by live restore)
    #[arg(long)]
    datadir: Option<PathBuf>,

    /// Destination database
    #[arg(long)]
    database: Option<String>,

    /// Database the backup was taken from (defaults to --database)
    #[arg(long)]
    origindb: Option<String>,

    /// Retention policy
    #[arg(long)]
    retention: Option<String>,

    /// Restore only the archive of this shard ID (requires --retention)
    #[arg(long)]
    shard: Option<String>,

    /// Path to settings file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load settings
    let settings = match &args.config {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&settings.log.level);
    utils::logger::init(log_level)?;

    let options = RestoreOptions {
        backup_dir: args.path,
        host: args.host.or(Some(settings.server.host.clone())),
        metadir: args.metadir,
        datadir: args.datadir,
        database: args.database,
        source_database: args.origindb,
        retention: args.retention,
        shard: args.shard,
        retry: settings.retry.policy(),
    };

    let config = match options.validate() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{}", e);
            std::process::exit(1);
        }
    };

    if let Some(dir) = config.metadir().or(config.datadir()) {
        tracing::debug!("Ignoring local directory {} for live restore", dir.display());
    }

    tracing::info!(
        "Starting restore-agent v{} against {}",
        env!("CARGO_PKG_VERSION"),
        config.host()
    );

    let executor = RestoreExecutor::over_tcp(config);
    match executor.execute().await {
        Ok(summary) => {
            tracing::info!(
                "Restored {} shard(s) using {}",
                summary.shards.len(),
                summary.metadata_snapshot.display()
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("error: {}", e);
            std::process::exit(1);
        }
    }
}
