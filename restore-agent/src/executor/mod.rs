//! Restore executor - drives a live restore from a backup directory.
//!
//! The run is linear and cannot be resumed:
//! 1. metastore restore: the newest snapshot is pushed to the snapshotter and
//!    the response yields the legacy-to-destination shard ID map;
//! 2. shard upload: every archive of the source database is streamed, one
//!    connection per archive, with its entries renamed for the destination.
//!
//! The first error in either phase ends the run.

use crate::archive::ShardArchive;
use crate::config::RestoreConfig;
use crate::fs::{latest_metadata_snapshot, shard_archives};
use crate::protocol::frame::{decode_meta_frame, decode_meta_response};
use crate::protocol::RestoreRequest;
use crate::remap::ShardIdMap;
use crate::transfer::progress::format_bytes;
use crate::transfer::{Connector, TcpConnector, UploadTransport};
use crate::{RestoreError, RestorePhase, Result};
use bytes::Bytes;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Restore execution result
#[derive(Debug)]
pub struct RestoreSummary {
    pub metadata_snapshot: PathBuf,
    pub shard_map: ShardIdMap,
    pub shards: Vec<ShardUploadReport>,
    pub duration: Duration,
}

/// One uploaded shard archive.
#[derive(Debug, Clone)]
pub struct ShardUploadReport {
    pub archive: PathBuf,
    pub legacy_shard_id: u64,
    pub destination_shard_id: u64,
    pub bytes_sent: u64,
    pub attempts: u32,
}

/// Main restore executor
pub struct RestoreExecutor<C> {
    config: RestoreConfig,
    transport: UploadTransport<C>,
}

impl RestoreExecutor<TcpConnector> {
    /// Executor talking to the configured host over TCP.
    pub fn over_tcp(config: RestoreConfig) -> Self {
        let connector = TcpConnector::new(config.host());
        Self::new(config, connector)
    }
}

impl<C: Connector> RestoreExecutor<C> {
    pub fn new(config: RestoreConfig, connector: C) -> Self {
        let transport = UploadTransport::new(connector, *config.retry());
        Self { config, transport }
    }

    pub fn config(&self) -> &RestoreConfig {
        &self.config
    }

    /// Run both phases in order.
    pub async fn execute(&self) -> Result<RestoreSummary> {
        let start_time = Instant::now();

        info!(
            "Starting restore of {} into {} from {}",
            self.config.source_database(),
            self.config.destination_database(),
            self.config.backup_dir().display()
        );

        let (metadata_snapshot, shard_map) = self
            .restore_metadata()
            .await
            .map_err(|e| e.in_phase(RestorePhase::MetaRestore))?;

        info!("Executing shard upload");
        let shards = self
            .upload_shards(&shard_map)
            .await
            .map_err(|e| e.in_phase(RestorePhase::ShardUpload))?;

        let duration = start_time.elapsed();
        let total_bytes: u64 = shards.iter().map(|s| s.bytes_sent).sum();
        info!(
            "Restore complete: {} shard(s), {} streamed in {:.1}s",
            shards.len(),
            format_bytes(total_bytes),
            duration.as_secs_f64()
        );

        Ok(RestoreSummary {
            metadata_snapshot,
            shard_map,
            shards,
            duration,
        })
    }

    /// Push the newest metastore snapshot and decode the shard ID map the
    /// server answers with.
    pub async fn restore_metadata(&self) -> Result<(PathBuf, ShardIdMap)> {
        let snapshot = latest_metadata_snapshot(self.config.backup_dir())?;
        info!("Using metastore snapshot: {}", snapshot.display());

        let frame = Bytes::from(tokio::fs::read(&snapshot).await?);
        let metastore = decode_meta_frame(&frame)?;

        let request = RestoreRequest::meta_store_update(
            self.config.destination_database(),
            self.config.retention(),
            metastore.len(),
        );
        let receipt = self.transport.upload(&request, &metastore).await?;

        let shard_map = decode_meta_response(&receipt.ack)?;
        info!("Metastore updated, {} shard ID mapping(s) returned", shard_map.len());
        debug!("Shard ID map: {:?}", shard_map.pairs());

        Ok((snapshot, shard_map))
    }

    /// Stream every shard archive of the source database, one at a time.
    pub async fn upload_shards(&self, shard_map: &ShardIdMap) -> Result<Vec<ShardUploadReport>> {
        let backup_dir = self.config.backup_dir();
        let mut archives = shard_archives(backup_dir, self.config.source_database())?;

        if let Some(shard) = self.config.shard() {
            archives.retain(|a| a.shard_id == shard);
            if archives.is_empty() {
                return Err(RestoreError::Consistency(format!(
                    "no backup files for shard {} of {} in {}",
                    shard,
                    self.config.source_database(),
                    backup_dir.display()
                )));
            }
        }

        info!("Restoring {} shard archive(s) from {}", archives.len(), backup_dir.display());

        let destination_database = self.config.destination_database();
        let mut reports = Vec::with_capacity(archives.len());

        for file in archives {
            let destination_shard_id = shard_map.require(file.shard_id)?;
            info!(
                "Uploading {} (shard {} -> {})",
                file.path.display(),
                file.shard_id,
                destination_shard_id
            );

            let payload = ShardArchive::new(&file.path, destination_database, destination_shard_id);
            let request = RestoreRequest::shard_update(destination_database, destination_shard_id);
            let receipt = self.transport.upload(&request, &payload).await?;

            reports.push(ShardUploadReport {
                archive: file.path,
                legacy_shard_id: file.shard_id,
                destination_shard_id,
                bytes_sent: receipt.bytes_sent,
                attempts: receipt.attempts,
            });
        }

        Ok(reports)
    }
}
