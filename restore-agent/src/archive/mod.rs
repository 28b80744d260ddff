//! Shard archive streaming: path rewriting and the shard-update payload.

pub mod rewrite;

pub use rewrite::{rewrite_archive, rewrite_entry_name, ArchiveStats};

use crate::transfer::progress::format_bytes;
use crate::transfer::Payload;
use crate::Result;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWrite, BufReader};
use tracing::info;

/// A backup archive on disk, re-emitted under its destination database and
/// shard ID. The file is reopened for every upload attempt.
#[derive(Debug, Clone)]
pub struct ShardArchive {
    path: PathBuf,
    destination_database: String,
    destination_shard_id: u64,
}

impl ShardArchive {
    pub fn new(path: impl Into<PathBuf>, destination_database: impl Into<String>, destination_shard_id: u64) -> Self {
        Self {
            path: path.into(),
            destination_database: destination_database.into(),
            destination_shard_id,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn destination_shard_id(&self) -> u64 {
        self.destination_shard_id
    }
}

impl Payload for ShardArchive {
    async fn send<W>(&self, writer: W) -> Result<W>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let file = File::open(&self.path).await?;

        let (writer, stats) = rewrite_archive(BufReader::new(file), writer, |name| {
            rewrite_entry_name(name, &self.destination_database, self.destination_shard_id)
        })
        .await?;

        info!(
            "Streamed {} entries ({}) from {} as {}/*/{}",
            stats.entries,
            format_bytes(stats.payload_bytes),
            self.path.display(),
            self.destination_database,
            self.destination_shard_id
        );

        Ok(writer)
    }
}
