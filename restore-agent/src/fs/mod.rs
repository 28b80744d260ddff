//! File system helpers for reading backup directories.

pub mod discovery;

pub use discovery::{latest_metadata_snapshot, shard_archives, ShardArchiveFile};
