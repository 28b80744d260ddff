//! Restore Agent Library
//!
//! Live restore of a cluster backup: the metastore snapshot is pushed to the
//! remote snapshotter, which answers with new shard IDs, then every shard
//! archive is streamed with its internal paths rewritten for the destination.

pub mod archive;
pub mod config;
pub mod executor;
pub mod fs;
pub mod protocol;
pub mod remap;
pub mod transfer;
pub mod utils;

// Re-export commonly used types
pub use config::{RestoreConfig, RestoreOptions};
pub use executor::{RestoreExecutor, RestoreSummary};
pub use remap::ShardIdMap;
pub use utils::errors::{RestoreError, RestorePhase};
pub type Result<T> = std::result::Result<T, RestoreError>;
