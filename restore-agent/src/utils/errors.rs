//! Error types for the restore agent.

use std::fmt;
use thiserror::Error;

/// Stage of a restore run an error escaped from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePhase {
    MetaRestore,
    ShardUpload,
}

impl fmt::Display for RestorePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestorePhase::MetaRestore => f.write_str("metastore restore"),
            RestorePhase::ShardUpload => f.write_str("shard upload"),
        }
    }
}

#[derive(Error, Debug)]
pub enum RestoreError {
    /// Missing or contradictory inputs, raised before any network activity.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed magic, length or pair count on the wire. Never retried.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Dial, write or read failure on the control connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backup set on disk disagrees with the metadata the server returned.
    #[error("Consistency error: {0}")]
    Consistency(String),

    #[error("Archive format error: {0}")]
    ArchiveFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{phase} failed: {source}")]
    Phase {
        phase: RestorePhase,
        #[source]
        source: Box<RestoreError>,
    },
}

impl RestoreError {
    pub fn in_phase(self, phase: RestorePhase) -> Self {
        RestoreError::Phase {
            phase,
            source: Box::new(self),
        }
    }

    /// Only connection-level failures can succeed on a fresh attempt; local
    /// files, archive contents and server responses fail the same way again.
    pub fn is_transient(&self) -> bool {
        matches!(self, RestoreError::Transport(_))
    }

    /// The error underneath any phase context.
    pub fn root(&self) -> &RestoreError {
        match self {
            RestoreError::Phase { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn phase(&self) -> Option<RestorePhase> {
        match self {
            RestoreError::Phase { phase, .. } => Some(*phase),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, RestoreError>;
