//! Utility modules for the restore agent.

pub mod errors;
pub mod logger;

pub use errors::{RestoreError, RestorePhase, Result};
