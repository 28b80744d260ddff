//! Legacy-to-destination shard identifier table.
//!
//! Built once from the metastore update response and only read afterwards,
//! so it can be shared across shard uploads without locking.

use crate::{RestoreError, Result};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShardIdMap {
    ids: HashMap<u64, u64>,
}

impl ShardIdMap {
    pub fn resolve(&self, legacy_id: u64) -> Option<u64> {
        self.ids.get(&legacy_id).copied()
    }

    /// Like [`resolve`](Self::resolve), but a missing mapping means the
    /// backup set and the server's metadata disagree.
    pub fn require(&self, legacy_id: u64) -> Result<u64> {
        self.resolve(legacy_id).ok_or_else(|| {
            RestoreError::Consistency(format!(
                "shard {} from the backup has no counterpart in the restored metastore",
                legacy_id
            ))
        })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Pairs in ascending legacy-ID order.
    pub fn pairs(&self) -> Vec<(u64, u64)> {
        let mut pairs: Vec<_> = self.ids.iter().map(|(k, v)| (*k, *v)).collect();
        pairs.sort_unstable();
        pairs
    }
}

impl FromIterator<(u64, u64)> for ShardIdMap {
    /// Later pairs overwrite earlier ones with the same legacy ID.
    fn from_iter<I: IntoIterator<Item = (u64, u64)>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}
