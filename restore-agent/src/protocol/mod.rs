//! Control-connection protocol spoken to the remote snapshotter service.
//!
//! A connection starts with the [`MUX_HEADER`] byte (written by the
//! connector), then a one-byte [`RequestKind`] tag. Every kind except
//! [`RequestKind::ShardUpdate`] follows the tag with a newline-terminated JSON
//! [`RestoreRequest`]; shard updates carry only the 8-byte destination shard ID
//! before the raw archive bytes.

pub mod frame;

use crate::Result;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde_repr::{Deserialize_repr, Serialize_repr};

/// Byte identifying the snapshotter on a multiplexed listener.
pub const MUX_HEADER: u8 = 3;

/// Magic value opening metastore backups and metastore update responses.
pub const BACKUP_MAGIC_HEADER: u64 = 0x5959_0101;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum RequestKind {
    ShardBackup = 0,
    MetastoreBackup = 1,
    DatabaseInfo = 2,
    RetentionPolicyInfo = 3,
    ShardExport = 4,
    MetaStoreUpdate = 5,
    ShardUpdate = 6,
}

impl RequestKind {
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Shard updates skip the JSON header and are not acknowledged.
    pub fn has_structured_header(self) -> bool {
        self != RequestKind::ShardUpdate
    }

    pub fn expects_ack(self) -> bool {
        self != RequestKind::ShardUpdate
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestoreRequest {
    #[serde(rename = "Type")]
    pub kind: RequestKind,
    pub database: String,
    pub retention_policy: String,
    #[serde(rename = "ShardID")]
    pub shard_id: u64,
    pub upload_size: i64,
}

impl RestoreRequest {
    pub fn meta_store_update(database: &str, retention_policy: Option<&str>, upload_size: usize) -> Self {
        Self {
            kind: RequestKind::MetaStoreUpdate,
            database: database.to_string(),
            retention_policy: retention_policy.unwrap_or_default().to_string(),
            shard_id: 0,
            upload_size: upload_size as i64,
        }
    }

    pub fn shard_update(database: &str, destination_shard_id: u64) -> Self {
        Self {
            kind: RequestKind::ShardUpdate,
            database: database.to_string(),
            retention_policy: String::new(),
            shard_id: destination_shard_id,
            upload_size: 0,
        }
    }

    /// Number of payload bytes the peer will read, when the header declares it.
    pub fn expected_payload_len(&self) -> Option<u64> {
        if self.kind.has_structured_header() {
            u64::try_from(self.upload_size).ok()
        } else {
            None
        }
    }

    /// Everything written between the mux header and the payload.
    pub fn header_bytes(&self) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(64);
        buf.put_u8(self.kind.tag());

        if self.kind.has_structured_header() {
            let json = serde_json::to_vec(self)?;
            buf.put_slice(&json);
            buf.put_u8(b'\n');
        } else {
            buf.put_u64(self.shard_id);
        }

        Ok(buf.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_store_update_header() {
        let req = RestoreRequest::meta_store_update("restoreddb", Some("autogen"), 42);
        let header = req.header_bytes().unwrap();

        assert_eq!(header[0], 5);
        assert_eq!(*header.last().unwrap(), b'\n');

        let json: serde_json::Value = serde_json::from_slice(&header[1..header.len() - 1]).unwrap();
        assert_eq!(json["Type"], 5);
        assert_eq!(json["Database"], "restoreddb");
        assert_eq!(json["RetentionPolicy"], "autogen");
        assert_eq!(json["ShardID"], 0);
        assert_eq!(json["UploadSize"], 42);
        assert_eq!(req.expected_payload_len(), Some(42));
    }

    #[test]
    fn test_shard_update_header_has_no_json() {
        let req = RestoreRequest::shard_update("restoreddb", 105);
        let header = req.header_bytes().unwrap();

        assert_eq!(header.len(), 9);
        assert_eq!(header[0], RequestKind::ShardUpdate.tag());
        assert_eq!(&header[1..], &105u64.to_be_bytes());
        assert_eq!(req.expected_payload_len(), None);
        assert!(!req.kind.expects_ack());
    }

    #[test]
    fn test_request_kind_tags() {
        assert_eq!(RequestKind::ShardBackup.tag(), 0);
        assert_eq!(RequestKind::MetaStoreUpdate.tag(), 5);
        assert_eq!(RequestKind::ShardUpdate.tag(), 6);
        assert!(RequestKind::MetastoreBackup.expects_ack());
    }
}
