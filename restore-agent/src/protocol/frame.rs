//! Length-prefixed frames used by metastore snapshots and update responses.
//!
//! Snapshot frame: `magic u64 | length u64 | payload[length]`.
//! Update response: `magic u64 | pair count u64 | (old u64, new u64) * count`.
//! All integers are big-endian.

use super::BACKUP_MAGIC_HEADER;
use crate::remap::ShardIdMap;
use crate::{RestoreError, Result};
use bytes::{Buf, BufMut, Bytes, BytesMut};

const PREAMBLE_LEN: usize = 16;
const PAIR_LEN: usize = 16;

pub fn encode_meta_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(PREAMBLE_LEN + payload.len());
    buf.put_u64(BACKUP_MAGIC_HEADER);
    buf.put_u64(payload.len() as u64);
    buf.put_slice(payload);
    buf.freeze()
}

/// Returns the metastore payload carried by a snapshot frame. Bytes past the
/// declared length are ignored.
pub fn decode_meta_frame(frame: &Bytes) -> Result<Bytes> {
    let mut buf = frame.clone();
    let body_len = read_preamble(&mut buf, "metastore snapshot")?;

    let len = usize::try_from(body_len)
        .ok()
        .filter(|len| *len <= buf.remaining())
        .ok_or_else(|| {
            RestoreError::Protocol(format!(
                "metastore snapshot declares {} bytes but only {} follow the header",
                body_len,
                buf.remaining()
            ))
        })?;

    Ok(buf.split_to(len))
}

/// Server-side counterpart of [`decode_meta_response`].
pub fn encode_meta_response(map: &ShardIdMap) -> Bytes {
    let pairs = map.pairs();
    let mut buf = BytesMut::with_capacity(PREAMBLE_LEN + pairs.len() * PAIR_LEN);
    buf.put_u64(BACKUP_MAGIC_HEADER);
    buf.put_u64(pairs.len() as u64);
    for (old_id, new_id) in pairs {
        buf.put_u64(old_id);
        buf.put_u64(new_id);
    }
    buf.freeze()
}

pub fn decode_meta_response(response: &[u8]) -> Result<ShardIdMap> {
    let mut buf = response;
    let pair_count = read_preamble(&mut buf, "metastore update response")?;

    let expected = usize::try_from(pair_count)
        .ok()
        .and_then(|count| count.checked_mul(PAIR_LEN));
    if expected != Some(buf.remaining()) {
        return Err(RestoreError::Protocol(format!(
            "metastore update response declares {} shard ID pairs but carries {} pair bytes",
            pair_count,
            buf.remaining()
        )));
    }

    let mut pairs = Vec::with_capacity(buf.remaining() / PAIR_LEN);
    while buf.has_remaining() {
        let old_id = buf.get_u64();
        let new_id = buf.get_u64();
        pairs.push((old_id, new_id));
    }

    Ok(pairs.into_iter().collect())
}

fn read_preamble<B: Buf>(buf: &mut B, what: &str) -> Result<u64> {
    if buf.remaining() < PREAMBLE_LEN {
        return Err(RestoreError::Protocol(format!(
            "{} is {} bytes, shorter than its {}-byte header",
            what,
            buf.remaining(),
            PREAMBLE_LEN
        )));
    }

    let magic = buf.get_u64();
    if magic != BACKUP_MAGIC_HEADER {
        return Err(RestoreError::Protocol(format!(
            "{} has magic {:#x}, expected {:#x}",
            what, magic, BACKUP_MAGIC_HEADER
        )));
    }

    Ok(buf.get_u64())
}
