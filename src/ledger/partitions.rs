//! Key layout and encoding utilities for Fjall partitions
//!
//! Partition structure:
//! - `records`: {id:be64} -> LedgerRecord (JSON)
//! - `expiry`: {expires_at_ms:sortable be64}{id:be64} -> blob key, only while not removed
//! - `refs`: {blob key} -> count of not-yet-reclaimed records (be64)
//! - `metadata`: meta:{key} -> value (string)

use super::error::{LedgerError, Result};
use super::record::RecordId;

/// Encode a record key
pub fn encode_record_key(id: RecordId) -> Vec<u8> {
    id.as_i64().to_be_bytes().to_vec()
}

/// Map a signed millisecond timestamp onto an unsigned value with the same order
fn sortable_millis(ms: i64) -> u64 {
    (ms as u64) ^ (1 << 63)
}

fn unsortable_millis(raw: u64) -> i64 {
    (raw ^ (1 << 63)) as i64
}

/// Encode an expiry index key: {expires_at_ms}{id}
pub fn encode_expiry_key(expires_at_ms: i64, id: RecordId) -> Vec<u8> {
    let mut key = Vec::with_capacity(16);
    key.extend_from_slice(&sortable_millis(expires_at_ms).to_be_bytes());
    key.extend_from_slice(&id.as_i64().to_be_bytes());
    key
}

/// Exclusive upper bound for entries expiring strictly before `now_ms`
pub fn expiry_scan_bound(now_ms: i64) -> Vec<u8> {
    encode_expiry_key(now_ms, RecordId(0))
}

/// Decode an expiry index key -> (expires_at_ms, id)
pub fn decode_expiry_key(key: &[u8]) -> Result<(i64, RecordId)> {
    let bytes: [u8; 16] = key
        .try_into()
        .map_err(|_| LedgerError::InvalidKey(hex::encode(key)))?;
    let mut ts = [0u8; 8];
    let mut id = [0u8; 8];
    ts.copy_from_slice(&bytes[..8]);
    id.copy_from_slice(&bytes[8..]);
    Ok((
        unsortable_millis(u64::from_be_bytes(ts)),
        RecordId(i64::from_be_bytes(id)),
    ))
}

/// Encode a reference count value
pub fn encode_count(count: u64) -> Vec<u8> {
    count.to_be_bytes().to_vec()
}

/// Decode a reference count value
pub fn decode_count(value: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| LedgerError::InvalidKey(format!("bad counter value: {}", hex::encode(value))))?;
    Ok(u64::from_be_bytes(bytes))
}

/// Encode a metadata key: meta:{key}
pub fn encode_meta_key(key: &str) -> Vec<u8> {
    format!("meta:{}", key).into_bytes()
}
