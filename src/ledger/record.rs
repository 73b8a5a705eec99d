use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::storage::BlobKey;

/// Externally visible identifier of one logical upload.
///
/// Generated by [`super::IdGenerator`]; always positive and roughly time
/// ordered. Rendered to clients as a compact base36 handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub i64);

impl RecordId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Lowercase base36 rendering used in download URLs
    pub fn to_handle(&self) -> String {
        const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

        let mut n = self.0.unsigned_abs();
        if n == 0 {
            return "0".to_string();
        }
        let mut out = Vec::with_capacity(13);
        while n > 0 {
            out.push(DIGITS[(n % 36) as usize]);
            n /= 36;
        }
        if self.0 < 0 {
            out.push(b'-');
        }
        out.reverse();
        String::from_utf8_lossy(&out).into_owned()
    }

    pub fn from_handle(handle: &str) -> Option<Self> {
        if handle.is_empty() || !handle.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return None;
        }
        i64::from_str_radix(handle, 36).ok().map(RecordId)
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One logical upload as tracked by the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: RecordId,
    pub blob_key: BlobKey,
    pub original_filename: String,
    pub mime_type: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub removed: bool,
    pub client_ip: String,
    pub user_agent: String,
}

impl LedgerRecord {
    /// A record may be served iff it has not been reclaimed and has not expired
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        !self.removed && self.expires_at.timestamp_millis() > now.timestamp_millis()
    }
}

/// Fields supplied by the ingress path when registering an upload
#[derive(Debug, Clone)]
pub struct NewRecord {
    pub blob_key: BlobKey,
    pub original_filename: String,
    pub mime_type: String,
    pub expires_at: DateTime<Utc>,
    pub client_ip: String,
    pub user_agent: String,
}

/// Reclamation candidate returned by an expiry scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiredRecord {
    pub id: RecordId,
    pub blob_key: BlobKey,
}
