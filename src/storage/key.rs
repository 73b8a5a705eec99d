use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::StorageError;

/// Length of a hex-encoded SHA-256 digest
pub const KEY_HEX_LEN: usize = 64;

/// Content-derived name of one physical object in the blob store.
///
/// A key is the lowercase hex SHA-256 of the object bytes. On disk the object
/// lives at `<root>/<first byte as hex>/<full hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlobKey(String);

impl BlobKey {
    pub fn from_digest(digest: &[u8; 32]) -> Self {
        BlobKey(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Directory bucket, the first byte of the digest
    pub fn prefix(&self) -> &str {
        &self.0[..2]
    }

    /// First byte of the digest as a number, used for lock striping
    pub fn first_byte(&self) -> u8 {
        u8::from_str_radix(self.prefix(), 16).unwrap_or(0)
    }

    /// Path relative to the store root: `ab/abcdef...`
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(self.prefix()).join(&self.0)
    }
}

impl FromStr for BlobKey {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let valid = s.len() == KEY_HEX_LEN
            && s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if !valid {
            return Err(StorageError::InvalidKey(s.to_string()));
        }
        Ok(BlobKey(s.to_string()))
    }
}

impl TryFrom<String> for BlobKey {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BlobKey> for String {
    fn from(key: BlobKey) -> Self {
        key.0
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
