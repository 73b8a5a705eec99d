//! Content-addressed blob storage
//!
//! Objects are immutable byte sequences named by the SHA-256 of their
//! contents ([`BlobKey`]). Identical uploads collapse onto one object. The
//! store knows nothing about logical uploads or expiry; that lives in the
//! ledger.
//!
//! Writes happen in two phases so callers can serialize publication with
//! ledger bookkeeping:
//!
//! 1. [`BlobStore::stage`] streams the input through the digest and into a
//!    temporary file in a single pass.
//! 2. [`BlobStore::commit`] atomically publishes the staged file at its final
//!    path. Readers never observe a partially written object.
//!
//! [`BlobStore::put`] runs both phases back to back.

pub mod key;
pub mod local;
pub mod locks;

use async_trait::async_trait;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncSeek};

pub use key::BlobKey;
pub use local::LocalBlobStore;
pub use locks::KeyLocks;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(BlobKey),

    #[error("invalid blob key: {0:?}")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

/// Storage result type
pub type Result<T> = std::result::Result<T, StorageError>;

/// Random-access byte stream over one stored object
pub trait BlobRead: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> BlobRead for T {}

pub type BlobReader = Box<dyn BlobRead>;

/// Upload that has been fully written and hashed but not yet published.
///
/// Dropping a staged blob without committing it removes the temporary file.
#[derive(Debug)]
pub struct StagedBlob {
    pub key: BlobKey,
    pub size: u64,
    pub(crate) temp: TempPath,
}

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Stream `reader` into a temporary object while computing its key
    async fn stage(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<StagedBlob>;

    /// Publish a staged object under its key. Publishing content that is
    /// already present is not an error.
    async fn commit(&self, staged: StagedBlob) -> Result<BlobKey>;

    /// Open an object for random-access reading
    async fn get(&self, key: &BlobKey) -> Result<BlobReader>;

    /// Remove an object, failing with [`StorageError::NotFound`] if absent
    async fn delete(&self, key: &BlobKey) -> Result<()>;

    async fn exists(&self, key: &BlobKey) -> Result<bool>;

    async fn put(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<BlobKey> {
        let staged = self.stage(reader).await?;
        self.commit(staged).await
    }
}
