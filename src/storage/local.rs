use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use super::{BlobKey, BlobReader, BlobStore, Result, StagedBlob, StorageError};

/// Staging directory for in-flight uploads, relative to the store root.
/// Never collides with a two-hex-digit bucket directory.
const STAGING_DIR: &str = ".staging";

const COPY_BUF_SIZE: usize = 64 * 1024;

/// Blob store backed by a local directory tree
#[derive(Debug, Clone)]
pub struct LocalBlobStore {
    root: PathBuf,
    staging: PathBuf,
}

impl LocalBlobStore {
    /// Open or create a store rooted at `root`
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        let staging = root.join(STAGING_DIR);
        std::fs::create_dir_all(&staging)?;
        info!(root = %root.display(), "Blob store opened");
        Ok(Self { root, staging })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Final on-disk location for a key
    pub fn path_for(&self, key: &BlobKey) -> PathBuf {
        self.root.join(key.relative_path())
    }
}

#[async_trait]
impl BlobStore for LocalBlobStore {
    async fn stage(&self, reader: &mut (dyn AsyncRead + Send + Unpin)) -> Result<StagedBlob> {
        let (file, temp) = NamedTempFile::new_in(&self.staging)?.into_parts();
        let mut file = tokio::fs::File::from_std(file);

        let mut hasher = Sha256::new();
        let mut size = 0u64;
        let mut buf = vec![0u8; COPY_BUF_SIZE];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            file.write_all(&buf[..n]).await?;
            size += n as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        let digest: [u8; 32] = hasher.finalize().into();
        let key = BlobKey::from_digest(&digest);
        debug!(blob_key = %key, size, "Staged blob");

        Ok(StagedBlob { key, size, temp })
    }

    async fn commit(&self, staged: StagedBlob) -> Result<BlobKey> {
        let StagedBlob { key, size, temp } = staged;
        let destination = self.path_for(&key);

        if tokio::fs::try_exists(&destination).await? {
            // Identical content is already published; the temp file is dropped.
            debug!(blob_key = %key, size, "Blob already present, discarding staged copy");
            return Ok(key);
        }

        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::rename(&temp, &destination).await?;
        // The path no longer exists; stop the guard from trying to remove it.
        let _ = temp.keep();

        debug!(blob_key = %key, size, "Published blob");
        Ok(key)
    }

    async fn get(&self, key: &BlobKey) -> Result<BlobReader> {
        match tokio::fs::File::open(self.path_for(key)).await {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &BlobKey) -> Result<()> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => {
                debug!(blob_key = %key, "Deleted blob");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.clone())),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(key)).await?)
    }
}
