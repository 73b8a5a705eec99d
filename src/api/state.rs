use std::sync::Arc;

use crate::config::Config;
use crate::ledger::{FjallLedger, IdError, IdGenerator, Ledger, LedgerError};
use crate::observability::Metrics;
use crate::reclaimer::Reclaimer;
use crate::storage::{BlobStore, KeyLocks, LocalBlobStore, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum StoreOpenError {
    #[error("invalid ledger node id: {0}")]
    NodeId(#[from] IdError),
    #[error("failed to open ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("failed to open blob store: {0}")]
    Storage(#[from] StorageError),
}

/// Concrete on-disk stores named by the configuration
pub struct Stores {
    pub ledger: FjallLedger,
    pub blobs: LocalBlobStore,
}

impl Stores {
    pub fn open(config: &Config) -> Result<Self, StoreOpenError> {
        let ids = IdGenerator::new(config.ledger.node_id)?;
        let ledger = FjallLedger::open(&config.ledger.path, ids)?;
        let blobs = LocalBlobStore::open(&config.storage.root)?;
        Ok(Self { ledger, blobs })
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ledger: Arc<dyn Ledger>,
    pub blobs: Arc<dyn BlobStore>,
    pub locks: Arc<KeyLocks>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config, ledger: Arc<dyn Ledger>, blobs: Arc<dyn BlobStore>) -> Self {
        Self {
            config: Arc::new(config),
            ledger,
            blobs,
            locks: Arc::new(KeyLocks::new()),
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn from_stores(config: Config, stores: &Stores) -> Self {
        Self::new(
            config,
            Arc::new(stores.ledger.clone()),
            Arc::new(stores.blobs.clone()),
        )
    }

    /// Reclaimer sharing this state's stores, key locks and counters
    pub fn reclaimer(&self) -> Reclaimer {
        Reclaimer::new(
            self.ledger.clone(),
            self.blobs.clone(),
            self.locks.clone(),
            self.config.retention.policy,
        )
        .with_metrics(self.metrics.clone())
    }
}
