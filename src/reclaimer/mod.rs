//! Expiry-driven reclamation of blob content
//!
//! A cycle takes a snapshot of expired, not-yet-removed ledger records and,
//! one candidate at a time, deletes the referenced blob and marks the record
//! removed. Nothing is claimed or locked in the ledger, so overlapping cycles
//! are safe: deleting an already-deleted blob counts as success and marking a
//! removed record again is a no-op.
//!
//! Failure handling per candidate:
//!
//! | blob delete | mark removed | result |
//! |---|---|---|
//! | ok / not found | ok | reclaimed |
//! | other error | skipped | left in place, retried next cycle |
//! | ok / not found | error | logged as inconsistent, not retried |
//!
//! An inconsistent record can never be served again since it has expired.
//!
//! # Shared content
//!
//! Identical uploads share one blob. Under [`ReclaimPolicy::Unconditional`]
//! the blob is deleted as soon as any one of its records expires, even if
//! another record pointing at it is still live; that record will then fail
//! with not-found on download. [`ReclaimPolicy::ReferenceCounted`] keeps the
//! blob until the last not-yet-reclaimed record referencing it is reclaimed.

mod task;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::ledger::{ExpiredRecord, Ledger, LedgerError, RecordId};
use crate::observability::Metrics;
use crate::storage::{BlobKey, BlobStore, KeyLocks, StorageError};

pub use task::{DEFAULT_RECLAIM_INTERVAL, spawn_reclaimer};

/// What to do with a blob whose record expired while other records still
/// reference it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReclaimPolicy {
    /// Delete the blob regardless of other references
    #[default]
    Unconditional,
    /// Delete the blob only when this record is its last reference
    ReferenceCounted,
}

#[derive(Debug, Error)]
pub enum ReclaimError {
    #[error("listing expired records failed: {0}")]
    Scan(#[source] LedgerError),

    #[error("deleting blob {blob_key} for record {id} failed: {source}")]
    Delete {
        id: RecordId,
        blob_key: BlobKey,
        source: StorageError,
    },

    #[error("counting references to blob {blob_key} failed: {source}")]
    References {
        blob_key: BlobKey,
        source: LedgerError,
    },

    #[error("marking record {id} removed failed: {source}")]
    MarkRemoved { id: RecordId, source: LedgerError },

    #[error("blob {blob_key} is gone but record {id} could not be marked removed: {source}")]
    Inconsistent {
        id: RecordId,
        blob_key: BlobKey,
        source: LedgerError,
    },
}

/// Totals for one reclamation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReclaimStats {
    /// Candidates returned by the expiry scan
    pub scanned: usize,
    /// Records marked removed during the cycle
    pub reclaimed: usize,
    /// Subset of `reclaimed` whose blob was already gone
    pub already_absent: usize,
    /// Subset of `reclaimed` whose blob was kept for other records
    pub shared_retained: usize,
    /// Candidates left for the next cycle
    pub failed: usize,
    /// Blob deleted but record left unmarked
    pub inconsistent: usize,
    /// Cycle stopped early because of cancellation
    pub interrupted: bool,
}

enum Outcome {
    Deleted,
    AlreadyAbsent,
    SharedRetained,
}

/// Reclaims storage held by expired uploads
pub struct Reclaimer {
    ledger: Arc<dyn Ledger>,
    blobs: Arc<dyn BlobStore>,
    locks: Arc<KeyLocks>,
    policy: ReclaimPolicy,
    metrics: Arc<Metrics>,
}

impl Reclaimer {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        blobs: Arc<dyn BlobStore>,
        locks: Arc<KeyLocks>,
        policy: ReclaimPolicy,
    ) -> Self {
        Self {
            ledger,
            blobs,
            locks,
            policy,
            metrics: Arc::new(Metrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn policy(&self) -> ReclaimPolicy {
        self.policy
    }

    /// Run one cycle against the current time
    pub async fn run_cycle(
        &self,
        cancel: &CancellationToken,
    ) -> Result<ReclaimStats, ReclaimError> {
        self.run_cycle_at(Utc::now(), cancel).await
    }

    /// Run one cycle treating `now` as the current time.
    ///
    /// `cancel` is checked before each candidate; a candidate that has
    /// started is always finished.
    pub async fn run_cycle_at(
        &self,
        now: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<ReclaimStats, ReclaimError> {
        let candidates = self.ledger.list_expired(now).map_err(ReclaimError::Scan)?;
        let mut stats = ReclaimStats {
            scanned: candidates.len(),
            ..Default::default()
        };
        if !candidates.is_empty() {
            debug!(candidates = stats.scanned, policy = ?self.policy, "Reclaim cycle started");
        }

        for candidate in &candidates {
            if cancel.is_cancelled() {
                info!(
                    remaining = stats.scanned - (stats.reclaimed + stats.failed + stats.inconsistent),
                    "Reclaim cycle interrupted"
                );
                stats.interrupted = true;
                break;
            }

            match self.reclaim_one(candidate).await {
                Ok(outcome) => {
                    stats.reclaimed += 1;
                    match outcome {
                        Outcome::Deleted => {}
                        Outcome::AlreadyAbsent => stats.already_absent += 1,
                        Outcome::SharedRetained => stats.shared_retained += 1,
                    }
                }
                Err(e @ ReclaimError::Inconsistent { .. }) => {
                    error!(id = %candidate.id, error = %e, "Record left inconsistent");
                    stats.inconsistent += 1;
                }
                Err(e) => {
                    warn!(id = %candidate.id, error = %e, "Reclaim failed, will retry next cycle");
                    stats.failed += 1;
                }
            }
        }

        self.metrics.records_reclaimed(stats.reclaimed as u64);
        self.metrics
            .reclaim_failures((stats.failed + stats.inconsistent) as u64);

        if !stats.interrupted {
            if let Err(e) = self.ledger.record_reclaim_run(now) {
                warn!(error = %e, "Failed to record reclaim run");
            }
        }

        Ok(stats)
    }

    async fn reclaim_one(&self, candidate: &ExpiredRecord) -> Result<Outcome, ReclaimError> {
        let ExpiredRecord { id, blob_key } = candidate;
        let _guard = self.locks.lock(blob_key).await;

        if self.policy == ReclaimPolicy::ReferenceCounted {
            let references =
                self.ledger
                    .references(blob_key)
                    .map_err(|source| ReclaimError::References {
                        blob_key: blob_key.clone(),
                        source,
                    })?;
            if references > 1 {
                self.ledger
                    .mark_removed(*id)
                    .map_err(|source| ReclaimError::MarkRemoved { id: *id, source })?;
                debug!(%id, %blob_key, references, "Reclaimed record, blob still referenced");
                return Ok(Outcome::SharedRetained);
            }
        }

        let outcome = match self.blobs.delete(blob_key).await {
            Ok(()) => Outcome::Deleted,
            Err(StorageError::NotFound(_)) => Outcome::AlreadyAbsent,
            Err(source) => {
                return Err(ReclaimError::Delete {
                    id: *id,
                    blob_key: blob_key.clone(),
                    source,
                });
            }
        };

        self.ledger
            .mark_removed(*id)
            .map_err(|source| ReclaimError::Inconsistent {
                id: *id,
                blob_key: blob_key.clone(),
                source,
            })?;

        debug!(%id, %blob_key, "Reclaimed record");
        Ok(outcome)
    }
}
