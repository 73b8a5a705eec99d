//! Fjall-backed ledger of logical uploads
//!
//! Every upload gets a [`LedgerRecord`] pointing at the blob holding its
//! bytes. Records carry expiry and provenance, and are never deleted: the
//! reclaimer flips `removed` once and the record stays behind as a tombstone
//! so its identifier is never reissued.
//!
//! Several records may reference one [`BlobKey`] when identical content is
//! uploaded more than once. The ledger tracks how many not-yet-reclaimed
//! records point at each key ([`Ledger::references`]); whether the reclaimer
//! consults that count is a policy decision, see
//! [`crate::reclaimer::ReclaimPolicy`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hako::ledger::{FjallLedger, IdGenerator, Ledger};
//!
//! let ledger = FjallLedger::open("data/ledger", IdGenerator::new(1)?)?;
//! let id = ledger.create(new_record)?;
//! let record = ledger.get(id)?;
//! ```

pub mod error;
pub mod partitions;
pub mod record;
pub mod snowflake;
pub mod store;

use chrono::{DateTime, Utc};

use crate::storage::BlobKey;

pub use error::{LedgerError, Result};
pub use record::{ExpiredRecord, LedgerRecord, NewRecord, RecordId};
pub use snowflake::{IdError, IdGenerator, IdParts};
pub use store::{FjallLedger, LedgerStats};

/// Durable table of logical uploads.
///
/// Every operation is atomic on its own; there are no multi-call
/// transactions, so callers must tolerate interleaving with other callers.
pub trait Ledger: Send + Sync {
    /// Register a new upload and return its freshly generated id
    fn create(&self, record: NewRecord) -> Result<RecordId>;

    /// Fetch a record, failing with [`LedgerError::RecordNotFound`]
    fn get(&self, id: RecordId) -> Result<LedgerRecord>;

    /// Snapshot of records with `expires_at < now` and `removed = false`,
    /// ordered by expiry. Nothing is locked or claimed.
    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredRecord>>;

    /// Flip `removed` to true. Repeating it on a removed record is a no-op.
    fn mark_removed(&self, id: RecordId) -> Result<()>;

    /// Number of not-yet-reclaimed records referencing `blob_key`
    fn references(&self, blob_key: &BlobKey) -> Result<u64>;

    /// Remember when the last complete reclamation cycle ran
    fn record_reclaim_run(&self, _at: DateTime<Utc>) -> Result<()> {
        Ok(())
    }

    fn last_reclaim_run(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(None)
    }
}
