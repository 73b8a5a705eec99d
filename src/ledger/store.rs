use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::storage::BlobKey;

use super::Ledger;
use super::error::{LedgerError, Result};
use super::partitions::{
    decode_count, decode_expiry_key, encode_count, encode_expiry_key, encode_meta_key,
    encode_record_key, expiry_scan_bound,
};
use super::record::{ExpiredRecord, LedgerRecord, NewRecord, RecordId};
use super::snowflake::IdGenerator;

const META_LAST_RECLAIM: &str = "last_reclaim_ms";

/// Fjall-backed persistent ledger
#[derive(Clone)]
pub struct FjallLedger {
    keyspace: Keyspace,
    records: PartitionHandle,
    expiry: PartitionHandle,
    refs: PartitionHandle,
    metadata: PartitionHandle,
    ids: Arc<IdGenerator>,
    /// Serializes read-modify-write of reference counts
    writer: Arc<Mutex<()>>,
}

impl FjallLedger {
    /// Open or create a ledger at the given path
    pub fn open<P: AsRef<Path>>(path: P, ids: IdGenerator) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening ledger at: {}", path.display());

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let keyspace = Config::new(path).open()?;

        let records = keyspace.open_partition("records", PartitionCreateOptions::default())?;
        let expiry = keyspace.open_partition("expiry", PartitionCreateOptions::default())?;
        let refs = keyspace.open_partition("refs", PartitionCreateOptions::default())?;
        let metadata = keyspace.open_partition("metadata", PartitionCreateOptions::default())?;

        info!(node = ids.node(), "Ledger opened successfully");
        Ok(Self {
            keyspace,
            records,
            expiry,
            refs,
            metadata,
            ids: Arc::new(ids),
            writer: Arc::new(Mutex::new(())),
        })
    }

    pub fn id_generator(&self) -> &IdGenerator {
        &self.ids
    }

    fn read_count(&self, blob_key: &BlobKey) -> Result<u64> {
        match self.refs.get(blob_key.as_str())? {
            Some(value) => decode_count(&value),
            None => Ok(0),
        }
    }

    /// Persist all pending writes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace.persist(fjall::PersistMode::SyncAll)?;
        Ok(())
    }

    /// Get internal statistics (for debugging/monitoring)
    pub fn stats(&self) -> Result<LedgerStats> {
        let mut record_count = 0;
        let mut pending_count = 0;
        let mut referenced_blobs = 0;

        for item in self.records.iter() {
            item?;
            record_count += 1;
        }

        for item in self.expiry.iter() {
            item?;
            pending_count += 1;
        }

        for item in self.refs.iter() {
            item?;
            referenced_blobs += 1;
        }

        Ok(LedgerStats {
            record_count,
            pending_count,
            referenced_blobs,
        })
    }
}

impl Ledger for FjallLedger {
    fn create(&self, new: NewRecord) -> Result<RecordId> {
        let _writer = self.writer.lock();

        let id = self.ids.next_id();
        let expires_ms = new.expires_at.timestamp_millis();
        let record = LedgerRecord {
            id,
            blob_key: new.blob_key,
            original_filename: new.original_filename,
            mime_type: new.mime_type,
            // Stored at millisecond resolution; normalize now so reads match.
            expires_at: DateTime::from_timestamp_millis(expires_ms).unwrap_or(new.expires_at),
            removed: false,
            client_ip: new.client_ip,
            user_agent: new.user_agent,
        };
        let refs = self.read_count(&record.blob_key)?;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.records, encode_record_key(id), serde_json::to_vec(&record)?);
        batch.insert(
            &self.expiry,
            encode_expiry_key(expires_ms, id),
            record.blob_key.as_str().as_bytes(),
        );
        batch.insert(&self.refs, record.blob_key.as_str().as_bytes(), encode_count(refs + 1));
        batch.commit()?;

        debug!(%id, blob_key = %record.blob_key, expires_ms, "Created record");
        Ok(id)
    }

    fn get(&self, id: RecordId) -> Result<LedgerRecord> {
        match self.records.get(encode_record_key(id))? {
            Some(value) => Ok(serde_json::from_slice(&value)?),
            None => Err(LedgerError::RecordNotFound(id)),
        }
    }

    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<ExpiredRecord>> {
        let mut expired = Vec::new();

        for item in self.expiry.range(..expiry_scan_bound(now.timestamp_millis())) {
            let (key, value) = item?;
            let (_, id) = decode_expiry_key(&key)?;
            let blob_key = std::str::from_utf8(&value)
                .ok()
                .and_then(|raw| raw.parse::<BlobKey>().ok())
                .ok_or_else(|| LedgerError::InvalidKey(format!("bad blob key for record {id}")))?;
            expired.push(ExpiredRecord { id, blob_key });
        }

        Ok(expired)
    }

    fn mark_removed(&self, id: RecordId) -> Result<()> {
        let _writer = self.writer.lock();

        let mut record = self.get(id)?;
        if record.removed {
            debug!(%id, "Record already removed");
            return Ok(());
        }
        record.removed = true;
        let refs = self.read_count(&record.blob_key)?;

        let mut batch = self.keyspace.batch();
        batch.insert(&self.records, encode_record_key(id), serde_json::to_vec(&record)?);
        batch.remove(
            &self.expiry,
            encode_expiry_key(record.expires_at.timestamp_millis(), id),
        );
        match refs.saturating_sub(1) {
            0 => batch.remove(&self.refs, record.blob_key.as_str().as_bytes()),
            remaining => batch.insert(
                &self.refs,
                record.blob_key.as_str().as_bytes(),
                encode_count(remaining),
            ),
        }
        batch.commit()?;

        debug!(%id, blob_key = %record.blob_key, "Marked record removed");
        Ok(())
    }

    fn references(&self, blob_key: &BlobKey) -> Result<u64> {
        self.read_count(blob_key)
    }

    fn record_reclaim_run(&self, at: DateTime<Utc>) -> Result<()> {
        self.metadata.insert(
            encode_meta_key(META_LAST_RECLAIM),
            at.timestamp_millis().to_string().as_bytes(),
        )?;
        Ok(())
    }

    fn last_reclaim_run(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.metadata.get(encode_meta_key(META_LAST_RECLAIM))? else {
            return Ok(None);
        };
        let millis = std::str::from_utf8(&value)
            .ok()
            .and_then(|raw| raw.parse::<i64>().ok())
            .ok_or_else(|| LedgerError::InvalidKey(format!("bad {} value", META_LAST_RECLAIM)))?;
        Ok(DateTime::from_timestamp_millis(millis))
    }
}

#[derive(Debug, Clone)]
pub struct LedgerStats {
    pub record_count: usize,
    /// Records not yet reclaimed
    pub pending_count: usize,
    pub referenced_blobs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn create_test_ledger() -> (FjallLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger =
            FjallLedger::open(temp_dir.path().join("test_ledger"), IdGenerator::new(1).unwrap())
                .unwrap();
        (ledger, temp_dir)
    }

    fn now_ms() -> DateTime<Utc> {
        DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap()
    }

    fn key_of(byte: u8) -> BlobKey {
        BlobKey::from_digest(&[byte; 32])
    }

    fn new_record(blob_key: BlobKey, expires_at: DateTime<Utc>) -> NewRecord {
        NewRecord {
            blob_key,
            original_filename: "file.txt".to_string(),
            mime_type: "text/plain".to_string(),
            expires_at,
            client_ip: "127.0.0.1".to_string(),
            user_agent: "TestAgent".to_string(),
        }
    }

    #[test]
    fn test_create_and_get_returns_supplied_fields() {
        let (ledger, _temp) = create_test_ledger();
        let expires_at = now_ms() + Duration::hours(1);

        let id = ledger.create(new_record(key_of(1), expires_at)).unwrap();
        let record = ledger.get(id).unwrap();

        assert_eq!(
            record,
            LedgerRecord {
                id,
                blob_key: key_of(1),
                original_filename: "file.txt".to_string(),
                mime_type: "text/plain".to_string(),
                expires_at,
                removed: false,
                client_ip: "127.0.0.1".to_string(),
                user_agent: "TestAgent".to_string(),
            }
        );
    }

    #[test]
    fn test_expiry_truncated_to_millis() {
        let (ledger, _temp) = create_test_ledger();
        let precise = DateTime::from_timestamp(1_900_000_000, 123_456_789).unwrap();

        let id = ledger.create(new_record(key_of(1), precise)).unwrap();

        assert_eq!(ledger.get(id).unwrap().expires_at.timestamp_millis(), 1_900_000_000_123);
        assert_eq!(ledger.get(id).unwrap().expires_at.timestamp_subsec_nanos(), 123_000_000);
    }

    #[test]
    fn test_get_nonexistent_record() {
        let (ledger, _temp) = create_test_ledger();
        let err = ledger.get(RecordId(12345)).unwrap_err();
        assert!(matches!(err, LedgerError::RecordNotFound(RecordId(12345))));
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let (ledger, _temp) = create_test_ledger();
        let expires_at = now_ms() + Duration::hours(1);
        let a = ledger.create(new_record(key_of(1), expires_at)).unwrap();
        let b = ledger.create(new_record(key_of(1), expires_at)).unwrap();
        assert!(b > a);
    }

    #[test]
    fn test_list_expired_is_strict() {
        let (ledger, _temp) = create_test_ledger();
        let now = now_ms();

        let past = ledger.create(new_record(key_of(1), now - Duration::hours(1))).unwrap();
        let boundary = ledger.create(new_record(key_of(2), now)).unwrap();
        let future = ledger.create(new_record(key_of(3), now + Duration::hours(1))).unwrap();

        let expired = ledger.list_expired(now).unwrap();
        assert_eq!(
            expired,
            vec![ExpiredRecord {
                id: past,
                blob_key: key_of(1)
            }]
        );

        let later: Vec<_> = ledger
            .list_expired(now + Duration::milliseconds(1))
            .unwrap()
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(later, vec![past, boundary]);

        let much_later = ledger.list_expired(now + Duration::hours(2)).unwrap();
        assert_eq!(much_later.len(), 3);
        assert_eq!(much_later[2].id, future);
    }

    #[test]
    fn test_list_expired_is_idempotent() {
        let (ledger, _temp) = create_test_ledger();
        let now = now_ms();
        ledger.create(new_record(key_of(1), now - Duration::minutes(5))).unwrap();
        ledger.create(new_record(key_of(2), now - Duration::minutes(1))).unwrap();

        let first = ledger.list_expired(now).unwrap();
        let second = ledger.list_expired(now).unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first, second);
    }

    #[test]
    fn test_mark_removed_excludes_from_scan() {
        let (ledger, _temp) = create_test_ledger();
        let now = now_ms();
        let id = ledger.create(new_record(key_of(1), now - Duration::hours(1))).unwrap();

        ledger.mark_removed(id).unwrap();

        assert!(ledger.get(id).unwrap().removed);
        assert!(ledger.list_expired(now).unwrap().is_empty());

        // Repeating is a no-op
        ledger.mark_removed(id).unwrap();
        assert!(ledger.get(id).unwrap().removed);
    }

    #[test]
    fn test_mark_removed_missing_record() {
        let (ledger, _temp) = create_test_ledger();
        assert!(ledger.mark_removed(RecordId(99)).unwrap_err().is_not_found());
    }

    #[test]
    fn test_reference_counts_follow_lifecycle() {
        let (ledger, _temp) = create_test_ledger();
        let expires_at = now_ms() + Duration::hours(1);
        let shared = key_of(9);

        assert_eq!(ledger.references(&shared).unwrap(), 0);
        let a = ledger.create(new_record(shared.clone(), expires_at)).unwrap();
        let b = ledger.create(new_record(shared.clone(), expires_at)).unwrap();
        assert_eq!(ledger.references(&shared).unwrap(), 2);

        ledger.mark_removed(a).unwrap();
        ledger.mark_removed(a).unwrap();
        assert_eq!(ledger.references(&shared).unwrap(), 1);

        ledger.mark_removed(b).unwrap();
        assert_eq!(ledger.references(&shared).unwrap(), 0);
    }

    #[test]
    fn test_stats_and_reclaim_marker() {
        let (ledger, _temp) = create_test_ledger();
        let now = now_ms();
        let id = ledger.create(new_record(key_of(1), now)).unwrap();
        ledger.create(new_record(key_of(2), now)).unwrap();
        ledger.mark_removed(id).unwrap();

        let stats = ledger.stats().unwrap();
        assert_eq!(stats.record_count, 2);
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.referenced_blobs, 1);

        assert_eq!(ledger.last_reclaim_run().unwrap(), None);
        ledger.record_reclaim_run(now).unwrap();
        assert_eq!(ledger.last_reclaim_run().unwrap(), Some(now));
    }

    #[test]
    fn test_persist() {
        let (ledger, _temp) = create_test_ledger();
        ledger.create(new_record(key_of(1), now_ms())).unwrap();
        ledger.persist().unwrap();
    }
}
