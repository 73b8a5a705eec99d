//! Reclamation behaviour against real on-disk stores, including shared
//! content and injected store failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use chrono::{DateTime, Duration, Utc};
use tempfile::TempDir;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt; // for `oneshot`

use hako::api::{AppState, Stores};
use hako::config::Config;
use hako::ledger::{
    ExpiredRecord, FjallLedger, IdGenerator, Ledger, LedgerError, LedgerRecord, NewRecord,
    RecordId,
};
use hako::observability::Metrics;
use hako::reclaimer::{ReclaimPolicy, ReclaimStats, Reclaimer, spawn_reclaimer};
use hako::storage::{
    BlobKey, BlobReader, BlobStore, KeyLocks, LocalBlobStore, StagedBlob, StorageError,
};

struct Harness {
    ledger: Arc<FjallLedger>,
    blobs: Arc<LocalBlobStore>,
    _temp: TempDir,
}

impl Harness {
    fn new() -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let ledger = FjallLedger::open(temp.path().join("ledger"), IdGenerator::new(1).unwrap())
            .expect("Failed to open ledger");
        let blobs = LocalBlobStore::open(temp.path().join("blobs")).expect("Failed to open blobs");
        Self {
            ledger: Arc::new(ledger),
            blobs: Arc::new(blobs),
            _temp: temp,
        }
    }

    fn reclaimer(&self, policy: ReclaimPolicy) -> Reclaimer {
        self.reclaimer_over(self.ledger.clone(), self.blobs.clone(), policy)
    }

    fn reclaimer_over(
        &self,
        ledger: Arc<dyn Ledger>,
        blobs: Arc<dyn BlobStore>,
        policy: ReclaimPolicy,
    ) -> Reclaimer {
        Reclaimer::new(ledger, blobs, Arc::new(KeyLocks::new()), policy)
    }

    async fn upload(&self, content: &[u8], expires_at: DateTime<Utc>) -> (RecordId, BlobKey) {
        let key = self.blobs.put(&mut &content[..]).await.unwrap();
        let id = self
            .ledger
            .create(NewRecord {
                blob_key: key.clone(),
                original_filename: "upload.bin".into(),
                mime_type: "application/octet-stream".into(),
                expires_at,
                client_ip: "10.0.0.1".into(),
                user_agent: "reclaim-test".into(),
            })
            .unwrap();
        (id, key)
    }

    fn removed(&self, id: RecordId) -> bool {
        self.ledger.get(id).unwrap().removed
    }

    async fn blob_exists(&self, key: &BlobKey) -> bool {
        self.blobs.exists(key).await.unwrap()
    }
}

async fn run(reclaimer: &Reclaimer, now: DateTime<Utc>) -> ReclaimStats {
    reclaimer
        .run_cycle_at(now, &CancellationToken::new())
        .await
        .expect("reclaim cycle failed")
}

/// Blob store whose deletes fail with an I/O error while `failing` is set
struct FailingBlobStore {
    inner: LocalBlobStore,
    failing: AtomicBool,
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn stage(
        &self,
        reader: &mut (dyn AsyncRead + Send + Unpin),
    ) -> hako::storage::Result<StagedBlob> {
        self.inner.stage(reader).await
    }

    async fn commit(&self, staged: StagedBlob) -> hako::storage::Result<BlobKey> {
        self.inner.commit(staged).await
    }

    async fn get(&self, key: &BlobKey) -> hako::storage::Result<BlobReader> {
        self.inner.get(key).await
    }

    async fn delete(&self, key: &BlobKey) -> hako::storage::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::Io(std::io::Error::other("disk unavailable")));
        }
        self.inner.delete(key).await
    }

    async fn exists(&self, key: &BlobKey) -> hako::storage::Result<bool> {
        self.inner.exists(key).await
    }
}

/// Ledger that cannot mark records removed
struct StuckLedger {
    inner: Arc<FjallLedger>,
}

impl Ledger for StuckLedger {
    fn create(&self, record: NewRecord) -> hako::ledger::Result<RecordId> {
        self.inner.create(record)
    }

    fn get(&self, id: RecordId) -> hako::ledger::Result<LedgerRecord> {
        self.inner.get(id)
    }

    fn list_expired(&self, now: DateTime<Utc>) -> hako::ledger::Result<Vec<ExpiredRecord>> {
        self.inner.list_expired(now)
    }

    fn mark_removed(&self, _id: RecordId) -> hako::ledger::Result<()> {
        Err(LedgerError::Io(std::io::Error::other("ledger is read-only")))
    }

    fn references(&self, blob_key: &BlobKey) -> hako::ledger::Result<u64> {
        self.inner.references(blob_key)
    }
}

#[tokio::test]
async fn test_expired_upload_is_reclaimed() {
    let harness = Harness::new();
    let now = Utc::now();
    let (expired, expired_key) = harness.upload(b"old", now - Duration::minutes(5)).await;
    let (live, live_key) = harness.upload(b"new", now + Duration::minutes(5)).await;

    let reclaimer = harness.reclaimer(ReclaimPolicy::Unconditional);
    let stats = run(&reclaimer, now).await;

    assert_eq!(stats.scanned, 1);
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.failed, 0);
    assert!(harness.removed(expired));
    assert!(!harness.blob_exists(&expired_key).await);

    assert!(!harness.removed(live));
    assert!(harness.blob_exists(&live_key).await);
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let harness = Harness::new();
    let now = Utc::now();
    harness.upload(b"a", now - Duration::minutes(2)).await;
    harness.upload(b"b", now - Duration::minutes(1)).await;

    let reclaimer = harness.reclaimer(ReclaimPolicy::Unconditional);
    assert_eq!(run(&reclaimer, now).await.reclaimed, 2);

    let stats = run(&reclaimer, now).await;
    assert_eq!(stats, ReclaimStats::default());
}

#[tokio::test]
async fn test_unconditional_deletes_shared_content() {
    let harness = Harness::new();
    let now = Utc::now();
    let (expired, key) = harness.upload(b"shared", now - Duration::minutes(1)).await;
    let (live, same_key) = harness.upload(b"shared", now + Duration::hours(1)).await;
    assert_eq!(key, same_key);

    let stats = run(&harness.reclaimer(ReclaimPolicy::Unconditional), now).await;
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.shared_retained, 0);
    assert!(harness.removed(expired));
    assert!(!harness.blob_exists(&key).await);

    // The live record survives but its content is gone
    assert!(!harness.removed(live));
    let state = AppState::new(
        Config::default(),
        harness.ledger.clone(),
        harness.blobs.clone(),
    );
    let request = Request::builder()
        .uri(format!("/{}", live.to_handle()))
        .body(Body::empty())
        .unwrap();
    let response = hako::api::router(state).oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reference_counted_keeps_shared_content() {
    let harness = Harness::new();
    let now = Utc::now();
    let (expired, key) = harness.upload(b"shared", now - Duration::minutes(1)).await;
    let (live, _) = harness.upload(b"shared", now + Duration::hours(1)).await;

    let reclaimer = harness.reclaimer(ReclaimPolicy::ReferenceCounted);
    let stats = run(&reclaimer, now).await;
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.shared_retained, 1);
    assert!(harness.removed(expired));
    assert!(harness.blob_exists(&key).await);

    let stats = run(&reclaimer, now + Duration::hours(2)).await;
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.shared_retained, 0);
    assert!(harness.removed(live));
    assert!(!harness.blob_exists(&key).await);
    assert_eq!(harness.ledger.references(&key).unwrap(), 0);
}

#[tokio::test]
async fn test_missing_blob_counts_as_reclaimed() {
    let harness = Harness::new();
    let now = Utc::now();
    let (id, key) = harness.upload(b"vanished", now - Duration::minutes(1)).await;
    harness.blobs.delete(&key).await.unwrap();

    let stats = run(&harness.reclaimer(ReclaimPolicy::Unconditional), now).await;
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.already_absent, 1);
    assert!(harness.removed(id));
}

#[tokio::test]
async fn test_delete_failure_leaves_record_for_next_cycle() {
    let harness = Harness::new();
    let now = Utc::now();
    let (id, key) = harness.upload(b"stubborn", now - Duration::minutes(1)).await;

    let blobs = Arc::new(FailingBlobStore {
        inner: (*harness.blobs).clone(),
        failing: AtomicBool::new(true),
    });
    let metrics = Arc::new(Metrics::new());
    let reclaimer = harness
        .reclaimer_over(harness.ledger.clone(), blobs.clone(), ReclaimPolicy::Unconditional)
        .with_metrics(metrics.clone());

    let stats = run(&reclaimer, now).await;
    assert_eq!(stats.scanned, 1);
    assert_eq!(stats.reclaimed, 0);
    assert_eq!(stats.failed, 1);
    assert!(!harness.removed(id));
    assert!(harness.blob_exists(&key).await);
    assert_eq!(metrics.snapshot().reclaim_failures, 1);

    // Retried once the store recovers
    blobs.failing.store(false, Ordering::SeqCst);
    let stats = run(&reclaimer, now).await;
    assert_eq!(stats.reclaimed, 1);
    assert!(harness.removed(id));
    assert!(!harness.blob_exists(&key).await);
}

#[tokio::test]
async fn test_mark_failure_is_reported_inconsistent() {
    let harness = Harness::new();
    let now = Utc::now();
    let (id, key) = harness.upload(b"half-done", now - Duration::minutes(1)).await;

    let ledger = Arc::new(StuckLedger {
        inner: harness.ledger.clone(),
    });
    let reclaimer =
        harness.reclaimer_over(ledger, harness.blobs.clone(), ReclaimPolicy::Unconditional);

    let stats = run(&reclaimer, now).await;
    assert_eq!(stats.reclaimed, 0);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.inconsistent, 1);
    assert!(!harness.blob_exists(&key).await);
    assert!(!harness.removed(id));

    // An expired record is never served, whatever its removed flag says
    assert!(!harness.ledger.get(id).unwrap().is_live(now));
}

#[tokio::test]
async fn test_cancelled_cycle_stops_before_candidates() {
    let harness = Harness::new();
    let now = Utc::now();
    let (id, key) = harness.upload(b"pending", now - Duration::minutes(1)).await;

    let cancel = CancellationToken::new();
    cancel.cancel();
    let stats = harness
        .reclaimer(ReclaimPolicy::Unconditional)
        .run_cycle_at(now, &cancel)
        .await
        .unwrap();

    assert!(stats.interrupted);
    assert_eq!(stats.reclaimed, 0);
    assert!(!harness.removed(id));
    assert!(harness.blob_exists(&key).await);
}

#[tokio::test]
async fn test_background_reclaimer_shares_app_state() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.ledger.path = temp.path().join("ledger");
    config.storage.root = temp.path().join("blobs");
    config.retention.policy = ReclaimPolicy::ReferenceCounted;

    let stores = Stores::open(&config).unwrap();
    let state = AppState::from_stores(config, &stores);

    let key = state.blobs.put(&mut &b"background"[..]).await.unwrap();
    let id = state
        .ledger
        .create(NewRecord {
            blob_key: key.clone(),
            original_filename: "bg.txt".into(),
            mime_type: "text/plain".into(),
            expires_at: Utc::now() - Duration::seconds(1),
            client_ip: "10.0.0.1".into(),
            user_agent: "reclaim-test".into(),
        })
        .unwrap();

    let reclaimer = Arc::new(state.reclaimer());
    assert_eq!(reclaimer.policy(), ReclaimPolicy::ReferenceCounted);

    let cancel = CancellationToken::new();
    let handle = spawn_reclaimer(reclaimer, StdDuration::from_millis(20), cancel.clone());

    let deadline = tokio::time::Instant::now() + StdDuration::from_secs(5);
    while !state.ledger.get(id).unwrap().removed {
        assert!(tokio::time::Instant::now() < deadline, "record was not reclaimed");
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }

    cancel.cancel();
    tokio::time::timeout(StdDuration::from_secs(5), handle)
        .await
        .expect("reclaimer did not stop")
        .unwrap();

    assert!(!state.blobs.exists(&key).await.unwrap());
    assert_eq!(state.metrics.snapshot().records_reclaimed, 1);
    assert!(state.ledger.last_reclaim_run().unwrap().is_some());
}

#[tokio::test]
async fn test_reupload_under_key_lock_keeps_content() {
    let temp = TempDir::new().unwrap();
    let mut config = Config::default();
    config.ledger.path = temp.path().join("ledger");
    config.storage.root = temp.path().join("blobs");
    config.retention.policy = ReclaimPolicy::ReferenceCounted;

    let stores = Stores::open(&config).unwrap();
    let state = AppState::from_stores(config, &stores);

    let record = |expires_at: DateTime<Utc>, key: &BlobKey| NewRecord {
        blob_key: key.clone(),
        original_filename: "twin.txt".into(),
        mime_type: "text/plain".into(),
        expires_at,
        client_ip: "10.0.0.1".into(),
        user_agent: "reclaim-test".into(),
    };

    let key = state.blobs.put(&mut &b"twin"[..]).await.unwrap();
    let expired = state
        .ledger
        .create(record(Utc::now() - Duration::seconds(1), &key))
        .unwrap();

    // Same critical section the upload path takes around commit + create
    let guard = state.locks.lock(&key).await;

    let reclaimer = Arc::new(state.reclaimer());
    let cycle = tokio::spawn({
        let reclaimer = reclaimer.clone();
        async move { reclaimer.run_cycle(&CancellationToken::new()).await }
    });

    tokio::time::sleep(StdDuration::from_millis(50)).await;
    assert!(!cycle.is_finished(), "cycle must wait for the key lock");

    let live = state
        .ledger
        .create(record(Utc::now() + Duration::hours(1), &key))
        .unwrap();
    drop(guard);

    let stats = timeout_join(cycle).await;
    assert_eq!(stats.reclaimed, 1);
    assert_eq!(stats.shared_retained, 1);

    assert!(state.ledger.get(expired).unwrap().removed);
    assert!(!state.ledger.get(live).unwrap().removed);
    assert!(state.blobs.exists(&key).await.unwrap());
    assert_eq!(state.ledger.references(&key).unwrap(), 1);
}

async fn timeout_join(
    cycle: tokio::task::JoinHandle<Result<ReclaimStats, hako::reclaimer::ReclaimError>>,
) -> ReclaimStats {
    tokio::time::timeout(StdDuration::from_secs(5), cycle)
        .await
        .expect("cycle did not finish")
        .unwrap()
        .unwrap()
}
