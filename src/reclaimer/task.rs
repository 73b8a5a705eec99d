//! Long-lived reclamation loop
//!
//! Runs a cycle immediately on start and then every interval until the
//! cancellation token fires. Cancellation is observed between cycles and,
//! inside a cycle, between candidates.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ReclaimStats, Reclaimer};

pub const DEFAULT_RECLAIM_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn the reclamation loop; the handle resolves once `cancel` fires and
/// the in-flight candidate (if any) is finished
pub fn spawn_reclaimer(
    reclaimer: Arc<Reclaimer>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move { run_reclaim_loop(reclaimer, period, cancel).await })
}

async fn run_reclaim_loop(reclaimer: Arc<Reclaimer>, period: Duration, cancel: CancellationToken) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(
        interval_secs = period.as_secs(),
        policy = ?reclaimer.policy(),
        "Reclaimer started"
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Reclaimer shutting down");
                break;
            }
            _ = ticker.tick() => {
                match reclaimer.run_cycle(&cancel).await {
                    Ok(stats) => log_cycle(&stats),
                    Err(e) => warn!(error = %e, "Reclaim cycle failed, will retry"),
                }
            }
        }
    }
}

fn log_cycle(stats: &ReclaimStats) {
    if stats.reclaimed > 0 || stats.failed > 0 || stats.inconsistent > 0 {
        info!(
            scanned = stats.scanned,
            reclaimed = stats.reclaimed,
            already_absent = stats.already_absent,
            shared_retained = stats.shared_retained,
            failed = stats.failed,
            inconsistent = stats.inconsistent,
            "Reclaim cycle completed"
        );
    } else {
        debug!("Reclaim cycle: nothing expired");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{FjallLedger, IdGenerator, Ledger, NewRecord};
    use crate::reclaimer::ReclaimPolicy;
    use crate::storage::{BlobStore, KeyLocks, LocalBlobStore};
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_loop_reclaims_then_stops_on_cancel() {
        let temp = TempDir::new().unwrap();
        let ledger = Arc::new(
            FjallLedger::open(temp.path().join("ledger"), IdGenerator::new(1).unwrap()).unwrap(),
        );
        let blobs = Arc::new(LocalBlobStore::open(temp.path().join("blobs")).unwrap());

        let key = blobs.put(&mut &b"stale"[..]).await.unwrap();
        let id = ledger
            .create(NewRecord {
                blob_key: key.clone(),
                original_filename: "stale.txt".into(),
                mime_type: "text/plain".into(),
                expires_at: Utc::now() - chrono::Duration::seconds(1),
                client_ip: "127.0.0.1".into(),
                user_agent: "TestAgent".into(),
            })
            .unwrap();

        let reclaimer = Arc::new(Reclaimer::new(
            ledger.clone(),
            blobs.clone(),
            Arc::new(KeyLocks::new()),
            ReclaimPolicy::Unconditional,
        ));
        let cancel = CancellationToken::new();
        let handle = spawn_reclaimer(reclaimer, Duration::from_millis(20), cancel.clone());

        // First tick fires immediately
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while !ledger.get(id).unwrap().removed {
            assert!(tokio::time::Instant::now() < deadline, "record never reclaimed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!blobs.exists(&key).await.unwrap());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reclaimer did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_already_cancelled_loop_exits() {
        let temp = TempDir::new().unwrap();
        let ledger = Arc::new(
            FjallLedger::open(temp.path().join("ledger"), IdGenerator::new(1).unwrap()).unwrap(),
        );
        let blobs = Arc::new(LocalBlobStore::open(temp.path().join("blobs")).unwrap());
        let reclaimer = Arc::new(Reclaimer::new(
            ledger,
            blobs,
            Arc::new(KeyLocks::new()),
            ReclaimPolicy::default(),
        ));

        let cancel = CancellationToken::new();
        cancel.cancel();
        let handle = spawn_reclaimer(reclaimer, DEFAULT_RECLAIM_INTERVAL, cancel);
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("reclaimer did not stop")
            .unwrap();
    }
}
