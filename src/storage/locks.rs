use tokio::sync::{Mutex, MutexGuard};

use super::BlobKey;

const STRIPES: usize = 256;

/// Striped per-key mutexes shared by the upload path and the reclaimer.
///
/// Publishing a blob plus registering its ledger record, and a reclaimer's
/// check/delete/mark sequence for the same key, run under the same stripe.
/// Keys are striped by the first digest byte, so unrelated keys may share a
/// stripe; holders must not take a second stripe while holding one.
pub struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub async fn lock(&self, key: &BlobKey) -> MutexGuard<'_, ()> {
        self.stripes[usize::from(key.first_byte())].lock().await
    }
}

impl Default for KeyLocks {
    fn default() -> Self {
        Self::new()
    }
}
