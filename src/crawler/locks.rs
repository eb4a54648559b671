use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type NovelKey = (String, String);

/// One async mutex per (site, novel), so two tasks never merge into the same
/// artifact at once. Different novels proceed concurrently.
#[derive(Default)]
pub struct NovelLocks {
    locks: Mutex<HashMap<NovelKey, Arc<AsyncMutex<()>>>>,
}

impl NovelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, site_id: &str, novel_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry((site_id.to_string(), novel_id.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}
