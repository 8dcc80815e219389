//! Stale lock janitor
//!
//! Frees rows whose `lastModified` is older than the staleness threshold,
//! whatever their status or owner. This is the backstop for a node that
//! crashed without running `destroy()`: its rows stay `RUNNING` forever
//! unless someone contends for them. Rows held by a live node are refreshed
//! far more often than the threshold and are never swept.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use clusterlock_common::{LockRecord, Result, current_timestamp};
use clusterlock_persistence::LockStore;

use crate::job::spawn_periodic;
use crate::metrics;

pub struct LockJanitor {
    store: Arc<dyn LockStore>,
    stale_threshold: Duration,
    running: Mutex<()>,
}

impl LockJanitor {
    pub fn new(store: Arc<dyn LockStore>, stale_threshold: Duration) -> Self {
        Self {
            store,
            stale_threshold,
            running: Mutex::new(()),
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// Sweep once, returning the rows that were freed. Concurrent calls are serialized.
    pub async fn run_once(&self) -> Result<Vec<LockRecord>> {
        let _running = self.running.lock().await;

        let now = current_timestamp();
        let cutoff = now.saturating_sub(self.stale_threshold.as_millis() as i64);
        let swept = self.store.release_stale(cutoff, now).await?;

        for record in &swept {
            warn!(
                key = %record.key,
                owner = record.owner.as_deref().unwrap_or("-"),
                thread = record.thread.as_deref().unwrap_or("-"),
                status = %record.status,
                last_modified = record.last_modified,
                "Freed stale lock"
            );
        }
        metrics::record_swept(swept.len());
        debug!(swept = swept.len(), cutoff, "Stale lock sweep finished");

        Ok(swept)
    }

    pub(crate) fn spawn(
        self: Arc<Self>,
        period: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        spawn_periodic("lock-janitor", period, shutdown_rx, move || {
            let janitor = self.clone();
            async move {
                if let Err(e) = janitor.run_once().await {
                    error!(error = %e, "Failed to sweep stale locks");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use clusterlock_common::{LockClaim, LockStatus};
    use clusterlock_persistence::MemoryLockStore;

    use super::*;

    #[tokio::test]
    async fn test_sweeps_only_stale_rows() {
        let store: Arc<dyn LockStore> = Arc::new(MemoryLockStore::new());
        let now = current_timestamp();

        for (key, modified) in [("stale", now - 10_000), ("fresh", now)] {
            store
                .try_acquire(&LockClaim {
                    key: key.to_string(),
                    owner: "crashed-node".to_string(),
                    thread: "worker".to_string(),
                    now: modified,
                    expires_at: modified + 100,
                })
                .await
                .unwrap();
        }
        store.mark_aborted("stale", now - 9_000).await.unwrap();

        let janitor = LockJanitor::new(store.clone(), Duration::from_secs(5));
        let swept = janitor.run_once().await.unwrap();

        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].key, "stale");
        assert_eq!(swept[0].status, LockStatus::Abort);
        assert_eq!(
            store.find("stale").await.unwrap().unwrap().status,
            LockStatus::Free
        );
        assert!(store.find("fresh").await.unwrap().unwrap().is_held());

        assert!(janitor.run_once().await.unwrap().is_empty());
    }
}
