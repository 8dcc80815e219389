//! Lease refresher
//!
//! Periodically extends the lease of every row this node holds for a live
//! holder. Rows whose holder went away are skipped so that they expire and
//! become reclaimable. After refreshing, the refresher also looks for rows
//! of this node that another node moved to `ABORT` and interrupts their
//! local holders, since a remote `abort()` cannot reach them directly.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use clusterlock_common::utils::add_millis;
use clusterlock_common::{LockStatus, Result, current_timestamp};
use clusterlock_persistence::LockStore;

use crate::job::spawn_periodic;
use crate::metrics;
use crate::registry::HeldLocks;

/// Outcome of one refresher run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Rows whose lease was extended
    pub refreshed: u64,
    /// Local holders interrupted because their row was aborted remotely
    pub interrupted: usize,
}

pub struct LockRefresher {
    store: Arc<dyn LockStore>,
    registry: Arc<HeldLocks>,
    node_id: String,
    lease: Duration,
    running: Mutex<()>,
}

impl LockRefresher {
    pub(crate) fn new(
        store: Arc<dyn LockStore>,
        registry: Arc<HeldLocks>,
        node_id: String,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            registry,
            node_id,
            lease,
            running: Mutex::new(()),
        }
    }

    /// Refresh once. Concurrent calls are serialized.
    pub async fn run_once(&self) -> Result<RefreshReport> {
        let _running = self.running.lock().await;

        let keys = self.registry.live_keys();
        if keys.is_empty() {
            return Ok(RefreshReport::default());
        }

        let now = current_timestamp();
        let expires_at = add_millis(now, self.lease.as_millis() as u64);
        let refreshed = self
            .store
            .refresh(&keys, &self.node_id, now, expires_at)
            .await?;
        metrics::record_refreshed(refreshed);

        let aborted: Vec<String> = self
            .store
            .find_held_by(&self.node_id)
            .await?
            .into_iter()
            .filter(|record| record.status == LockStatus::Abort)
            .map(|record| record.key)
            .collect();
        let interrupted = self.registry.deliver_aborts(&aborted);
        if interrupted > 0 {
            info!(
                node = %self.node_id,
                interrupted,
                "Interrupted holders of locks aborted by another node"
            );
        }

        debug!(
            node = %self.node_id,
            candidates = keys.len(),
            refreshed,
            "Lock leases refreshed"
        );
        Ok(RefreshReport {
            refreshed,
            interrupted,
        })
    }

    pub(crate) fn spawn(
        self: Arc<Self>,
        period: Duration,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        spawn_periodic("lock-refresher", period, shutdown_rx, move || {
            let refresher = self.clone();
            async move {
                if let Err(e) = refresher.run_once().await {
                    error!(node = %refresher.node_id, error = %e, "Failed to refresh lock leases");
                }
            }
        })
    }
}
