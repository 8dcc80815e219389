//! Lock manager
//!
//! The `LockManager` is the single entry point for named, exclusive,
//! reentrant locks:
//! - `lock` never blocks: it succeeds or fails with `LockError::Contended`
//! - the holder that locked a key is the only one that can unlock it
//! - `abort` asks the holder to give the lock up; release stays cooperative
//! - `destroy` interrupts every holder, waits a grace period, then forces
//!
//! Cross-process exclusion is delegated to the `LockStore` compare-and-set.
//! Reentrancy and holder ownership are tracked in-process, per manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use clusterlock_common::utils::add_millis;
use clusterlock_common::{LockClaim, LockError, LockRecord, Result, current_timestamp};
use clusterlock_persistence::{LockStore, MemoryLockStore};

use crate::config::LockManagerConfig;
use crate::holder::LockHolder;
use crate::janitor::LockJanitor;
use crate::job::ShutdownSignal;
use crate::metrics;
use crate::node::{NodeIdProvider, StaticNodeId};
use crate::refresher::LockRefresher;
use crate::registry::{HeldLocks, LocalHold, LocalRelease};
use crate::resource::LockResource;

/// Poll period while `destroy()` waits for holders to unlock
const DESTROY_POLL_INTERVAL: Duration = Duration::from_millis(25);

struct ManagerInner {
    store: Arc<dyn LockStore>,
    node_id: String,
    config: LockManagerConfig,
    registry: Arc<HeldLocks>,
    destroyed: AtomicBool,
    shutdown: ShutdownSignal,
    jobs: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    refresher: Option<Arc<LockRefresher>>,
    janitor: Option<Arc<LockJanitor>>,
}

/// Cluster-wide named lock manager
///
/// Cloning is cheap and every clone drives the same manager. For a clustered
/// store, `new` spawns the refresher and the janitor on the current tokio
/// runtime, so it must be called from within one.
///
/// Construction fails for timing settings under which a live holder could
/// lose its lease between two refreshes (see `LockManagerConfig::validate`).
#[derive(Clone)]
pub struct LockManager {
    inner: Arc<ManagerInner>,
}

impl LockManager {
    pub fn new(
        store: Arc<dyn LockStore>,
        node: &dyn NodeIdProvider,
        config: LockManagerConfig,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        Ok(Self::start(store, node, config))
    }

    fn start(store: Arc<dyn LockStore>, node: &dyn NodeIdProvider, config: LockManagerConfig) -> Self {
        let node_id = node.node_id();
        let registry = Arc::new(HeldLocks::default());
        let shutdown = ShutdownSignal::new();
        let clustered = store.is_clustered();

        let mut jobs = Vec::new();
        let (refresher, janitor) = if clustered {
            let refresher = Arc::new(LockRefresher::new(
                store.clone(),
                registry.clone(),
                node_id.clone(),
                config.lease(),
            ));
            let janitor = Arc::new(LockJanitor::new(store.clone(), config.stale_threshold()));
            jobs.push(
                refresher
                    .clone()
                    .spawn(config.refresh_interval(), shutdown.subscribe()),
            );
            jobs.push(
                janitor
                    .clone()
                    .spawn(config.cleanup_interval(), shutdown.subscribe()),
            );
            (Some(refresher), Some(janitor))
        } else {
            (None, None)
        };

        info!(
            node = %node_id,
            clustered,
            lease_ms = config.lease_ms,
            refresh_interval_ms = config.refresh_interval().as_millis() as u64,
            stale_threshold_ms = config.stale_threshold_ms,
            "Lock manager started"
        );

        Self {
            inner: Arc::new(ManagerInner {
                store,
                node_id,
                config,
                registry,
                destroyed: AtomicBool::new(false),
                shutdown,
                jobs: parking_lot::Mutex::new(jobs),
                refresher,
                janitor,
            }),
        }
    }

    /// A single-node manager over a fresh in-memory store
    pub fn in_memory(node_id: impl Into<String>) -> Self {
        Self::start(
            Arc::new(MemoryLockStore::new()),
            &StaticNodeId::new(node_id),
            LockManagerConfig::default(),
        )
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    pub fn config(&self) -> &LockManagerConfig {
        &self.inner.config
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// The lease refresher, present for clustered stores
    pub fn refresher(&self) -> Option<&Arc<LockRefresher>> {
        self.inner.refresher.as_ref()
    }

    /// The stale lock janitor, present for clustered stores
    pub fn janitor(&self) -> Option<&Arc<LockJanitor>> {
        self.inner.janitor.as_ref()
    }

    /// Current reentrant hold count of `holder` on `key` (0 when not held by it)
    pub fn hold_count(&self, holder: &LockHolder, key: &str) -> u32 {
        self.inner.registry.hold_count(key, holder)
    }

    /// Number of keys held by holders of this manager
    pub fn local_lock_count(&self) -> usize {
        self.inner.registry.len()
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_destroyed() {
            return Err(LockError::Destroyed);
        }
        Ok(())
    }

    /// Acquire `key` for `holder`, failing fast if anyone else holds it.
    ///
    /// Locking a key the holder already holds increments its hold count and
    /// returns another handle on the same lock.
    pub async fn lock(&self, holder: &LockHolder, key: &str) -> Result<LockResource> {
        self.ensure_active()?;
        let node_id = self.inner.node_id.as_str();

        match self.inner.registry.try_reenter(key, holder) {
            LocalHold::Reentered(hold_count) => {
                trace!(key, node = node_id, thread = holder.name(), hold_count, "Lock reentered");
                return Ok(LockResource::new(self.clone(), holder.clone(), key));
            }
            LocalHold::HeldByOther { thread } => {
                metrics::record_contention();
                debug!(key, node = node_id, holder_thread = %thread, "Lock held by another local holder");
                return Err(LockError::contended(
                    key,
                    Some(node_id.to_string()),
                    Some(thread),
                ));
            }
            LocalHold::Abandoned { thread } => {
                warn!(
                    key,
                    node = node_id,
                    thread = %thread,
                    "Lock holder went away without unlocking, reclaiming lock"
                );
                self.inner
                    .store
                    .release(key, node_id, current_timestamp())
                    .await?;
                metrics::record_forced_releases(1);
            }
            LocalHold::Vacant => {}
        }

        let now = current_timestamp();
        let claim = LockClaim {
            key: key.to_string(),
            owner: node_id.to_string(),
            thread: holder.name().to_string(),
            now,
            expires_at: add_millis(now, self.inner.config.lease_ms),
        };

        if !self.inner.store.try_acquire(&claim).await? {
            metrics::record_contention();
            let (owner, thread) = self
                .inner
                .store
                .find(key)
                .await?
                .map(|record| (record.owner, record.thread))
                .unwrap_or_default();
            debug!(
                key,
                node = node_id,
                owner = owner.as_deref().unwrap_or("-"),
                "Lock is held elsewhere"
            );
            return Err(LockError::contended(key, owner, thread));
        }

        self.inner.registry.insert(key, holder);

        // destroy() may have drained the registry while the claim was in flight
        if self.is_destroyed() {
            if self.inner.registry.forget(key, holder.id()) {
                self.inner
                    .store
                    .release(key, node_id, current_timestamp())
                    .await?;
            }
            return Err(LockError::Destroyed);
        }

        metrics::record_acquisition();
        metrics::set_held_locks(self.inner.registry.live_count());
        debug!(key, node = node_id, thread = holder.name(), "Lock acquired");
        Ok(LockResource::new(self.clone(), holder.clone(), key))
    }

    /// Drop one hold of `key` by `holder`, freeing the lock when none remain.
    ///
    /// Unlocking a key the holder does not hold is logged and ignored.
    pub async fn unlock(&self, holder: &LockHolder, key: &str) -> Result<()> {
        let node_id = self.inner.node_id.as_str();

        match self.inner.registry.exit(key, holder) {
            LocalRelease::NotHeld => {
                warn!(
                    key,
                    node = node_id,
                    thread = holder.name(),
                    "Unlock of a lock not held on this node, ignoring"
                );
            }
            LocalRelease::NotOwner { thread } => {
                warn!(
                    key,
                    node = node_id,
                    thread = holder.name(),
                    holder_thread = %thread,
                    "Unlock by a thread that does not hold the lock, ignoring"
                );
            }
            LocalRelease::Remaining(hold_count) => {
                trace!(key, node = node_id, thread = holder.name(), hold_count, "Lock hold released");
            }
            LocalRelease::Released => {
                let released = self
                    .inner
                    .store
                    .release(key, node_id, current_timestamp())
                    .await?;
                metrics::set_held_locks(self.inner.registry.live_count());
                if released {
                    metrics::record_release();
                    debug!(key, node = node_id, thread = holder.name(), "Lock released");
                } else {
                    warn!(
                        key,
                        node = node_id,
                        thread = holder.name(),
                        "Lock was reclaimed before it could be released"
                    );
                }
            }
        }
        Ok(())
    }

    /// Whether `key` is held by anyone, on any node sharing the store
    pub async fn is_locked(&self, key: &str) -> Result<bool> {
        Ok(self
            .inner
            .store
            .find(key)
            .await?
            .is_some_and(|record| record.is_held()))
    }

    /// Snapshot of every held lock visible through the store
    pub async fn get_locks(&self) -> Result<Vec<LockRecord>> {
        Ok(self.inner.store.find_held().await?)
    }

    /// Ask the holder of `key` to release it.
    ///
    /// The row moves to `ABORT`. A holder on this node is interrupted right
    /// away; a holder on another node is interrupted by its own refresher.
    pub async fn abort(&self, key: &str) -> Result<()> {
        let node_id = self.inner.node_id.as_str();

        if !self
            .inner
            .store
            .mark_aborted(key, current_timestamp())
            .await?
        {
            debug!(key, node = node_id, "Abort of a lock that is not held");
            return Ok(());
        }

        if self.inner.registry.interrupt(key) {
            info!(key, node = node_id, "Lock aborted, holder interrupted");
        } else {
            info!(key, node = node_id, "Lock marked aborted, holder is not on this node");
        }
        Ok(())
    }

    /// Free every lock owned by this node, including ones whose holders are still running
    pub async fn clear(&self) -> Result<()> {
        let node_id = self.inner.node_id.as_str();

        let interrupted = self.inner.registry.interrupt_all();
        self.inner.registry.drain();
        let released = self
            .inner
            .store
            .release_owned_by(node_id, current_timestamp())
            .await?;

        for record in &released {
            warn!(
                key = %record.key,
                node = node_id,
                thread = record.thread.as_deref().unwrap_or("-"),
                status = %record.status,
                "Lock still held while clearing, forcing release"
            );
        }
        metrics::record_forced_releases(released.len());
        metrics::set_held_locks(0);
        info!(
            node = node_id,
            interrupted,
            released = released.len(),
            "Lock manager cleared"
        );
        Ok(())
    }

    /// Shut the manager down.
    ///
    /// New acquisitions fail with `LockError::Destroyed` from the moment this
    /// is called. Holders are interrupted and given the configured grace
    /// period to unlock; whatever is still held afterwards is freed by force.
    /// Leases of holders that are still draining keep being refreshed until
    /// the forced release, so no other node can take their rows meanwhile.
    pub async fn destroy(&self) -> Result<()> {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let node_id = self.inner.node_id.as_str();
        let grace = self.inner.config.destroy_grace_period();

        let interrupted = self.inner.registry.interrupt_all();
        info!(
            node = node_id,
            interrupted,
            grace_ms = grace.as_millis() as u64,
            "Destroying lock manager"
        );

        let deadline = Instant::now() + grace;
        while self.inner.registry.has_live_holders() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(DESTROY_POLL_INTERVAL.min(deadline - now)).await;
        }

        let mut first_error = None;
        let mut forced = 0;
        for (key, held) in self.inner.registry.drain() {
            if held.is_alive() {
                warn!(
                    key = %key,
                    node = node_id,
                    thread = held.thread(),
                    "Lock holder did not unlock within the grace period, forcing release"
                );
            } else {
                warn!(
                    key = %key,
                    node = node_id,
                    thread = held.thread(),
                    "Lock holder went away without unlocking, forcing release"
                );
            }

            match self
                .inner
                .store
                .release(&key, node_id, current_timestamp())
                .await
            {
                Ok(_) => forced += 1,
                Err(e) => {
                    error!(key = %key, node = node_id, error = %e, "Failed to force lock release");
                    first_error.get_or_insert(e);
                }
            }
        }
        metrics::record_forced_releases(forced);
        metrics::set_held_locks(0);

        // The refresher ran through the grace period; nothing is left to refresh
        self.inner.shutdown.shutdown();
        let jobs: Vec<JoinHandle<()>> = self.inner.jobs.lock().drain(..).collect();
        for job in jobs {
            if let Err(e) = job.await {
                error!(node = node_id, error = %e, "Background lock job failed");
            }
        }

        info!(node = node_id, forced, "Lock manager destroyed");
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use clusterlock_common::LockStatus;

    use super::*;

    fn manager() -> LockManager {
        LockManager::new(
            Arc::new(MemoryLockStore::new()),
            &StaticNodeId::new("node-a"),
            LockManagerConfig::default().with_destroy_grace_period(Duration::from_millis(200)),
        )
        .unwrap()
    }

    async fn record(manager: &LockManager, key: &str) -> LockRecord {
        manager
            .inner
            .store
            .find(key)
            .await
            .unwrap()
            .expect("record should exist")
    }

    #[tokio::test]
    async fn test_lock_and_unlock() {
        let manager = manager();
        let holder = LockHolder::new("worker-1");

        let resource = manager.lock(&holder, "123").await.unwrap();
        assert_eq!(resource.key(), "123");
        assert!(manager.is_locked("123").await.unwrap());

        let locked = record(&manager, "123").await;
        assert_eq!(locked.status, LockStatus::Running);
        assert_eq!(locked.owner.as_deref(), Some("node-a"));
        assert_eq!(locked.thread.as_deref(), Some("worker-1"));

        resource.release().await.unwrap();
        assert!(!manager.is_locked("123").await.unwrap());
        assert_eq!(record(&manager, "123").await.status, LockStatus::Free);
    }

    #[tokio::test]
    async fn test_reentrant_lock() {
        let manager = manager();
        let holder = LockHolder::new("worker-1");

        let first = manager.lock(&holder, "x").await.unwrap();
        let second = manager.lock(&holder, "x").await.unwrap();
        assert_eq!(manager.hold_count(&holder, "x"), 2);
        assert_eq!(manager.get_locks().await.unwrap().len(), 1);

        second.release().await.unwrap();
        assert!(manager.is_locked("x").await.unwrap());
        assert_eq!(record(&manager, "x").await.status, LockStatus::Running);

        first.release().await.unwrap();
        assert!(!manager.is_locked("x").await.unwrap());
        assert_eq!(manager.hold_count(&holder, "x"), 0);
    }

    #[tokio::test]
    async fn test_lock_is_fail_fast_for_other_holders() {
        let manager = manager();
        let owner = LockHolder::new("owner");
        let other = LockHolder::new("other");

        let _resource = manager.lock(&owner, "x").await.unwrap();
        let err = manager.lock(&other, "x").await.unwrap_err();
        match err {
            LockError::Contended { key, owner, thread } => {
                assert_eq!(key, "x");
                assert_eq!(owner.as_deref(), Some("node-a"));
                assert_eq!(thread.as_deref(), Some("owner"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_unlock_by_non_holder_is_ignored() {
        let manager = manager();
        let owner = LockHolder::new("owner");
        let other = LockHolder::new("other");

        let _resource = manager.lock(&owner, "x").await.unwrap();
        manager.unlock(&other, "x").await.unwrap();

        assert!(manager.is_locked("x").await.unwrap());
        assert_eq!(manager.hold_count(&owner, "x"), 1);
        assert_eq!(record(&manager, "x").await.thread.as_deref(), Some("owner"));
    }

    #[tokio::test]
    async fn test_unlock_unknown_key_is_a_no_op() {
        let manager = manager();
        let holder = LockHolder::new("worker");

        manager.unlock(&holder, "unknown-key").await.unwrap();
        assert!(!manager.is_locked("unknown-key").await.unwrap());
        assert!(manager.get_locks().await.unwrap().is_empty());

        let resource = manager.lock(&holder, "k").await.unwrap();
        resource.release().await.unwrap();
        manager.unlock(&holder, "k").await.unwrap();
        assert_eq!(record(&manager, "k").await.status, LockStatus::Free);
    }

    #[tokio::test]
    async fn test_abandoned_lock_is_reclaimed() {
        let manager = manager();
        let gone = LockHolder::new("gone");
        let now = current_timestamp();
        manager
            .inner
            .store
            .try_acquire(&LockClaim {
                key: "x".to_string(),
                owner: "node-a".to_string(),
                thread: "gone".to_string(),
                now,
                expires_at: now + 60_000,
            })
            .await
            .unwrap();
        manager.inner.registry.insert("x", &gone);
        // The holder goes away without unlocking
        drop(gone);

        assert_eq!(manager.local_lock_count(), 1);

        let next = LockHolder::new("next");
        let resource = manager.lock(&next, "x").await.unwrap();
        assert_eq!(record(&manager, "x").await.thread.as_deref(), Some("next"));
        resource.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_abort_interrupts_local_holder() {
        let manager = manager();
        let holder = LockHolder::new("worker");
        let resource = manager.lock(&holder, "x").await.unwrap();

        let worker = tokio::spawn(async move {
            resource.holder().interrupted().await;
            resource.release().await
        });

        manager.abort("x").await.unwrap();
        assert!(holder.is_interrupted());

        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("holder should release")
            .unwrap()
            .unwrap();
        assert_eq!(record(&manager, "x").await.status, LockStatus::Free);
    }

    #[tokio::test]
    async fn test_abort_sets_status() {
        let manager = manager();
        let holder = LockHolder::new("worker");
        let _resource = manager.lock(&holder, "x").await.unwrap();

        manager.abort("x").await.unwrap();
        manager.abort("x").await.unwrap();
        assert_eq!(record(&manager, "x").await.status, LockStatus::Abort);
        assert!(manager.is_locked("x").await.unwrap());

        // Reentry keeps the aborted status
        let _again = manager.lock(&holder, "x").await.unwrap();
        assert_eq!(record(&manager, "x").await.status, LockStatus::Abort);

        manager.abort("not-held").await.unwrap();
        assert!(!manager.is_locked("not-held").await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_frees_everything_of_this_node() {
        let manager = manager();
        let holder = LockHolder::new("worker");
        let _a = manager.lock(&holder, "a").await.unwrap();
        let _b = manager.lock(&holder, "b").await.unwrap();

        manager.clear().await.unwrap();
        assert!(manager.get_locks().await.unwrap().is_empty());
        assert_eq!(manager.local_lock_count(), 0);
        // The former holder is told it no longer owns anything
        assert!(holder.is_interrupted());

        // The manager stays usable
        let other = LockHolder::new("other");
        let resource = manager.lock(&other, "a").await.unwrap();
        resource.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let invalid = [
            LockManagerConfig::default().with_lease(Duration::ZERO),
            LockManagerConfig::default()
                .with_lease(Duration::from_millis(100))
                .with_refresh_interval(Duration::from_secs(3600)),
        ];
        for config in invalid {
            let result = LockManager::new(
                Arc::new(MemoryLockStore::new()),
                &StaticNodeId::new("node-a"),
                config,
            );
            assert!(result.is_err());
        }
    }

    #[tokio::test]
    async fn test_held_locks_count_only_live_holders() {
        let manager = manager();
        let live = LockHolder::new("live");
        let _resource = manager.lock(&live, "x").await.unwrap();

        let gone = LockHolder::new("gone");
        manager.inner.registry.insert("y", &gone);
        drop(gone);

        assert_eq!(manager.local_lock_count(), 2);
        assert_eq!(manager.inner.registry.live_count(), 1);
    }

    #[tokio::test]
    async fn test_destroy_forces_unresponsive_holder() {
        let manager = manager();
        let stubborn = LockHolder::new("stubborn");
        let _resource = manager.lock(&stubborn, "x").await.unwrap();

        let started = std::time::Instant::now();
        manager.destroy().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(200));

        assert!(stubborn.is_interrupted());
        assert!(manager.is_destroyed());
        assert_eq!(record(&manager, "x").await.status, LockStatus::Free);

        let err = manager.lock(&stubborn, "y").await.unwrap_err();
        assert!(matches!(err, LockError::Destroyed));
        assert!(!err.is_contention());

        // Second destroy is a no-op
        manager.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_destroy_waits_for_cooperative_holder() {
        let manager = LockManager::new(
            Arc::new(MemoryLockStore::new()),
            &StaticNodeId::new("node-a"),
            LockManagerConfig::default().with_destroy_grace_period(Duration::from_secs(10)),
        )
        .unwrap();
        let holder = LockHolder::new("worker");
        let resource = manager.lock(&holder, "x").await.unwrap();

        let worker = tokio::spawn(async move {
            resource.holder().interrupted().await;
            resource.release().await
        });

        let started = std::time::Instant::now();
        manager.destroy().await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));

        worker.await.unwrap().unwrap();
        assert_eq!(record(&manager, "x").await.status, LockStatus::Free);
    }

    #[tokio::test]
    async fn test_in_memory_manager_has_no_background_jobs() {
        let manager = LockManager::in_memory("solo");
        assert_eq!(manager.node_id(), "solo");
        assert!(manager.refresher().is_none());
        assert!(manager.janitor().is_none());
        manager.destroy().await.unwrap();
    }
}
