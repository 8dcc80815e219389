//! Scoped lock handle
//!
//! A `LockResource` is returned by every successful `lock()` call, including
//! reentrant ones, and accounts for exactly one hold. Call `release()` to
//! unlock and observe the outcome; dropping the handle unlocks in the
//! background instead.

use tokio::runtime::Handle;
use tracing::warn;

use clusterlock_common::{Result, current_timestamp};

use crate::holder::LockHolder;
use crate::manager::LockManager;

#[must_use = "the lock is released as soon as the resource is dropped"]
pub struct LockResource {
    manager: LockManager,
    holder: LockHolder,
    key: String,
    creation_time: i64,
    closed: bool,
}

impl LockResource {
    pub(crate) fn new(manager: LockManager, holder: LockHolder, key: &str) -> Self {
        Self {
            manager,
            holder,
            key: key.to_string(),
            creation_time: current_timestamp(),
            closed: false,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn holder(&self) -> &LockHolder {
        &self.holder
    }

    /// Epoch millis at which this hold was taken
    pub fn creation_time(&self) -> i64 {
        self.creation_time
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Give up this hold
    pub async fn release(mut self) -> Result<()> {
        self.closed = true;
        self.manager.unlock(&self.holder, &self.key).await
    }
}

impl Drop for LockResource {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        let manager = self.manager.clone();
        let holder = self.holder.clone();
        let key = std::mem::take(&mut self.key);
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = manager.unlock(&holder, &key).await {
                        warn!(key = %key, error = %e, "Failed to release dropped lock");
                    }
                });
            }
            Err(_) => {
                warn!(
                    key = %key,
                    thread = holder.name(),
                    "Lock resource dropped outside a tokio runtime, lock stays held until reclaimed"
                );
            }
        }
    }
}

impl std::fmt::Debug for LockResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockResource")
            .field("key", &self.key)
            .field("holder", &self.holder)
            .field("creation_time", &self.creation_time)
            .field("closed", &self.closed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_release_unlocks() {
        let manager = LockManager::in_memory("node-a");
        let holder = LockHolder::new("worker");

        let resource = manager.lock(&holder, "job").await.unwrap();
        assert_eq!(resource.key(), "job");
        assert_eq!(resource.holder(), &holder);
        assert!(!resource.is_closed());
        assert!(resource.creation_time() > 0);

        resource.release().await.unwrap();
        assert!(!manager.is_locked("job").await.unwrap());
    }

    #[tokio::test]
    async fn test_drop_unlocks_in_background() {
        let manager = LockManager::in_memory("node-a");
        let holder = LockHolder::new("worker");

        {
            let _resource = manager.lock(&holder, "job").await.unwrap();
            assert!(manager.is_locked("job").await.unwrap());
        }

        tokio::time::timeout(Duration::from_secs(1), async {
            while manager.is_locked("job").await.unwrap() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("dropped resource should unlock");
        assert_eq!(manager.hold_count(&holder, "job"), 0);
    }

    #[tokio::test]
    async fn test_each_reentrant_resource_releases_one_hold() {
        let manager = LockManager::in_memory("node-a");
        let holder = LockHolder::new("worker");

        let outer = manager.lock(&holder, "job").await.unwrap();
        let inner = manager.lock(&holder, "job").await.unwrap();
        inner.release().await.unwrap();
        assert_eq!(manager.hold_count(&holder, "job"), 1);
        assert!(manager.is_locked("job").await.unwrap());

        outer.release().await.unwrap();
        assert!(!manager.is_locked("job").await.unwrap());
    }
}
