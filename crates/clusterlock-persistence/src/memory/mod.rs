// In-memory lock store
// Single-process storage for standalone deployments, rows never leave the process

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use clusterlock_common::{LockClaim, LockRecord, LockStatus};

use crate::traits::LockStore;

/// Lock rows kept in a concurrent map keyed by lock key.
///
/// Each operation runs under the shard lock of its key, which makes the
/// compare-and-set on `status` atomic. Lease expiry is not applied on
/// acquisition: nothing outside this process can hold a row, and holders
/// of this process are tracked by the lock manager.
#[derive(Default)]
pub struct MemoryLockStore {
    records: DashMap<String, LockRecord>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows, including `FREE` tombstones
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn release_where<F>(&self, now: i64, predicate: F) -> Vec<LockRecord>
    where
        F: Fn(&LockRecord) -> bool,
    {
        let mut released = Vec::new();
        for mut entry in self.records.iter_mut() {
            if entry.is_held() && predicate(entry.value()) {
                released.push(entry.value().clone());
                entry.free(now);
            }
        }
        released
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    fn is_clustered(&self) -> bool {
        false
    }

    async fn try_acquire(&self, claim: &LockClaim) -> anyhow::Result<bool> {
        match self.records.entry(claim.key.clone()) {
            Entry::Vacant(vacant) => {
                vacant.insert(LockRecord::from_claim(claim));
                Ok(true)
            }
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_held() {
                    return Ok(false);
                }
                occupied.insert(LockRecord::from_claim(claim));
                Ok(true)
            }
        }
    }

    async fn release(&self, key: &str, owner: &str, now: i64) -> anyhow::Result<bool> {
        match self.records.get_mut(key) {
            Some(mut record) if record.is_owned_by(owner) => {
                record.free(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_aborted(&self, key: &str, now: i64) -> anyhow::Result<bool> {
        match self.records.get_mut(key) {
            Some(mut record) if record.is_held() => {
                record.status = LockStatus::Abort;
                record.last_modified = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find(&self, key: &str) -> anyhow::Result<Option<LockRecord>> {
        Ok(self.records.get(key).map(|r| r.clone()))
    }

    async fn find_held(&self) -> anyhow::Result<Vec<LockRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.is_held())
            .map(|r| r.clone())
            .collect())
    }

    async fn find_held_by(&self, owner: &str) -> anyhow::Result<Vec<LockRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.is_owned_by(owner))
            .map(|r| r.clone())
            .collect())
    }

    async fn refresh(
        &self,
        keys: &[String],
        owner: &str,
        now: i64,
        expires_at: i64,
    ) -> anyhow::Result<u64> {
        let mut refreshed = 0;
        for key in keys {
            if let Some(mut record) = self.records.get_mut(key)
                && record.is_owned_by(owner)
            {
                record.expiration_time = expires_at;
                record.last_modified = now;
                refreshed += 1;
            }
        }
        Ok(refreshed)
    }

    async fn release_stale(&self, cutoff: i64, now: i64) -> anyhow::Result<Vec<LockRecord>> {
        Ok(self.release_where(now, |r| r.last_modified < cutoff))
    }

    async fn release_owned_by(&self, owner: &str, now: i64) -> anyhow::Result<Vec<LockRecord>> {
        Ok(self.release_where(now, |r| r.owner.as_deref() == Some(owner)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claim(key: &str, owner: &str, now: i64) -> LockClaim {
        LockClaim {
            key: key.to_string(),
            owner: owner.to_string(),
            thread: format!("{}-worker", owner),
            now,
            expires_at: now + 100,
        }
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let store = MemoryLockStore::new();

        assert!(store.try_acquire(&claim("a", "node-1", 1)).await.unwrap());
        assert!(!store.try_acquire(&claim("a", "node-2", 2)).await.unwrap());

        let record = store.find("a").await.unwrap().unwrap();
        assert_eq!(record.owner.as_deref(), Some("node-1"));
        assert_eq!(record.thread.as_deref(), Some("node-1-worker"));
        assert_eq!(record.status, LockStatus::Running);
    }

    #[tokio::test]
    async fn test_expired_row_is_not_taken_over() {
        let store = MemoryLockStore::new();

        assert!(store.try_acquire(&claim("a", "node-1", 1)).await.unwrap());
        // Far past the lease: still held, only the manager may reclaim it
        assert!(!store.try_acquire(&claim("a", "node-1", 10_000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_free_row_is_reused() {
        let store = MemoryLockStore::new();

        store.try_acquire(&claim("a", "node-1", 1)).await.unwrap();
        assert!(store.release("a", "node-1", 2).await.unwrap());
        assert_eq!(store.len(), 1);

        let record = store.find("a").await.unwrap().unwrap();
        assert_eq!(record.status, LockStatus::Free);
        assert!(record.owner.is_none());

        assert!(store.try_acquire(&claim("a", "node-2", 3)).await.unwrap());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_release_requires_owner() {
        let store = MemoryLockStore::new();

        store.try_acquire(&claim("a", "node-1", 1)).await.unwrap();
        assert!(!store.release("a", "node-2", 2).await.unwrap());
        assert!(!store.release("missing", "node-1", 2).await.unwrap());
        assert!(store.find("a").await.unwrap().unwrap().is_held());
    }

    #[tokio::test]
    async fn test_mark_aborted() {
        let store = MemoryLockStore::new();

        assert!(!store.mark_aborted("a", 1).await.unwrap());
        store.try_acquire(&claim("a", "node-1", 1)).await.unwrap();
        assert!(store.mark_aborted("a", 2).await.unwrap());
        assert!(store.mark_aborted("a", 3).await.unwrap());

        let record = store.find("a").await.unwrap().unwrap();
        assert_eq!(record.status, LockStatus::Abort);
        assert_eq!(record.last_modified, 3);

        store.release("a", "node-1", 4).await.unwrap();
        assert!(!store.mark_aborted("a", 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_held_skips_free_rows() {
        let store = MemoryLockStore::new();

        store.try_acquire(&claim("a", "node-1", 1)).await.unwrap();
        store.try_acquire(&claim("b", "node-2", 1)).await.unwrap();
        store.try_acquire(&claim("c", "node-1", 1)).await.unwrap();
        store.release("c", "node-1", 2).await.unwrap();

        let mut held: Vec<_> = store
            .find_held()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        held.sort();
        assert_eq!(held, vec!["a", "b"]);

        let mine = store.find_held_by("node-1").await.unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].key, "a");
    }

    #[tokio::test]
    async fn test_refresh_only_touches_owned_rows() {
        let store = MemoryLockStore::new();

        store.try_acquire(&claim("a", "node-1", 1)).await.unwrap();
        store.try_acquire(&claim("b", "node-2", 1)).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        assert_eq!(store.refresh(&keys, "node-1", 50, 500).await.unwrap(), 1);

        let a = store.find("a").await.unwrap().unwrap();
        assert_eq!(a.expiration_time, 500);
        assert_eq!(a.last_modified, 50);
        let b = store.find("b").await.unwrap().unwrap();
        assert_eq!(b.expiration_time, 101);
    }

    #[tokio::test]
    async fn test_release_stale_and_owned() {
        let store = MemoryLockStore::new();

        store.try_acquire(&claim("old", "node-1", 1)).await.unwrap();
        store.try_acquire(&claim("new", "node-2", 1_000)).await.unwrap();

        let swept = store.release_stale(500, 2_000).await.unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].key, "old");
        assert_eq!(swept[0].status, LockStatus::Running);
        assert!(!store.find("old").await.unwrap().unwrap().is_held());

        let cleared = store.release_owned_by("node-2", 2_000).await.unwrap();
        assert_eq!(cleared.len(), 1);
        assert!(store.find_held().await.unwrap().is_empty());
    }
}
