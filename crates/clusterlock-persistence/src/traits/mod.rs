//! Lock store trait
//!
//! Every mutation is an atomic, status-keyed conditional update. Callers never
//! read a row and then write it back unguarded: two nodes racing on the same
//! key must never both observe success.

use async_trait::async_trait;

use clusterlock_common::{LockClaim, LockRecord};

/// Persistence operations over lock rows
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Whether rows are shared with other processes.
    ///
    /// Shared stores need lease refreshing and stale-row sweeping; a
    /// single-process store does not.
    fn is_clustered(&self) -> bool;

    /// Atomically take the lock described by `claim`.
    ///
    /// Succeeds when no row exists, when the row is `FREE`, or (for
    /// clustered stores) when the row's lease ended before `claim.now`.
    /// Returns `false` when the row is held by someone else.
    async fn try_acquire(&self, claim: &LockClaim) -> anyhow::Result<bool>;

    /// Free `key` if it is currently owned by `owner`
    async fn release(&self, key: &str, owner: &str, now: i64) -> anyhow::Result<bool>;

    /// Move a held row to `ABORT`
    async fn mark_aborted(&self, key: &str, now: i64) -> anyhow::Result<bool>;

    /// Get a row by key
    async fn find(&self, key: &str) -> anyhow::Result<Option<LockRecord>>;

    /// All rows that are not `FREE`
    async fn find_held(&self) -> anyhow::Result<Vec<LockRecord>>;

    /// All rows that are not `FREE` and owned by `owner`
    async fn find_held_by(&self, owner: &str) -> anyhow::Result<Vec<LockRecord>>;

    /// Extend the lease of `keys` still held by `owner`.
    ///
    /// Returns the number of rows refreshed.
    async fn refresh(
        &self,
        keys: &[String],
        owner: &str,
        now: i64,
        expires_at: i64,
    ) -> anyhow::Result<u64>;

    /// Free every held row whose `lastModified` is older than `cutoff`.
    ///
    /// Returns the rows as they were before being freed.
    async fn release_stale(&self, cutoff: i64, now: i64) -> anyhow::Result<Vec<LockRecord>>;

    /// Free every held row owned by `owner`.
    ///
    /// Returns the rows as they were before being freed.
    async fn release_owned_by(&self, owner: &str, now: i64) -> anyhow::Result<Vec<LockRecord>>;
}
