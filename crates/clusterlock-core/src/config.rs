//! Lock manager configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use clusterlock_common::{
    DEFAULT_CLEANUP_INTERVAL_MS, DEFAULT_DESTROY_GRACE_MS, DEFAULT_LEASE_MS,
    DEFAULT_STALE_THRESHOLD_MS,
};

/// Timing parameters of a lock manager.
///
/// None of these are protocol constants: nodes sharing a table may run with
/// different values, as long as each node refreshes well within its lease
/// and the stale threshold stays far above every node's refresh interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockManagerConfig {
    /// Lease granted on acquisition and on every refresh
    #[serde(default = "default_lease_ms")]
    pub lease_ms: u64,
    /// Refresh period; half the lease when absent
    #[serde(default)]
    pub refresh_interval_ms: Option<u64>,
    /// Janitor period
    #[serde(default = "default_cleanup_interval_ms")]
    pub cleanup_interval_ms: u64,
    /// Age of `lastModified` after which the janitor frees a row
    #[serde(default = "default_stale_threshold_ms")]
    pub stale_threshold_ms: u64,
    /// How long `destroy()` waits for interrupted holders to unlock
    #[serde(default = "default_destroy_grace_ms")]
    pub destroy_grace_ms: u64,
}

fn default_lease_ms() -> u64 {
    DEFAULT_LEASE_MS
}

fn default_cleanup_interval_ms() -> u64 {
    DEFAULT_CLEANUP_INTERVAL_MS
}

fn default_stale_threshold_ms() -> u64 {
    DEFAULT_STALE_THRESHOLD_MS
}

fn default_destroy_grace_ms() -> u64 {
    DEFAULT_DESTROY_GRACE_MS
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            lease_ms: DEFAULT_LEASE_MS,
            refresh_interval_ms: None,
            cleanup_interval_ms: DEFAULT_CLEANUP_INTERVAL_MS,
            stale_threshold_ms: DEFAULT_STALE_THRESHOLD_MS,
            destroy_grace_ms: DEFAULT_DESTROY_GRACE_MS,
        }
    }
}

impl LockManagerConfig {
    pub fn lease(&self) -> Duration {
        Duration::from_millis(self.lease_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms.unwrap_or(self.lease_ms / 2).max(1))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms.max(1))
    }

    pub fn stale_threshold(&self) -> Duration {
        Duration::from_millis(self.stale_threshold_ms)
    }

    pub fn destroy_grace_period(&self) -> Duration {
        Duration::from_millis(self.destroy_grace_ms)
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease_ms = lease.as_millis() as u64;
        self
    }

    pub fn with_refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval_ms = Some(interval.as_millis() as u64);
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold_ms = threshold.as_millis() as u64;
        self
    }

    pub fn with_destroy_grace_period(mut self, grace: Duration) -> Self {
        self.destroy_grace_ms = grace.as_millis() as u64;
        self
    }

    /// Reject settings under which a live holder could lose its lock
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.lease_ms == 0 {
            anyhow::bail!("lease_ms must be greater than zero");
        }
        if self.refresh_interval() >= self.lease() {
            anyhow::bail!(
                "refresh interval ({:?}) must be shorter than the lease ({:?})",
                self.refresh_interval(),
                self.lease()
            );
        }
        if self.stale_threshold() <= self.refresh_interval() {
            anyhow::bail!(
                "stale threshold ({:?}) must exceed the refresh interval ({:?})",
                self.stale_threshold(),
                self.refresh_interval()
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LockManagerConfig::default();
        assert_eq!(config.lease(), Duration::from_secs(60));
        assert_eq!(config.refresh_interval(), Duration::from_secs(30));
        assert_eq!(config.cleanup_interval(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.stale_threshold(), Duration::from_secs(24 * 60 * 60));
        assert_eq!(config.destroy_grace_period(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: LockManagerConfig =
            serde_json::from_str(r#"{"lease_ms": 4000, "destroy_grace_ms": 500}"#).unwrap();
        assert_eq!(config.lease_ms, 4000);
        assert_eq!(config.refresh_interval(), Duration::from_millis(2000));
        assert_eq!(config.destroy_grace_period(), Duration::from_millis(500));
        assert_eq!(config.stale_threshold_ms, DEFAULT_STALE_THRESHOLD_MS);
    }

    #[test]
    fn test_validate_rejects_slow_refresh() {
        let config = LockManagerConfig::default()
            .with_lease(Duration::from_secs(10))
            .with_refresh_interval(Duration::from_secs(10));
        assert!(config.validate().is_err());

        let config = LockManagerConfig::default()
            .with_lease(Duration::from_secs(10))
            .with_stale_threshold(Duration::from_secs(1));
        assert!(config.validate().is_err());

        let config = LockManagerConfig::default().with_lease(Duration::ZERO);
        assert!(config.validate().is_err());
    }
}
