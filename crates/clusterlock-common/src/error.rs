//! Error types for clusterlock
//!
//! This module defines `LockError`, the single error type returned by the
//! lock manager:
//! - `Contended`: the key is held by someone else (expected, retryable)
//! - `Destroyed`: the manager was used after `destroy()` (programming error)
//! - `Store`: the backing store failed (connectivity, SQL errors)
//! - `Timeout` / `Interrupted`: raised by the polling helper

use std::time::Duration;

/// Lock manager error
#[derive(thiserror::Error, Debug)]
pub enum LockError {
    #[error(
        "lock '{key}' is already held by {} (thread: {})",
        .owner.as_deref().unwrap_or("another owner"),
        .thread.as_deref().unwrap_or("unknown")
    )]
    Contended {
        key: String,
        owner: Option<String>,
        thread: Option<String>,
    },

    #[error("lock manager has been destroyed")]
    Destroyed,

    #[error("lock store failure: {0:#}")]
    Store(#[from] anyhow::Error),

    #[error("timed out after {waited:?} waiting for lock '{key}'")]
    Timeout { key: String, waited: Duration },

    #[error("interrupted while waiting for lock '{key}'")]
    Interrupted { key: String },
}

impl LockError {
    pub fn contended(key: impl Into<String>, owner: Option<String>, thread: Option<String>) -> Self {
        LockError::Contended {
            key: key.into(),
            owner,
            thread,
        }
    }

    /// Whether retrying the same acquisition later can succeed
    pub fn is_contention(&self) -> bool {
        matches!(self, LockError::Contended { .. })
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contended_display() {
        let err = LockError::contended("job-1", Some("node-b".into()), Some("worker".into()));
        assert_eq!(
            err.to_string(),
            "lock 'job-1' is already held by node-b (thread: worker)"
        );
        assert!(err.is_contention());

        let err = LockError::contended("job-1", None, None);
        assert_eq!(
            err.to_string(),
            "lock 'job-1' is already held by another owner (thread: unknown)"
        );
    }

    #[test]
    fn test_store_error_from_anyhow() {
        let err: LockError = anyhow::anyhow!("connection refused").into();
        assert!(matches!(err, LockError::Store(_)));
        assert!(!err.is_contention());
        assert_eq!(err.to_string(), "lock store failure: connection refused");
    }
}
