//! Clusterlock Common - Shared types and utilities
//!
//! This crate provides the foundational types used across all clusterlock components:
//! - The lock record model and its status state machine
//! - The `LockError` taxonomy
//! - Time helpers (epoch millis)

pub mod error;
pub mod model;
pub mod utils;

// Re-exports for convenience
pub use error::{LockError, Result};
pub use model::{LockClaim, LockRecord, LockStatus, UnknownLockStatus};
pub use utils::current_timestamp;

/// Default lease duration in milliseconds
pub const DEFAULT_LEASE_MS: u64 = 60_000;

/// Default interval between two janitor sweeps (one day)
pub const DEFAULT_CLEANUP_INTERVAL_MS: u64 = 24 * 60 * 60 * 1000;

/// Default staleness threshold after which a row is swept (one day)
pub const DEFAULT_STALE_THRESHOLD_MS: u64 = 24 * 60 * 60 * 1000;

/// Default time `destroy()` waits for holders to unlock after interruption
pub const DEFAULT_DESTROY_GRACE_MS: u64 = 10_000;
