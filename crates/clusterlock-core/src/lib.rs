//! Clusterlock Core - Cluster-wide named lock manager
//!
//! This crate provides:
//! - `LockManager`: exclusive, reentrant, fail-fast named locks over a `LockStore`
//! - `LockHolder`: the execution-context identity that owns a lock and
//!   receives abort interrupts
//! - `LockResource`: scoped handle that unlocks when released or dropped
//! - `LockRefresher` / `LockJanitor`: lease heartbeat and stale-row sweeping
//!   for clustered stores
//! - `wait_for_lock`: polling acquisition with an optional timeout

pub mod config;
pub mod holder;
pub mod janitor;
mod job;
pub mod manager;
pub mod metrics;
pub mod node;
pub mod refresher;
mod registry;
pub mod resource;
pub mod utils;

pub use clusterlock_common::{LockError, LockRecord, LockStatus, Result};
pub use config::LockManagerConfig;
pub use holder::LockHolder;
pub use janitor::LockJanitor;
pub use job::ShutdownSignal;
pub use manager::LockManager;
pub use node::{HostnameNodeId, NodeIdProvider, StaticNodeId};
pub use refresher::{LockRefresher, RefreshReport};
pub use resource::LockResource;
pub use utils::wait_for_lock;
