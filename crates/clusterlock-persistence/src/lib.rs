//! Clusterlock Persistence - Lock record stores
//!
//! This crate provides:
//! - The `LockStore` trait: atomic, status-keyed operations over lock rows
//! - `MemoryLockStore`: a single-process store for standalone deployments
//! - `DbLockStore`: a shared SQL table (MySQL/PostgreSQL/SQLite via SeaORM)
//! - The SeaORM entity for the `cluster_lock` table

pub mod entity;
pub mod memory;
pub mod sql;
pub mod traits;

// Re-export sea-orm for convenience
pub use sea_orm;

// Re-export entity prelude
pub use entity::prelude::*;

// Re-export the store abstraction and its backends
pub use memory::MemoryLockStore;
pub use sql::DbLockStore;
pub use traits::LockStore;
