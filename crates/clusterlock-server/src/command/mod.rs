//! `clusterlock` subcommands
//!
//! Every command works against the shared lock table configured by `db.url`.

use std::sync::Arc;

use clusterlock_core::{LockManager, StaticNodeId};
use clusterlock_persistence::DbLockStore;

use crate::model::{Command, Configuration};

pub mod admin;
pub mod hold;

pub async fn run(command: Command, configuration: &Configuration) -> anyhow::Result<()> {
    match command {
        Command::Init => admin::init(configuration).await,
        Command::Locks { json } => admin::locks(configuration, json).await,
        Command::Status { key } => admin::status(configuration, &key).await,
        Command::Abort { key } => admin::abort(configuration, &key).await,
        Command::Sweep => admin::sweep(configuration).await,
        Command::Clear => admin::clear(configuration).await,
        Command::Hold {
            key,
            wait_ms,
            timeout_ms,
        } => hold::run(configuration, &key, wait_ms, timeout_ms).await,
    }
}

pub(crate) async fn open_store(configuration: &Configuration) -> anyhow::Result<Arc<DbLockStore>> {
    let db = configuration.database_connection().await?;
    Ok(Arc::new(DbLockStore::new(db)))
}

pub(crate) async fn open_manager(configuration: &Configuration) -> anyhow::Result<LockManager> {
    let store = open_store(configuration).await?;
    LockManager::new(
        store,
        &StaticNodeId::new(configuration.node_id()),
        configuration.lock_config()?,
    )
}
