// Acquire a lock and keep it until shutdown or abort

use std::time::Duration;

use tracing::{info, warn};

use clusterlock_core::{LockError, LockHolder, wait_for_lock};

use super::open_manager;
use crate::model::Configuration;
use crate::startup::wait_for_shutdown_signal;

pub async fn run(
    configuration: &Configuration,
    key: &str,
    wait_ms: u64,
    timeout_ms: u64,
) -> anyhow::Result<()> {
    let manager = open_manager(configuration).await?;
    let holder = LockHolder::new("clusterlock-cli");

    // Ctrl+C ends both the wait and the hold
    let shutdown = wait_for_shutdown_signal();
    let mut shutdown_rx = shutdown.subscribe();
    let interrupter = holder.clone();
    tokio::spawn(async move {
        if shutdown_rx.recv().await.is_ok() {
            interrupter.interrupt();
        }
    });

    let acquired = wait_for_lock(
        &manager,
        &holder,
        key,
        Duration::from_millis(wait_ms.max(1)),
        Some(Duration::from_millis(timeout_ms)),
    )
    .await;

    let resource = match acquired {
        Ok(resource) => resource,
        Err(e) => {
            manager.destroy().await?;
            return match e {
                LockError::Interrupted { .. } => {
                    warn!(key, "Interrupted before the lock was acquired");
                    Ok(())
                }
                e => Err(e.into()),
            };
        }
    };

    info!(key, node = manager.node_id(), "Holding lock, press Ctrl+C to release");
    println!("{}: held by {}", key, manager.node_id());

    holder.interrupted().await;
    info!(key, "Releasing lock");

    let released = resource.release().await;
    manager.destroy().await?;
    released?;
    println!("{}: released", key);
    Ok(())
}
