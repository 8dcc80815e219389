// Lock acquisition helpers

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use clusterlock_common::{LockError, Result};

use crate::holder::LockHolder;
use crate::manager::LockManager;
use crate::resource::LockResource;

/// Retry `lock()` every `poll_interval` until it succeeds.
///
/// Only contention is retried; any other error is returned as is. With a
/// `timeout`, gives up with `LockError::Timeout` once it has elapsed. An
/// interrupt of `holder` while waiting ends the wait with
/// `LockError::Interrupted`.
pub async fn wait_for_lock(
    manager: &LockManager,
    holder: &LockHolder,
    key: &str,
    poll_interval: Duration,
    timeout: Option<Duration>,
) -> Result<LockResource> {
    let started = Instant::now();
    let deadline = timeout.map(|timeout| started + timeout);
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        match manager.lock(holder, key).await {
            Ok(resource) => {
                if attempts > 1 {
                    debug!(
                        key,
                        attempts,
                        waited_ms = started.elapsed().as_millis() as u64,
                        "Lock acquired after waiting"
                    );
                }
                return Ok(resource);
            }
            Err(e) if e.is_contention() => {
                trace!(key, attempts, "Lock busy, waiting");
            }
            Err(e) => return Err(e),
        }

        let pause = match deadline {
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return Err(LockError::Timeout {
                        key: key.to_string(),
                        waited: started.elapsed(),
                    });
                }
                poll_interval.min(deadline - now)
            }
            None => poll_interval,
        };

        tokio::select! {
            _ = holder.interrupted() => {
                return Err(LockError::Interrupted { key: key.to_string() });
            }
            _ = tokio::time::sleep(pause) => {}
        }
    }
}
