// Periodic background jobs
// Each job runs on its own task; successive runs of one job never overlap

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::debug;

/// Broadcast shutdown signal
///
/// Stops the background jobs of a manager, and is reused by long-running
/// callers that need to react to process shutdown.
#[derive(Clone)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.sender.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.sender.send(());
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `tick` every `period`, starting one period from now, until shutdown.
///
/// The next tick is awaited only after the previous run completed, and
/// missed ticks are skipped rather than replayed.
pub(crate) fn spawn_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // Also fires when the sender is dropped with the manager
                _ = shutdown_rx.recv() => {
                    debug!(job = name, "Background job stopping");
                    break;
                }
                _ = interval.tick() => {
                    tick().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[tokio::test]
    async fn test_shutdown_reaches_every_subscriber() {
        let signal = ShutdownSignal::default();
        let mut first = signal.subscribe();
        let mut second = signal.clone().subscribe();

        signal.shutdown();
        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_periodic_job_runs_until_shutdown() {
        let signal = ShutdownSignal::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let handle = spawn_periodic(
            "test",
            Duration::from_millis(10),
            signal.subscribe(),
            move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        );

        tokio::time::sleep(Duration::from_millis(60)).await;
        signal.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("job should stop")
            .unwrap();

        let seen = runs.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several runs, saw {}", seen);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(runs.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_periodic_job_stops_when_signal_dropped() {
        let signal = ShutdownSignal::new();
        let handle = spawn_periodic("test", Duration::from_secs(3600), signal.subscribe(), || {
            async {}
        });

        drop(signal);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("job should stop")
            .unwrap();
    }
}
