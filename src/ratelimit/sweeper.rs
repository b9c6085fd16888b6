//! Background eviction of stale partitions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::store::WindowStore;

/// Shortest interval the sweeper will tick at.
pub const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(100);

/// A running sweep task bound to one store.
///
/// The task ticks every `interval` and calls [`WindowStore::sweep`]. It
/// stops when [`Sweeper::stop`] is awaited or the handle is dropped.
pub struct Sweeper {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl Sweeper {
    /// Spawn the sweep loop on the current tokio runtime.
    ///
    /// Intervals below [`MIN_SWEEP_INTERVAL`] are raised to it.
    pub fn start(store: Arc<WindowStore>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        if interval < MIN_SWEEP_INTERVAL {
            warn!(
                requested_ms = interval.as_millis() as u64,
                min_ms = MIN_SWEEP_INTERVAL.as_millis() as u64,
                "Sweep interval too short, clamping"
            );
        }
        let interval = interval.max(MIN_SWEEP_INTERVAL);

        info!(
            interval_ms = interval.as_millis() as u64,
            stale_after_secs = store.stale_after().as_secs(),
            "Starting partition sweeper"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = store.sweep();
                        debug!(
                            scanned = stats.scanned,
                            evicted = stats.evicted,
                            remaining = store.partition_count(),
                            "Sweep pass complete"
                        );
                    }
                    // Only ever set to true, and a dropped sender also ends the loop.
                    _ = shutdown_rx.changed() => break,
                }
            }
        });

        Self {
            shutdown,
            task: Some(task),
        }
    }

    /// Signal the loop to exit and wait for it.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Partition sweeper exited abnormally");
            }
        }

        info!("Partition sweeper stopped");
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::ManualClock;
    use crate::ratelimit::store::StoreOptions;

    fn store_with_clock(stale_after: Duration) -> (Arc<WindowStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        let store = WindowStore::with_clock(
            StoreOptions {
                stale_after,
                ..StoreOptions::default()
            },
            clock.clone(),
        );
        (Arc::new(store), clock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_evicts_on_tick() {
        let (store, clock) = store_with_clock(Duration::from_secs(10));
        store.check("k", Duration::from_secs(1), 5);

        let sweeper = Sweeper::start(Arc::clone(&store), Duration::from_secs(1));
        assert!(sweeper.is_running());

        clock.advance(10_001);
        tokio::time::sleep(Duration::from_millis(1_500)).await;

        assert_eq!(store.partition_count(), 0);
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_keeps_active_partitions() {
        let (store, clock) = store_with_clock(Duration::from_secs(10));
        let sweeper = Sweeper::start(Arc::clone(&store), Duration::from_secs(1));

        for _ in 0..5 {
            store.check("k", Duration::from_secs(1), 100);
            clock.advance(2_000);
            tokio::time::sleep(Duration::from_secs(1)).await;
        }

        assert_eq!(store.partition_count(), 1);
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let (store, clock) = store_with_clock(Duration::from_secs(10));
        store.check("k", Duration::from_secs(1), 5);

        let sweeper = Sweeper::start(Arc::clone(&store), Duration::ZERO);
        assert!(sweeper.is_running());

        clock.advance(10_001);
        tokio::time::sleep(MIN_SWEEP_INTERVAL * 3).await;

        assert_eq!(store.partition_count(), 0);
        assert!(sweeper.is_running());
        sweeper.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_sweeper_no_longer_evicts() {
        let (store, clock) = store_with_clock(Duration::from_secs(10));
        store.check("k", Duration::from_secs(1), 5);

        let sweeper = Sweeper::start(Arc::clone(&store), Duration::from_secs(1));
        sweeper.stop().await;

        clock.advance(60_000);
        tokio::time::sleep(Duration::from_secs(5)).await;

        assert_eq!(store.partition_count(), 1);
    }
}
