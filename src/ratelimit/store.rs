//! Partitioned window store.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::clock::{Clock, SystemClock};
use super::window::{Verdict, WindowEntry};

/// Default hard cap on timestamps retained per partition.
pub const DEFAULT_MAX_ENTRIES_PER_PARTITION: usize = 1000;
/// Default inactivity after which a partition is swept.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(3600);

/// Tuning for a [`WindowStore`].
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Hard cap on timestamps retained per partition
    pub max_entries_per_partition: usize,
    /// Inactivity after which the sweep removes a partition
    pub stale_after: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_entries_per_partition: DEFAULT_MAX_ENTRIES_PER_PARTITION,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

/// Counts reported by a single sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Partitions examined
    pub scanned: usize,
    /// Partitions removed
    pub evicted: usize,
}

/// Sliding-window state for every active partition.
///
/// Each partition sits behind its own mutex. A check takes the map shard
/// only long enough to clone the partition handle, so checks on different
/// keys never wait on each other's window work.
pub struct WindowStore {
    partitions: DashMap<String, Arc<Mutex<WindowEntry>>>,
    options: StoreOptions,
    clock: Arc<dyn Clock>,
}

impl WindowStore {
    /// Create a store on the system clock.
    pub fn new(options: StoreOptions) -> Self {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Create a store reading time from `clock`.
    pub fn with_clock(options: StoreOptions, clock: Arc<dyn Clock>) -> Self {
        Self {
            partitions: DashMap::new(),
            options,
            clock,
        }
    }

    /// Hard cap on timestamps per partition.
    pub fn capacity(&self) -> usize {
        self.options.max_entries_per_partition
    }

    /// Inactivity threshold used by [`WindowStore::sweep`].
    pub fn stale_after(&self) -> Duration {
        self.options.stale_after
    }

    /// Record an event for `key` if the window has room.
    pub fn check(&self, key: &str, window: Duration, max: u32) -> Verdict {
        loop {
            let partition = self.partition(key);
            let mut entry = partition.lock();

            // The sweep detached this entry after we cloned the handle.
            if entry.is_evicted() {
                continue;
            }

            let now = self.clock.now_ms();
            let verdict = entry.check(now, window, max, self.capacity());
            drop(entry);

            trace!(
                key = %key,
                admitted = verdict.admitted,
                remaining = verdict.remaining,
                "Checked window"
            );

            if !verdict.admitted {
                debug!(
                    key = %key,
                    limit = max,
                    retry_after_secs = verdict.retry_after_secs,
                    "Window full"
                );
            }

            return verdict;
        }
    }

    /// Remove every partition idle for longer than the staleness threshold.
    ///
    /// Touches one partition at a time and never waits on a partition lock.
    /// A partition locked by a concurrent check is in use, so it is skipped
    /// until the next pass.
    pub fn sweep(&self) -> SweepStats {
        let stale_after = self.options.stale_after;
        let keys: Vec<String> = self.partitions.iter().map(|e| e.key().clone()).collect();
        let mut stats = SweepStats {
            scanned: keys.len(),
            evicted: 0,
        };

        for key in keys {
            // The shard stays write-locked inside `remove_if`, so only try the
            // partition lock there.
            let removed = self.partitions.remove_if(&key, |_, partition| {
                let Some(mut entry) = partition.try_lock() else {
                    trace!(key = %key, "Partition busy, skipping");
                    return false;
                };
                if entry.is_stale(self.clock.now_ms(), stale_after) {
                    entry.mark_evicted();
                    true
                } else {
                    false
                }
            });

            if removed.is_some() {
                trace!(key = %key, "Evicted stale partition");
                stats.evicted += 1;
            }
        }

        stats
    }

    /// Number of partitions currently held.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Retained timestamp count for `key`, if it has a partition.
    pub fn entry_len(&self, key: &str) -> Option<usize> {
        self.partitions.get(key).map(|p| p.lock().len())
    }

    /// Drop every partition.
    pub fn clear(&self) {
        for entry in self.partitions.iter() {
            entry.value().lock().mark_evicted();
        }
        self.partitions.clear();
    }

    fn partition(&self, key: &str) -> Arc<Mutex<WindowEntry>> {
        if let Some(existing) = self.partitions.get(key) {
            return Arc::clone(existing.value());
        }

        let entry = self.partitions.entry(key.to_string()).or_insert_with(|| {
            debug!(key = %key, "Creating partition");
            Arc::new(Mutex::new(WindowEntry::new()))
        });
        Arc::clone(entry.value())
    }
}

impl Default for WindowStore {
    fn default() -> Self {
        Self::new(StoreOptions::default())
    }
}

impl std::fmt::Debug for WindowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowStore")
            .field("partitions", &self.partitions.len())
            .field("options", &self.options)
            .finish()
    }
}
