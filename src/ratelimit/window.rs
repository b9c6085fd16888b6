//! Sliding-window entry and the verdict it produces.

use std::collections::VecDeque;
use std::time::Duration;

/// Outcome of a single window check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the event was admitted and recorded
    pub admitted: bool,
    /// The configured maximum for the window
    pub limit: u32,
    /// Events still admissible in the current window
    pub remaining: u32,
    /// Epoch milliseconds at which the window next has room
    pub reset_at_ms: u64,
    /// Seconds the caller should wait before retrying (0 when admitted)
    pub retry_after_secs: u64,
}

impl Verdict {
    /// Reset time rounded up to whole epoch seconds.
    pub fn reset_at_secs(&self) -> u64 {
        self.reset_at_ms.div_ceil(1000)
    }
}

/// Admission timestamps for one partition.
///
/// Timestamps are epoch milliseconds in non-decreasing order. Everything at
/// or before `now - window` is pruned on access, so the live window is
/// `(now - window, now]`.
#[derive(Debug, Default)]
pub struct WindowEntry {
    timestamps: VecDeque<u64>,
    /// Set by the sweep once this entry has been detached from the store
    evicted: bool,
}

impl WindowEntry {
    /// Create an empty entry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of retained timestamps.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Whether no timestamps are retained.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Most recent admission time.
    pub fn newest(&self) -> Option<u64> {
        self.timestamps.back().copied()
    }

    pub(crate) fn is_evicted(&self) -> bool {
        self.evicted
    }

    pub(crate) fn mark_evicted(&mut self) {
        self.evicted = true;
    }

    /// Whether the entry has seen no admission within `stale_after`.
    pub fn is_stale(&self, now_ms: u64, stale_after: Duration) -> bool {
        match self.newest() {
            None => true,
            Some(newest) => now_ms.saturating_sub(newest) > duration_ms(stale_after),
        }
    }

    /// Drop timestamps that have slid out of the window.
    pub fn prune(&mut self, now_ms: u64, window: Duration) {
        // Nothing can have slid out before one full window has elapsed.
        let Some(cutoff) = now_ms.checked_sub(duration_ms(window)) else {
            return;
        };
        while self.timestamps.front().is_some_and(|&ts| ts <= cutoff) {
            self.timestamps.pop_front();
        }
    }

    /// Prune, then either record `now_ms` or reject.
    ///
    /// `capacity` bounds the number of retained timestamps regardless of
    /// `max`; the oldest are dropped first when it is exceeded.
    pub fn check(&mut self, now_ms: u64, window: Duration, max: u32, capacity: usize) -> Verdict {
        let window_ms = duration_ms(window);
        self.prune(now_ms, window);

        if self.timestamps.len() >= max as usize {
            // Non-empty here since max > 0.
            let oldest = self.timestamps.front().copied().unwrap_or(now_ms);
            let reset_at_ms = oldest.saturating_add(window_ms);
            let wait_ms = reset_at_ms.saturating_sub(now_ms);

            return Verdict {
                admitted: false,
                limit: max,
                remaining: 0,
                reset_at_ms,
                retry_after_secs: wait_ms.div_ceil(1000).max(1),
            };
        }

        self.timestamps.push_back(now_ms);
        while self.timestamps.len() > capacity {
            self.timestamps.pop_front();
        }

        let oldest = self.timestamps.front().copied().unwrap_or(now_ms);
        let used = u32::try_from(self.timestamps.len()).unwrap_or(u32::MAX);

        Verdict {
            admitted: true,
            limit: max,
            remaining: max.saturating_sub(used),
            reset_at_ms: oldest.saturating_add(window_ms),
            retry_after_secs: 0,
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
