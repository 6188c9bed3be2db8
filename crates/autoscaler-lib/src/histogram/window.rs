//! Bounded sliding window of time-stamped snapshots
//!
//! The collector appends one snapshot map per collection cycle. Quantile
//! diffs use the most recent snapshot that is at least `fresh_window` old as
//! their baseline, so every diff spans at least that duration. Entries older
//! than `retention` are pruned on every append.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default minimum age of the diff baseline
pub const DEFAULT_FRESH_WINDOW: Duration = Duration::from_secs(60);

/// Default retention of past snapshots
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(300);

/// Ring of time-stamped snapshots with a freshness cutoff
#[derive(Debug)]
pub struct SnapshotSlidingWindow<T> {
    entries: VecDeque<(Instant, T)>,
    fresh_window: Duration,
    retention: Duration,
}

impl<T> SnapshotSlidingWindow<T> {
    /// Create a window. `retention` is raised to `fresh_window` if it is
    /// shorter, so an unfresh baseline always survives pruning.
    pub fn new(fresh_window: Duration, retention: Duration) -> Self {
        Self {
            entries: VecDeque::new(),
            fresh_window,
            retention: retention.max(fresh_window),
        }
    }

    /// Append a snapshot stamped now, pruning expired entries first
    pub fn append(&mut self, value: T) {
        self.append_at(Instant::now(), value);
    }

    fn append_at(&mut self, at: Instant, value: T) {
        self.prune(at);
        self.entries.push_back((at, value));
    }

    /// The most recent snapshot whose age is at least the fresh window
    pub fn last_unfresh(&self) -> Option<&T> {
        let now = Instant::now();
        self.entries
            .iter()
            .rev()
            .find(|(at, _)| now.duration_since(*at) >= self.fresh_window)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn prune(&mut self, now: Instant) {
        while let Some((at, _)) = self.entries.front() {
            if now.duration_since(*at) > self.retention {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    #[cfg(test)]
    fn backdated(&mut self, age: Duration, value: T) {
        let at = Instant::now() - age;
        self.entries.push_back((at, value));
        self.entries.make_contiguous().sort_by_key(|(at, _)| *at);
    }
}
