//! Per-binding scaling state: recommendation histories and panic mode

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::models::Behavior;

/// Ring of time-stamped replica recommendations.
///
/// Raw and corrected recommendations are kept separately; stabilization and
/// rate limiting consult the corrected series. Capacity is derived from the
/// longest behavior window divided by the reconcile interval, and entries
/// older than the longest window are pruned on append.
#[derive(Debug)]
pub struct ScalingHistory {
    corrected: VecDeque<(Instant, i32)>,
    recommended: VecDeque<(Instant, i32)>,
    capacity: usize,
    retention: Duration,
}

impl ScalingHistory {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            corrected: VecDeque::with_capacity(capacity),
            recommended: VecDeque::with_capacity(capacity),
            capacity,
            retention,
        }
    }

    pub fn append_corrected(&mut self, value: i32) {
        Self::push(&mut self.corrected, value, self.capacity, self.retention);
    }

    pub fn append_recommended(&mut self, value: i32) {
        Self::push(&mut self.recommended, value, self.capacity, self.retention);
    }

    fn push(ring: &mut VecDeque<(Instant, i32)>, value: i32, capacity: usize, retention: Duration) {
        let now = Instant::now();
        while let Some((at, _)) = ring.front() {
            if now.duration_since(*at) > retention || ring.len() >= capacity {
                ring.pop_front();
            } else {
                break;
            }
        }
        ring.push_back((now, value));
    }

    /// Minimum corrected recommendation within the trailing window
    pub fn min_corrected_within(&self, window: Duration) -> Option<i32> {
        self.corrected_within(window).min()
    }

    /// Maximum corrected recommendation within the trailing window
    pub fn max_corrected_within(&self, window: Duration) -> Option<i32> {
        self.corrected_within(window).max()
    }

    /// Corrected recommendation at the start of the trailing window, i.e.
    /// the oldest entry still inside it
    pub fn oldest_corrected_within(&self, window: Duration) -> Option<i32> {
        self.corrected_within(window).next()
    }

    fn corrected_within(&self, window: Duration) -> impl Iterator<Item = i32> + '_ {
        let now = Instant::now();
        self.corrected
            .iter()
            .filter(move |(at, _)| now.duration_since(*at) <= window)
            .map(|(_, value)| value)
            .copied()
    }

    pub fn len(&self) -> usize {
        self.corrected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corrected.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn append_corrected_at(&mut self, age: Duration, value: i32) {
        self.corrected.push_back((Instant::now() - age, value));
        self.corrected.make_contiguous().sort_by_key(|(at, _)| *at);
    }
}

/// State machine of one scaler or optimizer: `Stable` unless a panic trigger
/// fired within the hold duration.
///
/// Every trigger refreshes the entry timestamp, so panic mode is held for
/// the full duration after the most recent trigger.
#[derive(Debug)]
pub struct ScalingStatus {
    pub history: ScalingHistory,
    panic_entered: Option<Instant>,
    panic_mode_hold: Duration,
}

impl ScalingStatus {
    /// Build status for a binding. `loop_interval` is the reconcile period;
    /// together with the behavior windows it bounds how many history entries
    /// can ever be consulted.
    pub fn new(behavior: &Behavior, loop_interval: Duration) -> Self {
        let longest_window = [
            behavior.scale_up.stable.period(),
            behavior.scale_up.stable.stabilization_window(),
            behavior.scale_up.panic.period(),
            behavior.scale_down.period(),
            behavior.scale_down.stabilization_window(),
        ]
        .into_iter()
        .max()
        .unwrap_or_default()
        .max(loop_interval);

        let interval_secs = loop_interval.as_secs_f64().max(1.0);
        let capacity = (longest_window.as_secs_f64() / interval_secs).ceil() as usize;

        Self {
            history: ScalingHistory::new(capacity, longest_window),
            panic_entered: None,
            panic_mode_hold: behavior.scale_up.panic.panic_mode_hold(),
        }
    }

    /// Record a panic trigger, entering panic mode or extending it
    pub fn refresh_panic_mode(&mut self) {
        self.panic_entered = Some(Instant::now());
    }

    /// Whether the scaler is currently in panic mode; expires the state
    /// once the hold duration has elapsed
    pub fn is_panic_mode(&mut self) -> bool {
        match self.panic_entered {
            Some(entered) if entered.elapsed() < self.panic_mode_hold => true,
            Some(_) => {
                self.panic_entered = None;
                false
            }
            None => false,
        }
    }
}
