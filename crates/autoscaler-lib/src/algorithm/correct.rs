//! Correction of raw recommendations: stabilization, panic, rate limits

use std::time::Duration;

use super::ScalingHistory;
use crate::models::{Behavior, SelectPolicy};

/// Applies the behavior policy of the active direction to a raw
/// recommendation.
///
/// In stable mode the recommendation is first smoothed against the corrected
/// history inside the stabilization window, always toward the least
/// aggressive decision. Panic mode skips smoothing and rate-limits with the
/// panic policy, whose absolute instance budget is unbounded. The result is
/// clamped to the configured bounds after all adjustments.
#[derive(Debug)]
pub struct CorrectedInstances<'a> {
    pub is_panic: bool,
    pub history: &'a ScalingHistory,
    pub behavior: &'a Behavior,
    pub min_instances: i32,
    pub max_instances: i32,
    pub current_instances: i32,
    pub recommended_instances: i32,
}

impl CorrectedInstances<'_> {
    pub fn compute(&self) -> i32 {
        let mut desired = self.recommended_instances;

        // A recommendation equal to the current count is a no-op. Smoothing
        // or rate-limiting it against history could manufacture a change
        // (e.g. a higher corrected value left over from an in-flight
        // scale-down would be picked up by the scale-down stabilization),
        // so only the bounds apply.
        if desired == self.current_instances {
            return desired.max(self.min_instances).min(self.max_instances);
        }

        let scaling_up = desired > self.current_instances;

        if scaling_up && self.is_panic {
            let panic = &self.behavior.scale_up.panic;
            desired = self.rate_limit(
                desired,
                None,
                Some(panic.percent),
                panic.period(),
                SelectPolicy::Or,
            );
        } else {
            let policy = if scaling_up {
                &self.behavior.scale_up.stable
            } else {
                &self.behavior.scale_down
            };

            let window = policy.stabilization_window();
            if !window.is_zero() {
                if scaling_up {
                    if let Some(min) = self.history.min_corrected_within(window) {
                        desired = desired.min(min);
                    }
                } else if let Some(max) = self.history.max_corrected_within(window) {
                    desired = desired.max(max);
                }
            }

            desired = self.rate_limit(
                desired,
                policy.instances,
                policy.percent,
                policy.period(),
                policy.select_policy,
            );
        }

        desired.max(self.min_instances).min(self.max_instances)
    }

    /// Clamp the proposed change to the delta budget of the active policy.
    ///
    /// Movement already applied in the same direction within the trailing
    /// period consumes budget, so a burst cannot exceed the per-period limit
    /// by splitting across reconcile ticks. A missing budget counts as
    /// unbounded.
    fn rate_limit(
        &self,
        desired: i32,
        instances: Option<i32>,
        percent: Option<i32>,
        period: Duration,
        select_policy: SelectPolicy,
    ) -> i32 {
        let proposed = desired - self.current_instances;
        if proposed == 0 {
            return desired;
        }

        let percent_budget = percent
            .map(|p| ((self.current_instances as f64) * p as f64 / 100.0).ceil() as i32);
        let max_delta = match (select_policy, instances, percent_budget) {
            (_, Some(a), None) | (_, None, Some(a)) => Some(a),
            (SelectPolicy::Or, Some(a), Some(b)) => Some(a.max(b)),
            (SelectPolicy::And, Some(a), Some(b)) => Some(a.min(b)),
            (_, None, None) => None,
        };
        let Some(max_delta) = max_delta else {
            return desired;
        };

        let consumed = self
            .history
            .oldest_corrected_within(period)
            .map(|base| {
                if proposed > 0 {
                    (self.current_instances - base).max(0)
                } else {
                    (base - self.current_instances).max(0)
                }
            })
            .unwrap_or(0);
        let available = (max_delta - consumed).max(0);

        if proposed > available {
            self.current_instances + available
        } else if proposed < -available {
            self.current_instances - available
        } else {
            desired
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PanicPolicy, ScaleUpPolicy, StablePolicy};

    fn wide_stable(stabilization_window_secs: Option<u64>) -> StablePolicy {
        StablePolicy {
            instances: Some(1000),
            percent: Some(10000),
            period_secs: 15,
            select_policy: SelectPolicy::Or,
            stabilization_window_secs,
        }
    }

    fn behavior_with(scale_up: StablePolicy, scale_down: StablePolicy) -> Behavior {
        Behavior {
            scale_up: ScaleUpPolicy {
                stable: scale_up,
                panic: PanicPolicy::default(),
            },
            scale_down,
        }
    }

    fn empty_history() -> ScalingHistory {
        ScalingHistory::new(16, Duration::from_secs(3600))
    }

    #[test]
    fn test_stabilization_picks_conservative_scale_up() {
        let behavior = behavior_with(
            StablePolicy {
                stabilization_window_secs: Some(300),
                ..StablePolicy::default()
            },
            StablePolicy::default(),
        );
        let mut history = empty_history();
        history.append_corrected(4);

        let corrected = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 2,
            recommended_instances: 8,
        }
        .compute();
        // min(8, 4) = 4, within the default rate budget of max(1, 100%) = 2.
        assert_eq!(corrected, 4);
    }

    #[test]
    fn test_stabilization_picks_conservative_scale_down() {
        let behavior = behavior_with(wide_stable(None), wide_stable(Some(300)));
        let mut history = empty_history();
        history.append_corrected(6);

        let corrected = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 8,
            recommended_instances: 2,
        }
        .compute();
        assert_eq!(corrected, 6);
    }

    #[test]
    fn test_panic_mode_skips_stabilization() {
        let behavior = behavior_with(
            StablePolicy {
                stabilization_window_secs: Some(300),
                ..StablePolicy::default()
            },
            StablePolicy::default(),
        );
        let mut history = empty_history();
        history.append_corrected(4);

        let corrected = CorrectedInstances {
            is_panic: true,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 2,
            recommended_instances: 8,
        }
        .compute();
        // Panic percent budget is ceil(2 * 1000 / 100) = 20, no clamping.
        assert_eq!(corrected, 8);
    }

    #[test]
    fn test_panic_instance_budget_is_unbounded() {
        let mut behavior = behavior_with(
            StablePolicy {
                instances: Some(1),
                percent: None,
                ..StablePolicy::default()
            },
            StablePolicy::default(),
        );
        behavior.scale_up.panic.percent = 1000;

        let history = empty_history();
        let corrected = CorrectedInstances {
            is_panic: true,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 1,
            recommended_instances: 3,
        }
        .compute();
        assert_eq!(corrected, 3);
    }

    #[test]
    fn test_select_policy_or_takes_permissive_budget() {
        let behavior = behavior_with(
            StablePolicy {
                instances: Some(2),
                percent: Some(50),
                select_policy: SelectPolicy::Or,
                ..StablePolicy::default()
            },
            StablePolicy::default(),
        );
        let history = empty_history();
        let corrected = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 10,
            recommended_instances: 20,
        }
        .compute();
        // max(2, ceil(10 * 50%)) = 5.
        assert_eq!(corrected, 15);
    }

    #[test]
    fn test_select_policy_and_takes_restrictive_budget() {
        let behavior = behavior_with(
            StablePolicy {
                instances: Some(2),
                percent: Some(50),
                select_policy: SelectPolicy::And,
                ..StablePolicy::default()
            },
            StablePolicy::default(),
        );
        let history = empty_history();
        let corrected = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 10,
            recommended_instances: 20,
        }
        .compute();
        assert_eq!(corrected, 12);
    }

    #[test]
    fn test_scale_down_is_rate_limited() {
        let behavior = behavior_with(
            wide_stable(None),
            StablePolicy {
                instances: Some(3),
                percent: None,
                ..StablePolicy::default()
            },
        );
        let history = empty_history();
        let corrected = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 10,
            recommended_instances: 1,
        }
        .compute();
        assert_eq!(corrected, 7);
    }

    #[test]
    fn test_movement_within_period_consumes_budget() {
        let behavior = behavior_with(
            StablePolicy {
                instances: Some(5),
                percent: None,
                period_secs: 15,
                ..StablePolicy::default()
            },
            StablePolicy::default(),
        );
        let mut history = empty_history();
        // Scaled 8 -> 10 five seconds ago, consuming 2 of the 5 budget.
        history.append_corrected_at(Duration::from_secs(5), 8);

        let corrected = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 10,
            recommended_instances: 20,
        }
        .compute();
        assert_eq!(corrected, 13);
    }

    #[test]
    fn test_movement_outside_period_does_not_consume_budget() {
        let behavior = behavior_with(
            StablePolicy {
                instances: Some(5),
                percent: None,
                period_secs: 15,
                ..StablePolicy::default()
            },
            StablePolicy::default(),
        );
        let mut history = empty_history();
        history.append_corrected_at(Duration::from_secs(60), 8);

        let corrected = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 10,
            recommended_instances: 20,
        }
        .compute();
        assert_eq!(corrected, 15);
    }

    #[test]
    fn test_result_clamped_to_bounds_after_adjustments() {
        let behavior = behavior_with(wide_stable(None), wide_stable(None));
        let history = empty_history();

        let up = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 2,
            max_instances: 12,
            current_instances: 10,
            recommended_instances: 100,
        }
        .compute();
        assert_eq!(up, 12);

        let down = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 2,
            max_instances: 12,
            current_instances: 10,
            recommended_instances: 0,
        }
        .compute();
        assert_eq!(down, 2);
    }

    #[test]
    fn test_steady_recommendation_ignores_scale_down_stabilization() {
        let behavior = behavior_with(
            StablePolicy::default(),
            StablePolicy {
                stabilization_window_secs: Some(300),
                ..StablePolicy::default()
            },
        );
        let mut history = empty_history();
        // An in-flight multi-tick scale-down left a higher corrected value.
        history.append_corrected(9);

        let corrected = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 5,
            recommended_instances: 5,
        }
        .compute();
        // A steady-state tick must not be pushed back up by the scale-down
        // stabilization window.
        assert_eq!(corrected, 5);
    }

    #[test]
    fn test_unchanged_recommendation_passes_through() {
        let behavior = behavior_with(
            StablePolicy {
                instances: Some(0),
                percent: Some(0),
                ..StablePolicy::default()
            },
            StablePolicy::default(),
        );
        let history = empty_history();
        let corrected = CorrectedInstances {
            is_panic: false,
            history: &history,
            behavior: &behavior,
            min_instances: 1,
            max_instances: 100,
            current_instances: 5,
            recommended_instances: 5,
        }
        .compute();
        assert_eq!(corrected, 5);
    }
}
