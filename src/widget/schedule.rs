//! Adaptive widget refresh cadence.
//!
//! Widgets refresh quickly when a state change is imminent and slowly when
//! nothing visible can change soon.

use std::time::Duration;

use crate::{
    fasting::{classify_millis, millis_until_next, FastingState},
    settings::WidgetUpdateFrequency,
    timer::TimerSnapshot,
};

const MINUTE_MS: i64 = 60 * 1000;

/// Distance to a threshold, either side, that counts as "at a boundary".
pub const NEAR_BOUNDARY_WINDOW_MS: i64 = 10 * MINUTE_MS;
pub const NEAR_BOUNDARY_INTERVAL: Duration = Duration::from_secs(30);
pub const FIRST_HOUR_INTERVAL: Duration = Duration::from_secs(60);
pub const LONG_FAST_INTERVAL: Duration = Duration::from_secs(5 * 60);
pub const RUNNING_INTERVAL: Duration = Duration::from_secs(2 * 60);
pub const IDLE_INTERVAL: Duration = Duration::from_secs(15 * 60);
/// Used after a failed refresh pass.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(2 * 60);
/// Floor for scaled intervals.
pub const MIN_INTERVAL: Duration = Duration::from_secs(15);

const LONG_FAST_MS: i64 = 24 * 60 * MINUTE_MS;

/// Unscaled interval for a timer in the given condition.
pub fn base_interval(is_running: bool, elapsed_ms: i64) -> Duration {
    if !is_running {
        return IDLE_INTERVAL;
    }

    if near_boundary(elapsed_ms) {
        NEAR_BOUNDARY_INTERVAL
    } else if elapsed_ms < 60 * MINUTE_MS {
        FIRST_HOUR_INTERVAL
    } else if elapsed_ms >= LONG_FAST_MS {
        LONG_FAST_INTERVAL
    } else {
        RUNNING_INTERVAL
    }
}

/// Within the window before the next threshold or after the one just
/// crossed. The 0h threshold of `NotFasting` does not count.
fn near_boundary(elapsed_ms: i64) -> bool {
    let approaching = millis_until_next(elapsed_ms)
        .is_some_and(|remaining| remaining <= NEAR_BOUNDARY_WINDOW_MS);

    let current = classify_millis(elapsed_ms);
    let just_crossed = current != FastingState::NotFasting
        && elapsed_ms - current.threshold_millis() <= NEAR_BOUNDARY_WINDOW_MS;

    approaching || just_crossed
}

pub fn scale(interval: Duration, frequency: WidgetUpdateFrequency) -> Duration {
    interval.mul_f64(frequency.multiplier()).max(MIN_INTERVAL)
}

/// Delay before the next refresh pass after rendering `snapshot`.
pub fn refresh_interval(snapshot: &TimerSnapshot, frequency: WidgetUpdateFrequency) -> Duration {
    scale(
        base_interval(snapshot.is_running, snapshot.elapsed_ms),
        frequency,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fasting::MILLIS_PER_HOUR;

    #[test]
    fn idle_timer_refreshes_slowly() {
        assert_eq!(base_interval(false, 0), IDLE_INTERVAL);
        assert_eq!(base_interval(false, 13 * MILLIS_PER_HOUR), IDLE_INTERVAL);
    }

    #[test]
    fn first_hour_is_one_minute() {
        assert_eq!(base_interval(true, 0), FIRST_HOUR_INTERVAL);
        assert_eq!(base_interval(true, 59 * MINUTE_MS), FIRST_HOUR_INTERVAL);
    }

    #[test]
    fn approaching_a_threshold_is_fast() {
        assert_eq!(
            base_interval(true, 5 * MILLIS_PER_HOUR - 10 * MINUTE_MS),
            NEAR_BOUNDARY_INTERVAL
        );
        assert_eq!(
            base_interval(true, 13 * MILLIS_PER_HOUR - MINUTE_MS),
            NEAR_BOUNDARY_INTERVAL
        );
        // Near the 25h boundary wins over the long-fast cadence.
        assert_eq!(
            base_interval(true, 25 * MILLIS_PER_HOUR - 5 * MINUTE_MS),
            NEAR_BOUNDARY_INTERVAL
        );
        assert_eq!(
            base_interval(true, 5 * MILLIS_PER_HOUR - 11 * MINUTE_MS),
            RUNNING_INTERVAL
        );
    }

    #[test]
    fn just_crossed_a_threshold_is_fast() {
        assert_eq!(
            base_interval(true, 13 * MILLIS_PER_HOUR + 2 * MINUTE_MS),
            NEAR_BOUNDARY_INTERVAL
        );
        assert_eq!(
            base_interval(true, 25 * MILLIS_PER_HOUR + 10 * MINUTE_MS),
            NEAR_BOUNDARY_INTERVAL
        );
        assert_eq!(
            base_interval(true, 13 * MILLIS_PER_HOUR + 11 * MINUTE_MS),
            RUNNING_INTERVAL
        );
        assert_eq!(
            base_interval(true, 25 * MILLIS_PER_HOUR + 11 * MINUTE_MS),
            LONG_FAST_INTERVAL
        );
    }

    #[test]
    fn long_fasts_relax() {
        assert_eq!(base_interval(true, 24 * MILLIS_PER_HOUR), LONG_FAST_INTERVAL);
        assert_eq!(base_interval(true, 40 * MILLIS_PER_HOUR), LONG_FAST_INTERVAL);
    }

    #[test]
    fn default_while_running() {
        assert_eq!(base_interval(true, 3 * MILLIS_PER_HOUR), RUNNING_INTERVAL);
        assert_eq!(base_interval(true, 20 * MILLIS_PER_HOUR), RUNNING_INTERVAL);
    }

    #[test]
    fn frequency_scales_with_floor() {
        assert_eq!(
            scale(RUNNING_INTERVAL, WidgetUpdateFrequency::BatterySaver),
            Duration::from_secs(240)
        );
        assert_eq!(
            scale(RUNNING_INTERVAL, WidgetUpdateFrequency::High),
            Duration::from_secs(60)
        );
        assert_eq!(
            scale(NEAR_BOUNDARY_INTERVAL, WidgetUpdateFrequency::High),
            MIN_INTERVAL
        );
    }
}
