//! Presentation timer.
//!
//! A minute-aligned counter for the elapsed time shown between authoritative
//! syncs. It owns no threads and no timer handle: arming it yields a
//! [`TimerArm`] (a generation token plus the delay until the next minute
//! boundary) which the runtime turns into exactly one sleeping task.
//!
//! ## State Transitions
//!
//! ```text
//! Idle --start(baseline)--> Armed --fire--> Armed (value + 1)
//!   ^                         |
//!   +---------stop()----------+
//! ```
//!
//! Every re-arm is computed from the clock at fire time, never from a fixed
//! 60 second period, so scheduling jitter does not accumulate.

use std::time::Duration;

use chrono::{NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// A fire that lands this close before a boundary belongs to that boundary.
const EARLY_FIRE_TOLERANCE: Duration = Duration::from_millis(500);

const MINUTE: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "phase")]
pub enum TimerPhase {
    Idle,
    Armed { generation: u64 },
}

/// Instruction to schedule one fire after `delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerArm {
    pub generation: u64,
    pub delay: Duration,
}

/// Outcome of a fire that belonged to the armed generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerTick {
    pub value: u32,
    pub rearm: TimerArm,
}

#[derive(Debug, Clone)]
pub struct PresentationTimer {
    phase: TimerPhase,
    value: u32,
    generation: u64,
}

impl Default for PresentationTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl PresentationTimer {
    pub fn new() -> Self {
        Self {
            phase: TimerPhase::Idle,
            value: 0,
            generation: 0,
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn phase(&self) -> TimerPhase {
        self.phase
    }

    pub fn value(&self) -> u32 {
        self.value
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.phase, TimerPhase::Armed { .. })
    }

    pub fn armed_generation(&self) -> Option<u64> {
        match self.phase {
            TimerPhase::Armed { generation } => Some(generation),
            TimerPhase::Idle => None,
        }
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// (Re)start from `baseline`. Any previously armed generation is
    /// invalidated, so at most one pending fire is ever honoured.
    pub fn start(&mut self, baseline: u32, now: NaiveDateTime) -> TimerArm {
        self.generation += 1;
        self.value = baseline;
        self.phase = TimerPhase::Armed {
            generation: self.generation,
        };
        TimerArm {
            generation: self.generation,
            delay: delay_to_next_minute(now),
        }
    }

    /// Disarm. Safe to call when nothing is armed.
    pub fn stop(&mut self) {
        self.phase = TimerPhase::Idle;
    }

    /// Handle a fire. Returns `None` for fires of a stale generation or
    /// after `stop()`.
    pub fn fire(&mut self, generation: u64, now: NaiveDateTime) -> Option<TimerTick> {
        if self.phase != (TimerPhase::Armed { generation }) {
            return None;
        }
        self.value = self.value.saturating_add(1);

        let mut delay = delay_to_next_minute(now);
        if delay < EARLY_FIRE_TOLERANCE {
            delay += MINUTE;
        }
        Some(TimerTick {
            value: self.value,
            rearm: TimerArm { generation, delay },
        })
    }
}

/// Time left until the next whole minute of `now`.
pub fn delay_to_next_minute(now: NaiveDateTime) -> Duration {
    let into_minute = Duration::new(
        u64::from(now.second()),
        now.nanosecond().min(999_999_999),
    );
    MINUTE.saturating_sub(into_minute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeDelta};
    use proptest::prelude::*;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_milli_opt(h, m, s, ms)
            .unwrap()
    }

    #[test]
    fn delay_targets_the_next_boundary() {
        assert_eq!(delay_to_next_minute(at(9, 0, 15, 0)), Duration::from_secs(45));
        assert_eq!(delay_to_next_minute(at(9, 0, 0, 0)), Duration::from_secs(60));
        assert_eq!(
            delay_to_next_minute(at(9, 0, 59, 750)),
            Duration::from_millis(250)
        );
    }

    #[test]
    fn fire_increments_and_rearms() {
        let mut timer = PresentationTimer::new();
        let arm = timer.start(4, at(9, 0, 30, 0));
        assert_eq!(arm.delay, Duration::from_secs(30));

        let tick = timer.fire(arm.generation, at(9, 1, 0, 20)).unwrap();
        assert_eq!(tick.value, 5);
        assert_eq!(tick.rearm.generation, arm.generation);
        assert_eq!(tick.rearm.delay, Duration::from_millis(59_980));
    }

    #[test]
    fn restart_invalidates_previous_generation() {
        let mut timer = PresentationTimer::new();
        let first = timer.start(0, at(9, 0, 0, 0));
        let second = timer.start(0, at(9, 0, 10, 0));
        assert_ne!(first.generation, second.generation);
        assert!(timer.fire(first.generation, at(9, 1, 0, 0)).is_none());
        assert_eq!(timer.fire(second.generation, at(9, 1, 0, 0)).unwrap().value, 1);
    }

    #[test]
    fn stop_is_idempotent_and_drops_pending_fire() {
        let mut timer = PresentationTimer::new();
        timer.stop();
        let arm = timer.start(2, at(9, 0, 0, 0));
        timer.stop();
        timer.stop();
        assert!(!timer.is_armed());
        assert!(timer.fire(arm.generation, at(9, 1, 0, 0)).is_none());
        assert_eq!(timer.value(), 2);
    }

    #[test]
    fn early_fire_does_not_double_tick() {
        let mut timer = PresentationTimer::new();
        let arm = timer.start(0, at(9, 0, 30, 0));
        let tick = timer.fire(arm.generation, at(9, 0, 59, 800)).unwrap();
        assert_eq!(tick.value, 1);
        assert_eq!(tick.rearm.delay, Duration::from_millis(60_200));
    }

    proptest! {
        /// The Nth tick lands within one scheduling quantum of the Nth
        /// minute boundary, however the jitter is distributed.
        #[test]
        fn ticks_do_not_drift(
            start_ms in 0u32..60_000,
            jitters in proptest::collection::vec(0u64..50, 1..200),
        ) {
            let quantum = Duration::from_millis(50);
            let start = at(9, 0, 0, 0) + TimeDelta::milliseconds(i64::from(start_ms));
            let first_boundary = at(9, 1, 0, 0);

            let mut timer = PresentationTimer::new();
            let mut arm = timer.start(0, start);
            let mut now = start;

            for (n, jitter) in jitters.iter().enumerate() {
                now += TimeDelta::from_std(arm.delay + Duration::from_millis(*jitter)).unwrap();
                let tick = timer.fire(arm.generation, now).unwrap();
                prop_assert_eq!(tick.value as usize, n + 1);

                let boundary = first_boundary + TimeDelta::minutes(n as i64);
                let deviation = (now - boundary).to_std().unwrap();
                prop_assert!(deviation < quantum);
                arm = tick.rearm;
            }
        }

        #[test]
        fn ticks_never_decrease(baseline in 0u32..10_000, fires in 1usize..100) {
            let mut timer = PresentationTimer::new();
            let mut now = at(9, 0, 0, 0);
            let mut arm = timer.start(baseline, now);
            let mut last = baseline;
            for _ in 0..fires {
                now += TimeDelta::from_std(arm.delay).unwrap();
                let tick = timer.fire(arm.generation, now).unwrap();
                prop_assert!(tick.value > last);
                last = tick.value;
                arm = tick.rearm;
            }
        }
    }
}
