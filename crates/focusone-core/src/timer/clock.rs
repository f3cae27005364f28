//! Wall-clock sources.
//!
//! Everything that depends on "now" (plan matching, minute-boundary
//! alignment, exclusion dates) reads it through [`Clock`] so tests can drive
//! time by hand.

use std::sync::Mutex;

use chrono::{Local, NaiveDateTime, TimeDelta};

/// Local wall-clock time source.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

/// The device's local clock. No skew correction is attempted.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Hand-driven clock for tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<NaiveDateTime>,
}

impl ManualClock {
    pub fn new(start: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, delta: TimeDelta) {
        let mut guard = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *guard += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}
