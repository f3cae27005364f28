//! Plans: user-defined time-window rules and the engine that matches them
//! against wall-clock time.

mod book;
mod exclusion;
mod validate;

pub use book::{PlanBook, PlanMatch};
pub use exclusion::{ExclusionEntry, ExclusionSet};
pub use validate::{validate, validate_with, ValidationRules};

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};

/// Stable plan identifier.
pub type PlanId = String;

/// Minute of the day, `0..=1439`.
pub type MinuteOfDay = u16;

/// Last valid minute of a day.
pub const LAST_MINUTE: MinuteOfDay = 1439;

/// Half-open daily window `[start, end)`. Never wraps past midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: MinuteOfDay,
    pub end: MinuteOfDay,
}

impl TimeWindow {
    pub fn new(start: MinuteOfDay, end: MinuteOfDay) -> Self {
        Self { start, end }
    }

    /// Length in minutes; zero for inverted windows.
    pub fn duration_min(&self) -> u16 {
        self.end.saturating_sub(self.start)
    }

    pub fn contains(&self, minute: MinuteOfDay) -> bool {
        minute >= self.start && minute < self.end
    }

    pub fn intersects(&self, other: &TimeWindow) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// Parse `HH:MM` into a minute of the day.
    pub fn parse_hhmm(s: &str) -> Option<MinuteOfDay> {
        let (h, m) = s.trim().split_once(':')?;
        let h: u16 = h.parse().ok()?;
        let m: u16 = m.parse().ok()?;
        if h > 23 || m > 59 {
            return None;
        }
        Some(h * 60 + m)
    }
}

impl std::fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02}",
            self.start / 60,
            self.start % 60,
            self.end / 60,
            self.end % 60
        )
    }
}

/// Calendar validity of a weekly plan, inclusive on both ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

/// How often a plan fires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Recurrence {
    /// Fires at most once; removed by the matching engine after its window.
    Once,
    /// Fires on the listed weekdays (0 = Sunday .. 6 = Saturday).
    Weekly {
        days: BTreeSet<u8>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_range: Option<DateRange>,
    },
}

/// What the enforcement subsystem does with the selected apps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    /// Only the listed apps are allowed.
    #[default]
    Focus,
    /// The listed apps are blocked.
    Shield,
}

/// A user-defined rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub id: PlanId,
    pub name: String,
    pub window: TimeWindow,
    pub recurrence: Recurrence,
    #[serde(default)]
    pub mode: BlockMode,
    /// Opaque app identifiers, passed through to the enforcement subsystem.
    #[serde(default)]
    pub apps: BTreeSet<String>,
}

impl Plan {
    /// One-off plan with a fresh id.
    pub fn once(name: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            window,
            recurrence: Recurrence::Once,
            mode: BlockMode::default(),
            apps: BTreeSet::new(),
        }
    }

    /// Weekly plan with a fresh id.
    pub fn weekly(
        name: impl Into<String>,
        window: TimeWindow,
        days: impl IntoIterator<Item = u8>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            window,
            recurrence: Recurrence::Weekly {
                days: days.into_iter().collect(),
                date_range: None,
            },
            mode: BlockMode::default(),
            apps: BTreeSet::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<PlanId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_once(&self) -> bool {
        matches!(self.recurrence, Recurrence::Once)
    }

    /// Weekdays this plan recurs on; empty for one-off plans.
    pub fn weekdays(&self) -> Option<&BTreeSet<u8>> {
        match &self.recurrence {
            Recurrence::Weekly { days, .. } => Some(days),
            Recurrence::Once => None,
        }
    }

    /// Whether the plan is a matching candidate on the given day.
    pub fn applies_on(&self, now: &MatchInstant) -> bool {
        match &self.recurrence {
            Recurrence::Once => true,
            Recurrence::Weekly { days, date_range } => {
                days.contains(&now.weekday)
                    && date_range.map_or(true, |range| range.contains(now.date))
            }
        }
    }
}

/// "Now" as seen by the matching engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchInstant {
    /// 0 = Sunday .. 6 = Saturday
    pub weekday: u8,
    pub minute: MinuteOfDay,
    pub date: NaiveDate,
}

impl MatchInstant {
    pub fn new(date: NaiveDate, minute: MinuteOfDay) -> Self {
        Self {
            weekday: weekday_index(date),
            minute,
            date,
        }
    }

    /// Build from a local wall-clock time.
    pub fn at(now: NaiveDateTime) -> Self {
        Self::new(now.date(), minute_of_day(now))
    }
}

/// Weekday number with Sunday as day 0.
pub fn weekday_index(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_sunday() as u8
}

pub fn minute_of_day(now: NaiveDateTime) -> MinuteOfDay {
    (now.hour() * 60 + now.minute()) as MinuteOfDay
}
