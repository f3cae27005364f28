//! Write-time plan validation.

use serde::{Deserialize, Serialize};

use super::{Plan, Recurrence, LAST_MINUTE};
use crate::error::ValidationError;

/// Minimum plan length used when no configuration is supplied.
pub const DEFAULT_MIN_DURATION_MIN: u16 = 20;

/// Tunable validation limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationRules {
    pub min_duration_min: u16,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_duration_min: DEFAULT_MIN_DURATION_MIN,
        }
    }
}

/// Validate `plan` against `existing` with default rules.
pub fn validate(plan: &Plan, existing: &[Plan]) -> Result<(), ValidationError> {
    validate_with(plan, existing, &ValidationRules::default())
}

/// Validate a new or edited plan.
///
/// `existing` may contain the plan being edited; entries with the same id are
/// skipped for the overlap check.
pub fn validate_with(
    plan: &Plan,
    existing: &[Plan],
    rules: &ValidationRules,
) -> Result<(), ValidationError> {
    if plan.name.trim().is_empty() {
        return Err(ValidationError::EmptyName);
    }

    let window = plan.window;
    if window.end <= window.start || window.end > LAST_MINUTE {
        return Err(ValidationError::InvalidTimeWindow {
            start: window.start,
            end: window.end,
        });
    }
    if window.duration_min() < rules.min_duration_min {
        return Err(ValidationError::TooShort {
            minutes: window.duration_min(),
            minimum: rules.min_duration_min,
        });
    }

    let Recurrence::Weekly { days, date_range } = &plan.recurrence else {
        return Ok(());
    };

    if days.is_empty() {
        return Err(ValidationError::NoWeekdays);
    }
    if let Some(&bad) = days.iter().find(|&&d| d > 6) {
        return Err(ValidationError::InvalidWeekday(bad));
    }
    if let Some(range) = date_range {
        if range.end <= range.start {
            return Err(ValidationError::InvalidDateRange {
                start: range.start,
                end: range.end,
            });
        }
    }

    let conflict = existing
        .iter()
        .filter(|other| other.id != plan.id)
        .filter(|other| {
            other
                .weekdays()
                .is_some_and(|other_days| !other_days.is_disjoint(days))
        })
        .find(|other| other.window.intersects(&window));

    match conflict {
        Some(other) => Err(ValidationError::Overlap {
            conflicting_id: other.id.clone(),
        }),
        None => Ok(()),
    }
}
