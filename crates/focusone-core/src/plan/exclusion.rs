//! Same-day exclusions for manually exited plans.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::PlanId;

/// A plan that must not be re-matched on `date`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExclusionEntry {
    pub date: NaiveDate,
    pub plan_id: PlanId,
}

/// Exclusion entries, pruned to today's date whenever they are touched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    entries: BTreeSet<ExclusionEntry>,
}

impl ExclusionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore persisted entries, dropping anything not dated `today`.
    pub fn from_entries(entries: impl IntoIterator<Item = ExclusionEntry>, today: NaiveDate) -> Self {
        let mut set = Self {
            entries: entries.into_iter().collect(),
        };
        set.prune(today);
        set
    }

    /// Drop every entry not bearing `today`. Returns how many were removed.
    pub fn prune(&mut self, today: NaiveDate) -> usize {
        let before = self.entries.len();
        self.entries.retain(|e| e.date == today);
        before - self.entries.len()
    }

    pub fn add(&mut self, today: NaiveDate, plan_id: &str) {
        self.prune(today);
        self.entries.insert(ExclusionEntry {
            date: today,
            plan_id: plan_id.to_string(),
        });
    }

    /// Remove today's entry for `plan_id`. Returns whether one existed.
    pub fn remove(&mut self, today: NaiveDate, plan_id: &str) -> bool {
        self.prune(today);
        self.entries.remove(&ExclusionEntry {
            date: today,
            plan_id: plan_id.to_string(),
        })
    }

    /// Lookup without pruning; callers prune first.
    pub fn contains(&self, today: NaiveDate, plan_id: &str) -> bool {
        self.entries.contains(&ExclusionEntry {
            date: today,
            plan_id: plan_id.to_string(),
        })
    }

    pub fn entries(&self) -> impl Iterator<Item = &ExclusionEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
