//! The plan set, its exclusions, and the matching engine.
//!
//! `PlanBook` is the only writer of plans and exclusions. Matching is pure
//! apart from one side effect: one-off plans whose window has fully elapsed
//! are removed the first time they are evaluated past expiry.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::Serialize;
use tracing::debug;

use super::{validate_with, ExclusionEntry, ExclusionSet, MatchInstant, Plan, PlanId, ValidationRules};
use crate::error::ValidationError;

/// Result of one matching pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlanMatch {
    pub current: Option<Plan>,
    pub next: Option<Plan>,
    /// One-off plans garbage-collected by this pass.
    pub collected: Vec<PlanId>,
}

#[derive(Debug, Clone, Default)]
pub struct PlanBook {
    plans: BTreeMap<PlanId, Plan>,
    exclusions: ExclusionSet,
    rules: ValidationRules,
    /// Bumped on every change to plans or exclusions.
    revision: u64,
}

/// Earliest start wins, then the lexicographically smallest id.
fn precedence(a: &&Plan, b: &&Plan) -> Ordering {
    a.window
        .start
        .cmp(&b.window.start)
        .then_with(|| a.id.cmp(&b.id))
}

impl PlanBook {
    pub fn new(rules: ValidationRules) -> Self {
        Self {
            plans: BTreeMap::new(),
            exclusions: ExclusionSet::new(),
            rules,
            revision: 0,
        }
    }

    /// Rebuild from persisted state. Plans are trusted as already validated.
    pub fn from_parts(
        plans: impl IntoIterator<Item = Plan>,
        exclusions: ExclusionSet,
        rules: ValidationRules,
    ) -> Self {
        Self {
            plans: plans.into_iter().map(|p| (p.id.clone(), p)).collect(),
            exclusions,
            rules,
            revision: 0,
        }
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn rules(&self) -> &ValidationRules {
        &self.rules
    }

    /// Exclusions as stored, without pruning.
    pub fn exclusion_set(&self) -> &ExclusionSet {
        &self.exclusions
    }

    pub fn get(&self, id: &str) -> Option<&Plan> {
        self.plans.get(id)
    }

    pub fn plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.values()
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    fn others(&self, id: &str) -> Vec<Plan> {
        self.plans
            .values()
            .filter(|p| p.id != id)
            .cloned()
            .collect()
    }

    /// Create a plan after validation.
    pub fn insert(&mut self, plan: Plan) -> Result<(), ValidationError> {
        if self.plans.contains_key(&plan.id) {
            return Err(ValidationError::DuplicateId(plan.id));
        }
        validate_with(&plan, &self.others(&plan.id), &self.rules)?;
        debug!(plan_id = %plan.id, window = %plan.window, "plan created");
        self.plans.insert(plan.id.clone(), plan);
        self.revision += 1;
        Ok(())
    }

    /// Replace an existing plan after validation.
    pub fn update(&mut self, plan: Plan) -> Result<(), ValidationError> {
        if !self.plans.contains_key(&plan.id) {
            return Err(ValidationError::UnknownPlan(plan.id));
        }
        validate_with(&plan, &self.others(&plan.id), &self.rules)?;
        debug!(plan_id = %plan.id, window = %plan.window, "plan updated");
        self.plans.insert(plan.id.clone(), plan);
        self.revision += 1;
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Plan> {
        let removed = self.plans.remove(id);
        if removed.is_some() {
            debug!(plan_id = %id, "plan removed");
            self.revision += 1;
        }
        removed
    }

    /// Keep `plan_id` from re-matching for the rest of `today`.
    pub fn exclude(&mut self, today: NaiveDate, plan_id: &str) {
        self.exclusions.add(today, plan_id);
        self.revision += 1;
    }

    pub fn clear_exclusion(&mut self, today: NaiveDate, plan_id: &str) -> bool {
        let cleared = self.exclusions.remove(today, plan_id);
        if cleared {
            self.revision += 1;
        }
        cleared
    }

    fn prune(&mut self, today: NaiveDate) {
        if self.exclusions.prune(today) > 0 {
            self.revision += 1;
        }
    }

    /// Today's exclusions, after pruning older ones.
    pub fn exclusions(&mut self, today: NaiveDate) -> Vec<ExclusionEntry> {
        self.prune(today);
        self.exclusions.entries().cloned().collect()
    }

    /// Compute the current and next plan for `now`.
    pub fn match_now(&mut self, now: &MatchInstant) -> PlanMatch {
        self.prune(now.date);

        let candidates: Vec<&Plan> = self.plans.values().filter(|p| p.applies_on(now)).collect();

        let current = candidates
            .iter()
            .copied()
            .filter(|p| p.window.contains(now.minute))
            .filter(|p| !self.exclusions.contains(now.date, &p.id))
            .min_by(precedence)
            .cloned();

        let next = candidates
            .iter()
            .copied()
            .filter(|p| p.window.start > now.minute)
            .min_by(precedence)
            .cloned();

        let collected: Vec<PlanId> = self
            .plans
            .values()
            .filter(|p| p.is_once() && p.window.end <= now.minute)
            .map(|p| p.id.clone())
            .collect();
        for id in &collected {
            self.plans.remove(id);
            debug!(plan_id = %id, "expired one-off plan collected");
        }
        if !collected.is_empty() {
            self.revision += 1;
        }

        PlanMatch {
            current,
            next,
            collected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::TimeWindow;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    fn morning() -> Plan {
        Plan::weekly("Morning", TimeWindow::new(540, 600), [1, 2, 3, 4, 5]).with_id("morning")
    }

    #[test]
    fn matches_running_plan_with_no_next() {
        let mut book = PlanBook::default();
        book.insert(morning()).unwrap();

        let outcome = book.match_now(&MatchInstant::new(monday(), 550));
        assert_eq!(outcome.current.map(|p| p.id), Some("morning".to_string()));
        assert!(outcome.next.is_none());
    }

    #[test]
    fn next_is_the_earliest_later_plan() {
        let mut book = PlanBook::default();
        book.insert(morning()).unwrap();
        book.insert(Plan::weekly("Evening", TimeWindow::new(1200, 1260), [1]).with_id("evening"))
            .unwrap();
        book.insert(Plan::weekly("Noon", TimeWindow::new(720, 780), [1]).with_id("noon"))
            .unwrap();

        let outcome = book.match_now(&MatchInstant::new(monday(), 500));
        assert!(outcome.current.is_none());
        assert_eq!(outcome.next.map(|p| p.id), Some("morning".to_string()));
    }

    #[test]
    fn other_weekdays_are_ignored() {
        let mut book = PlanBook::default();
        book.insert(morning()).unwrap();
        let sunday = monday().pred_opt().unwrap();
        let outcome = book.match_now(&MatchInstant::new(sunday, 550));
        assert!(outcome.current.is_none());
    }

    #[test]
    fn excluded_plan_is_not_current_today() {
        let mut book = PlanBook::default();
        book.insert(morning()).unwrap();
        book.exclude(monday(), "morning");

        let outcome = book.match_now(&MatchInstant::new(monday(), 550));
        assert!(outcome.current.is_none());

        let tuesday = monday().succ_opt().unwrap();
        let outcome = book.match_now(&MatchInstant::new(tuesday, 550));
        assert_eq!(outcome.current.map(|p| p.id), Some("morning".to_string()));
        assert!(book.exclusions(tuesday).is_empty());
    }

    #[test]
    fn overlapping_once_plans_resolve_deterministically() {
        let mut book = PlanBook::default();
        book.insert(Plan::once("B", TimeWindow::new(540, 600)).with_id("b"))
            .unwrap();
        book.insert(Plan::once("A", TimeWindow::new(540, 620)).with_id("a"))
            .unwrap();
        book.insert(Plan::once("Early", TimeWindow::new(530, 600)).with_id("z"))
            .unwrap();

        let outcome = book.match_now(&MatchInstant::new(monday(), 545));
        assert_eq!(outcome.current.map(|p| p.id), Some("z".to_string()));

        book.remove("z");
        let outcome = book.match_now(&MatchInstant::new(monday(), 545));
        assert_eq!(outcome.current.map(|p| p.id), Some("a".to_string()));
    }

    #[test]
    fn expired_once_plans_are_collected() {
        let mut book = PlanBook::default();
        book.insert(Plan::once("Done", TimeWindow::new(540, 600)).with_id("done"))
            .unwrap();
        book.insert(Plan::once("Later", TimeWindow::new(700, 760)).with_id("later"))
            .unwrap();

        let outcome = book.match_now(&MatchInstant::new(monday(), 600));
        assert_eq!(outcome.collected, vec!["done".to_string()]);
        assert!(book.get("done").is_none());
        assert!(book.get("later").is_some());
        assert_eq!(outcome.next.map(|p| p.id), Some("later".to_string()));
    }

    #[test]
    fn insert_rejects_duplicates_and_overlaps() {
        let mut book = PlanBook::default();
        book.insert(morning()).unwrap();
        assert_eq!(book.insert(morning()).unwrap_err().reason(), "duplicate_id");

        let clash = Plan::weekly("Clash", TimeWindow::new(595, 650), [1]);
        assert_eq!(book.insert(clash).unwrap_err().reason(), "overlap");
        assert_eq!(book.len(), 1);
    }

    #[test]
    fn update_requires_existing_plan() {
        let mut book = PlanBook::default();
        assert_eq!(book.update(morning()).unwrap_err().reason(), "unknown_plan");

        book.insert(morning()).unwrap();
        let mut edited = morning();
        edited.window = TimeWindow::new(480, 560);
        book.update(edited.clone()).unwrap();
        assert_eq!(book.get("morning"), Some(&edited));
    }

    #[test]
    fn revision_moves_only_on_change() {
        let mut book = PlanBook::default();
        book.insert(morning()).unwrap();
        let after_insert = book.revision();

        book.match_now(&MatchInstant::new(monday(), 550));
        assert!(!book.clear_exclusion(monday(), "morning"));
        assert_eq!(book.revision(), after_insert);

        book.exclude(monday(), "morning");
        assert!(book.revision() > after_insert);
    }
}
