//! The session state machine.
//!
//! ## State Transitions
//!
//! ```text
//! Idle --started--> Active --paused--> Paused
//!                     ^                  |
//!                     +----resumed-------+   (baseline re-read from a pull)
//! Active/Paused --ended|failed--> Idle
//! any --pull{active:false}--> Idle
//! ```
//!
//! Push events and pull requests share one sequence counter. A pull response
//! is applied only if nothing newer (push or pull) has been applied since it
//! was issued.
//!
//! Every session gets a key when it starts: the sequence number of the event
//! that started it. Record creation is correlated by that key, and record
//! calls made before the backend id is known wait in `awaiting_record` until
//! it arrives.

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use super::{Effect, FocusState, FocusStateEvent, FocusStatus, SessionState, SessionStatus};
use crate::error::SyncAnomaly;
use crate::plan::{minute_of_day, MatchInstant, Plan, PlanBook, PlanId, TimeWindow, LAST_MINUTE};
use crate::record::{Deferred, RecordCoordinator, RecordEffects, Transition};
use crate::timer::PresentationTimer;

const DEFAULT_FAIL_REASON: &str = "failed";

#[derive(Debug, Default)]
pub struct SessionSync {
    state: SessionState,
    timer: PresentationTimer,
    coordinator: RecordCoordinator,
    /// Stand-in for a session the authority started outside any known plan.
    transient_plan: Option<Plan>,
    /// Plan the UI asked the enforcement subsystem to start.
    requested_plan: Option<PlanId>,
    seq: u64,
    latest_push_seq: u64,
    latest_pull_seq: u64,
    pending_resume_pull: Option<u64>,
    session_key: Option<u64>,
    /// Sessions whose record is still being created, with the calls
    /// waiting for its id.
    awaiting_record: BTreeMap<u64, Vec<Deferred>>,
}

impl SessionSync {
    pub fn new(coordinator: RecordCoordinator) -> Self {
        Self {
            coordinator,
            ..Self::default()
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn timer(&self) -> &PresentationTimer {
        &self.timer
    }

    pub fn armed_generation(&self) -> Option<u64> {
        self.timer.armed_generation()
    }

    /// Correlation key of the running session.
    pub fn session_key(&self) -> Option<u64> {
        self.session_key
    }

    pub fn transient_plan(&self) -> Option<&Plan> {
        self.transient_plan.as_ref()
    }

    /// The plan behind the running session, including a synthesized one.
    pub fn current_plan(&self, plans: &PlanBook) -> Option<Plan> {
        let id = self.state.current_plan_id.as_deref()?;
        plans
            .get(id)
            .cloned()
            .or_else(|| self.transient_plan.as_ref().filter(|p| p.id == id).cloned())
    }

    // ── Inputs ───────────────────────────────────────────────────────

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    /// Issue a pull reconciliation (process start, foreground).
    pub fn request_pull(&mut self) -> Effect {
        Effect::RequestPull {
            seq: self.issue_pull(),
        }
    }

    /// Reserve a sequence number for a pull the caller performs itself.
    pub fn issue_pull(&mut self) -> u64 {
        self.next_seq()
    }

    /// Seed the mirror from persisted state. The next pull decides whether
    /// that session is still running.
    pub fn restore(&mut self, state: SessionState) {
        self.timer.stop();
        self.state = state;
    }

    /// Remember which plan the next `started` event belongs to.
    pub fn expect_start(&mut self, plan_id: impl Into<PlanId>) {
        self.requested_plan = Some(plan_id.into());
    }

    pub fn handle_push(
        &mut self,
        event: &FocusStateEvent,
        plans: &mut PlanBook,
        now: NaiveDateTime,
    ) -> Vec<Effect> {
        let seq = self.next_seq();
        self.latest_push_seq = seq;
        debug!(seq, state = ?event.state, status = %self.state.status, "push event");

        match event.state {
            FocusState::Started => self.on_started(plans, now),
            FocusState::Paused => self.on_paused(),
            FocusState::Resumed => self.on_resumed(),
            FocusState::Ended => self.on_finished(None, plans, now),
            FocusState::Failed => {
                let reason = event.reason.as_deref().unwrap_or(DEFAULT_FAIL_REASON);
                self.on_finished(Some(reason), plans, now)
            }
        }
    }

    pub fn handle_pull(
        &mut self,
        seq: u64,
        snapshot: &FocusStatus,
        plans: &mut PlanBook,
        now: NaiveDateTime,
    ) -> Vec<Effect> {
        if self.pending_resume_pull == Some(seq) {
            self.pending_resume_pull = None;
        }

        let latest = self.latest_push_seq.max(self.latest_pull_seq);
        if seq < latest {
            let anomaly = SyncAnomaly::Stale {
                issued_seq: seq,
                latest_seq: latest,
            };
            warn!(seq, "{anomaly}");
            return Vec::new();
        }
        self.latest_pull_seq = seq;

        if snapshot.active {
            self.adopt(snapshot, plans, now)
        } else {
            self.force_idle()
        }
    }

    /// A pull request that never produced a snapshot.
    pub fn handle_pull_failed(&mut self, seq: u64, now: NaiveDateTime) -> Vec<Effect> {
        warn!(seq, "pull reconciliation failed");
        if self.pending_resume_pull != Some(seq) {
            return Vec::new();
        }
        self.pending_resume_pull = None;
        if seq < self.latest_push_seq || self.state.status != SessionStatus::Active {
            return Vec::new();
        }
        // Fall back to the last known baseline.
        vec![Effect::ArmTimer(
            self.timer.start(self.state.elapsed_minutes, now),
        )]
    }

    pub fn handle_timer_fire(&mut self, generation: u64, now: NaiveDateTime) -> Vec<Effect> {
        let Some(tick) = self.timer.fire(generation, now) else {
            debug!(generation, "stale timer fire ignored");
            return Vec::new();
        };
        if self.state.status != SessionStatus::Active {
            self.timer.stop();
            return vec![Effect::DisarmTimer];
        }

        self.state.elapsed_minutes = self.state.elapsed_minutes.max(tick.value);
        debug!(elapsed = self.state.elapsed_minutes, "presentation tick");

        let mut effects = vec![Effect::ArmTimer(tick.rearm)];
        if let Some(item) = self
            .coordinator
            .on_tick(self.state.record_id.as_deref(), self.state.elapsed_minutes)
        {
            effects.push(Effect::Outbox(item));
        }
        effects
    }

    /// A record was created for the session keyed `session_key`.
    ///
    /// Calls that waited for the id are released, and the id is attached if
    /// that session is still the running one.
    pub fn handle_record_created(&mut self, session_key: u64, record_id: String) -> Vec<Effect> {
        let Some(waiting) = self.awaiting_record.remove(&session_key) else {
            debug!(session_key, record_id = %record_id, "record for unknown session ignored");
            return Vec::new();
        };
        let effects: Vec<Effect> = waiting
            .into_iter()
            .map(|call| Effect::Outbox(call.resolve(&record_id)))
            .collect();

        let current = self.session_key == Some(session_key) && !self.state.is_idle();
        if !current {
            info!(
                session_key,
                record_id = %record_id,
                released = effects.len(),
                "record created for a finished session"
            );
        } else if self.state.record_id.is_none() {
            info!(session_key, record_id = %record_id, "record attached");
            self.state.record_id = Some(record_id);
        } else {
            debug!(session_key, record_id = %record_id, "session already has a record");
        }
        effects
    }

    /// Record creation for `session_key` was given up.
    pub fn handle_record_failed(&mut self, session_key: u64) {
        if let Some(waiting) = self.awaiting_record.remove(&session_key) {
            if !waiting.is_empty() {
                warn!(session_key, dropped = waiting.len(), "record calls dropped, no record was created");
            }
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    fn on_started(&mut self, plans: &mut PlanBook, now: NaiveDateTime) -> Vec<Effect> {
        let today = now.date();
        let plan_id = self
            .requested_plan
            .take()
            .or_else(|| self.state.current_plan_id.clone())
            .or_else(|| {
                plans
                    .match_now(&MatchInstant::at(now))
                    .current
                    .map(|p| p.id)
            });

        if let Some(id) = plan_id.as_deref() {
            if plans.clear_exclusion(today, id) {
                debug!(plan_id = %id, "exclusion cleared on start");
            }
        }

        let duplicate = self.state.status == SessionStatus::Active
            && self.state.current_plan_id == plan_id;
        let record_id = if duplicate {
            self.state.record_id.take()
        } else {
            None
        };
        if !self.transient_is(plan_id.as_deref()) {
            self.transient_plan = None;
        }
        self.state = SessionState {
            status: SessionStatus::Active,
            current_plan_id: plan_id.clone(),
            elapsed_minutes: 0,
            record_id,
        };

        let mut effects = vec![Effect::ArmTimer(self.timer.start(0, now))];
        if duplicate {
            debug!(plan_id = ?plan_id, "duplicate start, keeping record");
            return effects;
        }
        let session_key = self.latest_push_seq;
        self.session_key = Some(session_key);

        match plan_id {
            Some(id) => {
                info!(plan_id = %id, session_key, "session started");
                let plan = plans
                    .get(&id)
                    .cloned()
                    .or_else(|| self.transient_plan.clone());
                if plan.is_some() {
                    self.awaiting_record.insert(session_key, Vec::new());
                }
                let record = self.coordinator.on_transition(Transition::Started {
                    session_key,
                    plan: plan.as_ref(),
                });
                self.push_record_effects(&mut effects, record);
            }
            None => {
                info!("session started without a known plan");
                effects.push(self.request_pull());
            }
        }
        effects
    }

    fn on_paused(&mut self) -> Vec<Effect> {
        self.timer.stop();
        let mut effects = vec![Effect::DisarmTimer];
        match self.state.status {
            SessionStatus::Paused => return effects,
            SessionStatus::Idle => effects.push(self.request_pull()),
            SessionStatus::Active => {}
        }

        self.state.status = SessionStatus::Paused;
        info!(elapsed = self.state.elapsed_minutes, "session paused");
        let record = self.coordinator.on_transition(Transition::Paused {
            record_id: self.state.record_id.as_deref(),
        });
        self.push_record_effects(&mut effects, record);
        effects
    }

    fn on_resumed(&mut self) -> Vec<Effect> {
        self.timer.stop();
        self.state.status = SessionStatus::Active;
        let seq = self.next_seq();
        self.pending_resume_pull = Some(seq);
        info!(seq, "session resumed, re-reading elapsed");
        vec![Effect::DisarmTimer, Effect::RequestPull { seq }]
    }

    /// `ended` when `reason` is `None`, `failed` otherwise.
    fn on_finished(
        &mut self,
        reason: Option<&str>,
        plans: &mut PlanBook,
        now: NaiveDateTime,
    ) -> Vec<Effect> {
        if self.state.is_idle() {
            debug!("terminal event while idle ignored");
            return Vec::new();
        }
        self.timer.stop();
        let mut effects = vec![Effect::DisarmTimer];

        let plan_id = self.state.current_plan_id.as_deref();
        if let (Some(reason), Some(id)) = (reason, plan_id) {
            if !self.transient_is(Some(id)) {
                match plans.get(id).map(Plan::is_once) {
                    Some(true) => {
                        plans.remove(id);
                    }
                    Some(false) => plans.exclude(now.date(), id),
                    None => {}
                }
            }
            info!(plan_id = %id, reason, "session failed");
        } else {
            info!(plan_id = ?plan_id, "session ended");
        }

        let record_id = self.state.record_id.as_deref();
        let record = match reason {
            Some(reason) => self
                .coordinator
                .on_transition(Transition::Failed { record_id, reason }),
            None => self.coordinator.on_transition(Transition::Ended { record_id }),
        };
        self.push_record_effects(&mut effects, record);

        self.state = SessionState::default();
        self.session_key = None;
        self.transient_plan = None;
        effects
    }

    fn force_idle(&mut self) -> Vec<Effect> {
        if self.state.is_idle() {
            return Vec::new();
        }
        let anomaly = SyncAnomaly::AuthorityDesync {
            local_status: self.state.status.to_string(),
        };
        warn!(plan_id = ?self.state.current_plan_id, "{anomaly}");
        self.timer.stop();
        self.state = SessionState::default();
        self.session_key = None;
        self.transient_plan = None;
        vec![Effect::DisarmTimer]
    }

    fn adopt(
        &mut self,
        snapshot: &FocusStatus,
        plans: &mut PlanBook,
        now: NaiveDateTime,
    ) -> Vec<Effect> {
        let resolved = snapshot
            .plan_id
            .clone()
            .filter(|id| !id.is_empty())
            .or_else(|| self.state.current_plan_id.clone());

        let plan_id = match resolved {
            Some(id) if plans.get(&id).is_some() => {
                plans.clear_exclusion(now.date(), &id);
                self.transient_plan = None;
                id
            }
            Some(id) if self.transient_is(Some(&id)) => id,
            other => {
                let plan = self.synthesize_transient(other, snapshot, now);
                info!(plan_id = %plan.id, window = %plan.window, "synthesized plan for unscheduled session");
                let id = plan.id.clone();
                self.transient_plan = Some(plan);
                id
            }
        };

        let same_session = self.state.current_plan_id.as_deref() == Some(plan_id.as_str());
        let record_id = match (&snapshot.record_id, same_session) {
            (Some(id), _) => Some(id.clone()),
            (None, true) => self.state.record_id.take(),
            (None, false) => None,
        };
        if !same_session || self.session_key.is_none() {
            self.session_key = Some(self.latest_pull_seq);
        }

        self.state = SessionState {
            status: if snapshot.paused {
                SessionStatus::Paused
            } else {
                SessionStatus::Active
            },
            current_plan_id: Some(plan_id),
            elapsed_minutes: snapshot.elapsed_minutes,
            record_id,
        };
        debug!(
            status = %self.state.status,
            elapsed = self.state.elapsed_minutes,
            "adopted snapshot"
        );

        if snapshot.paused {
            self.timer.stop();
            vec![Effect::DisarmTimer]
        } else {
            vec![Effect::ArmTimer(
                self.timer.start(snapshot.elapsed_minutes, now),
            )]
        }
    }

    /// One-off plan ending `total_minutes` after it would have started.
    fn synthesize_transient(
        &self,
        id: Option<PlanId>,
        snapshot: &FocusStatus,
        now: NaiveDateTime,
    ) -> Plan {
        let elapsed = u16::try_from(snapshot.elapsed_minutes).unwrap_or(LAST_MINUTE);
        let start = minute_of_day(now)
            .saturating_sub(elapsed)
            .min(LAST_MINUTE - 1);
        let total = snapshot
            .total_minutes
            .and_then(|t| u16::try_from(t).ok())
            .unwrap_or(elapsed)
            .max(1);
        let end = start.saturating_add(total).clamp(start + 1, LAST_MINUTE);

        let plan = Plan::once(
            self.coordinator.settings().once_title.clone(),
            TimeWindow::new(start, end),
        );
        match id {
            Some(id) => plan.with_id(id),
            None => plan,
        }
    }

    fn transient_is(&self, id: Option<&str>) -> bool {
        match (self.transient_plan.as_ref(), id) {
            (Some(plan), Some(id)) => plan.id == id,
            _ => false,
        }
    }

    fn push_record_effects(&mut self, effects: &mut Vec<Effect>, record: RecordEffects) {
        if record.balance_delta != 0 {
            effects.push(Effect::AdjustBalance(record.balance_delta));
        }
        effects.extend(record.outbox.into_iter().map(Effect::Outbox));

        let Some(call) = record.deferred else { return };
        let waiting = self
            .session_key
            .and_then(|key| self.awaiting_record.get_mut(&key));
        match waiting {
            Some(waiting) => {
                debug!(session_key = ?self.session_key, ?call, "record call waits for id");
                waiting.push(call);
            }
            None => debug!(?call, "no record for this session, call skipped"),
        }
    }
}
