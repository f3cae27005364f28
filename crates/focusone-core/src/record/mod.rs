//! Record lifecycle coordination.
//!
//! Maps session transitions onto backend record calls and balance side
//! effects. Nothing here performs I/O: the coordinator returns outbox items
//! which the runtime delivers later, so local state never waits on the
//! network.

mod ledger;

pub use ledger::BalanceLedger;

use serde::{Deserialize, Serialize};

use crate::plan::{BlockMode, Plan, PlanId};

/// Payload for `POST /record/add`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub title: String,
    pub plan_id: PlanId,
    pub start_min: u16,
    pub total_min: u16,
    pub apps: Vec<String>,
    pub mode: BlockMode,
    pub base_amount: i64,
    pub bet_amount: i64,
}

/// Work queued for the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboxItem {
    /// `session_key` identifies the local session the record is created for.
    CreateRecord { session_key: u64, record: NewRecord },
    ReportElapsed { record_id: String, minutes: u32 },
    PauseRecord { record_id: String },
    CompleteRecord { record_id: String },
    FailRecord { record_id: String, reason: String },
    RefreshBalance,
}

impl OutboxItem {
    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboxItem::CreateRecord { .. } => "create_record",
            OutboxItem::ReportElapsed { .. } => "report_elapsed",
            OutboxItem::PauseRecord { .. } => "pause_record",
            OutboxItem::CompleteRecord { .. } => "complete_record",
            OutboxItem::FailRecord { .. } => "fail_record",
            OutboxItem::RefreshBalance => "refresh_balance",
        }
    }
}

/// A record call that has to wait until the backend has assigned an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deferred {
    Pause,
    Complete,
    Fail { reason: String },
}

impl Deferred {
    pub fn resolve(self, record_id: &str) -> OutboxItem {
        let record_id = record_id.to_string();
        match self {
            Deferred::Pause => OutboxItem::PauseRecord { record_id },
            Deferred::Complete => OutboxItem::CompleteRecord { record_id },
            Deferred::Fail { reason } => OutboxItem::FailRecord { record_id, reason },
        }
    }
}

/// A session transition, as seen by the coordinator.
#[derive(Debug, Clone, Copy)]
pub enum Transition<'a> {
    Started { session_key: u64, plan: Option<&'a Plan> },
    Paused { record_id: Option<&'a str> },
    Ended { record_id: Option<&'a str> },
    Failed { record_id: Option<&'a str>, reason: &'a str },
}

/// Side effects produced for one transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordEffects {
    pub outbox: Vec<OutboxItem>,
    /// Applied to the local ledger synchronously.
    pub balance_delta: i64,
    /// Set when the transition needs a record id the session does not have yet.
    pub deferred: Option<Deferred>,
}

/// Amounts and labels used when talking to the record backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSettings {
    pub pause_penalty: i64,
    pub bet_amount: i64,
    pub once_title: String,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            pause_penalty: 1,
            bet_amount: 0,
            once_title: "One-off focus".into(),
        }
    }
}

impl RecordEffects {
    fn finalize(&mut self, record_id: Option<&str>, call: Deferred) {
        match record_id.filter(|id| !id.is_empty()) {
            Some(id) => self.outbox.push(call.resolve(id)),
            None => self.deferred = Some(call),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordCoordinator {
    settings: RecordSettings,
}

impl RecordCoordinator {
    pub fn new(settings: RecordSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RecordSettings {
        &self.settings
    }

    pub fn on_transition(&self, transition: Transition<'_>) -> RecordEffects {
        let mut effects = RecordEffects::default();
        match transition {
            Transition::Started { session_key, plan } => {
                if let Some(plan) = plan {
                    effects.outbox.push(OutboxItem::CreateRecord {
                        session_key,
                        record: self.new_record(plan),
                    });
                }
            }
            Transition::Paused { record_id } => {
                effects.balance_delta = -self.settings.pause_penalty;
                effects.finalize(record_id, Deferred::Pause);
            }
            Transition::Ended { record_id } => {
                effects.finalize(record_id, Deferred::Complete);
                effects.outbox.push(OutboxItem::RefreshBalance);
            }
            Transition::Failed { record_id, reason } => {
                effects.finalize(
                    record_id,
                    Deferred::Fail {
                        reason: reason.to_string(),
                    },
                );
                effects.outbox.push(OutboxItem::RefreshBalance);
            }
        }
        effects
    }

    /// Elapsed report for a tick. Nothing is sent until a record exists.
    pub fn on_tick(&self, record_id: Option<&str>, minutes: u32) -> Option<OutboxItem> {
        let record_id = record_id.filter(|id| !id.is_empty())?;
        (minutes > 0).then(|| OutboxItem::ReportElapsed {
            record_id: record_id.to_string(),
            minutes,
        })
    }

    fn new_record(&self, plan: &Plan) -> NewRecord {
        let title = if plan.name.trim().is_empty() {
            self.settings.once_title.clone()
        } else {
            plan.name.clone()
        };
        NewRecord {
            title,
            plan_id: plan.id.clone(),
            start_min: plan.window.start,
            total_min: plan.window.duration_min(),
            apps: plan.apps.iter().cloned().collect(),
            mode: plan.mode,
            base_amount: 0,
            bet_amount: self.settings.bet_amount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::TimeWindow;

    #[test]
    fn start_creates_record_from_plan() {
        let coordinator = RecordCoordinator::default();
        let plan = Plan::weekly("Deep work", TimeWindow::new(540, 600), [1]).with_id("p1");
        let effects = coordinator.on_transition(Transition::Started {
            session_key: 7,
            plan: Some(&plan),
        });
        match &effects.outbox[..] {
            [OutboxItem::CreateRecord {
                session_key,
                record,
            }] => {
                assert_eq!(*session_key, 7);
                assert_eq!(record.plan_id, "p1");
                assert_eq!(record.total_min, 60);
                assert_eq!(record.title, "Deep work");
            }
            other => panic!("unexpected outbox: {other:?}"),
        }
    }

    #[test]
    fn start_without_plan_creates_nothing() {
        let coordinator = RecordCoordinator::default();
        let effects = coordinator.on_transition(Transition::Started {
            session_key: 1,
            plan: None,
        });
        assert!(effects.outbox.is_empty());
    }

    #[test]
    fn pause_charges_penalty_even_without_record() {
        let coordinator = RecordCoordinator::default();
        let effects = coordinator.on_transition(Transition::Paused { record_id: None });
        assert_eq!(effects.balance_delta, -1);
        assert!(effects.outbox.is_empty());
        assert_eq!(effects.deferred, Some(Deferred::Pause));

        let effects = coordinator.on_transition(Transition::Paused {
            record_id: Some("r1"),
        });
        assert_eq!(
            effects.outbox,
            vec![OutboxItem::PauseRecord {
                record_id: "r1".into()
            }]
        );
    }

    #[test]
    fn failure_reports_reason_and_refreshes_balance() {
        let coordinator = RecordCoordinator::default();
        let effects = coordinator.on_transition(Transition::Failed {
            record_id: Some("r1"),
            reason: "user_exit",
        });
        assert_eq!(
            effects.outbox,
            vec![
                OutboxItem::FailRecord {
                    record_id: "r1".into(),
                    reason: "user_exit".into()
                },
                OutboxItem::RefreshBalance,
            ]
        );
    }

    #[test]
    fn finalization_without_record_is_deferred() {
        let coordinator = RecordCoordinator::default();
        let effects = coordinator.on_transition(Transition::Failed {
            record_id: None,
            reason: "user_exit",
        });
        assert_eq!(effects.outbox, vec![OutboxItem::RefreshBalance]);
        let deferred = effects.deferred.unwrap();
        assert_eq!(
            deferred.resolve("r7"),
            OutboxItem::FailRecord {
                record_id: "r7".into(),
                reason: "user_exit".into()
            }
        );
    }

    #[test]
    fn ticks_need_a_record_and_progress() {
        let coordinator = RecordCoordinator::default();
        assert!(coordinator.on_tick(None, 3).is_none());
        assert!(coordinator.on_tick(Some(""), 3).is_none());
        assert!(coordinator.on_tick(Some("r1"), 0).is_none());
        assert_eq!(
            coordinator.on_tick(Some("r1"), 3),
            Some(OutboxItem::ReportElapsed {
                record_id: "r1".into(),
                minutes: 3
            })
        );
    }
}
