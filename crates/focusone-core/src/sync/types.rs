use serde::{Deserialize, Serialize};

use crate::plan::PlanId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Active,
    Paused,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Active => "active",
            SessionStatus::Paused => "paused",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-local mirror of the enforcement subsystem's session.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SessionState {
    pub status: SessionStatus,
    pub current_plan_id: Option<PlanId>,
    pub elapsed_minutes: u32,
    pub record_id: Option<String>,
}

impl SessionState {
    pub fn is_idle(&self) -> bool {
        self.status == SessionStatus::Idle
    }
}

/// State carried by a push event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FocusState {
    Started,
    Paused,
    Resumed,
    Ended,
    Failed,
}

/// Push event from the enforcement subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusStateEvent {
    pub state: FocusState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl FocusStateEvent {
    pub fn new(state: FocusState) -> Self {
        Self { state, reason: None }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: FocusState::Failed,
            reason: Some(reason.into()),
        }
    }
}

/// Pull snapshot from the enforcement subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FocusStatus {
    pub active: bool,
    #[serde(default)]
    pub paused: bool,
    #[serde(default, alias = "elapsedMinutes")]
    pub elapsed_minutes: u32,
    #[serde(default, alias = "recordId")]
    pub record_id: Option<String>,
    #[serde(default, alias = "planId")]
    pub plan_id: Option<PlanId>,
    /// Session length, when the authority knows it.
    #[serde(default, alias = "totalMinutes")]
    pub total_minutes: Option<u32>,
}

impl FocusStatus {
    pub fn inactive() -> Self {
        Self::default()
    }
}
