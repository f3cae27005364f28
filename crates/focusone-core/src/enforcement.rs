//! Boundary to the device enforcement subsystem.
//!
//! The enforcement subsystem does the actual blocking and is the authority on
//! whether a session is running. Commands sent to it are fire-and-forget:
//! their outcome is only ever observed through push events or a later pull.
//!
//! The subsystem also keeps its own copy of the plan set so it can start a
//! scheduled session on time. It is replaced wholesale whenever plans change.

use async_trait::async_trait;

use crate::error::EnforcementError;
use crate::plan::Plan;
use crate::sync::FocusStatus;

#[async_trait]
pub trait EnforcementBridge: Send + Sync {
    /// Point-in-time snapshot for pull reconciliation.
    async fn status(&self) -> Result<FocusStatus, EnforcementError>;

    async fn start(&self, plan: &Plan) -> Result<(), EnforcementError>;

    async fn stop(&self) -> Result<(), EnforcementError>;

    /// Pause, optionally for a bounded number of minutes.
    async fn pause(&self, duration_min: Option<u32>) -> Result<(), EnforcementError>;

    async fn resume(&self) -> Result<(), EnforcementError>;

    /// Replace the subsystem's copy of the plan set.
    async fn sync_plans(&self, plans: &[Plan]) -> Result<(), EnforcementError>;
}

/// A command routed to the enforcement subsystem on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCommand {
    Start(Plan),
    Stop,
    Pause(Option<u32>),
    Resume,
    SyncPlans(Vec<Plan>),
}

impl BridgeCommand {
    pub fn name(&self) -> &'static str {
        match self {
            BridgeCommand::Start(_) => "start",
            BridgeCommand::Stop => "stop",
            BridgeCommand::Pause(_) => "pause",
            BridgeCommand::Resume => "resume",
            BridgeCommand::SyncPlans(_) => "sync_plans",
        }
    }

    pub async fn send(&self, bridge: &dyn EnforcementBridge) -> Result<(), EnforcementError> {
        match self {
            BridgeCommand::Start(plan) => bridge.start(plan).await,
            BridgeCommand::Stop => bridge.stop().await,
            BridgeCommand::Pause(minutes) => bridge.pause(*minutes).await,
            BridgeCommand::Resume => bridge.resume().await,
            BridgeCommand::SyncPlans(plans) => bridge.sync_plans(plans).await,
        }
    }
}
