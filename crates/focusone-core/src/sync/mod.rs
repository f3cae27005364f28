//! Session synchronization.
//!
//! [`SessionSync`] is the single writer of [`SessionState`]. It is a pure
//! state machine: every input (push event, pull response, timer fire) is
//! applied synchronously and answered with a list of [`Effect`]s for the
//! runtime to carry out. Completions of those effects come back as further
//! inputs.

mod manager;
mod types;

pub use manager::SessionSync;
pub use types::{FocusState, FocusStateEvent, FocusStatus, SessionState, SessionStatus};

use crate::record::OutboxItem;
use crate::timer::TimerArm;

/// Work requested by a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Replace any pending timer task with one for this arm.
    ArmTimer(TimerArm),
    /// Cancel the pending timer task, if any.
    DisarmTimer,
    /// Fetch a snapshot and answer with this sequence number.
    RequestPull { seq: u64 },
    /// Hand to the outbox.
    Outbox(OutboxItem),
    /// Apply to the balance ledger now.
    AdjustBalance(i64),
}
