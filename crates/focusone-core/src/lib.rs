//! # FocusOne Core Library
//!
//! Scheduling and synchronization core for FocusOne focus sessions. A trusted
//! device enforcement subsystem does the actual app blocking and is the
//! authority on whether a session is running; this library decides what
//! should run now and keeps a consistent local mirror of what is running.
//!
//! ## Architecture
//!
//! - **Plans**: time-window rules, write-time validation, same-day exclusions
//!   and the matching engine that picks the current and next plan
//! - **Timer**: a minute-aligned presentation counter that cannot drift
//! - **Sync**: the session state machine reconciling push events and pull
//!   snapshots; pure, returns effects instead of doing I/O
//! - **Record / Outbox / Backend**: record lifecycle calls and balance
//!   refreshes, delivered off the state-transition path with bounded retry
//! - **Service**: the tokio event loop that executes effects
//! - **Storage**: SQLite persistence and TOML configuration
//!
//! ## Key Components
//!
//! - [`PlanBook`]: plan set, exclusions and matching
//! - [`SessionSync`]: single writer of [`SessionState`]
//! - [`PresentationTimer`]: generation-tokened minute counter
//! - [`FocusService`]: async driver with a [`FocusHandle`] for callers

pub mod backend;
pub mod enforcement;
pub mod error;
pub mod outbox;
pub mod plan;
pub mod record;
pub mod service;
pub mod storage;
pub mod sync;
pub mod timer;

pub use backend::{HttpBackend, RecordBackend};
pub use enforcement::{BridgeCommand, EnforcementBridge};
pub use error::{
    BackendError, ConfigError, CoreError, DatabaseError, EnforcementError, ReportingFailure,
    SyncAnomaly, ValidationError,
};
pub use outbox::{Delivered, Outbox, RetryPolicy};
pub use plan::{
    validate, BlockMode, DateRange, MatchInstant, Plan, PlanBook, PlanId, PlanMatch, Recurrence,
    TimeWindow,
};
pub use record::{BalanceLedger, OutboxItem, RecordCoordinator, RecordSettings};
pub use service::{FocusHandle, FocusService, HostSignal, SessionView};
pub use storage::{Config, Database};
pub use sync::{Effect, FocusState, FocusStateEvent, FocusStatus, SessionState, SessionStatus, SessionSync};
pub use timer::{Clock, ManualClock, PresentationTimer, SystemClock};
