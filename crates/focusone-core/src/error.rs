//! Core error types for focusone-core.
//!
//! Validation errors are the only kind meant for the user. Everything raised
//! by synchronization or networking is recovered inside the core and only
//! logged; those kinds live here so the log lines stay uniform.

use std::path::PathBuf;
use thiserror::Error;

use crate::plan::PlanId;

/// Core error type for focusone-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Plan validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Backend service errors
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Enforcement subsystem errors
    #[error("Enforcement error: {0}")]
    Enforcement(#[from] EnforcementError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic errors with context
    #[error("{0}")]
    Custom(String),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Stored row could not be decoded
    #[error("Corrupt row in '{table}': {message}")]
    CorruptRow { table: &'static str, message: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// No usable data directory
    #[error("Cannot resolve data directory: {0}")]
    DataDir(String),
}

/// Plan validation errors, raised at create/edit time.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A weekly plan shares a weekday with an existing plan and the windows intersect
    #[error("Time window overlaps plan '{conflicting_id}' on a shared weekday")]
    Overlap { conflicting_id: PlanId },

    /// Window shorter than the configured minimum
    #[error("Window of {minutes} minutes is shorter than the minimum of {minimum}")]
    TooShort { minutes: u16, minimum: u16 },

    /// Date range whose end is not after its start
    #[error("Invalid date range: end ({end}) must be after start ({start})")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    /// Window whose end is not after its start, or a minute outside the day
    #[error("Invalid time window: end ({end}) must be greater than start ({start}) within 0..=1439")]
    InvalidTimeWindow { start: u16, end: u16 },

    /// Blank plan name
    #[error("Plan name must not be empty")]
    EmptyName,

    /// Weekly plan without any weekday
    #[error("Weekly plan must select at least one weekday")]
    NoWeekdays,

    /// Weekday outside 0..=6
    #[error("Weekday {0} is out of range (0 = Sunday .. 6 = Saturday)")]
    InvalidWeekday(u8),

    /// Create with an id that is already taken
    #[error("Plan '{0}' already exists")]
    DuplicateId(PlanId),

    /// Edit of a plan that does not exist
    #[error("Plan '{0}' not found")]
    UnknownPlan(PlanId),
}

impl ValidationError {
    /// Stable machine-readable reason, suitable for UI lookup tables.
    pub fn reason(&self) -> &'static str {
        match self {
            ValidationError::Overlap { .. } => "overlap",
            ValidationError::TooShort { .. } => "too_short",
            ValidationError::InvalidDateRange { .. } => "invalid_date_range",
            ValidationError::InvalidTimeWindow { .. } => "invalid_time_window",
            ValidationError::EmptyName => "empty_name",
            ValidationError::NoWeekdays => "no_weekdays",
            ValidationError::InvalidWeekday(_) => "invalid_weekday",
            ValidationError::DuplicateId(_) => "duplicate_id",
            ValidationError::UnknownPlan(_) => "unknown_plan",
        }
    }
}

/// Backend service errors.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Non-2xx HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// 2xx transport but the envelope's statusCode was not 200
    #[error("Backend rejected request ({code}): {message}")]
    Rejected { code: i64, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Missing field in response: {0}")]
    MissingField(&'static str),
}

impl BackendError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            BackendError::Network(_) => true,
            BackendError::Status { status, .. } => {
                matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
            }
            // Envelope codes mirror HTTP: only server-side trouble is worth another try.
            BackendError::Rejected { code, .. } => (500..600).contains(code),
            BackendError::InvalidUrl(_) | BackendError::MissingField(_) => false,
        }
    }
}

/// Enforcement subsystem errors.
#[derive(Error, Debug, Clone)]
pub enum EnforcementError {
    #[error("Enforcement subsystem unavailable: {0}")]
    Unavailable(String),

    #[error("Enforcement subsystem rejected command '{command}': {message}")]
    Rejected { command: &'static str, message: String },
}

/// Synchronization anomalies. Logged and resolved locally, never surfaced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncAnomaly {
    /// A pull response issued before a newer push event (or newer pull) was applied
    #[error("Discarding stale snapshot (issued at seq {issued_seq}, newest applied seq {latest_seq})")]
    Stale { issued_seq: u64, latest_seq: u64 },

    /// Local state was not idle but the authority reported no active session
    #[error("Local session was {local_status} but the enforcement subsystem reports none; forcing idle")]
    AuthorityDesync { local_status: String },
}

/// A backend call that was dropped after exhausting its retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Dropped {kind} after {attempts} attempt(s): {message}")]
pub struct ReportingFailure {
    pub kind: &'static str,
    pub attempts: u32,
    pub message: String,
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
