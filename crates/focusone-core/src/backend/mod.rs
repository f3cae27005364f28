//! Record backend.
//!
//! The backend keeps one append-only record per attempted session. Calls are
//! only ever issued from the outbox worker; nothing on the state-transition
//! path awaits them.

mod http;

pub use http::HttpBackend;

use async_trait::async_trait;

use crate::error::BackendError;
use crate::record::NewRecord;

/// Record transitions and balance lookups.
#[async_trait]
pub trait RecordBackend: Send + Sync {
    /// Create a record, returning its backend id.
    async fn create_record(&self, record: &NewRecord) -> Result<String, BackendError>;

    /// Persist the elapsed minutes of a running record.
    async fn report_elapsed(&self, record_id: &str, minutes: u32) -> Result<(), BackendError>;

    async fn pause_record(&self, record_id: &str) -> Result<(), BackendError>;

    /// Mark the record as succeeded.
    async fn complete_record(&self, record_id: &str) -> Result<(), BackendError>;

    async fn fail_record(&self, record_id: &str, reason: &str) -> Result<(), BackendError>;

    /// Current currency balance.
    async fn fetch_balance(&self) -> Result<i64, BackendError>;
}
