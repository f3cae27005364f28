//! Fire-and-forget delivery of backend calls.
//!
//! State transitions enqueue [`OutboxItem`]s and move on. A single worker
//! task delivers them in order, retrying each per [`RetryPolicy`] and
//! dropping it with a warning once retries are exhausted. The worker never
//! touches session state; results the event loop cares about are handed back
//! as [`Delivered`] notifications.

mod retry;

pub use retry::{retry, RetryPolicy};

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::backend::RecordBackend;
use crate::error::ReportingFailure;
use crate::plan::PlanId;
use crate::record::{BalanceLedger, OutboxItem};

type DeliveredCallback = Box<dyn Fn(Delivered) + Send + Sync>;

/// Outcome of a delivery that the event loop should react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivered {
    RecordCreated {
        session_key: u64,
        plan_id: PlanId,
        record_id: String,
    },
    /// Creation was given up; nothing will ever carry this session's id.
    RecordFailed { session_key: u64, plan_id: PlanId },
    BalanceRefreshed(i64),
}

/// Sending half of the outbox. Dropping it lets the worker drain and exit.
#[derive(Debug, Clone)]
pub struct Outbox {
    tx: mpsc::UnboundedSender<OutboxItem>,
}

impl Outbox {
    /// Start the worker on the current tokio runtime.
    pub fn spawn(
        backend: Arc<dyn RecordBackend>,
        policy: RetryPolicy,
        ledger: Arc<BalanceLedger>,
        on_delivered: impl Fn(Delivered) + Send + Sync + 'static,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = OutboxWorker {
            backend,
            policy,
            ledger,
            on_delivered: Box::new(on_delivered),
        };
        let handle = tokio::spawn(worker.run(rx));
        (Self { tx }, handle)
    }

    pub fn enqueue(&self, item: OutboxItem) {
        let kind = item.kind();
        if self.tx.send(item).is_err() {
            warn!(kind, "outbox closed, item dropped");
        }
    }
}

struct OutboxWorker {
    backend: Arc<dyn RecordBackend>,
    policy: RetryPolicy,
    ledger: Arc<BalanceLedger>,
    on_delivered: DeliveredCallback,
}

impl OutboxWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<OutboxItem>) {
        while let Some(item) = rx.recv().await {
            if let Err(failure) = self.deliver(&item).await {
                warn!(record_id = ?record_id_of(&item), "{failure}");
            }
        }
        debug!("outbox drained");
    }

    async fn deliver(&self, item: &OutboxItem) -> Result<(), ReportingFailure> {
        let backend = self.backend.as_ref();
        let policy = &self.policy;
        let kind = item.kind();

        match item {
            OutboxItem::CreateRecord {
                session_key,
                record,
            } => {
                let created = retry(policy, kind, || backend.create_record(record)).await;
                let id = match created {
                    Ok(id) => id,
                    Err(failure) => {
                        (self.on_delivered)(Delivered::RecordFailed {
                            session_key: *session_key,
                            plan_id: record.plan_id.clone(),
                        });
                        return Err(failure);
                    }
                };
                debug!(plan_id = %record.plan_id, session_key, record_id = %id, "record created");
                (self.on_delivered)(Delivered::RecordCreated {
                    session_key: *session_key,
                    plan_id: record.plan_id.clone(),
                    record_id: id,
                });
            }
            OutboxItem::ReportElapsed { record_id, minutes } => {
                retry(policy, kind, || backend.report_elapsed(record_id, *minutes)).await?;
                debug!(record_id = %record_id, elapsed = minutes, "elapsed reported");
            }
            OutboxItem::PauseRecord { record_id } => {
                retry(policy, kind, || backend.pause_record(record_id)).await?;
            }
            OutboxItem::CompleteRecord { record_id } => {
                retry(policy, kind, || backend.complete_record(record_id)).await?;
            }
            OutboxItem::FailRecord { record_id, reason } => {
                retry(policy, kind, || backend.fail_record(record_id, reason)).await?;
            }
            OutboxItem::RefreshBalance => {
                let balance = retry(policy, kind, || backend.fetch_balance()).await?;
                self.ledger.refresh(balance);
                (self.on_delivered)(Delivered::BalanceRefreshed(balance));
            }
        }
        Ok(())
    }
}

fn record_id_of(item: &OutboxItem) -> Option<&str> {
    match item {
        OutboxItem::ReportElapsed { record_id, .. }
        | OutboxItem::PauseRecord { record_id }
        | OutboxItem::CompleteRecord { record_id }
        | OutboxItem::FailRecord { record_id, .. } => Some(record_id),
        OutboxItem::CreateRecord { .. } | OutboxItem::RefreshBalance => None,
    }
}
