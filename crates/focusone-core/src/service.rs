//! The runtime driver.
//!
//! `FocusService` runs one event loop. Push events, host lifecycle signals,
//! UI requests and the completions of its own I/O (pull responses, timer
//! fires, created records) all arrive as messages on a single channel and are
//! handled one at a time. Handling a message never awaits: state changes are
//! synchronous and any I/O is spawned with its completion queued back onto
//! the loop.
//!
//! With a [`Database`] attached, the session mirror and the plan book are
//! written after every message that changed them, so a killed process comes
//! back with its record id and exclusions intact.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::RecordBackend;
use crate::enforcement::{BridgeCommand, EnforcementBridge};
use crate::error::{CoreError, DatabaseError, EnforcementError, ValidationError};
use crate::outbox::{Delivered, Outbox};
use crate::plan::{MatchInstant, Plan, PlanBook, PlanId};
use crate::record::{BalanceLedger, RecordCoordinator};
use crate::storage::{Config, Database};
use crate::sync::{Effect, FocusStateEvent, FocusStatus, SessionState, SessionSync};
use crate::timer::{Clock, TimerArm};

/// Host application lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    /// Came back from the background; triggers a pull.
    Foreground,
    Shutdown,
}

type Reply<T> = oneshot::Sender<T>;

#[derive(Debug)]
enum UiRequest {
    CreatePlan(Plan, Reply<Result<(), ValidationError>>),
    UpdatePlan(Plan, Reply<Result<(), ValidationError>>),
    RemovePlan(PlanId, Reply<Option<Plan>>),
    Start(PlanId, Reply<Result<(), ValidationError>>),
    Pause(Option<u32>),
    Resume,
    Stop,
}

#[derive(Debug)]
enum LoopMsg {
    Push(FocusStateEvent),
    Host(HostSignal),
    Request(UiRequest),
    PullCompleted {
        seq: u64,
        result: Result<FocusStatus, EnforcementError>,
    },
    TimerFired {
        generation: u64,
    },
    Delivered(Delivered),
}

/// Read-only snapshot published after every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionView {
    pub state: SessionState,
    /// Plan behind the running session, or the scheduled one when idle.
    pub current_plan: Option<Plan>,
    pub next_plan: Option<Plan>,
    /// Live presentation counter; the last elapsed minutes while paused.
    pub timer_value: u32,
    pub balance: i64,
}

/// Cloneable entry point for event sources and the UI.
#[derive(Debug, Clone)]
pub struct FocusHandle {
    tx: mpsc::UnboundedSender<LoopMsg>,
}

impl FocusHandle {
    fn send(&self, msg: LoopMsg) -> Result<(), CoreError> {
        self.tx
            .send(msg)
            .map_err(|_| CoreError::Custom("focus service is not running".into()))
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> UiRequest) -> Result<T, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(LoopMsg::Request(build(reply)))?;
        rx.await
            .map_err(|_| CoreError::Custom("focus service stopped before replying".into()))
    }

    /// Deliver a push event from the enforcement subsystem.
    pub fn push(&self, event: FocusStateEvent) -> Result<(), CoreError> {
        self.send(LoopMsg::Push(event))
    }

    pub fn foreground(&self) -> Result<(), CoreError> {
        self.send(LoopMsg::Host(HostSignal::Foreground))
    }

    pub fn shutdown(&self) -> Result<(), CoreError> {
        self.send(LoopMsg::Host(HostSignal::Shutdown))
    }

    pub async fn create_plan(&self, plan: Plan) -> Result<(), CoreError> {
        Ok(self.request(|r| UiRequest::CreatePlan(plan, r)).await??)
    }

    pub async fn update_plan(&self, plan: Plan) -> Result<(), CoreError> {
        Ok(self.request(|r| UiRequest::UpdatePlan(plan, r)).await??)
    }

    pub async fn remove_plan(&self, plan_id: impl Into<PlanId>) -> Result<Option<Plan>, CoreError> {
        let plan_id = plan_id.into();
        self.request(|r| UiRequest::RemovePlan(plan_id, r)).await
    }

    /// Ask the enforcement subsystem to start `plan_id` now.
    pub async fn start(&self, plan_id: impl Into<PlanId>) -> Result<(), CoreError> {
        let plan_id = plan_id.into();
        Ok(self.request(|r| UiRequest::Start(plan_id, r)).await??)
    }

    pub fn pause(&self, duration_min: Option<u32>) -> Result<(), CoreError> {
        self.send(LoopMsg::Request(UiRequest::Pause(duration_min)))
    }

    pub fn resume(&self) -> Result<(), CoreError> {
        self.send(LoopMsg::Request(UiRequest::Resume))
    }

    pub fn stop(&self) -> Result<(), CoreError> {
        self.send(LoopMsg::Request(UiRequest::Stop))
    }
}

pub struct FocusService {
    plans: PlanBook,
    sync: SessionSync,
    bridge: Arc<dyn EnforcementBridge>,
    /// Commands go through one task so the subsystem sees them in order.
    commands: mpsc::UnboundedSender<BridgeCommand>,
    clock: Arc<dyn Clock>,
    outbox: Outbox,
    ledger: Arc<BalanceLedger>,
    timer_task: Option<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<LoopMsg>,
    rx: mpsc::UnboundedReceiver<LoopMsg>,
    view: watch::Sender<SessionView>,
    pause_default_min: u32,
    store: Option<Database>,
    saved_state: Option<SessionState>,
    saved_revision: Option<u64>,
    synced_revision: Option<u64>,
    synced_plans: Option<Vec<Plan>>,
}

impl FocusService {
    /// Wire the service together. Must be called inside a tokio runtime; the
    /// outbox worker is spawned immediately.
    pub fn new(
        plans: PlanBook,
        config: &Config,
        bridge: Arc<dyn EnforcementBridge>,
        backend: Arc<dyn RecordBackend>,
        clock: Arc<dyn Clock>,
    ) -> (Self, FocusHandle, watch::Receiver<SessionView>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ledger = Arc::new(BalanceLedger::default());

        let delivered_tx = tx.clone();
        let (outbox, _worker) = Outbox::spawn(
            backend,
            config.retry_policy(),
            Arc::clone(&ledger),
            move |delivered| {
                let _ = delivered_tx.send(LoopMsg::Delivered(delivered));
            },
        );

        let (commands, command_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_commands(Arc::clone(&bridge), command_rx));

        let (view, view_rx) = watch::channel(SessionView::default());
        let service = Self {
            plans,
            sync: SessionSync::new(RecordCoordinator::new(config.record_settings())),
            bridge,
            commands,
            clock,
            outbox,
            ledger,
            timer_task: None,
            tx: tx.clone(),
            rx,
            view,
            pause_default_min: config.pause.default_duration_min,
            store: None,
            saved_state: None,
            saved_revision: None,
            synced_revision: None,
            synced_plans: None,
        };
        (service, FocusHandle { tx }, view_rx)
    }

    /// Persist to `db`, seeding the session mirror from what it last saved.
    pub fn with_database(mut self, db: Database) -> Result<Self, DatabaseError> {
        if let Some(state) = db.load_session()? {
            info!(status = %state.status, record_id = ?state.record_id, "session mirror restored");
            self.sync.restore(state.clone());
            self.saved_state = Some(state);
        }
        self.store = Some(db);
        Ok(self)
    }

    pub fn ledger(&self) -> Arc<BalanceLedger> {
        Arc::clone(&self.ledger)
    }

    /// Run until shutdown. Returns the plan book for persistence.
    pub async fn run(mut self) -> PlanBook {
        info!(plans = self.plans.len(), "focus service started");
        let initial = self.sync.request_pull();
        self.apply(vec![initial]);
        self.settle();

        while let Some(msg) = self.rx.recv().await {
            if matches!(msg, LoopMsg::Host(HostSignal::Shutdown)) {
                break;
            }
            self.handle(msg);
            self.settle();
        }

        self.disarm_timer();
        self.persist();
        info!("focus service stopped");
        self.plans
    }

    fn handle(&mut self, msg: LoopMsg) {
        let now = self.clock.now();
        let effects = match msg {
            LoopMsg::Push(event) => self.sync.handle_push(&event, &mut self.plans, now),
            LoopMsg::Host(HostSignal::Foreground) => vec![self.sync.request_pull()],
            LoopMsg::Host(HostSignal::Shutdown) => Vec::new(),
            LoopMsg::Request(request) => self.handle_request(request),
            LoopMsg::PullCompleted {
                seq,
                result: Ok(status),
            } => self.sync.handle_pull(seq, &status, &mut self.plans, now),
            LoopMsg::PullCompleted {
                seq,
                result: Err(err),
            } => {
                warn!(seq, error = %err, "status query failed");
                self.sync.handle_pull_failed(seq, now)
            }
            LoopMsg::TimerFired { generation } => self.sync.handle_timer_fire(generation, now),
            LoopMsg::Delivered(Delivered::RecordCreated {
                session_key,
                record_id,
                ..
            }) => self.sync.handle_record_created(session_key, record_id),
            LoopMsg::Delivered(Delivered::RecordFailed { session_key, plan_id }) => {
                warn!(session_key, plan_id = %plan_id, "record could not be created");
                self.sync.handle_record_failed(session_key);
                Vec::new()
            }
            // The ledger is already updated; the publish below picks it up.
            LoopMsg::Delivered(Delivered::BalanceRefreshed(_)) => Vec::new(),
        };
        self.apply(effects);
    }

    fn handle_request(&mut self, request: UiRequest) -> Vec<Effect> {
        match request {
            UiRequest::CreatePlan(plan, reply) => {
                let _ = reply.send(self.plans.insert(plan));
            }
            UiRequest::UpdatePlan(plan, reply) => {
                let _ = reply.send(self.plans.update(plan));
            }
            UiRequest::RemovePlan(plan_id, reply) => {
                let _ = reply.send(self.plans.remove(&plan_id));
            }
            UiRequest::Start(plan_id, reply) => match self.plans.get(&plan_id).cloned() {
                Some(plan) => {
                    self.sync.expect_start(plan_id);
                    self.send_command(BridgeCommand::Start(plan));
                    let _ = reply.send(Ok(()));
                }
                None => {
                    let _ = reply.send(Err(ValidationError::UnknownPlan(plan_id)));
                }
            },
            UiRequest::Pause(minutes) => {
                let minutes = minutes.unwrap_or(self.pause_default_min);
                self.send_command(BridgeCommand::Pause(Some(minutes)));
            }
            UiRequest::Resume => self.send_command(BridgeCommand::Resume),
            UiRequest::Stop => self.send_command(BridgeCommand::Stop),
        }
        // Commands take effect only once the authority reports back.
        Vec::new()
    }

    fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::ArmTimer(arm) => self.arm_timer(arm),
                Effect::DisarmTimer => self.disarm_timer(),
                Effect::RequestPull { seq } => self.spawn_pull(seq),
                Effect::Outbox(item) => self.outbox.enqueue(item),
                Effect::AdjustBalance(delta) => {
                    self.ledger.adjust(delta);
                }
            }
        }
    }

    /// Replace the single timer task.
    fn arm_timer(&mut self, arm: TimerArm) {
        self.disarm_timer();
        let tx = self.tx.clone();
        self.timer_task = Some(tokio::spawn(async move {
            tokio::time::sleep(arm.delay).await;
            let _ = tx.send(LoopMsg::TimerFired {
                generation: arm.generation,
            });
        }));
    }

    fn disarm_timer(&mut self) {
        if let Some(task) = self.timer_task.take() {
            task.abort();
        }
    }

    fn spawn_pull(&self, seq: u64) {
        debug!(seq, "pull requested");
        let bridge = Arc::clone(&self.bridge);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let result = bridge.status().await;
            let _ = tx.send(LoopMsg::PullCompleted { seq, result });
        });
    }

    fn send_command(&self, command: BridgeCommand) {
        let name = command.name();
        if self.commands.send(command).is_err() {
            warn!(command = name, "enforcement command channel closed");
        }
    }

    /// Work done after every message. Anything a published view shows is
    /// already saved.
    fn settle(&mut self) {
        self.sync_plans();
        self.persist();
        self.publish();
    }

    /// Hand the plan set to the enforcement subsystem when it changed.
    fn sync_plans(&mut self) {
        let revision = self.plans.revision();
        if self.synced_revision == Some(revision) {
            return;
        }
        self.synced_revision = Some(revision);

        let plans: Vec<Plan> = self.plans.plans().cloned().collect();
        if self.synced_plans.as_ref() == Some(&plans) {
            return;
        }
        debug!(plans = plans.len(), "plan set sent to enforcement");
        self.synced_plans = Some(plans.clone());
        self.send_command(BridgeCommand::SyncPlans(plans));
    }

    fn persist(&mut self) {
        let Some(db) = self.store.as_mut() else {
            return;
        };

        let state = self.sync.state();
        if self.saved_state.as_ref() != Some(state) {
            match db.save_session(state) {
                Ok(()) => self.saved_state = Some(state.clone()),
                Err(err) => warn!(error = %err, "session mirror not saved"),
            }
        }

        let revision = self.plans.revision();
        if self.saved_revision != Some(revision) {
            match db.save_plan_book(&self.plans) {
                Ok(()) => self.saved_revision = Some(revision),
                Err(err) => warn!(error = %err, "plan book not saved"),
            }
        }
    }

    fn publish(&mut self) {
        let now = self.clock.now();
        let scheduled = self.plans.match_now(&MatchInstant::at(now));
        let state = self.sync.state().clone();
        let current_plan = if state.is_idle() {
            scheduled.current
        } else {
            self.sync.current_plan(&self.plans)
        };
        let view = SessionView {
            current_plan,
            next_plan: scheduled.next,
            timer_value: if self.sync.timer().is_armed() {
                self.sync.timer().value()
            } else {
                state.elapsed_minutes
            },
            balance: self.ledger.balance(),
            state,
        };
        self.view.send_if_modified(|current| {
            if *current == view {
                false
            } else {
                *current = view;
                true
            }
        });
    }
}

async fn run_commands(
    bridge: Arc<dyn EnforcementBridge>,
    mut rx: mpsc::UnboundedReceiver<BridgeCommand>,
) {
    while let Some(command) = rx.recv().await {
        if let Err(err) = command.send(bridge.as_ref()).await {
            warn!(command = command.name(), error = %err, "enforcement command failed");
        }
    }
}
