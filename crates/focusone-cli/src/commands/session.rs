//! Session mirror commands.
//!
//! `replay` drives the synchronization manager from a JSON Lines script, one
//! step per line, printing the resulting state after each step:
//!
//! ```text
//! {"step":"push","at":"2026-03-02T09:10:00","state":"started"}
//! {"step":"record","at":"2026-03-02T09:10:01","record_id":"r1"}
//! {"step":"tick","at":"2026-03-02T09:11:00"}
//! {"step":"pull","at":"2026-03-02T09:12:00","status":{"active":false}}
//! {"step":"foreground","at":"2026-03-02T09:13:00"}
//! ```
//!
//! A `pull` answers the oldest outstanding pull request, or a fresh one when
//! none is outstanding. A `record` answers the oldest outstanding record
//! creation unless it names a `session_key`.

use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use chrono::NaiveDateTime;
use clap::Subcommand;
use focusone_core::{
    BalanceLedger, Config, Database, Effect, FocusState, FocusStateEvent, FocusStatus, OutboxItem,
    PlanBook, RecordCoordinator, SessionState, SessionSync,
};
use serde::{Deserialize, Serialize};

use super::{open_book, today, CliResult};

#[derive(Subcommand)]
pub enum SessionAction {
    /// Print the persisted session mirror as JSON
    Show,
    /// Feed a scripted sequence of events through the synchronization manager
    Replay {
        /// Path to a JSON Lines script
        script: PathBuf,
        /// Do not persist plans or the final session state
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "step", rename_all = "lowercase")]
enum Step {
    Push {
        at: NaiveDateTime,
        state: FocusState,
        #[serde(default)]
        reason: Option<String>,
    },
    Pull {
        at: NaiveDateTime,
        status: FocusStatus,
    },
    Tick {
        at: NaiveDateTime,
    },
    Foreground {
        at: NaiveDateTime,
    },
    Record {
        at: NaiveDateTime,
        record_id: String,
        #[serde(default)]
        session_key: Option<u64>,
    },
}

#[derive(Debug, Serialize)]
struct StepOutput<'a> {
    line: usize,
    state: &'a SessionState,
    timer: Option<u32>,
    balance: i64,
    effects: Vec<String>,
}

pub fn run(action: SessionAction) -> CliResult {
    match action {
        SessionAction::Show => {
            let db = Database::open()?;
            let state = db.load_session()?.unwrap_or_default();
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        SessionAction::Replay { script, dry_run } => {
            let config = Config::load()?;
            let (mut db, mut book) = open_book(&config, today())?;
            let file = std::fs::File::open(&script)?;
            let mut stdout = std::io::stdout().lock();
            let state = replay(BufReader::new(file), &config, &mut book, &mut stdout)?;
            if !dry_run {
                db.save_plan_book(&book)?;
                db.save_session(&state)?;
            }
        }
    }
    Ok(())
}

fn replay(
    reader: impl BufRead,
    config: &Config,
    book: &mut PlanBook,
    out: &mut impl Write,
) -> Result<SessionState, Box<dyn std::error::Error>> {
    let mut sync = SessionSync::new(RecordCoordinator::new(config.record_settings()));
    let ledger = BalanceLedger::default();
    let mut pending: VecDeque<u64> = VecDeque::new();
    let mut creating: VecDeque<u64> = VecDeque::new();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() || line.trim_start().starts_with('#') {
            continue;
        }
        let step: Step = serde_json::from_str(&line)
            .map_err(|e| format!("line {}: {e}", index + 1))?;

        let effects = match step {
            Step::Push { at, state, reason } => {
                let event = FocusStateEvent { state, reason };
                sync.handle_push(&event, book, at)
            }
            Step::Pull { at, status } => {
                let seq = pending.pop_front().unwrap_or_else(|| sync.issue_pull());
                sync.handle_pull(seq, &status, book, at)
            }
            Step::Tick { at } => match sync.armed_generation() {
                Some(generation) => sync.handle_timer_fire(generation, at),
                None => Vec::new(),
            },
            Step::Foreground { .. } => vec![sync.request_pull()],
            Step::Record {
                record_id,
                session_key,
                ..
            } => {
                let key = match session_key {
                    Some(key) => {
                        creating.retain(|k| *k != key);
                        Some(key)
                    }
                    None => creating.pop_front(),
                };
                match key {
                    Some(key) => sync.handle_record_created(key, record_id),
                    None => Vec::new(),
                }
            }
        };

        let mut described = Vec::with_capacity(effects.len());
        for effect in &effects {
            match effect {
                Effect::RequestPull { seq } => pending.push_back(*seq),
                Effect::Outbox(OutboxItem::CreateRecord { session_key, .. }) => {
                    creating.push_back(*session_key)
                }
                Effect::AdjustBalance(delta) => {
                    ledger.adjust(*delta);
                }
                _ => {}
            }
            described.push(describe(effect));
        }

        let step_out = StepOutput {
            line: index + 1,
            state: sync.state(),
            timer: sync.timer().is_armed().then(|| sync.timer().value()),
            balance: ledger.balance(),
            effects: described,
        };
        writeln!(out, "{}", serde_json::to_string(&step_out)?)?;
    }

    Ok(sync.state().clone())
}

fn describe(effect: &Effect) -> String {
    match effect {
        Effect::ArmTimer(arm) => format!("arm_timer:{}", arm.generation),
        Effect::DisarmTimer => "disarm_timer".to_string(),
        Effect::RequestPull { seq } => format!("request_pull:{seq}"),
        Effect::Outbox(item) => match item {
            OutboxItem::ReportElapsed { minutes, .. } => format!("report_elapsed:{minutes}"),
            other => other.kind().to_string(),
        },
        Effect::AdjustBalance(delta) => format!("adjust_balance:{delta}"),
    }
}
