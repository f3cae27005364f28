//! Plan management commands for CLI.

use chrono::NaiveDate;
use clap::{Subcommand, ValueEnum};
use focusone_core::plan::{weekday_index, MinuteOfDay};
use focusone_core::{
    BlockMode, Config, DateRange, MatchInstant, Plan, Recurrence, TimeWindow, ValidationError,
};
use serde_json::json;

use super::{local_now, open_book, today, CliResult};

#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Focus,
    Shield,
}

impl From<ModeArg> for BlockMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Focus => BlockMode::Focus,
            ModeArg::Shield => BlockMode::Shield,
        }
    }
}

fn parse_minute(s: &str) -> Result<MinuteOfDay, String> {
    TimeWindow::parse_hhmm(s).ok_or_else(|| format!("expected HH:MM, got {s:?}"))
}

#[derive(Subcommand)]
pub enum PlanAction {
    /// Create a plan
    Add {
        /// Plan name
        name: String,
        /// Window start (HH:MM)
        #[arg(long, value_parser = parse_minute)]
        start: MinuteOfDay,
        /// Window end, exclusive (HH:MM)
        #[arg(long, value_parser = parse_minute)]
        end: MinuteOfDay,
        /// Comma-separated weekdays, 0 = Sunday. Omit for a one-off plan
        #[arg(long, value_delimiter = ',')]
        days: Vec<u8>,
        /// First valid date of a weekly plan (YYYY-MM-DD)
        #[arg(long, requires = "until")]
        from: Option<NaiveDate>,
        /// Last valid date of a weekly plan (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        until: Option<NaiveDate>,
        #[arg(long, value_enum, default_value = "focus")]
        mode: ModeArg,
        /// Comma-separated app identifiers
        #[arg(long, value_delimiter = ',')]
        apps: Vec<String>,
    },
    /// Update fields of an existing plan
    Edit {
        /// Plan ID
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long, value_parser = parse_minute)]
        start: Option<MinuteOfDay>,
        #[arg(long, value_parser = parse_minute)]
        end: Option<MinuteOfDay>,
        /// Replace the weekday set of a weekly plan
        #[arg(long, value_delimiter = ',')]
        days: Option<Vec<u8>>,
        #[arg(long, value_enum)]
        mode: Option<ModeArg>,
        #[arg(long, value_delimiter = ',')]
        apps: Option<Vec<String>>,
    },
    /// List plans
    List {
        #[arg(long)]
        json: bool,
    },
    /// Remove a plan
    Remove {
        /// Plan ID
        id: String,
    },
    /// Show the current and next plan
    Match {
        /// Minute of day to evaluate (HH:MM); defaults to now
        #[arg(long, value_parser = parse_minute)]
        at: Option<MinuteOfDay>,
        /// Weekday override, 0 = Sunday
        #[arg(long)]
        weekday: Option<u8>,
        /// Date override (YYYY-MM-DD)
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// List today's exclusions
    Exclusions,
}

pub fn run(action: PlanAction) -> CliResult {
    let config = Config::load()?;
    let today = today();
    let (mut db, mut book) = open_book(&config, today)?;

    match action {
        PlanAction::Add {
            name,
            start,
            end,
            days,
            from,
            until,
            mode,
            apps,
        } => {
            let window = TimeWindow::new(start, end);
            let mut plan = if days.is_empty() {
                Plan::once(name, window)
            } else {
                Plan::weekly(name, window, days)
            };
            if let (Some(start), Some(end)) = (from, until) {
                if let Recurrence::Weekly { date_range, .. } = &mut plan.recurrence {
                    *date_range = Some(DateRange { start, end });
                }
            }
            plan.mode = mode.into();
            plan.apps = apps.into_iter().collect();

            let id = plan.id.clone();
            book.insert(plan)?;
            db.save_plan_book(&book)?;
            println!("Plan created: {id}");
        }
        PlanAction::Edit {
            id,
            name,
            start,
            end,
            days,
            mode,
            apps,
        } => {
            let mut plan = book
                .get(&id)
                .cloned()
                .ok_or_else(|| ValidationError::UnknownPlan(id.clone()))?;
            if let Some(name) = name {
                plan.name = name;
            }
            if let Some(start) = start {
                plan.window.start = start;
            }
            if let Some(end) = end {
                plan.window.end = end;
            }
            if let Some(new_days) = days {
                if let Recurrence::Weekly { days, .. } = &mut plan.recurrence {
                    *days = new_days.into_iter().collect();
                }
            }
            if let Some(mode) = mode {
                plan.mode = mode.into();
            }
            if let Some(apps) = apps {
                plan.apps = apps.into_iter().collect();
            }
            book.update(plan)?;
            db.save_plan_book(&book)?;
            println!("Plan updated: {id}");
        }
        PlanAction::List { json } => {
            let mut plans: Vec<&Plan> = book.plans().collect();
            plans.sort_by_key(|p| (p.window.start, p.id.clone()));
            if json {
                println!("{}", serde_json::to_string_pretty(&plans)?);
            } else if plans.is_empty() {
                println!("No plans.");
            } else {
                for plan in plans {
                    let when = match plan.weekdays() {
                        Some(days) => format!(
                            "weekly {}",
                            days.iter().map(u8::to_string).collect::<Vec<_>>().join(",")
                        ),
                        None => "once".to_string(),
                    };
                    println!("{}  {}  {}  {}", plan.id, plan.window, when, plan.name);
                }
            }
        }
        PlanAction::Remove { id } => match book.remove(&id) {
            Some(_) => {
                db.save_plan_book(&book)?;
                println!("Plan removed: {id}");
            }
            None => return Err(ValidationError::UnknownPlan(id).into()),
        },
        PlanAction::Match { at, weekday, date } => {
            let now = MatchInstant::at(local_now());
            let date = date.unwrap_or(now.date);
            let instant = MatchInstant {
                date,
                weekday: weekday.unwrap_or_else(|| weekday_index(date)),
                minute: at.unwrap_or(now.minute),
            };
            let matched = book.match_now(&instant);
            // Matching collects expired one-off plans; persist that.
            if !matched.collected.is_empty() {
                db.save_plan_book(&book)?;
            }
            let out = json!({
                "current": matched.current,
                "next": matched.next,
                "collected": matched.collected,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        PlanAction::Exclusions => {
            let entries = book.exclusions(today);
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
    }
    Ok(())
}
