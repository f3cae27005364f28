pub mod config;
pub mod plan;
pub mod session;

use chrono::{Local, NaiveDate, NaiveDateTime};
use focusone_core::{Config, Database, PlanBook};

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

pub fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn today() -> NaiveDate {
    local_now().date()
}

/// Open the database and load the plan book with the configured rules.
pub fn open_book(config: &Config, today: NaiveDate) -> Result<(Database, PlanBook), Box<dyn std::error::Error>> {
    let db = Database::open()?;
    let book = db.load_plan_book(config.validation_rules(), today)?;
    Ok((db, book))
}
