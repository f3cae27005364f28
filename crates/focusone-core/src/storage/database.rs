//! SQLite-based plan storage.
//!
//! Provides persistent storage for:
//! - Plans (one JSON body per row)
//! - Same-day exclusions
//! - Key-value store for the session mirror

use std::path::Path;

use chrono::NaiveDate;
use rusqlite::{params, Connection};

use super::data_dir;
use crate::error::{CoreError, DatabaseError};
use crate::plan::{ExclusionEntry, ExclusionSet, Plan, PlanBook, ValidationRules};
use crate::sync::SessionState;

const DB_FILE: &str = "focusone.db";
const DATE_FORMAT: &str = "%Y-%m-%d";
const SESSION_KEY: &str = "session";

/// SQLite database for plans, exclusions and session state.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `~/.config/focusone/focusone.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    pub fn open() -> Result<Self, CoreError> {
        let path = data_dir()?.join(DB_FILE);
        Ok(Self::open_at(&path)?)
    }

    pub fn open_at(path: &Path) -> Result<Self, DatabaseError> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: path.to_path_buf(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests and dry runs).
    pub fn open_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<(), DatabaseError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS plans (
                id    TEXT PRIMARY KEY,
                body  TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exclusions (
                date     TEXT NOT NULL,
                plan_id  TEXT NOT NULL,
                PRIMARY KEY (date, plan_id)
            );

            CREATE TABLE IF NOT EXISTS kv (
                key   TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    pub fn load_plans(&self) -> Result<Vec<Plan>, DatabaseError> {
        let mut stmt = self.conn.prepare("SELECT id, body FROM plans ORDER BY id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut plans = Vec::new();
        for row in rows {
            let (id, body) = row?;
            let plan: Plan = serde_json::from_str(&body).map_err(|e| DatabaseError::CorruptRow {
                table: "plans",
                message: format!("{id}: {e}"),
            })?;
            plans.push(plan);
        }
        Ok(plans)
    }

    pub fn load_exclusions(&self) -> Result<Vec<ExclusionEntry>, DatabaseError> {
        let mut stmt = self
            .conn
            .prepare("SELECT date, plan_id FROM exclusions ORDER BY date, plan_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;

        let mut entries = Vec::new();
        for row in rows {
            let (date, plan_id) = row?;
            let date = NaiveDate::parse_from_str(&date, DATE_FORMAT).map_err(|e| {
                DatabaseError::CorruptRow {
                    table: "exclusions",
                    message: format!("{date}: {e}"),
                }
            })?;
            entries.push(ExclusionEntry { date, plan_id });
        }
        Ok(entries)
    }

    /// Rebuild the plan book. Exclusions not dated `today` are dropped.
    pub fn load_plan_book(&self, rules: ValidationRules, today: NaiveDate) -> Result<PlanBook, DatabaseError> {
        let plans = self.load_plans()?;
        let exclusions = ExclusionSet::from_entries(self.load_exclusions()?, today);
        Ok(PlanBook::from_parts(plans, exclusions, rules))
    }

    /// Replace stored plans and exclusions with the book's contents.
    pub fn save_plan_book(&mut self, book: &PlanBook) -> Result<(), DatabaseError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM plans", [])?;
        tx.execute("DELETE FROM exclusions", [])?;
        for plan in book.plans() {
            let body = serde_json::to_string(plan).map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
            tx.execute(
                "INSERT INTO plans (id, body) VALUES (?1, ?2)",
                params![plan.id, body],
            )?;
        }
        for entry in book.exclusion_set().entries() {
            tx.execute(
                "INSERT INTO exclusions (date, plan_id) VALUES (?1, ?2)",
                params![entry.date.format(DATE_FORMAT).to_string(), entry.plan_id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn load_session(&self) -> Result<Option<SessionState>, DatabaseError> {
        let Some(raw) = self.kv_get(SESSION_KEY)? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| DatabaseError::CorruptRow {
                table: "kv",
                message: format!("{SESSION_KEY}: {e}"),
            })
    }

    pub fn save_session(&self, state: &SessionState) -> Result<(), DatabaseError> {
        let raw = serde_json::to_string(state).map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        self.kv_set(SESSION_KEY, &raw)
    }

    /// Get a value from the kv store.
    pub fn kv_get(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let mut stmt = self.conn.prepare("SELECT value FROM kv WHERE key = ?1")?;
        let result = stmt.query_row(params![key], |row| row.get::<_, String>(0));
        match result {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Set a value in the kv store.
    pub fn kv_set(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{MatchInstant, TimeWindow};
    use crate::sync::SessionStatus;

    fn monday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).unwrap()
    }

    #[test]
    fn plan_book_roundtrip() {
        let mut db = Database::open_memory().unwrap();
        let mut book = PlanBook::default();
        book.insert(Plan::weekly("Morning", TimeWindow::new(540, 600), [1, 2]).with_id("morning"))
            .unwrap();
        book.insert(Plan::once("Quick", TimeWindow::new(700, 730)).with_id("quick"))
            .unwrap();
        book.exclude(monday(), "morning");
        db.save_plan_book(&book).unwrap();

        let mut loaded = db.load_plan_book(ValidationRules::default(), monday()).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("morning"), book.get("morning"));
        assert!(loaded
            .match_now(&MatchInstant::new(monday(), 550))
            .current
            .is_none());
    }

    #[test]
    fn old_exclusions_are_pruned_on_load() {
        let mut db = Database::open_memory().unwrap();
        let mut book = PlanBook::default();
        book.insert(Plan::weekly("Morning", TimeWindow::new(540, 600), [1, 2]).with_id("morning"))
            .unwrap();
        book.exclude(monday(), "morning");
        db.save_plan_book(&book).unwrap();

        let tuesday = monday().succ_opt().unwrap();
        let mut loaded = db.load_plan_book(ValidationRules::default(), tuesday).unwrap();
        assert!(loaded.exclusions(tuesday).is_empty());
    }

    #[test]
    fn corrupt_plan_rows_are_reported() {
        let db = Database::open_memory().unwrap();
        db.conn()
            .execute("INSERT INTO plans (id, body) VALUES ('bad', '{not json')", [])
            .unwrap();
        assert!(matches!(
            db.load_plans(),
            Err(DatabaseError::CorruptRow { table: "plans", .. })
        ));
    }

    #[test]
    fn session_mirror_roundtrip() {
        let db = Database::open_memory().unwrap();
        assert!(db.load_session().unwrap().is_none());

        let state = SessionState {
            status: SessionStatus::Paused,
            current_plan_id: Some("morning".into()),
            elapsed_minutes: 12,
            record_id: Some("r1".into()),
        };
        db.save_session(&state).unwrap();
        assert_eq!(db.load_session().unwrap(), Some(state));
    }

    #[test]
    fn kv_store() {
        let db = Database::open_memory().unwrap();
        assert!(db.kv_get("test").unwrap().is_none());
        db.kv_set("test", "hello").unwrap();
        assert_eq!(db.kv_get("test").unwrap().unwrap(), "hello");
    }

    #[test]
    fn open_at_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DB_FILE);
        let db = Database::open_at(&path).unwrap();
        db.kv_set("k", "v").unwrap();
        drop(db);
        let db = Database::open_at(&path).unwrap();
        assert_eq!(db.kv_get("k").unwrap().as_deref(), Some("v"));
    }
}
