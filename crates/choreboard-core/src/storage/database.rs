//! SQLite-based record store for the reward engine.
//!
//! Four domain collections (accounts, task definitions, task instances,
//! ledger entries) plus per-dependent streak records. Two unique indexes
//! carry engine invariants:
//! - `(correlation_id, reason)` on ledger_entries backs idempotent
//!   credit/debit;
//! - `(definition_id, due_date)` on task_instances makes a lost
//!   generation race fail loudly instead of double-scheduling.

use std::collections::HashSet;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc, Weekday};
use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};

use super::data_dir;
use crate::account::{Account, Role};
use crate::error::{is_constraint_violation, CoreError, DatabaseError, EngineError, Result};
use crate::task::{Cadence, TaskDefinition, TaskInstance, TaskStatus};

// === Helper Functions ===

/// Parse instance status from database string. Unknown values are a
/// corrupt-record error, not a fallback branch.
fn parse_status(status_str: &str) -> Result<TaskStatus, rusqlite::Error> {
    match status_str {
        "scheduled" => Ok(TaskStatus::Scheduled),
        "assigned" => Ok(TaskStatus::Assigned),
        "pending_approval" => Ok(TaskStatus::PendingApproval),
        "approved" => Ok(TaskStatus::Approved),
        "rejected" => Ok(TaskStatus::Rejected),
        "skipped" => Ok(TaskStatus::Skipped),
        other => Err(conversion_error(6, format!("unknown status '{other}'"))),
    }
}

fn parse_role(role_str: &str) -> Result<Role, rusqlite::Error> {
    match role_str {
        "guardian" => Ok(Role::Guardian),
        "dependent" => Ok(Role::Dependent),
        other => Err(conversion_error(2, format!("unknown role '{other}'"))),
    }
}

fn parse_cadence(cadence_str: &str) -> Result<Cadence, rusqlite::Error> {
    match cadence_str {
        "daily" => Ok(Cadence::Daily),
        "weekly" => Ok(Cadence::Weekly),
        other => Err(conversion_error(4, format!("unknown cadence '{other}'"))),
    }
}

/// Weekday stored as 0=Sunday .. 6=Saturday.
fn format_weekday(weekday: Weekday) -> i64 {
    i64::from(weekday.num_days_from_sunday())
}

fn parse_weekday(value: i64) -> Result<Weekday, rusqlite::Error> {
    match value {
        0 => Ok(Weekday::Sun),
        1 => Ok(Weekday::Mon),
        2 => Ok(Weekday::Tue),
        3 => Ok(Weekday::Wed),
        4 => Ok(Weekday::Thu),
        5 => Ok(Weekday::Fri),
        6 => Ok(Weekday::Sat),
        other => Err(conversion_error(5, format!("weekday {other} out of range"))),
    }
}

fn parse_datetime(idx: usize, value: &str) -> Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn parse_date(idx: usize, value: &str) -> Result<NaiveDate, rusqlite::Error> {
    value
        .parse::<NaiveDate>()
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, message.into())
}

fn row_to_account(row: &rusqlite::Row) -> Result<Account, rusqlite::Error> {
    let role_str: String = row.get(2)?;
    let created_str: String = row.get(5)?;
    Ok(Account {
        id: row.get(0)?,
        display_name: row.get(1)?,
        role: parse_role(&role_str)?,
        family_id: row.get(3)?,
        balance: row.get(4)?,
        created_at: parse_datetime(5, &created_str)?,
    })
}

fn row_to_definition(row: &rusqlite::Row) -> Result<TaskDefinition, rusqlite::Error> {
    let cadence_str: String = row.get(4)?;
    let weekday: Option<i64> = row.get(5)?;
    let due_time_str: Option<String> = row.get(6)?;
    let assignees_json: String = row.get(7)?;
    let anchor_str: String = row.get(8)?;
    let created_str: String = row.get(12)?;
    let updated_str: String = row.get(13)?;

    let due_time = match due_time_str {
        Some(s) => Some(
            NaiveTime::parse_from_str(&s, "%H:%M:%S")
                .map_err(|e| conversion_error(6, e.to_string()))?,
        ),
        None => None,
    };
    let assignees: Vec<String> = serde_json::from_str(&assignees_json)
        .map_err(|e| conversion_error(7, e.to_string()))?;

    Ok(TaskDefinition {
        id: row.get(0)?,
        guardian_id: row.get(1)?,
        name: row.get(2)?,
        points: row.get(3)?,
        cadence: parse_cadence(&cadence_str)?,
        weekday: weekday.map(parse_weekday).transpose()?,
        due_time,
        assignees,
        anchor_date: parse_date(8, &anchor_str)?,
        prestage: row.get(9)?,
        active: row.get(10)?,
        version: row.get(11)?,
        created_at: parse_datetime(12, &created_str)?,
        updated_at: parse_datetime(13, &updated_str)?,
    })
}

const INSTANCE_COLUMNS: &str = "id, definition_id, assignee_id, due_at, due_date, points, status, \
     submitted_at, submission_notes, effort_minutes, attempt_count, reviewed_at, reviewer_id, \
     awarded_points, created_at";

pub(crate) fn row_to_instance(row: &rusqlite::Row) -> Result<TaskInstance, rusqlite::Error> {
    let due_at_str: String = row.get(3)?;
    let due_date_str: String = row.get(4)?;
    let status_str: String = row.get(6)?;
    let submitted_str: Option<String> = row.get(7)?;
    let reviewed_str: Option<String> = row.get(11)?;
    let created_str: String = row.get(14)?;

    Ok(TaskInstance {
        id: row.get(0)?,
        definition_id: row.get(1)?,
        assignee_id: row.get(2)?,
        due_at: parse_datetime(3, &due_at_str)?,
        due_date: parse_date(4, &due_date_str)?,
        points: row.get(5)?,
        status: parse_status(&status_str)?,
        submitted_at: submitted_str.as_deref().map(|s| parse_datetime(7, s)).transpose()?,
        submission_notes: row.get(8)?,
        effort_minutes: row.get(9)?,
        attempt_count: row.get(10)?,
        reviewed_at: reviewed_str.as_deref().map(|s| parse_datetime(11, s)).transpose()?,
        reviewer_id: row.get(12)?,
        awarded_points: row.get(13)?,
        created_at: parse_datetime(14, &created_str)?,
    })
}

/// SQLite database for engine state.
///
/// Owns a single connection; engine operations wrap it in one IMMEDIATE
/// transaction each, so a failed operation rolls back every side effect.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Get a reference to the underlying SQLite connection.
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Open the database at `<data_dir>/choreboard.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("choreboard.db");
        let conn = Connection::open(&path).map_err(|source| DatabaseError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (tests and ephemeral runs).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::from)?;
        let db = Self { conn };
        db.migrate()?;
        Ok(db)
    }

    /// Begin an IMMEDIATE transaction; writers are serialized up front so
    /// conditional updates see settled state.
    pub fn transaction(&mut self) -> Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| DatabaseError::from(e).into())
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS accounts (
                    id           TEXT PRIMARY KEY,
                    display_name TEXT NOT NULL,
                    role         TEXT NOT NULL,
                    family_id    TEXT NOT NULL,
                    balance      INTEGER NOT NULL DEFAULT 0,
                    created_at   TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS task_definitions (
                    id          TEXT PRIMARY KEY,
                    guardian_id TEXT NOT NULL,
                    name        TEXT NOT NULL,
                    points      INTEGER NOT NULL,
                    cadence     TEXT NOT NULL,
                    weekday     INTEGER,
                    due_time    TEXT,
                    assignees   TEXT NOT NULL DEFAULT '[]',
                    anchor_date TEXT NOT NULL,
                    prestage    INTEGER NOT NULL DEFAULT 0,
                    active      INTEGER NOT NULL DEFAULT 1,
                    version     INTEGER NOT NULL DEFAULT 0,
                    created_at  TEXT NOT NULL,
                    updated_at  TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS task_instances (
                    id               TEXT PRIMARY KEY,
                    definition_id    TEXT NOT NULL,
                    assignee_id      TEXT NOT NULL,
                    due_at           TEXT NOT NULL,
                    due_date         TEXT NOT NULL,
                    points           INTEGER NOT NULL,
                    status           TEXT NOT NULL,
                    submitted_at     TEXT,
                    submission_notes TEXT,
                    effort_minutes   INTEGER,
                    attempt_count    INTEGER NOT NULL DEFAULT 0,
                    reviewed_at      TEXT,
                    reviewer_id      TEXT,
                    awarded_points   INTEGER,
                    created_at       TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS ledger_entries (
                    id             INTEGER PRIMARY KEY AUTOINCREMENT,
                    account_id     TEXT NOT NULL,
                    delta          INTEGER NOT NULL,
                    reason         TEXT NOT NULL,
                    correlation_id TEXT NOT NULL,
                    created_at     TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS streaks (
                    account_id           TEXT PRIMARY KEY,
                    current_streak       INTEGER NOT NULL DEFAULT 0,
                    longest_streak       INTEGER NOT NULL DEFAULT 0,
                    last_completion_date TEXT
                );

                CREATE UNIQUE INDEX IF NOT EXISTS idx_instances_definition_date
                    ON task_instances(definition_id, due_date);
                CREATE INDEX IF NOT EXISTS idx_instances_assignee_status
                    ON task_instances(assignee_id, status);
                CREATE INDEX IF NOT EXISTS idx_instances_status_due
                    ON task_instances(status, due_date);
                CREATE UNIQUE INDEX IF NOT EXISTS idx_ledger_correlation_reason
                    ON ledger_entries(correlation_id, reason);
                CREATE INDEX IF NOT EXISTS idx_ledger_account
                    ON ledger_entries(account_id);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }

    // ── Read convenience (CLI / API layer) ───────────────────────────

    pub fn account(&self, account_id: &str) -> Result<Option<Account>> {
        get_account(&self.conn, account_id)
    }

    pub fn definition(&self, definition_id: &str) -> Result<Option<TaskDefinition>> {
        get_definition(&self.conn, definition_id)
    }

    pub fn definitions(&self, only_active: bool) -> Result<Vec<TaskDefinition>> {
        list_definitions(&self.conn, only_active)
    }

    pub fn instance(&self, instance_id: &str) -> Result<Option<TaskInstance>> {
        get_instance(&self.conn, instance_id)
    }

    pub fn instances_by_assignee(
        &self,
        assignee_id: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<TaskInstance>> {
        list_instances_by_assignee(&self.conn, assignee_id, status)
    }

    pub fn instances_for_definition(&self, definition_id: &str) -> Result<Vec<TaskInstance>> {
        list_instances_for_definition(&self.conn, definition_id)
    }
}

// === Write / query functions ===
//
// Free functions over `&Connection` so they compose into an engine
// transaction as well as onto the bare connection.

pub fn insert_account(conn: &Connection, account: &Account) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO accounts (id, display_name, role, family_id, balance, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            account.id,
            account.display_name,
            account.role.as_str(),
            account.family_id,
            account.balance,
            account.created_at.to_rfc3339(),
        ],
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(ref err) if is_constraint_violation(err) => Err(EngineError::AlreadyExists {
            entity: "account",
            id: account.id.clone(),
        }
        .into()),
        Err(err) => Err(err.into()),
    }
}

pub fn get_account(conn: &Connection, account_id: &str) -> Result<Option<Account>> {
    conn.query_row(
        "SELECT id, display_name, role, family_id, balance, created_at
         FROM accounts WHERE id = ?1",
        params![account_id],
        row_to_account,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn insert_definition(conn: &Connection, definition: &TaskDefinition) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO task_definitions
             (id, guardian_id, name, points, cadence, weekday, due_time, assignees,
              anchor_date, prestage, active, version, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            definition.id,
            definition.guardian_id,
            definition.name,
            definition.points,
            definition.cadence.as_str(),
            definition.weekday.map(format_weekday),
            definition.due_time.map(|t| t.format("%H:%M:%S").to_string()),
            serde_json::to_string(&definition.assignees)?,
            definition.anchor_date.to_string(),
            definition.prestage,
            definition.active,
            definition.version,
            definition.created_at.to_rfc3339(),
            definition.updated_at.to_rfc3339(),
        ],
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(ref err) if is_constraint_violation(err) => Err(EngineError::AlreadyExists {
            entity: "definition",
            id: definition.id.clone(),
        }
        .into()),
        Err(err) => Err(err.into()),
    }
}

pub fn get_definition(conn: &Connection, definition_id: &str) -> Result<Option<TaskDefinition>> {
    conn.query_row(
        "SELECT id, guardian_id, name, points, cadence, weekday, due_time, assignees,
                anchor_date, prestage, active, version, created_at, updated_at
         FROM task_definitions WHERE id = ?1",
        params![definition_id],
        row_to_definition,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn list_definitions(conn: &Connection, only_active: bool) -> Result<Vec<TaskDefinition>> {
    let sql = if only_active {
        "SELECT id, guardian_id, name, points, cadence, weekday, due_time, assignees,
                anchor_date, prestage, active, version, created_at, updated_at
         FROM task_definitions WHERE active = 1 ORDER BY created_at"
    } else {
        "SELECT id, guardian_id, name, points, cadence, weekday, due_time, assignees,
                anchor_date, prestage, active, version, created_at, updated_at
         FROM task_definitions ORDER BY created_at"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], row_to_definition)?;
    let mut definitions = Vec::new();
    for row in rows {
        definitions.push(row.map_err(CoreError::from)?);
    }
    Ok(definitions)
}

/// Replace the eligible-assignee list, re-anchoring the rotation at
/// `anchor_date`. Conditional on `expected_version`; a mismatch means a
/// concurrent edit won.
pub fn update_definition_assignees(
    conn: &Connection,
    definition_id: &str,
    assignees: &[String],
    anchor_date: NaiveDate,
    expected_version: i64,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE task_definitions
         SET assignees = ?2, anchor_date = ?3, version = version + 1, updated_at = ?4
         WHERE id = ?1 AND version = ?5",
        params![
            definition_id,
            serde_json::to_string(assignees)?,
            anchor_date.to_string(),
            updated_at.to_rfc3339(),
            expected_version,
        ],
    )?;
    if updated == 0 {
        return Err(version_conflict(conn, definition_id));
    }
    Ok(())
}

/// Soft-deactivate a definition. Conditional on `expected_version`.
pub fn deactivate_definition(
    conn: &Connection,
    definition_id: &str,
    expected_version: i64,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    let updated = conn.execute(
        "UPDATE task_definitions
         SET active = 0, version = version + 1, updated_at = ?2
         WHERE id = ?1 AND version = ?3",
        params![definition_id, updated_at.to_rfc3339(), expected_version],
    )?;
    if updated == 0 {
        return Err(version_conflict(conn, definition_id));
    }
    Ok(())
}

fn version_conflict(conn: &Connection, definition_id: &str) -> CoreError {
    match get_definition(conn, definition_id) {
        Ok(Some(_)) => EngineError::ConcurrentModification {
            entity: "definition",
            id: definition_id.to_string(),
        }
        .into(),
        Ok(None) => EngineError::NotFound {
            entity: "definition",
            id: definition_id.to_string(),
        }
        .into(),
        Err(err) => err,
    }
}

/// Insert a freshly generated instance. A uniqueness violation on
/// `(definition_id, due_date)` means a concurrent generation call won the
/// race for this date.
pub fn insert_instance(conn: &Connection, instance: &TaskInstance) -> Result<()> {
    let inserted = conn.execute(
        "INSERT INTO task_instances
             (id, definition_id, assignee_id, due_at, due_date, points, status,
              submitted_at, submission_notes, effort_minutes, attempt_count,
              reviewed_at, reviewer_id, awarded_points, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            instance.id,
            instance.definition_id,
            instance.assignee_id,
            instance.due_at.to_rfc3339(),
            instance.due_date.to_string(),
            instance.points,
            instance.status.as_str(),
            instance.submitted_at.map(|t| t.to_rfc3339()),
            instance.submission_notes,
            instance.effort_minutes,
            instance.attempt_count,
            instance.reviewed_at.map(|t| t.to_rfc3339()),
            instance.reviewer_id,
            instance.awarded_points,
            instance.created_at.to_rfc3339(),
        ],
    );
    match inserted {
        Ok(_) => Ok(()),
        Err(ref err) if is_constraint_violation(err) => Err(EngineError::DuplicateGeneration {
            definition_id: instance.definition_id.clone(),
            date: instance.due_date.to_string(),
        }
        .into()),
        Err(err) => Err(err.into()),
    }
}

pub fn get_instance(conn: &Connection, instance_id: &str) -> Result<Option<TaskInstance>> {
    conn.query_row(
        &format!("SELECT {INSTANCE_COLUMNS} FROM task_instances WHERE id = ?1"),
        params![instance_id],
        row_to_instance,
    )
    .optional()
    .map_err(CoreError::from)
}

pub fn list_instances_by_assignee(
    conn: &Connection,
    assignee_id: &str,
    status: Option<TaskStatus>,
) -> Result<Vec<TaskInstance>> {
    let mut instances = Vec::new();
    match status {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSTANCE_COLUMNS} FROM task_instances
                 WHERE assignee_id = ?1 AND status = ?2 ORDER BY due_date"
            ))?;
            let rows = stmt.query_map(params![assignee_id, status.as_str()], row_to_instance)?;
            for row in rows {
                instances.push(row.map_err(CoreError::from)?);
            }
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {INSTANCE_COLUMNS} FROM task_instances
                 WHERE assignee_id = ?1 ORDER BY due_date"
            ))?;
            let rows = stmt.query_map(params![assignee_id], row_to_instance)?;
            for row in rows {
                instances.push(row.map_err(CoreError::from)?);
            }
        }
    }
    Ok(instances)
}

pub fn list_instances_for_definition(
    conn: &Connection,
    definition_id: &str,
) -> Result<Vec<TaskInstance>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM task_instances
         WHERE definition_id = ?1 ORDER BY due_date"
    ))?;
    let rows = stmt.query_map(params![definition_id], row_to_instance)?;
    let mut instances = Vec::new();
    for row in rows {
        instances.push(row.map_err(CoreError::from)?);
    }
    Ok(instances)
}

/// Dates for which the definition already has an instance (any status).
pub fn existing_dates_for_definition(
    conn: &Connection,
    definition_id: &str,
) -> Result<HashSet<NaiveDate>> {
    let mut stmt =
        conn.prepare("SELECT due_date FROM task_instances WHERE definition_id = ?1")?;
    let rows = stmt.query_map(params![definition_id], |row| {
        let date_str: String = row.get(0)?;
        parse_date(0, &date_str)
    })?;
    let mut dates = HashSet::new();
    for row in rows {
        dates.insert(row.map_err(CoreError::from)?);
    }
    Ok(dates)
}

/// Pre-staged instances whose due date has arrived.
pub fn due_scheduled_instances(
    conn: &Connection,
    on_or_before: NaiveDate,
) -> Result<Vec<TaskInstance>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {INSTANCE_COLUMNS} FROM task_instances
         WHERE status = 'scheduled' AND due_date <= ?1 ORDER BY due_date"
    ))?;
    let rows = stmt.query_map(params![on_or_before.to_string()], row_to_instance)?;
    let mut instances = Vec::new();
    for row in rows {
        instances.push(row.map_err(CoreError::from)?);
    }
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::Cadence;

    fn sample_definition() -> TaskDefinition {
        TaskDefinition::new(
            "guardian-1",
            "Feed Pet",
            10,
            Cadence::Daily,
            vec!["kid-1".into(), "kid-2".into()],
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn account_round_trip() {
        let db = Database::open_memory().unwrap();
        let account = Account::new("kid-1", "Alex", Role::Dependent, "fam-1", Utc::now());
        insert_account(db.conn(), &account).unwrap();

        let loaded = get_account(db.conn(), "kid-1").unwrap().unwrap();
        assert_eq!(loaded.display_name, "Alex");
        assert_eq!(loaded.role, Role::Dependent);
        assert_eq!(loaded.balance, 0);
    }

    #[test]
    fn duplicate_account_id_is_rejected() {
        let db = Database::open_memory().unwrap();
        let account = Account::new("kid-1", "Alex", Role::Dependent, "fam-1", Utc::now());
        insert_account(db.conn(), &account).unwrap();
        let err = insert_account(db.conn(), &account).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Engine(EngineError::AlreadyExists { entity: "account", .. })
        ));
    }

    #[test]
    fn definition_round_trip_preserves_assignee_order() {
        let db = Database::open_memory().unwrap();
        let mut def = sample_definition();
        def.due_time = NaiveTime::from_hms_opt(17, 0, 0);
        def.weekday = Some(Weekday::Wed);
        insert_definition(db.conn(), &def).unwrap();

        let loaded = get_definition(db.conn(), &def.id).unwrap().unwrap();
        assert_eq!(loaded.assignees, vec!["kid-1", "kid-2"]);
        assert_eq!(loaded.due_time, def.due_time);
        assert_eq!(loaded.weekday, Some(Weekday::Wed));
        assert_eq!(loaded.anchor_date, def.anchor_date);
        assert!(loaded.active);
    }

    #[test]
    fn instance_round_trip() {
        let db = Database::open_memory().unwrap();
        let def = sample_definition();
        insert_definition(db.conn(), &def).unwrap();
        let instance = TaskInstance::new(
            def.id.clone(),
            "kid-1",
            Utc::now(),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            10,
            TaskStatus::Assigned,
            Utc::now(),
        );
        insert_instance(db.conn(), &instance).unwrap();

        let loaded = get_instance(db.conn(), &instance.id).unwrap().unwrap();
        assert_eq!(loaded.status, TaskStatus::Assigned);
        assert_eq!(loaded.points, 10);
        assert_eq!(loaded.attempt_count, 0);
        assert!(loaded.submitted_at.is_none());
    }

    #[test]
    fn duplicate_definition_date_fails_loudly() {
        let db = Database::open_memory().unwrap();
        let def = sample_definition();
        insert_definition(db.conn(), &def).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let a = TaskInstance::new(def.id.clone(), "kid-1", Utc::now(), date, 10, TaskStatus::Assigned, Utc::now());
        let b = TaskInstance::new(def.id.clone(), "kid-2", Utc::now(), date, 10, TaskStatus::Assigned, Utc::now());
        insert_instance(db.conn(), &a).unwrap();
        let err = insert_instance(db.conn(), &b).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Engine(EngineError::DuplicateGeneration { .. })
        ));
    }

    #[test]
    fn assignee_status_listing_filters() {
        let db = Database::open_memory().unwrap();
        let def = sample_definition();
        insert_definition(db.conn(), &def).unwrap();
        for (day, status) in [(4, TaskStatus::Assigned), (5, TaskStatus::Approved)] {
            let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
            let inst = TaskInstance::new(def.id.clone(), "kid-1", Utc::now(), date, 10, status, Utc::now());
            insert_instance(db.conn(), &inst).unwrap();
        }

        let all = list_instances_by_assignee(db.conn(), "kid-1", None).unwrap();
        assert_eq!(all.len(), 2);
        let assigned =
            list_instances_by_assignee(db.conn(), "kid-1", Some(TaskStatus::Assigned)).unwrap();
        assert_eq!(assigned.len(), 1);
        assert_eq!(assigned[0].due_date, NaiveDate::from_ymd_opt(2024, 3, 4).unwrap());
    }

    #[test]
    fn version_guard_detects_concurrent_edit() {
        let db = Database::open_memory().unwrap();
        let def = sample_definition();
        insert_definition(db.conn(), &def).unwrap();

        deactivate_definition(db.conn(), &def.id, 0, Utc::now()).unwrap();
        // A second writer still holding version 0 loses.
        let err = deactivate_definition(db.conn(), &def.id, 0, Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Engine(EngineError::ConcurrentModification { .. })
        ));
    }

    #[test]
    fn corrupt_status_is_an_error_not_a_fallback() {
        let db = Database::open_memory().unwrap();
        let def = sample_definition();
        insert_definition(db.conn(), &def).unwrap();
        let instance = TaskInstance::new(
            def.id.clone(),
            "kid-1",
            Utc::now(),
            NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
            10,
            TaskStatus::Assigned,
            Utc::now(),
        );
        insert_instance(db.conn(), &instance).unwrap();
        db.conn()
            .execute(
                "UPDATE task_instances SET status = 'mystery' WHERE id = ?1",
                params![instance.id],
            )
            .unwrap();

        assert!(get_instance(db.conn(), &instance.id).is_err());
    }
}
