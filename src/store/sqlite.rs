use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use playbook_common::{
    AuditEvent, AuditEventType, NewAuditEvent, PlaybookDefinition, Run, RunStatus, RunVariant,
    StepRun, StepRunStatus,
};

use super::{Commit, RunStore};

const RUN_COLUMNS: &str = "id, org_id, playbook_id, variant, status, definition, state, \
     steps_completed, steps_failed, steps_skipped, risk_score, confidence_score, narrative, \
     risk_graph, error, created_by, scheduled_at, created_at, updated_at, completed_at, version";

const STEP_RUN_COLUMNS: &str = "s.id, s.run_id, s.step_id, s.position, s.status, s.ready_at, \
     s.approved_at, s.executed_at, s.approver, s.approval_notes, s.outcome, s.error, \
     s.retry_count, s.condition_evaluated, s.condition_result, s.condition_details, s.updated_at";

const AUDIT_COLUMNS: &str = "a.seq, a.run_id, a.step_run_id, a.event_type, a.payload, a.actor, a.created_at";

/// SQLite-backed `RunStore`.
///
/// One connection behind a mutex; every method holds the lock for its full
/// duration, and multi-row writes run inside a transaction.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a SQLite database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open SQLite database: {}", path.display()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// Create an in-memory SQLite database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn =
            Connection::open_in_memory().context("Failed to open in-memory SQLite database")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Store lock poisoned: {}", e))
    }

    fn init(&self) -> Result<()> {
        let conn = self.lock()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .context("Failed to enable foreign keys")?;
        Self::run_migrations(&conn).context("Failed to run migrations")?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS playbooks (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                name TEXT NOT NULL,
                definition TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                org_id TEXT NOT NULL,
                playbook_id TEXT NOT NULL REFERENCES playbooks(id),
                variant TEXT NOT NULL,
                status TEXT NOT NULL,
                definition TEXT NOT NULL,
                state TEXT NOT NULL,
                steps_completed INTEGER NOT NULL DEFAULT 0,
                steps_failed INTEGER NOT NULL DEFAULT 0,
                steps_skipped INTEGER NOT NULL DEFAULT 0,
                risk_score REAL,
                confidence_score REAL,
                narrative TEXT,
                risk_graph TEXT,
                error TEXT,
                created_by TEXT NOT NULL,
                scheduled_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                version INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS step_runs (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL REFERENCES runs(id),
                step_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                status TEXT NOT NULL,
                ready_at TEXT,
                approved_at TEXT,
                executed_at TEXT,
                approver TEXT,
                approval_notes TEXT,
                outcome TEXT,
                error TEXT,
                retry_count INTEGER NOT NULL DEFAULT 0,
                condition_evaluated INTEGER NOT NULL DEFAULT 0,
                condition_result INTEGER,
                condition_details TEXT,
                updated_at TEXT NOT NULL,
                UNIQUE(run_id, step_id)
            );

            CREATE TABLE IF NOT EXISTS audit_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id TEXT NOT NULL REFERENCES runs(id),
                step_run_id TEXT REFERENCES step_runs(id),
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                actor TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_playbooks_org ON playbooks(org_id);
            CREATE INDEX IF NOT EXISTS idx_runs_org_status ON runs(org_id, status);
            CREATE INDEX IF NOT EXISTS idx_step_runs_run ON step_runs(run_id, position);
            CREATE INDEX IF NOT EXISTS idx_audit_events_run ON audit_events(run_id, seq);

            CREATE TRIGGER IF NOT EXISTS audit_events_no_update
            BEFORE UPDATE ON audit_events
            BEGIN
                SELECT RAISE(ABORT, 'audit events are append-only');
            END;

            CREATE TRIGGER IF NOT EXISTS audit_events_no_delete
            BEFORE DELETE ON audit_events
            BEGIN
                SELECT RAISE(ABORT, 'audit events are append-only');
            END;
            ",
        )
        .context("Failed to create tables")?;

        // Advancer lease, added after the first schema.
        for column in ["claimed_by TEXT", "lease_expires_at TEXT"] {
            match conn.execute(&format!("ALTER TABLE runs ADD COLUMN {}", column), []) {
                Ok(_) => {}
                Err(e) if e.to_string().contains("duplicate column") => {}
                Err(e) => return Err(anyhow::anyhow!("Failed to add runs.{}: {}", column, e)),
            }
        }
        Ok(())
    }

    fn insert_step_run(conn: &Connection, step: &StepRun) -> Result<()> {
        conn.execute(
            "INSERT INTO step_runs (id, run_id, step_id, position, status, ready_at, approved_at,
                 executed_at, approver, approval_notes, outcome, error, retry_count,
                 condition_evaluated, condition_result, condition_details, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            params![
                step.id.to_string(),
                step.run_id.to_string(),
                step.step_id,
                step.position,
                step.status.as_str(),
                step.ready_at.map(ts),
                step.approved_at.map(ts),
                step.executed_at.map(ts),
                step.approver,
                step.approval_notes,
                to_json_opt(step.outcome.as_ref())?,
                step.error,
                step.retry_count,
                step.condition_evaluated,
                step.condition_result,
                to_json_opt(step.condition_details.as_ref())?,
                ts(step.updated_at),
            ],
        )
        .with_context(|| format!("Failed to insert step run {}", step.step_id))?;
        Ok(())
    }

    /// Rewrite a step run if its stored status is still `expected`.
    fn update_step_run(conn: &Connection, step: &StepRun, expected: StepRunStatus) -> Result<bool> {
        if expected.is_terminal() {
            bail!("Step run {} is already {}", step.id, expected);
        }
        let changed = conn
            .execute(
                "UPDATE step_runs SET status = ?1, ready_at = ?2, approved_at = ?3, executed_at = ?4,
                     approver = ?5, approval_notes = ?6, outcome = ?7, error = ?8, retry_count = ?9,
                     condition_evaluated = ?10, condition_result = ?11, condition_details = ?12,
                     updated_at = ?13
                 WHERE id = ?14 AND run_id = ?15 AND status = ?16",
                params![
                    step.status.as_str(),
                    step.ready_at.map(ts),
                    step.approved_at.map(ts),
                    step.executed_at.map(ts),
                    step.approver,
                    step.approval_notes,
                    to_json_opt(step.outcome.as_ref())?,
                    step.error,
                    step.retry_count,
                    step.condition_evaluated,
                    step.condition_result,
                    to_json_opt(step.condition_details.as_ref())?,
                    ts(step.updated_at),
                    step.id.to_string(),
                    step.run_id.to_string(),
                    expected.as_str(),
                ],
            )
            .with_context(|| format!("Failed to update step run {}", step.step_id))?;
        Ok(changed == 1)
    }

    fn insert_audit_event(conn: &Connection, event: &NewAuditEvent) -> Result<()> {
        conn.execute(
            "INSERT INTO audit_events (run_id, step_run_id, event_type, payload, actor, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                event.run_id.to_string(),
                event.step_run_id.map(|id| id.to_string()),
                event.event_type.as_str(),
                serde_json::to_string(&event.payload).context("Failed to serialize payload")?,
                event.actor,
                ts(Utc::now()),
            ],
        )
        .with_context(|| format!("Failed to append {} audit event", event.event_type))?;
        Ok(())
    }

    fn query_runs(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Run>> {
        let mut stmt = conn.prepare(sql).context("Failed to prepare run query")?;
        let rows = stmt
            .query_map(params, RunRow::from_row)
            .context("Failed to query runs")?;
        let mut runs = Vec::new();
        for row in rows {
            runs.push(row.context("Failed to read run row")?.into_run()?);
        }
        Ok(runs)
    }
}

impl RunStore for SqliteStore {
    fn save_playbook(&self, playbook: &PlaybookDefinition) -> Result<()> {
        let conn = self.lock()?;
        let definition =
            serde_json::to_string(playbook).context("Failed to serialize playbook")?;
        conn.execute(
            "INSERT INTO playbooks (id, org_id, name, definition, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name, definition = excluded.definition
             WHERE playbooks.org_id = excluded.org_id",
            params![
                playbook.id.to_string(),
                playbook.org_id,
                playbook.name,
                definition,
                ts(playbook.created_at),
            ],
        )
        .context("Failed to save playbook")?;
        Ok(())
    }

    fn get_playbook(&self, org_id: &str, id: Uuid) -> Result<Option<PlaybookDefinition>> {
        let conn = self.lock()?;
        let definition: Option<String> = conn
            .query_row(
                "SELECT definition FROM playbooks WHERE id = ?1 AND org_id = ?2",
                params![id.to_string(), org_id],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to query playbook")?;
        definition
            .map(|d| serde_json::from_str(&d).context("Failed to parse stored playbook"))
            .transpose()
    }

    fn list_playbooks(&self, org_id: &str) -> Result<Vec<PlaybookDefinition>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT definition FROM playbooks WHERE org_id = ?1 ORDER BY created_at, name")
            .context("Failed to prepare list_playbooks")?;
        let rows = stmt
            .query_map(params![org_id], |row| row.get::<_, String>(0))
            .context("Failed to query playbooks")?;
        let mut playbooks = Vec::new();
        for row in rows {
            let definition = row.context("Failed to read playbook row")?;
            playbooks.push(serde_json::from_str(&definition).context("Failed to parse stored playbook")?);
        }
        Ok(playbooks)
    }

    fn create_run(&self, run: &Run, step_runs: &[StepRun], started: &NewAuditEvent) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().context("Failed to begin transaction")?;
        tx.execute(
            &format!(
                "INSERT INTO runs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21)",
                RUN_COLUMNS
            ),
            params![
                run.id.to_string(),
                run.org_id,
                run.playbook_id.to_string(),
                run.variant.as_str(),
                run.status.as_str(),
                serde_json::to_string(&run.definition).context("Failed to serialize definition")?,
                serde_json::to_string(&run.state).context("Failed to serialize run state")?,
                run.steps_completed,
                run.steps_failed,
                run.steps_skipped,
                run.risk_score,
                run.confidence_score,
                run.narrative,
                to_json_opt(run.risk_graph.as_ref())?,
                run.error,
                run.created_by,
                run.scheduled_at.map(ts),
                ts(run.created_at),
                ts(run.updated_at),
                run.completed_at.map(ts),
                run.version,
            ],
        )
        .context("Failed to insert run")?;
        for step in step_runs {
            Self::insert_step_run(&tx, step)?;
        }
        Self::insert_audit_event(&tx, started)?;
        tx.commit().context("Failed to commit run creation")?;
        Ok(())
    }

    fn get_run(&self, org_id: &str, id: Uuid) -> Result<Option<Run>> {
        let conn = self.lock()?;
        let runs = Self::query_runs(
            &conn,
            &format!("SELECT {} FROM runs WHERE id = ?1 AND org_id = ?2", RUN_COLUMNS),
            params![id.to_string(), org_id],
        )?;
        Ok(runs.into_iter().next())
    }

    fn list_runs(&self, org_id: &str, status: Option<RunStatus>) -> Result<Vec<Run>> {
        let conn = self.lock()?;
        match status {
            Some(status) => Self::query_runs(
                &conn,
                &format!(
                    "SELECT {} FROM runs WHERE org_id = ?1 AND status = ?2 ORDER BY created_at DESC",
                    RUN_COLUMNS
                ),
                params![org_id, status.as_str()],
            ),
            None => Self::query_runs(
                &conn,
                &format!(
                    "SELECT {} FROM runs WHERE org_id = ?1 ORDER BY created_at DESC",
                    RUN_COLUMNS
                ),
                params![org_id],
            ),
        }
    }

    fn list_due_runs(&self, org_id: &str, now: DateTime<Utc>) -> Result<Vec<Run>> {
        let conn = self.lock()?;
        Self::query_runs(
            &conn,
            &format!(
                "SELECT {} FROM runs
                 WHERE org_id = ?1 AND status IN ('initializing', 'running')
                   AND (scheduled_at IS NULL OR scheduled_at <= ?2)
                 ORDER BY created_at",
                RUN_COLUMNS
            ),
            params![org_id, ts(now)],
        )
    }

    fn commit(&self, commit: &Commit<'_>) -> Result<bool> {
        let run = commit.run;
        let mut conn = self.lock()?;
        // Dropping the transaction without committing rolls everything back.
        let tx = conn.transaction().context("Failed to begin transaction")?;

        let changed = tx
            .execute(
                "UPDATE runs SET status = ?1, state = ?2, steps_completed = ?3, steps_failed = ?4,
                     steps_skipped = ?5, risk_score = ?6, confidence_score = ?7, narrative = ?8,
                     risk_graph = ?9, error = ?10, scheduled_at = ?11, updated_at = ?12,
                     completed_at = ?13, version = version + 1
                 WHERE id = ?14 AND org_id = ?15 AND version = ?16 AND status = ?17",
                params![
                    run.status.as_str(),
                    serde_json::to_string(&run.state).context("Failed to serialize run state")?,
                    run.steps_completed,
                    run.steps_failed,
                    run.steps_skipped,
                    run.risk_score,
                    run.confidence_score,
                    run.narrative,
                    to_json_opt(run.risk_graph.as_ref())?,
                    run.error,
                    run.scheduled_at.map(ts),
                    ts(run.updated_at),
                    run.completed_at.map(ts),
                    run.id.to_string(),
                    run.org_id,
                    run.version,
                    commit.expected_status.as_str(),
                ],
            )
            .context("Failed to update run")?;
        if changed != 1 {
            return Ok(false);
        }

        for write in commit.steps {
            if write.step_run.run_id != run.id {
                bail!(
                    "Step run {} does not belong to run {}",
                    write.step_run.id,
                    run.id
                );
            }
            if !Self::update_step_run(&tx, write.step_run, write.expected_status)? {
                return Ok(false);
            }
        }
        for event in commit.events {
            Self::insert_audit_event(&tx, event)?;
        }

        tx.commit().context("Failed to commit run update")?;
        Ok(true)
    }

    fn claim_run(
        &self,
        org_id: &str,
        run_id: Uuid,
        holder: Uuid,
        now: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> Result<bool> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                "UPDATE runs SET claimed_by = ?1, lease_expires_at = ?2
                 WHERE id = ?3 AND org_id = ?4
                   AND (claimed_by IS NULL OR claimed_by = ?1 OR lease_expires_at <= ?5)",
                params![
                    holder.to_string(),
                    ts(until),
                    run_id.to_string(),
                    org_id,
                    ts(now)
                ],
            )
            .context("Failed to claim run")?;
        Ok(changed == 1)
    }

    fn release_run(&self, org_id: &str, run_id: Uuid, holder: Uuid) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE runs SET claimed_by = NULL, lease_expires_at = NULL
             WHERE id = ?1 AND org_id = ?2 AND claimed_by = ?3",
            params![run_id.to_string(), org_id, holder.to_string()],
        )
        .context("Failed to release run")?;
        Ok(())
    }

    fn get_step_run(&self, org_id: &str, id: Uuid) -> Result<Option<StepRun>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!(
                    "SELECT {} FROM step_runs s JOIN runs r ON r.id = s.run_id
                     WHERE s.id = ?1 AND r.org_id = ?2",
                    STEP_RUN_COLUMNS
                ),
                params![id.to_string(), org_id],
                StepRunRow::from_row,
            )
            .optional()
            .context("Failed to query step run")?;
        row.map(StepRunRow::into_step_run).transpose()
    }

    fn list_step_runs(&self, org_id: &str, run_id: Uuid) -> Result<Vec<StepRun>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM step_runs s JOIN runs r ON r.id = s.run_id
                 WHERE s.run_id = ?1 AND r.org_id = ?2 ORDER BY s.position, s.step_id",
                STEP_RUN_COLUMNS
            ))
            .context("Failed to prepare list_step_runs")?;
        let rows = stmt
            .query_map(params![run_id.to_string(), org_id], StepRunRow::from_row)
            .context("Failed to query step runs")?;
        let mut steps = Vec::new();
        for row in rows {
            steps.push(row.context("Failed to read step run row")?.into_step_run()?);
        }
        Ok(steps)
    }

    fn list_audit_events(&self, org_id: &str, run_id: Uuid) -> Result<Vec<AuditEvent>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM audit_events a JOIN runs r ON r.id = a.run_id
                 WHERE a.run_id = ?1 AND r.org_id = ?2 ORDER BY a.seq",
                AUDIT_COLUMNS
            ))
            .context("Failed to prepare list_audit_events")?;
        let rows = stmt
            .query_map(params![run_id.to_string(), org_id], AuditRow::from_row)
            .context("Failed to query audit events")?;
        let mut events = Vec::new();
        for row in rows {
            events.push(row.context("Failed to read audit row")?.into_event()?);
        }
        Ok(events)
    }
}

// ── Row mapping ───────────────────────────────────────────────────────

/// Timestamps are stored as fixed-width RFC 3339 so text order equals time order.
fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in store: {}", s))
}

fn parse_ts_opt(s: Option<String>) -> Result<Option<DateTime<Utc>>> {
    s.as_deref().map(parse_ts).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).with_context(|| format!("Invalid id in store: {}", s))
}

fn to_json_opt<T: serde::Serialize>(value: Option<&T>) -> Result<Option<String>> {
    value
        .map(|v| serde_json::to_string(v).context("Failed to serialize JSON column"))
        .transpose()
}

fn from_json_opt<T: serde::de::DeserializeOwned>(s: Option<String>) -> Result<Option<T>> {
    s.as_deref()
        .map(|v| serde_json::from_str(v).context("Failed to parse JSON column"))
        .transpose()
}

struct RunRow {
    id: String,
    org_id: String,
    playbook_id: String,
    variant: String,
    status: String,
    definition: String,
    state: String,
    steps_completed: u32,
    steps_failed: u32,
    steps_skipped: u32,
    risk_score: Option<f64>,
    confidence_score: Option<f64>,
    narrative: Option<String>,
    risk_graph: Option<String>,
    error: Option<String>,
    created_by: String,
    scheduled_at: Option<String>,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
    version: i64,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            org_id: row.get(1)?,
            playbook_id: row.get(2)?,
            variant: row.get(3)?,
            status: row.get(4)?,
            definition: row.get(5)?,
            state: row.get(6)?,
            steps_completed: row.get(7)?,
            steps_failed: row.get(8)?,
            steps_skipped: row.get(9)?,
            risk_score: row.get(10)?,
            confidence_score: row.get(11)?,
            narrative: row.get(12)?,
            risk_graph: row.get(13)?,
            error: row.get(14)?,
            created_by: row.get(15)?,
            scheduled_at: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
            completed_at: row.get(19)?,
            version: row.get(20)?,
        })
    }

    fn into_run(self) -> Result<Run> {
        Ok(Run {
            id: parse_uuid(&self.id)?,
            org_id: self.org_id,
            playbook_id: parse_uuid(&self.playbook_id)?,
            variant: RunVariant::from_str(&self.variant).map_err(anyhow::Error::msg)?,
            status: RunStatus::from_str(&self.status).map_err(anyhow::Error::msg)?,
            definition: serde_json::from_str(&self.definition)
                .context("Failed to parse run definition snapshot")?,
            state: serde_json::from_str(&self.state).context("Failed to parse run state")?,
            steps_completed: self.steps_completed,
            steps_failed: self.steps_failed,
            steps_skipped: self.steps_skipped,
            risk_score: self.risk_score,
            confidence_score: self.confidence_score,
            narrative: self.narrative,
            risk_graph: from_json_opt(self.risk_graph)?,
            error: self.error,
            created_by: self.created_by,
            scheduled_at: parse_ts_opt(self.scheduled_at)?,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
            completed_at: parse_ts_opt(self.completed_at)?,
            version: self.version,
        })
    }
}

struct StepRunRow {
    id: String,
    run_id: String,
    step_id: String,
    position: u32,
    status: String,
    ready_at: Option<String>,
    approved_at: Option<String>,
    executed_at: Option<String>,
    approver: Option<String>,
    approval_notes: Option<String>,
    outcome: Option<String>,
    error: Option<String>,
    retry_count: u32,
    condition_evaluated: bool,
    condition_result: Option<bool>,
    condition_details: Option<String>,
    updated_at: String,
}

impl StepRunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            step_id: row.get(2)?,
            position: row.get(3)?,
            status: row.get(4)?,
            ready_at: row.get(5)?,
            approved_at: row.get(6)?,
            executed_at: row.get(7)?,
            approver: row.get(8)?,
            approval_notes: row.get(9)?,
            outcome: row.get(10)?,
            error: row.get(11)?,
            retry_count: row.get(12)?,
            condition_evaluated: row.get(13)?,
            condition_result: row.get(14)?,
            condition_details: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn into_step_run(self) -> Result<StepRun> {
        Ok(StepRun {
            id: parse_uuid(&self.id)?,
            run_id: parse_uuid(&self.run_id)?,
            step_id: self.step_id,
            position: self.position,
            status: StepRunStatus::from_str(&self.status).map_err(anyhow::Error::msg)?,
            ready_at: parse_ts_opt(self.ready_at)?,
            approved_at: parse_ts_opt(self.approved_at)?,
            executed_at: parse_ts_opt(self.executed_at)?,
            approver: self.approver,
            approval_notes: self.approval_notes,
            outcome: from_json_opt(self.outcome)?,
            error: self.error,
            retry_count: self.retry_count,
            condition_evaluated: self.condition_evaluated,
            condition_result: self.condition_result,
            condition_details: from_json_opt(self.condition_details)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

struct AuditRow {
    seq: i64,
    run_id: String,
    step_run_id: Option<String>,
    event_type: String,
    payload: String,
    actor: String,
    created_at: String,
}

impl AuditRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq: row.get(0)?,
            run_id: row.get(1)?,
            step_run_id: row.get(2)?,
            event_type: row.get(3)?,
            payload: row.get(4)?,
            actor: row.get(5)?,
            created_at: row.get(6)?,
        })
    }

    fn into_event(self) -> Result<AuditEvent> {
        Ok(AuditEvent {
            seq: self.seq,
            run_id: parse_uuid(&self.run_id)?,
            step_run_id: self.step_run_id.as_deref().map(parse_uuid).transpose()?,
            event_type: AuditEventType::from_str(&self.event_type).map_err(anyhow::Error::msg)?,
            payload: serde_json::from_str(&self.payload).context("Failed to parse audit payload")?,
            actor: self.actor,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StepWrite;
    use chrono::Duration;
    use playbook_common::{ActionDescriptor, ActionOutcome, RunState, StepDefinition};
    use serde_json::json;

    fn playbook(org: &str) -> PlaybookDefinition {
        let action = ActionDescriptor::new("simulate", json!({}));
        PlaybookDefinition::new(
            org,
            "containment",
            vec![
                StepDefinition::new("isolate", 2, action.clone()).with_depends_on(&["triage"]),
                StepDefinition::new("triage", 1, action),
            ],
        )
    }

    fn start(store: &SqliteStore, pb: &PlaybookDefinition) -> Result<(Run, Vec<StepRun>)> {
        store.save_playbook(pb)?;
        let run = Run::new(pb, RunVariant::Playbook, RunState::new().with_metric("exposure", 3.0), "alice");
        let steps: Vec<StepRun> = pb
            .ordered_steps()
            .into_iter()
            .map(|s| StepRun::pending(run.id, s))
            .collect();
        let started = NewAuditEvent::run(run.id, AuditEventType::RunStarted, json!({ "steps": 2 }));
        store.create_run(&run, &steps, &started)?;
        Ok((run, steps))
    }

    fn save_run(store: &SqliteStore, run: &Run, expected: RunStatus) -> Result<bool> {
        store.commit(&Commit {
            run,
            expected_status: expected,
            steps: &[],
            events: &[],
        })
    }

    #[test]
    fn test_create_database_and_run_migrations() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let conn = store.lock()?;

        let table_count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN ('playbooks', 'runs', 'step_runs', 'audit_events')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(table_count, 4, "Expected 4 tables to exist");

        let trigger_count: i32 = conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='trigger'",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(trigger_count, 2);

        let lease_columns: i32 = conn.query_row(
            "SELECT COUNT(*) FROM pragma_table_info('runs') WHERE name IN ('claimed_by', 'lease_expires_at')",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(lease_columns, 2);
        Ok(())
    }

    #[test]
    fn test_open_file_database_twice() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("playbook.db");
        let pb = playbook("acme");
        {
            let store = SqliteStore::open(&path)?;
            store.save_playbook(&pb)?;
        }
        let store = SqliteStore::open(&path)?;
        assert!(store.get_playbook("acme", pb.id)?.is_some());
        Ok(())
    }

    #[test]
    fn test_playbook_is_org_scoped() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let pb = playbook("acme");
        store.save_playbook(&pb)?;

        assert_eq!(store.get_playbook("acme", pb.id)?, Some(pb.clone()));
        assert!(store.get_playbook("globex", pb.id)?.is_none());
        assert_eq!(store.list_playbooks("acme")?.len(), 1);
        assert!(store.list_playbooks("globex")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_create_run_and_read_back() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let pb = playbook("acme");
        let (run, _) = start(&store, &pb)?;

        let fetched = store.get_run("acme", run.id)?.expect("run should exist");
        assert_eq!(fetched.status, RunStatus::Initializing);
        assert_eq!(fetched.definition, pb);
        assert_eq!(fetched.state.metric("exposure"), Some(3.0));
        assert!(store.get_run("globex", run.id)?.is_none());

        let steps = store.list_step_runs("acme", run.id)?;
        let ids: Vec<&str> = steps.iter().map(|s| s.step_id.as_str()).collect();
        assert_eq!(ids, vec!["triage", "isolate"]);
        assert!(store.list_step_runs("globex", run.id)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_create_run_is_atomic() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let pb = playbook("acme");
        store.save_playbook(&pb)?;
        let run = Run::new(&pb, RunVariant::Playbook, RunState::new(), "alice");
        let step = StepRun::pending(run.id, &pb.steps[0]);
        // Duplicate (run_id, step_id) violates the unique constraint mid-transaction.
        let started = NewAuditEvent::run(run.id, AuditEventType::RunStarted, json!({}));
        let result = store.create_run(
            &run,
            &[step.clone(), StepRun { id: Uuid::new_v4(), ..step }],
            &started,
        );
        assert!(result.is_err());
        assert!(store.get_run("acme", run.id)?.is_none());
        let events: i32 = store
            .lock()?
            .query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))?;
        assert_eq!(events, 0);
        Ok(())
    }

    #[test]
    fn test_commit_detects_stale_version() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let (mut run, _) = start(&store, &playbook("acme"))?;

        let stale = run.clone();
        run.set_status(RunStatus::Running)?;
        assert!(save_run(&store, &run, RunStatus::Initializing)?);

        // Same version again: the stored row moved on.
        assert!(!save_run(&store, &stale, RunStatus::Initializing)?);

        run.version += 1;
        run.steps_completed = 1;
        // Wrong expected status.
        assert!(!save_run(&store, &run, RunStatus::AwaitingApproval)?);
        assert!(save_run(&store, &run, RunStatus::Running)?);

        let fetched = store.get_run("acme", run.id)?.unwrap();
        assert_eq!(fetched.version, 2);
        assert_eq!(fetched.steps_completed, 1);
        assert_eq!(fetched.status, RunStatus::Running);
        Ok(())
    }

    #[test]
    fn test_commit_writes_run_steps_and_events_together() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let (mut run, mut steps) = start(&store, &playbook("acme"))?;

        run.set_status(RunStatus::Running)?;
        run.steps_skipped = 1;
        steps[0].set_status(StepRunStatus::Skipped)?;
        let events = [NewAuditEvent::step(
            run.id,
            steps[0].id,
            AuditEventType::StepSkipped,
            json!({ "step_id": "triage" }),
        )];
        assert!(store.commit(&Commit {
            run: &run,
            expected_status: RunStatus::Initializing,
            steps: &[StepWrite::new(&steps[0], StepRunStatus::Pending)],
            events: &events,
        })?);

        let fetched = store.get_run("acme", run.id)?.unwrap();
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.steps_skipped, 1);
        assert_eq!(store.list_step_runs("acme", run.id)?[0].status, StepRunStatus::Skipped);
        let types: Vec<AuditEventType> = store
            .list_audit_events("acme", run.id)?
            .into_iter()
            .map(|e| e.event_type)
            .collect();
        assert_eq!(types, vec![AuditEventType::RunStarted, AuditEventType::StepSkipped]);
        Ok(())
    }

    #[test]
    fn test_commit_rolls_back_when_a_step_guard_fails() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let (mut run, mut steps) = start(&store, &playbook("acme"))?;

        run.set_status(RunStatus::Cancelled)?;
        for step in steps.iter_mut() {
            step.set_status(StepRunStatus::Cancelled)?;
        }
        let events = [NewAuditEvent::run(run.id, AuditEventType::RunCancelled, json!({}))];
        // The second step is read as ready but is stored as pending.
        let writes = [
            StepWrite::new(&steps[0], StepRunStatus::Pending),
            StepWrite::new(&steps[1], StepRunStatus::Ready),
        ];
        assert!(!store.commit(&Commit {
            run: &run,
            expected_status: RunStatus::Initializing,
            steps: &writes,
            events: &events,
        })?);

        let fetched = store.get_run("acme", run.id)?.unwrap();
        assert_eq!(fetched.status, RunStatus::Initializing);
        assert_eq!(fetched.version, 0);
        assert!(
            store
                .list_step_runs("acme", run.id)?
                .iter()
                .all(|s| s.status == StepRunStatus::Pending)
        );
        assert_eq!(store.list_audit_events("acme", run.id)?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_terminal_step_run_is_immutable() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let (mut run, mut steps) = start(&store, &playbook("acme"))?;
        let step = &mut steps[0];

        step.set_status(StepRunStatus::Executing)?;
        let writes = [StepWrite::new(step, StepRunStatus::Pending)];
        assert!(store.commit(&Commit {
            run: &run,
            expected_status: RunStatus::Initializing,
            steps: &writes,
            events: &[],
        })?);
        run.version += 1;

        step.set_status(StepRunStatus::Executed)?;
        step.outcome = Some(ActionOutcome::succeeded().with_summary("triaged"));
        let writes = [StepWrite::new(step, StepRunStatus::Executing)];
        assert!(store.commit(&Commit {
            run: &run,
            expected_status: RunStatus::Initializing,
            steps: &writes,
            events: &[],
        })?);
        run.version += 1;

        let fetched = store.get_step_run("acme", step.id)?.unwrap();
        assert_eq!(fetched.status, StepRunStatus::Executed);
        assert_eq!(fetched.outcome.unwrap().summary.as_deref(), Some("triaged"));
        assert!(store.get_step_run("globex", step.id)?.is_none());

        step.error = Some("rewrite".to_string());
        let writes = [StepWrite::new(step, StepRunStatus::Executed)];
        let rewrite = Commit {
            run: &run,
            expected_status: RunStatus::Initializing,
            steps: &writes,
            events: &[],
        };
        assert!(store.commit(&rewrite).is_err());
        assert_eq!(store.list_step_runs("acme", run.id)?[0].error, None);
        assert_eq!(store.get_run("acme", run.id)?.unwrap().version, 2);
        Ok(())
    }

    #[test]
    fn test_claim_run_is_exclusive_until_lease_expires() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let (run, _) = start(&store, &playbook("acme"))?;
        let (first, second) = (Uuid::new_v4(), Uuid::new_v4());
        let now = Utc::now();
        let until = now + Duration::minutes(5);

        assert!(store.claim_run("acme", run.id, first, now, until)?);
        assert!(!store.claim_run("acme", run.id, second, now, until)?);
        assert!(!store.claim_run("globex", run.id, first, now, until)?);
        // The holder may renew.
        assert!(store.claim_run("acme", run.id, first, now, until)?);

        // An expired lease can be taken over, after which the old holder's
        // release is a no-op.
        let later = until + Duration::seconds(1);
        assert!(store.claim_run("acme", run.id, second, later, later + Duration::minutes(5))?);
        store.release_run("acme", run.id, first)?;
        assert!(!store.claim_run("acme", run.id, first, later, later + Duration::minutes(5))?);

        store.release_run("acme", run.id, second)?;
        assert!(store.claim_run("acme", run.id, first, later, later + Duration::minutes(5))?);

        // Leases never move the optimistic version.
        assert_eq!(store.get_run("acme", run.id)?.unwrap().version, 0);
        Ok(())
    }

    #[test]
    fn test_audit_events_are_append_only() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let (run, steps) = start(&store, &playbook("acme"))?;

        let approved = [
            NewAuditEvent::step(run.id, steps[0].id, AuditEventType::StepApproved, json!({}))
                .by("bob"),
        ];
        assert!(store.commit(&Commit {
            run: &run,
            expected_status: RunStatus::Initializing,
            steps: &[],
            events: &approved,
        })?);

        let events = store.list_audit_events("acme", run.id)?;
        assert_eq!(events.len(), 2);
        assert!(events[1].seq > events[0].seq);
        assert_eq!(events[0].event_type, AuditEventType::RunStarted);
        assert_eq!(events[1].actor, "bob");
        assert_eq!(events[1].step_run_id, Some(steps[0].id));
        assert!(store.list_audit_events("globex", run.id)?.is_empty());

        let conn = store.lock()?;
        assert!(conn.execute("UPDATE audit_events SET actor = 'mallory'", []).is_err());
        assert!(conn.execute("DELETE FROM audit_events", []).is_err());
        Ok(())
    }

    #[test]
    fn test_list_due_runs_respects_schedule_and_status() -> Result<()> {
        let store = SqliteStore::open_in_memory()?;
        let pb = playbook("acme");
        let (due, _) = start(&store, &pb)?;
        let (mut later, _) = start(&store, &pb)?;
        let (mut done, _) = start(&store, &pb)?;

        later.scheduled_at = Some(Utc::now() + Duration::hours(1));
        assert!(save_run(&store, &later, RunStatus::Initializing)?);

        done.set_status(RunStatus::Cancelled)?;
        assert!(save_run(&store, &done, RunStatus::Initializing)?);

        let ids: Vec<Uuid> = store
            .list_due_runs("acme", Utc::now())?
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![due.id]);

        let ids: Vec<Uuid> = store
            .list_due_runs("acme", Utc::now() + Duration::hours(2))?
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids.len(), 2);
        assert!(ids.contains(&later.id));

        assert_eq!(store.list_runs("acme", Some(RunStatus::Cancelled))?.len(), 1);
        assert_eq!(store.list_runs("acme", None)?.len(), 3);
        Ok(())
    }
}
