//! SQLite-backed `RunStore`
//!
//! Timestamps are stored as RFC 3339 text in UTC, metadata as JSON text.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, warn};

use super::{
    NewRun, NewScreenshot, Page, RunQuery, RunStatistics, RunStore, ScreenshotRecord,
};
use crate::error::{AutomationError, Result};
use crate::workflow::{LogLevel, RunId, RunState, StepRecord, WorkflowRun};

const RUN_COLUMNS: &str = "id, name, kind, state, owner, target, started_at, finished_at, \
                           error, created_at, updated_at";

const SCREENSHOT_COLUMNS: &str = "id, run_id, path, file_name, size_bytes, mime_type, width, \
                                  height, screenshot_type, metadata, created_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        if let Err(e) = conn.execute_batch("PRAGMA journal_mode=WAL;") {
            warn!("Could not enable WAL on {}: {}", path.display(), e);
        }
        // concurrent CLI processes wait for the write lock instead of failing
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        debug!("Opened run store at {}", path.display());
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| AutomationError::Store(format!("lock poisoned: {}", e)))
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS workflow_runs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,           -- 'install', 'screenshot', 'both'
            state TEXT NOT NULL DEFAULT 'pending',
            owner INTEGER NOT NULL,
            target TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_workflow_runs_identity
            ON workflow_runs (kind, target, state);
        CREATE INDEX IF NOT EXISTS idx_workflow_runs_owner ON workflow_runs (owner);

        CREATE TABLE IF NOT EXISTS workflow_logs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
            step TEXT NOT NULL,
            outcome TEXT NOT NULL,
            level TEXT NOT NULL,
            message TEXT NOT NULL,
            duration_ms INTEGER,
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_workflow_logs_run ON workflow_logs (run_id);

        CREATE TABLE IF NOT EXISTS screenshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id INTEGER NOT NULL REFERENCES workflow_runs(id) ON DELETE CASCADE,
            path TEXT NOT NULL,
            file_name TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            mime_type TEXT NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            screenshot_type TEXT NOT NULL,
            metadata TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_screenshots_run ON screenshots (run_id);
        ",
    )?;
    Ok(())
}

fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AutomationError::Store(format!("bad timestamp '{}': {}", raw, e)))
}

fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

fn ensure_run(conn: &Connection, id: RunId) -> Result<()> {
    let exists = conn
        .query_row("SELECT 1 FROM workflow_runs WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?;
    exists.ok_or(AutomationError::RunNotFound(id))
}

/// Raw column values; converted outside the row closure so parse errors keep their type
struct RunRow {
    id: RunId,
    name: String,
    kind: String,
    state: String,
    owner: i64,
    target: String,
    started_at: Option<String>,
    finished_at: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
}

impl RunRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            kind: row.get(2)?,
            state: row.get(3)?,
            owner: row.get(4)?,
            target: row.get(5)?,
            started_at: row.get(6)?,
            finished_at: row.get(7)?,
            error: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_run(self) -> Result<WorkflowRun> {
        Ok(WorkflowRun {
            id: self.id,
            name: self.name,
            kind: self.kind.parse()?,
            state: self.state.parse()?,
            owner: self.owner,
            target: self.target,
            started_at: parse_opt_ts(self.started_at)?,
            finished_at: parse_opt_ts(self.finished_at)?,
            error: self.error,
            created_at: parse_ts(&self.created_at)?,
            updated_at: parse_ts(&self.updated_at)?,
        })
    }
}

struct LogRow {
    step: String,
    outcome: String,
    level: String,
    message: String,
    duration_ms: Option<i64>,
    created_at: String,
}

impl LogRow {
    fn into_record(self) -> Result<StepRecord> {
        Ok(StepRecord {
            step: self.step,
            outcome: self.outcome.parse()?,
            level: self.level.parse()?,
            message: self.message,
            timestamp: parse_ts(&self.created_at)?,
            duration_ms: self.duration_ms.map(|ms| ms.max(0) as u64),
        })
    }
}

struct ScreenshotRow {
    id: i64,
    run_id: RunId,
    path: String,
    file_name: String,
    size_bytes: i64,
    mime_type: String,
    width: i64,
    height: i64,
    screenshot_type: String,
    metadata: String,
    created_at: String,
}

impl ScreenshotRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            run_id: row.get(1)?,
            path: row.get(2)?,
            file_name: row.get(3)?,
            size_bytes: row.get(4)?,
            mime_type: row.get(5)?,
            width: row.get(6)?,
            height: row.get(7)?,
            screenshot_type: row.get(8)?,
            metadata: row.get(9)?,
            created_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<ScreenshotRecord> {
        Ok(ScreenshotRecord {
            id: self.id,
            run_id: self.run_id,
            path: self.path,
            file_name: self.file_name,
            size_bytes: self.size_bytes.max(0) as u64,
            mime_type: self.mime_type,
            width: self.width.max(0) as u32,
            height: self.height.max(0) as u32,
            screenshot_type: self.screenshot_type.parse()?,
            metadata: serde_json::from_str(&self.metadata)?,
            created_at: parse_ts(&self.created_at)?,
        })
    }
}

fn load_runs(conn: &Connection, owner: Option<i64>) -> Result<Vec<WorkflowRun>> {
    let sql = format!(
        "SELECT {} FROM workflow_runs WHERE (?1 IS NULL OR owner = ?1) ORDER BY id",
        RUN_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![owner], RunRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(RunRow::into_run).collect()
}

#[async_trait]
impl RunStore for SqliteStore {
    async fn create_run(&self, run: NewRun) -> Result<RunId> {
        let conn = self.conn()?;
        let now = format_ts(Utc::now());
        conn.execute(
            "INSERT INTO workflow_runs (name, kind, state, owner, target, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            params![
                run.name,
                run.kind.as_str(),
                RunState::Pending.as_str(),
                run.owner,
                run.target,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<WorkflowRun>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {} FROM workflow_runs WHERE id = ?1", RUN_COLUMNS);
        let row = conn
            .query_row(&sql, params![id], RunRow::from_row)
            .optional()?;
        row.map(RunRow::into_run).transpose()
    }

    async fn try_start(&self, id: RunId, force_restart: bool) -> Result<Vec<RunId>> {
        let mut conn = self.conn()?;
        // IMMEDIATE holds the write lock from the exclusion check to the update
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let sql = format!("SELECT {} FROM workflow_runs WHERE id = ?1", RUN_COLUMNS);
        let run = tx
            .query_row(&sql, params![id], RunRow::from_row)
            .optional()?
            .map(RunRow::into_run)
            .transpose()?
            .ok_or(AutomationError::RunNotFound(id))?;
        if run.state.is_terminal() {
            return Err(AutomationError::RunFinished {
                run_id: id,
                state: run.state,
            });
        }

        let running = {
            let mut stmt = tx.prepare(
                "SELECT id FROM workflow_runs
                 WHERE kind = ?1 AND target = ?2 AND state = 'running'
                 ORDER BY id",
            )?;
            let ids = stmt
                .query_map(params![run.kind.as_str(), run.target], |row| row.get(0))?
                .collect::<rusqlite::Result<Vec<RunId>>>()?;
            ids
        };

        if !force_restart {
            if run.state == RunState::Running {
                return Err(AutomationError::AlreadyRunning { run_id: id });
            }
            if let Some(other) = running.first() {
                return Err(AutomationError::AlreadyRunning { run_id: *other });
            }
        }

        let now = format_ts(Utc::now());
        tx.execute(
            "UPDATE workflow_runs SET
                state = 'running',
                started_at = ?1,
                finished_at = NULL,
                error = NULL,
                updated_at = ?1
             WHERE id = ?2 AND state IN ('pending', 'running')",
            params![now, id],
        )?;
        tx.commit()?;
        Ok(running)
    }

    async fn update_run_state(
        &self,
        id: RunId,
        state: RunState,
        error: Option<String>,
    ) -> Result<()> {
        let conn = self.conn()?;
        let now = format_ts(Utc::now());
        let changed = conn.execute(
            "UPDATE workflow_runs SET
                state = ?1,
                updated_at = ?2,
                started_at = CASE WHEN ?1 = 'running' THEN ?2 ELSE started_at END,
                finished_at = CASE WHEN ?1 = 'running' THEN NULL WHEN ?3 THEN ?2 ELSE finished_at END,
                error = COALESCE(?4, CASE WHEN ?1 = 'running' THEN NULL ELSE error END)
             WHERE id = ?5",
            params![state.as_str(), now, state.is_terminal(), error, id],
        )?;
        if changed == 0 {
            return Err(AutomationError::RunNotFound(id));
        }
        Ok(())
    }

    async fn append_log(&self, id: RunId, record: &StepRecord) -> Result<()> {
        let conn = self.conn()?;
        ensure_run(&conn, id)?;
        conn.execute(
            "INSERT INTO workflow_logs (run_id, step, outcome, level, message, duration_ms, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                id,
                record.step,
                record.outcome.as_str(),
                record.level.as_str(),
                record.message,
                record.duration_ms.map(|ms| ms as i64),
                format_ts(record.timestamp)
            ],
        )?;
        Ok(())
    }

    async fn create_screenshot_record(
        &self,
        id: RunId,
        screenshot: NewScreenshot,
    ) -> Result<ScreenshotRecord> {
        let conn = self.conn()?;
        ensure_run(&conn, id)?;
        let created_at = Utc::now();
        conn.execute(
            "INSERT INTO screenshots (run_id, path, file_name, size_bytes, mime_type, width,
                                      height, screenshot_type, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                screenshot.path,
                screenshot.file_name,
                screenshot.size_bytes as i64,
                screenshot.mime_type,
                screenshot.width as i64,
                screenshot.height as i64,
                screenshot.screenshot_type.as_str(),
                serde_json::to_string(&screenshot.metadata)?,
                format_ts(created_at)
            ],
        )?;
        let shot_id = conn.last_insert_rowid();
        // round-trip through the stored text so callers see what a later read returns
        let created_at = parse_ts(&format_ts(created_at))?;
        Ok(ScreenshotRecord::from_new(shot_id, id, screenshot, created_at))
    }

    async fn list_logs(&self, id: RunId, level: Option<LogLevel>) -> Result<Vec<StepRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT step, outcome, level, message, duration_ms, created_at
             FROM workflow_logs
             WHERE run_id = ?1 AND (?2 IS NULL OR level = ?2)
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![id, level.map(|l| l.as_str())], |row| {
                Ok(LogRow {
                    step: row.get(0)?,
                    outcome: row.get(1)?,
                    level: row.get(2)?,
                    message: row.get(3)?,
                    duration_ms: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(LogRow::into_record).collect()
    }

    async fn list_screenshots(&self, id: RunId) -> Result<Vec<ScreenshotRecord>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {} FROM screenshots WHERE run_id = ?1 ORDER BY id",
            SCREENSHOT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params![id], ScreenshotRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(ScreenshotRow::into_record).collect()
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Page<WorkflowRun>> {
        let query = query.normalized();
        let conn = self.conn()?;
        let filter = "(?1 IS NULL OR owner = ?1) AND (?2 IS NULL OR state = ?2) \
                      AND (?3 IS NULL OR kind = ?3)";
        let state = query.state.map(|s| s.as_str());
        let kind = query.kind.map(|k| k.as_str());

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM workflow_runs WHERE {}", filter),
            params![query.owner, state, kind],
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT {} FROM workflow_runs WHERE {} ORDER BY id DESC LIMIT ?4 OFFSET ?5",
            RUN_COLUMNS, filter
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![
                    query.owner,
                    state,
                    kind,
                    query.page_size as i64,
                    query.offset() as i64
                ],
                RunRow::from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        let items = rows
            .into_iter()
            .map(RunRow::into_run)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page::new(items, total.max(0) as u64, &query))
    }

    async fn statistics(&self, owner: Option<i64>) -> Result<RunStatistics> {
        let conn = self.conn()?;
        let runs = load_runs(&conn, owner)?;
        Ok(RunStatistics::from_runs(&runs))
    }
}
