//! Persistence collaborator for runs, step logs and screenshot records
//!
//! This module provides:
//! - `RunStore`: the async trait the executor and the CLI talk to
//! - `memory`: an in-process store for tests and dry runs
//! - `sqlite`: a SQLite-backed store

mod memory;
mod sqlite;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AutomationError, Result};
use crate::workflow::{LogLevel, RunId, RunState, StepRecord, WorkflowKind, WorkflowRun};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub type ScreenshotId = i64;

pub const DEFAULT_PAGE_SIZE: u32 = 10;
pub const MAX_PAGE_SIZE: u32 = 100;

/// Fields supplied when creating a run; everything else is assigned by the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRun {
    pub kind: WorkflowKind,
    pub owner: i64,
    pub target: String,
    pub name: String,
}

impl NewRun {
    pub fn new(kind: WorkflowKind, owner: i64, target: impl Into<String>) -> Self {
        Self {
            kind,
            owner,
            target: target.into(),
            name: format!("{} workflow", kind),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Category of a stored screenshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenshotType {
    Login,
    GameLoading,
    GamePlay,
    Error,
}

impl ScreenshotType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScreenshotType::Login => "login",
            ScreenshotType::GameLoading => "game_loading",
            ScreenshotType::GamePlay => "game_play",
            ScreenshotType::Error => "error",
        }
    }
}

impl fmt::Display for ScreenshotType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScreenshotType {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "login" => Ok(ScreenshotType::Login),
            "game_loading" => Ok(ScreenshotType::GameLoading),
            "game_play" => Ok(ScreenshotType::GamePlay),
            "error" => Ok(ScreenshotType::Error),
            other => Err(AutomationError::Store(format!(
                "unknown screenshot type '{}'",
                other
            ))),
        }
    }
}

/// Screenshot metadata handed to `create_screenshot_record`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewScreenshot {
    pub path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub screenshot_type: ScreenshotType,
    pub metadata: serde_json::Value,
}

/// A persisted screenshot record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotRecord {
    pub id: ScreenshotId,
    pub run_id: RunId,
    pub path: String,
    pub file_name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    pub screenshot_type: ScreenshotType,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ScreenshotRecord {
    pub(crate) fn from_new(
        id: ScreenshotId,
        run_id: RunId,
        shot: NewScreenshot,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            run_id,
            path: shot.path,
            file_name: shot.file_name,
            size_bytes: shot.size_bytes,
            mime_type: shot.mime_type,
            width: shot.width,
            height: shot.height,
            screenshot_type: shot.screenshot_type,
            metadata: shot.metadata,
            created_at,
        }
    }
}

/// Filter and paging for `list_runs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunQuery {
    pub owner: Option<i64>,
    pub state: Option<RunState>,
    pub kind: Option<WorkflowKind>,
    pub page: u32,
    pub page_size: u32,
}

impl Default for RunQuery {
    fn default() -> Self {
        Self {
            owner: None,
            state: None,
            kind: None,
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl RunQuery {
    /// Page at least 1, page size within `1..=MAX_PAGE_SIZE`
    pub fn normalized(&self) -> Self {
        Self {
            page: self.page.max(1),
            page_size: self.page_size.clamp(1, MAX_PAGE_SIZE),
            ..self.clone()
        }
    }

    pub fn offset(&self) -> u64 {
        (self.page.max(1) as u64 - 1) * self.page_size as u64
    }

    pub(crate) fn matches(&self, run: &WorkflowRun) -> bool {
        self.owner.map_or(true, |owner| run.owner == owner)
            && self.state.map_or(true, |state| run.state == state)
            && self.kind.map_or(true, |kind| run.kind == kind)
    }
}

/// One page of results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
}

impl<T> Page<T> {
    pub(crate) fn new(items: Vec<T>, total_count: u64, query: &RunQuery) -> Self {
        let page_size = query.page_size.max(1);
        let total_pages = total_count.div_ceil(page_size as u64) as u32;
        Self {
            items,
            total_count,
            page: query.page,
            page_size,
            total_pages,
        }
    }
}

/// Aggregate counts over an owner's runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub total_runs: u64,
    pub completed_runs: u64,
    pub failed_runs: u64,
    pub timed_out_runs: u64,
    pub running_runs: u64,
    /// Completed runs as a percentage of all runs, two decimals
    pub success_rate: f64,
    /// Mean seconds between start and finish of completed runs
    pub average_execution_secs: Option<f64>,
}

impl RunStatistics {
    /// Derive the statistics from a set of runs
    pub fn from_runs<'a>(runs: impl IntoIterator<Item = &'a WorkflowRun>) -> Self {
        let mut stats = RunStatistics {
            total_runs: 0,
            completed_runs: 0,
            failed_runs: 0,
            timed_out_runs: 0,
            running_runs: 0,
            success_rate: 0.0,
            average_execution_secs: None,
        };
        let mut durations = Vec::new();

        for run in runs {
            stats.total_runs += 1;
            match run.state {
                RunState::Completed => {
                    stats.completed_runs += 1;
                    if let (Some(started), Some(finished)) = (run.started_at, run.finished_at) {
                        durations.push((finished - started).num_milliseconds() as f64 / 1000.0);
                    }
                }
                RunState::Failed => stats.failed_runs += 1,
                RunState::TimedOut => stats.timed_out_runs += 1,
                RunState::Running => stats.running_runs += 1,
                RunState::Pending | RunState::Cancelled => {}
            }
        }

        if stats.total_runs > 0 {
            stats.success_rate =
                round2(stats.completed_runs as f64 / stats.total_runs as f64 * 100.0);
        }
        if !durations.is_empty() {
            let mean = durations.iter().sum::<f64>() / durations.len() as f64;
            stats.average_execution_secs = Some(round2(mean));
        }
        stats
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Storage for runs and everything they produce.
///
/// The executor calls these after each state change. Reads are used by the
/// CLI; none of them are needed to execute a run.
#[async_trait]
pub trait RunStore: Send + Sync {
    async fn create_run(&self, run: NewRun) -> Result<RunId>;

    async fn get_run(&self, id: RunId) -> Result<Option<WorkflowRun>>;

    /// Move run `id` to `Running` as one atomic step.
    ///
    /// Without `force_restart` the run must be `Pending` and no other run with
    /// the same identity (kind and target) may be `Running`; otherwise the call
    /// fails with `AlreadyRunning` and nothing changes. Terminal runs fail with
    /// `RunFinished` either way. Returns the runs of this identity that were
    /// `Running` just before the transition.
    async fn try_start(&self, id: RunId, force_restart: bool) -> Result<Vec<RunId>>;

    /// Move a run to `state`.
    ///
    /// `Running` stamps `started_at` and clears any previous error; terminal
    /// states stamp `finished_at`. `updated_at` is always refreshed.
    async fn update_run_state(
        &self,
        id: RunId,
        state: RunState,
        error: Option<String>,
    ) -> Result<()>;

    async fn append_log(&self, id: RunId, record: &StepRecord) -> Result<()>;

    async fn create_screenshot_record(
        &self,
        id: RunId,
        screenshot: NewScreenshot,
    ) -> Result<ScreenshotRecord>;

    /// Step records in emission order, optionally only those at `level`
    async fn list_logs(&self, id: RunId, level: Option<LogLevel>) -> Result<Vec<StepRecord>>;

    async fn list_screenshots(&self, id: RunId) -> Result<Vec<ScreenshotRecord>>;

    /// Newest first
    async fn list_runs(&self, query: &RunQuery) -> Result<Page<WorkflowRun>>;

    async fn statistics(&self, owner: Option<i64>) -> Result<RunStatistics>;
}
