//! Workflow runs, their state machine and the step log
//!
//! A run moves `Pending -> Running -> {Completed, Failed, TimedOut, Cancelled}`
//! and reaches exactly one terminal state. The executor in `executor.rs`
//! drives the transitions.

mod executor;
pub mod steps;

#[cfg(test)]
mod tests;

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AutomationError;
use crate::store::ScreenshotRecord;

pub use executor::WorkflowExecutor;

pub type RunId = i64;

/// Which fixed pipeline a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowKind {
    Install,
    Screenshot,
    Both,
}

impl WorkflowKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowKind::Install => "install",
            WorkflowKind::Screenshot => "screenshot",
            WorkflowKind::Both => "both",
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowKind {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "install" => Ok(WorkflowKind::Install),
            "screenshot" => Ok(WorkflowKind::Screenshot),
            "both" => Ok(WorkflowKind::Both),
            _ => Err(AutomationError::UnknownWorkflowKind(s.to_string())),
        }
    }
}

/// Lifecycle state of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Running => "running",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
            RunState::TimedOut => "timed_out",
            RunState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Failed | RunState::TimedOut | RunState::Cancelled
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunState {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunState::Pending),
            "running" => Ok(RunState::Running),
            "completed" => Ok(RunState::Completed),
            "failed" => Ok(RunState::Failed),
            "timed_out" => Ok(RunState::TimedOut),
            "cancelled" => Ok(RunState::Cancelled),
            other => Err(AutomationError::Store(format!("unknown run state '{}'", other))),
        }
    }
}

/// A persisted workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: RunId,
    pub name: String,
    pub kind: WorkflowKind,
    pub state: RunState,
    pub owner: i64,
    /// Target package; together with `kind` this is the run's identity
    pub target: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Severity of a step record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
            LogLevel::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            "CRITICAL" => Ok(LogLevel::Critical),
            other => Err(AutomationError::Store(format!("unknown log level '{}'", other))),
        }
    }
}

/// Outcome of one step record.
///
/// The four terminal variants mirror the terminal run states and only
/// appear on the last record of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Ok,
    InProgress,
    Error,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Ok => "ok",
            StepOutcome::InProgress => "in_progress",
            StepOutcome::Error => "error",
            StepOutcome::Completed => "completed",
            StepOutcome::Failed => "failed",
            StepOutcome::TimedOut => "timed_out",
            StepOutcome::Cancelled => "cancelled",
        }
    }

    /// Outcome recorded for the final entry of a run ending in `state`
    pub fn terminal(state: RunState) -> Option<Self> {
        match state {
            RunState::Completed => Some(StepOutcome::Completed),
            RunState::Failed => Some(StepOutcome::Failed),
            RunState::TimedOut => Some(StepOutcome::TimedOut),
            RunState::Cancelled => Some(StepOutcome::Cancelled),
            RunState::Pending | RunState::Running => None,
        }
    }

    pub fn run_state(&self) -> Option<RunState> {
        match self {
            StepOutcome::Completed => Some(RunState::Completed),
            StepOutcome::Failed => Some(RunState::Failed),
            StepOutcome::TimedOut => Some(RunState::TimedOut),
            StepOutcome::Cancelled => Some(RunState::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepOutcome {
    type Err = AutomationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(StepOutcome::Ok),
            "in_progress" => Ok(StepOutcome::InProgress),
            "error" => Ok(StepOutcome::Error),
            "completed" => Ok(StepOutcome::Completed),
            "failed" => Ok(StepOutcome::Failed),
            "timed_out" => Ok(StepOutcome::TimedOut),
            "cancelled" => Ok(StepOutcome::Cancelled),
            other => Err(AutomationError::Store(format!("unknown step outcome '{}'", other))),
        }
    }
}

/// One entry of a run's step log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: String,
    pub outcome: StepOutcome,
    pub level: LogLevel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<u64>,
}

/// Append-only, emission-ordered step records of one execution
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepLog {
    records: Vec<StepRecord>,
}

impl StepLog {
    pub(crate) fn push(&mut self, record: StepRecord) {
        self.records.push(record);
    }

    pub fn iter(&self) -> impl Iterator<Item = &StepRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&StepRecord> {
        self.records.last()
    }

    /// Number of records emitted for `step`
    pub fn count(&self, step: &str) -> usize {
        self.records.iter().filter(|r| r.step == step).count()
    }

    pub fn contains(&self, step: &str) -> bool {
        self.records.iter().any(|r| r.step == step)
    }
}

impl<'a> IntoIterator for &'a StepLog {
    type Item = &'a StepRecord;
    type IntoIter = std::slice::Iter<'a, StepRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}

/// How the install pipeline ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallResult {
    AlreadyInstalled,
    InstallSuccess,
}

impl InstallResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallResult::AlreadyInstalled => "ALREADY_INSTALLED",
            InstallResult::InstallSuccess => "INSTALL_SUCCESS",
        }
    }
}

impl fmt::Display for InstallResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error attached to a failed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunError {
    pub code: String,
    pub message: String,
}

impl From<&AutomationError> for RunError {
    fn from(err: &AutomationError) -> Self {
        Self {
            code: err.error_code().to_string(),
            message: err.to_string(),
        }
    }
}

/// Result of one execution: the terminal state plus what it produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub run_id: RunId,
    pub execution_id: Uuid,
    pub kind: WorkflowKind,
    pub state: RunState,
    pub message: String,
    pub install_result: Option<InstallResult>,
    pub screenshot: Option<ScreenshotRecord>,
    pub error: Option<RunError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: StepLog,
}

impl ExecutionReport {
    pub fn is_success(&self) -> bool {
        self.state == RunState::Completed
    }

    pub fn duration_secs(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }
}

/// Cooperative cancellation, observed between steps and poll ticks only
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
