//! Error types for device and workflow operations

use thiserror::Error;

use crate::workflow::{RunId, RunState};

#[derive(Debug, Error)]
pub enum AutomationError {
    /// The bridge binary could not be invoked or its version probe failed.
    #[error("Device bridge unavailable: {0}")]
    DriverUnavailable(String),

    #[error("No emulator devices found")]
    NoDevice,

    #[error("Command failed (exit code {}): {stderr}", fmt_exit_code(.exit_code))]
    CommandFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("Screenshot capture failed: {0}")]
    ScreenshotCaptureFailed(String),

    #[error("UI probe failed: {0}")]
    UiProbeFailed(String),

    #[error("Workflow run {run_id} is already running")]
    AlreadyRunning { run_id: RunId },

    /// The installed state never appeared within the polling budget.
    #[error("Timed out: {0}")]
    TimedOut(String),

    /// The run as a whole exceeded its workflow budget.
    #[error("Workflow timed out: {0}")]
    WorkflowTimedOut(String),

    #[error("Unknown workflow kind: {0}")]
    UnknownWorkflowKind(String),

    #[error("{0} is not installed")]
    AppNotInstalled(String),

    #[error("Workflow run {0} not found")]
    RunNotFound(RunId),

    #[error("Workflow run {run_id} already finished as {state}")]
    RunFinished { run_id: RunId, state: RunState },

    /// The run targets a package other than the configured target app.
    #[error("Workflow run targets {run_target} but the executor is configured for {configured}")]
    TargetMismatch { run_target: String, configured: String },

    #[error("Workflow run was cancelled")]
    Cancelled,

    #[error("Store error: {0}")]
    Store(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl AutomationError {
    /// Stable code used in persisted log lines and machine-readable output.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DriverUnavailable(_) => "EMULATOR_NOT_AVAILABLE",
            Self::NoDevice => "EMULATOR_NOT_AVAILABLE",
            Self::CommandFailed { .. } => "ADB_COMMAND_ERROR",
            Self::ScreenshotCaptureFailed(_) => "SCREENSHOT_CAPTURE_ERROR",
            Self::UiProbeFailed(_) => "UI_PROBE_ERROR",
            Self::AlreadyRunning { .. } => "WORKFLOW_ALREADY_RUNNING",
            Self::TimedOut(_) => "INSTALLATION_TIMEOUT",
            Self::WorkflowTimedOut(_) => "WORKFLOW_TIMEOUT",
            Self::UnknownWorkflowKind(_) => "INVALID_WORKFLOW_TYPE",
            Self::AppNotInstalled(_) => "APP_NOT_INSTALLED",
            Self::RunNotFound(_) => "WORKFLOW_NOT_FOUND",
            Self::RunFinished { .. } => "WORKFLOW_FINISHED",
            Self::TargetMismatch { .. } => "INVALID_TARGET",
            Self::Cancelled => "WORKFLOW_CANCELLED",
            Self::Store(_) | Self::Sqlite(_) | Self::Json(_) => "DATABASE_ERROR",
            Self::Io(_) | Self::Image(_) => "UNEXPECTED_ERROR",
        }
    }

    /// Either budget running out; the run ends as `timed_out`.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut(_) | Self::WorkflowTimedOut(_))
    }

    /// Shorthand for a failed command that never produced an exit status.
    pub(crate) fn command(stderr: impl Into<String>) -> Self {
        Self::CommandFailed {
            exit_code: None,
            stderr: stderr.into(),
        }
    }
}

fn fmt_exit_code(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string())
}

pub type Result<T> = std::result::Result<T, AutomationError>;
