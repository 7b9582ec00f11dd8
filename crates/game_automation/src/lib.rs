//! game_automation: install/launch/screenshot workflows for an Android emulator
//!
//! This library provides:
//! - ADB (Android Debug Bridge) device driver with bounded commands
//! - UI-dump probing for the installed-app state
//! - A workflow executor with install, screenshot and combined pipelines
//! - Run, step-log and screenshot persistence (in-memory or SQLite)
//!
//! # Example
//!
//! ```no_run
//! use game_automation::{AdbDriver, AutomationConfig, SqliteStore, WorkflowExecutor, WorkflowKind};
//!
//! #[tokio::main]
//! async fn main() -> game_automation::Result<()> {
//!     let config = AutomationConfig::from_env();
//!     let driver = AdbDriver::from_config(&config);
//!     let store = SqliteStore::open("automation.db")?;
//!
//!     let executor = WorkflowExecutor::new(driver, store, config);
//!     let report = executor.run_workflow(WorkflowKind::Install, 1, false).await?;
//!     println!("{}: {}", report.state, report.message);
//!     Ok(())
//! }
//! ```

// Core modules
pub mod error;

// Configuration module
pub mod config;

// Device access
pub mod adb;
pub mod driver;
pub mod probe;

// Workflows and persistence
pub mod screenshot_saver;
pub mod store;
pub mod workflow;

// Re-export commonly used types
pub use error::{AutomationError, Result};

// Config re-exports
pub use config::{
    AutomationConfig, CommandTimingConfig, SettleTimingConfig, TapPoint, TargetApp,
    TimingConfig, WorkflowTimingConfig,
};

// Device re-exports
pub use adb::{AdbDriver, AdbRunner, DeviceInfo};
pub use driver::{DeviceDriver, DeviceHandle, KeyCode, LaunchTarget};
pub use probe::{AttributeProbe, UiProbe, UiProbeResult};

// Store re-exports
pub use store::{
    MemoryStore, NewRun, NewScreenshot, Page, RunQuery, RunStatistics, RunStore,
    ScreenshotRecord, ScreenshotType, SqliteStore,
};

// Workflow re-exports
pub use screenshot_saver::{SavedScreenshot, ScreenshotSaver};
pub use workflow::{
    CancelToken, ExecutionReport, InstallResult, LogLevel, RunError, RunId, RunState, StepLog,
    StepOutcome, StepRecord, WorkflowExecutor, WorkflowKind, WorkflowRun,
};
