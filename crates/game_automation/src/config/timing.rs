//! Timing configuration for device operations and workflow pacing

use std::env;
use std::time::Duration;

/// Upper bound for the installation and workflow budgets read from the environment
const MAX_BUDGET: Duration = Duration::from_secs(24 * 60 * 60);

/// Read a duration in (fractional) seconds from the environment.
///
/// Unparsable, negative, non-finite or unrepresentable values fall back to
/// `default`.
fn env_secs(name: &str, default: Duration) -> Duration {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .unwrap_or(default)
}

/// Like `env_secs`, clamped to `MAX_BUDGET`
fn env_budget(name: &str, default: Duration) -> Duration {
    env_secs(name, default).min(MAX_BUDGET)
}

/// Per-command timeouts for device bridge invocations
#[derive(Debug, Clone, PartialEq)]
pub struct CommandTimingConfig {
    pub command_timeout: Duration,
    pub screenshot_timeout: Duration,
}

impl Default for CommandTimingConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            screenshot_timeout: Duration::from_secs(60),
        }
    }
}

impl CommandTimingConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            command_timeout: env_secs("GAME_AUTOMATION_COMMAND_TIMEOUT", defaults.command_timeout),
            screenshot_timeout: env_secs(
                "GAME_AUTOMATION_SCREENSHOT_TIMEOUT",
                defaults.screenshot_timeout,
            ),
        }
    }
}

/// Settle delays that wait for the UI after an input or a launch.
///
/// These are load-bearing: the pipelines have no other way to know the
/// screen is ready.
#[derive(Debug, Clone, PartialEq)]
pub struct SettleTimingConfig {
    pub home_settle: Duration,
    pub store_launch_settle: Duration,
    pub store_page_settle: Duration,
    pub install_tap_interval: Duration,
    pub app_launch_settle: Duration,
    pub app_load_settle: Duration,
}

impl Default for SettleTimingConfig {
    fn default() -> Self {
        Self {
            home_settle: Duration::from_secs(2),
            store_launch_settle: Duration::from_secs(5),
            store_page_settle: Duration::from_secs(8),
            install_tap_interval: Duration::from_secs(2),
            app_launch_settle: Duration::from_secs(5),
            app_load_settle: Duration::from_secs(10),
        }
    }
}

impl SettleTimingConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            home_settle: env_secs("GAME_AUTOMATION_HOME_SETTLE", d.home_settle),
            store_launch_settle: env_secs(
                "GAME_AUTOMATION_STORE_LAUNCH_SETTLE",
                d.store_launch_settle,
            ),
            store_page_settle: env_secs("GAME_AUTOMATION_STORE_PAGE_SETTLE", d.store_page_settle),
            install_tap_interval: env_secs(
                "GAME_AUTOMATION_INSTALL_TAP_INTERVAL",
                d.install_tap_interval,
            ),
            app_launch_settle: env_secs("GAME_AUTOMATION_APP_LAUNCH_SETTLE", d.app_launch_settle),
            app_load_settle: env_secs("GAME_AUTOMATION_APP_LOAD_SETTLE", d.app_load_settle),
        }
    }
}

/// Polling and overall budget for a workflow run
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowTimingConfig {
    pub poll_interval: Duration,
    pub install_timeout: Duration,
    pub workflow_timeout: Duration,
}

impl Default for WorkflowTimingConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            install_timeout: Duration::from_secs(300),
            workflow_timeout: Duration::from_secs(600),
        }
    }
}

impl WorkflowTimingConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            poll_interval: env_secs("GAME_AUTOMATION_POLL_INTERVAL", d.poll_interval),
            install_timeout: env_budget("GAME_AUTOMATION_INSTALL_TIMEOUT", d.install_timeout),
            workflow_timeout: env_budget("GAME_AUTOMATION_WORKFLOW_TIMEOUT", d.workflow_timeout),
        }
    }

    /// Number of poll ticks that fit in the installation budget.
    ///
    /// A zero interval degrades to a single tick.
    pub fn max_poll_ticks(&self) -> u32 {
        if self.poll_interval.is_zero() {
            return 1;
        }
        let ticks = self.install_timeout.as_secs_f64() / self.poll_interval.as_secs_f64();
        (ticks.floor() as u32).max(1)
    }
}

/// Master timing configuration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingConfig {
    pub command: CommandTimingConfig,
    pub settle: SettleTimingConfig,
    pub workflow: WorkflowTimingConfig,
}

impl TimingConfig {
    /// Defaults overridden by any `GAME_AUTOMATION_*` variables that are set.
    pub fn from_env() -> Self {
        Self {
            command: CommandTimingConfig::from_env(),
            settle: SettleTimingConfig::from_env(),
            workflow: WorkflowTimingConfig::from_env(),
        }
    }

    /// All delays set to zero and short budgets; used by dry runs and tests.
    pub fn immediate() -> Self {
        Self {
            command: CommandTimingConfig::default(),
            settle: SettleTimingConfig {
                home_settle: Duration::ZERO,
                store_launch_settle: Duration::ZERO,
                store_page_settle: Duration::ZERO,
                install_tap_interval: Duration::ZERO,
                app_launch_settle: Duration::ZERO,
                app_load_settle: Duration::ZERO,
            },
            workflow: WorkflowTimingConfig::default(),
        }
    }
}
