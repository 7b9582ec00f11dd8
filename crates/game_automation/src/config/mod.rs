//! Configuration for the automation core
//!
//! This module contains:
//! - `target`: the target app, store identifiers and the install tap point
//! - `timing`: command timeouts, settle delays and polling budgets
//!
//! `AutomationConfig` is built once by the process entry point and handed to
//! the driver and executor constructors.

mod target;
mod timing;

use std::path::PathBuf;

pub use target::{TapPoint, TargetApp};
pub use timing::{CommandTimingConfig, SettleTimingConfig, TimingConfig, WorkflowTimingConfig};

/// Top-level configuration value
#[derive(Debug, Clone)]
pub struct AutomationConfig {
    /// Path to the bridge binary
    pub adb_path: String,
    /// Use this serial instead of the first attached device
    pub device_serial: Option<String>,
    pub target: TargetApp,
    pub install_tap: TapPoint,
    /// How many times the install control is tapped
    pub install_tap_repeats: u32,
    /// Directory screenshots are written to
    pub screenshot_dir: PathBuf,
    /// Dimensions recorded when a capture cannot be decoded
    pub fallback_dimensions: (u32, u32),
    pub timing: TimingConfig,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            adb_path: "adb".to_string(),
            device_serial: None,
            target: TargetApp::default(),
            install_tap: TapPoint::default(),
            install_tap_repeats: 3,
            screenshot_dir: PathBuf::from("screenshots"),
            fallback_dimensions: (2400, 1080),
            timing: TimingConfig::default(),
        }
    }
}

impl AutomationConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults with timing overridden from the environment
    pub fn from_env() -> Self {
        Self {
            timing: TimingConfig::from_env(),
            ..Self::default()
        }
    }

    pub fn with_adb_path(mut self, adb_path: impl Into<String>) -> Self {
        self.adb_path = adb_path.into();
        self
    }

    pub fn with_device_serial(mut self, serial: impl Into<String>) -> Self {
        self.device_serial = Some(serial.into());
        self
    }

    pub fn with_target(mut self, target: TargetApp) -> Self {
        self.target = target;
        self
    }

    pub fn with_install_tap(mut self, point: TapPoint, repeats: u32) -> Self {
        self.install_tap = point;
        self.install_tap_repeats = repeats;
        self
    }

    pub fn with_screenshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.screenshot_dir = dir.into();
        self
    }

    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = AutomationConfig::default();
        assert_eq!(config.adb_path, "adb");
        assert_eq!(config.install_tap, TapPoint { x: 2117, y: 350 });
        assert_eq!(config.install_tap_repeats, 3);
        assert_eq!(config.fallback_dimensions, (2400, 1080));
        assert!(config.device_serial.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = AutomationConfig::new()
            .with_adb_path("/opt/platform-tools/adb")
            .with_device_serial("emulator-5554")
            .with_install_tap(TapPoint { x: 10, y: 20 }, 1)
            .with_screenshot_dir("/tmp/shots");

        assert_eq!(config.adb_path, "/opt/platform-tools/adb");
        assert_eq!(config.device_serial.as_deref(), Some("emulator-5554"));
        assert_eq!(config.install_tap_repeats, 1);
        assert_eq!(config.screenshot_dir, PathBuf::from("/tmp/shots"));
    }
}
