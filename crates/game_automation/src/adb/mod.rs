//! ADB (Android Debug Bridge) module for emulator control
//!
//! This module provides:
//! - `command`: bounded adb invocation
//! - `connection`: version probe and device enumeration
//! - `device`: key events, taps, text input, activity launch, package listing
//! - `screenshot`: screen capture
//! - `ui_dump`: UI hierarchy dumps

mod command;
mod connection;
mod device;
mod screenshot;
mod ui_dump;

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AutomationConfig;
use crate::driver::{DeviceDriver, DeviceHandle, KeyCode, LaunchTarget};
use crate::error::Result;

pub use command::{AdbRunner, CommandOutput};
pub use connection::{parse_devices, DeviceInfo};
pub use device::{escape_input_text, parse_packages};
pub use screenshot::REMOTE_SCREENSHOT_PATH;
pub use ui_dump::REMOTE_UI_DUMP_PATH;

/// `DeviceDriver` backed by the adb command line
#[derive(Debug, Clone)]
pub struct AdbDriver {
    runner: AdbRunner,
    screenshot_timeout: Duration,
}

impl AdbDriver {
    pub fn new(
        adb_path: impl Into<String>,
        command_timeout: Duration,
        screenshot_timeout: Duration,
    ) -> Self {
        Self {
            runner: AdbRunner::new(adb_path, command_timeout),
            screenshot_timeout,
        }
    }

    pub fn from_config(config: &AutomationConfig) -> Self {
        Self::new(
            config.adb_path.clone(),
            config.timing.command.command_timeout,
            config.timing.command.screenshot_timeout,
        )
    }

    pub fn runner(&self) -> &AdbRunner {
        &self.runner
    }

    /// First line of `adb version`
    pub async fn version(&self) -> Result<String> {
        connection::version(&self.runner).await
    }

    /// All attached devices including offline/unauthorized ones
    pub async fn device_infos(&self) -> Result<Vec<DeviceInfo>> {
        connection::device_infos(&self.runner).await
    }
}

#[async_trait]
impl DeviceDriver for AdbDriver {
    async fn list_devices(&self) -> Result<Vec<DeviceHandle>> {
        connection::list_devices(&self.runner).await
    }

    async fn press_key(&self, device: &DeviceHandle, key: KeyCode) -> Result<()> {
        device::press_key(&self.runner, device, key).await
    }

    async fn tap(&self, device: &DeviceHandle, x: i32, y: i32) -> Result<()> {
        device::tap(&self.runner, device, x, y).await
    }

    async fn type_text(&self, device: &DeviceHandle, text: &str) -> Result<()> {
        device::type_text(&self.runner, device, text).await
    }

    async fn start_activity(&self, device: &DeviceHandle, target: &LaunchTarget) -> Result<()> {
        device::start_activity(&self.runner, device, target).await
    }

    async fn list_installed_packages(&self, device: &DeviceHandle) -> Result<BTreeSet<String>> {
        device::list_installed_packages(&self.runner, device).await
    }

    async fn capture_screenshot(&self, device: &DeviceHandle) -> Result<Vec<u8>> {
        screenshot::capture_screenshot(&self.runner, device, self.screenshot_timeout).await
    }

    async fn dump_ui_hierarchy(&self, device: &DeviceHandle) -> Result<String> {
        ui_dump::dump_ui_hierarchy(&self.runner, device).await
    }
}
