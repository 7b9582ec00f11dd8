//! Device driver seam between the workflow executor and the device bridge
//!
//! The executor only talks to a `DeviceDriver`; `adb::AdbDriver` is the
//! production implementation. None of the operations retry on their own and
//! none of them are idempotent: tapping twice taps twice.

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Identifies the target emulator instance (the bridge serial)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceHandle {
    serial: String,
}

impl DeviceHandle {
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
        }
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serial)
    }
}

/// Android key events used by the pipelines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    Home,
}

impl KeyCode {
    pub fn code(self) -> u32 {
        match self {
            KeyCode::Home => 3,
        }
    }
}

/// What `start_activity` launches
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchTarget {
    /// Explicit `package/activity` component
    Component(String),
    /// `ACTION_VIEW` intent on a URI, e.g. a store deep link
    ViewUri(String),
}

impl fmt::Display for LaunchTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaunchTarget::Component(component) => write!(f, "component {}", component),
            LaunchTarget::ViewUri(uri) => write!(f, "uri {}", uri),
        }
    }
}

/// Device operations consumed by the workflow executor
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Attached devices that are ready for commands.
    ///
    /// Fails with `DriverUnavailable` when the bridge cannot be invoked at
    /// all; an empty list means "no device" and is left to the caller.
    async fn list_devices(&self) -> Result<Vec<DeviceHandle>>;

    async fn press_key(&self, device: &DeviceHandle, key: KeyCode) -> Result<()>;

    async fn tap(&self, device: &DeviceHandle, x: i32, y: i32) -> Result<()>;

    async fn type_text(&self, device: &DeviceHandle, text: &str) -> Result<()>;

    async fn start_activity(&self, device: &DeviceHandle, target: &LaunchTarget) -> Result<()>;

    async fn list_installed_packages(&self, device: &DeviceHandle) -> Result<BTreeSet<String>>;

    /// Raw PNG bytes of the current screen; never empty on success.
    async fn capture_screenshot(&self, device: &DeviceHandle) -> Result<Vec<u8>>;

    /// A freshly generated UI hierarchy dump. Never served from a cache.
    async fn dump_ui_hierarchy(&self, device: &DeviceHandle) -> Result<String>;
}
