//! Bridge availability and device enumeration

use tracing::{debug, warn};

use super::command::AdbRunner;
use crate::driver::DeviceHandle;
use crate::error::{AutomationError, Result};

/// One line of `adb devices -l`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub serial: String,
    pub status: String,
    pub model: Option<String>,
}

impl DeviceInfo {
    /// `device` is the only state in which adb accepts commands.
    pub fn is_available(&self) -> bool {
        self.status == "device"
    }

    pub fn is_emulator(&self) -> bool {
        self.serial.starts_with("emulator-")
    }
}

/// Run the version probe; any failure means the bridge is unusable.
pub async fn version(runner: &AdbRunner) -> Result<String> {
    let output = runner
        .run(None, &["version"])
        .await
        .map_err(|e| AutomationError::DriverUnavailable(e.to_string()))?;

    let first_line = output.stdout.lines().next().unwrap_or("").trim().to_string();
    debug!("adb version probe: {}", first_line);
    Ok(first_line)
}

/// Every attached device, whatever its state
pub async fn device_infos(runner: &AdbRunner) -> Result<Vec<DeviceInfo>> {
    version(runner).await?;
    let output = runner.run(None, &["devices", "-l"]).await?;
    Ok(parse_devices(&output.stdout))
}

/// Attached devices that are ready for commands, in bridge order
pub async fn list_devices(runner: &AdbRunner) -> Result<Vec<DeviceHandle>> {
    let infos = device_infos(runner).await?;

    for info in infos.iter().filter(|d| !d.is_available()) {
        warn!("Skipping device {} in state '{}'", info.serial, info.status);
    }

    Ok(infos
        .into_iter()
        .filter(DeviceInfo::is_available)
        .map(|d| DeviceHandle::new(d.serial))
        .collect())
}

/// Parse the output of `adb devices [-l]`
pub fn parse_devices(stdout: &str) -> Vec<DeviceInfo> {
    let mut devices = Vec::new();

    for line in stdout.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("List of devices") || line.starts_with('*') {
            // header and daemon start-up chatter
            continue;
        }

        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }

        let model = parts[2..]
            .iter()
            .find_map(|part| part.strip_prefix("model:"))
            .map(|s| s.to_string());

        devices.push(DeviceInfo {
            serial: parts[0].to_string(),
            status: parts[1].to_string(),
            model,
        });
    }

    devices
}
