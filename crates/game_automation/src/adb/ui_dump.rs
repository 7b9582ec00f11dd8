//! UI hierarchy dumps via uiautomator

use tempfile::tempdir;
use tracing::{debug, warn};

use super::command::AdbRunner;
use crate::driver::DeviceHandle;
use crate::error::{AutomationError, Result};

/// On-device scratch path for dumps
pub const REMOTE_UI_DUMP_PATH: &str = "/sdcard/ui_dump.xml";

/// Produce a fresh dump of the on-screen hierarchy.
///
/// Any stale dump is deleted first so a failed `uiautomator dump` can never
/// hand back the previous screen.
pub async fn dump_ui_hierarchy(runner: &AdbRunner, device: &DeviceHandle) -> Result<String> {
    runner
        .remove_remote(device, REMOTE_UI_DUMP_PATH)
        .await
        .map_err(|e| AutomationError::UiProbeFailed(format!("remove stale dump: {}", e)))?;

    let result = dump_and_pull(runner, device).await;

    if let Err(e) = runner.remove_remote(device, REMOTE_UI_DUMP_PATH).await {
        warn!("Failed to remove {}: {}", REMOTE_UI_DUMP_PATH, e);
    }

    result
}

async fn dump_and_pull(runner: &AdbRunner, device: &DeviceHandle) -> Result<String> {
    let temp_dir = tempdir()?;
    let local_path = temp_dir.path().join("ui_dump.xml");

    let output = runner
        .run(
            Some(device),
            &["shell", "uiautomator", "dump", REMOTE_UI_DUMP_PATH],
        )
        .await
        .map_err(|e| AutomationError::UiProbeFailed(format!("uiautomator dump: {}", e)))?;

    let combined = output.combined();
    if combined.contains("ERROR") {
        return Err(AutomationError::UiProbeFailed(combined.trim().to_string()));
    }

    let local = local_path.to_string_lossy().into_owned();
    runner
        .run(Some(device), &["pull", REMOTE_UI_DUMP_PATH, &local])
        .await
        .map_err(|e| AutomationError::UiProbeFailed(format!("pull: {}", e)))?;

    let bytes = tokio::fs::read(&local_path)
        .await
        .map_err(|e| AutomationError::UiProbeFailed(format!("read pulled dump: {}", e)))?;

    debug!("UI dump size: {} bytes", bytes.len());
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}
