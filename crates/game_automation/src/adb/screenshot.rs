//! Screen capture for the connected device

use std::time::Duration;

use tempfile::tempdir;
use tracing::{debug, warn};

use super::command::AdbRunner;
use crate::driver::DeviceHandle;
use crate::error::{AutomationError, Result};

/// On-device scratch path for captures
pub const REMOTE_SCREENSHOT_PATH: &str = "/sdcard/screenshot.png";

/// Capture the screen and return the PNG bytes.
///
/// The device scratch file is removed on every exit path; the local copy
/// lives in a temp directory that is dropped with this call.
pub async fn capture_screenshot(
    runner: &AdbRunner,
    device: &DeviceHandle,
    timeout: Duration,
) -> Result<Vec<u8>> {
    let result = capture_and_pull(runner, device, timeout).await;

    if let Err(e) = runner.remove_remote(device, REMOTE_SCREENSHOT_PATH).await {
        warn!("Failed to remove {}: {}", REMOTE_SCREENSHOT_PATH, e);
    }

    result
}

async fn capture_and_pull(
    runner: &AdbRunner,
    device: &DeviceHandle,
    timeout: Duration,
) -> Result<Vec<u8>> {
    // Use a temp directory so the file doesn't exist until adb pull creates it
    let temp_dir = tempdir()?;
    let local_path = temp_dir.path().join("screenshot.png");

    let output = runner
        .run_with_timeout(
            Some(device),
            &["shell", "screencap", "-p", REMOTE_SCREENSHOT_PATH],
            timeout,
        )
        .await
        .map_err(|e| AutomationError::ScreenshotCaptureFailed(format!("screencap: {}", e)))?;

    let combined = output.combined();
    debug!("screencap output: {}", combined.trim());

    // secure surfaces make screencap report a failure with exit code 0
    if combined.contains("Status: -1") || combined.contains("Failed") {
        return Err(AutomationError::ScreenshotCaptureFailed(format!(
            "screencap refused: {}",
            combined.trim()
        )));
    }

    let local = local_path.to_string_lossy().into_owned();
    runner
        .run_with_timeout(
            Some(device),
            &["pull", REMOTE_SCREENSHOT_PATH, &local],
            timeout,
        )
        .await
        .map_err(|e| AutomationError::ScreenshotCaptureFailed(format!("pull: {}", e)))?;

    let bytes = tokio::fs::read(&local_path)
        .await
        .map_err(|e| AutomationError::ScreenshotCaptureFailed(format!("read pulled file: {}", e)))?;

    if bytes.is_empty() {
        return Err(AutomationError::ScreenshotCaptureFailed(
            "pulled screenshot is empty (0 bytes)".to_string(),
        ));
    }

    debug!("Screenshot size: {} bytes", bytes.len());
    Ok(bytes)
}
