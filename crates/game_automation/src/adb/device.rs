//! Input injection, activity launch and package listing

use std::collections::BTreeSet;

use lazy_static::lazy_static;
use regex::Regex;

use super::command::AdbRunner;
use crate::driver::{DeviceHandle, KeyCode, LaunchTarget};
use crate::error::{AutomationError, Result};

lazy_static! {
    static ref PACKAGE_LINE: Regex = Regex::new(r"^package:(?:\S+=)?([A-Za-z0-9_.]+)\s*$").unwrap();
}

/// Send a key event
pub async fn press_key(runner: &AdbRunner, device: &DeviceHandle, key: KeyCode) -> Result<()> {
    let code = key.code().to_string();
    runner
        .run(Some(device), &["shell", "input", "keyevent", &code])
        .await?;
    Ok(())
}

/// Tap at the specified coordinates
pub async fn tap(runner: &AdbRunner, device: &DeviceHandle, x: i32, y: i32) -> Result<()> {
    let (x, y) = (x.to_string(), y.to_string());
    runner
        .run(Some(device), &["shell", "input", "tap", &x, &y])
        .await?;
    Ok(())
}

/// Type text into the focused field with `input text`
pub async fn type_text(runner: &AdbRunner, device: &DeviceHandle, text: &str) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    let escaped = escape_input_text(text);
    runner
        .run(Some(device), &["shell", "input", "text", &escaped])
        .await?;
    Ok(())
}

/// Launch a component or fire a VIEW intent.
///
/// `am start` exits 0 even when the activity cannot be resolved, so its
/// output is checked as well.
pub async fn start_activity(
    runner: &AdbRunner,
    device: &DeviceHandle,
    target: &LaunchTarget,
) -> Result<()> {
    let output = match target {
        LaunchTarget::Component(component) => {
            runner
                .run(Some(device), &["shell", "am", "start", "-n", component])
                .await?
        }
        LaunchTarget::ViewUri(uri) => {
            runner
                .run(
                    Some(device),
                    &[
                        "shell",
                        "am",
                        "start",
                        "-a",
                        "android.intent.action.VIEW",
                        "-d",
                        uri,
                    ],
                )
                .await?
        }
    };

    let combined = output.combined();
    if combined.contains("Error:") || combined.contains("Exception") {
        return Err(AutomationError::CommandFailed {
            exit_code: Some(0),
            stderr: combined.trim().to_string(),
        });
    }

    Ok(())
}

/// Installed package identifiers from `pm list packages`
pub async fn list_installed_packages(
    runner: &AdbRunner,
    device: &DeviceHandle,
) -> Result<BTreeSet<String>> {
    let output = runner
        .run(Some(device), &["shell", "pm", "list", "packages"])
        .await?;
    Ok(parse_packages(&output.stdout))
}

/// Parse `package:<id>` lines; `-f` style `package:<apk>=<id>` lines are accepted too.
pub fn parse_packages(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .filter_map(|line| PACKAGE_LINE.captures(line.trim()))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Escape text for `input text`, which runs through the device shell.
///
/// Spaces become `%s`; shell metacharacters get a backslash.
pub fn escape_input_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            ' ' => escaped.push_str("%s"),
            '\\' | '\'' | '"' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '$' | '`' | '*'
            | '?' | '#' | '~' | '!' | '%' => {
                escaped.push('\\');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}
