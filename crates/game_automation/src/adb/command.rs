//! Bounded invocation of the adb binary

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::driver::DeviceHandle;
use crate::error::{AutomationError, Result};

/// Captured output of a successful adb invocation
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// stdout followed by stderr, the way adb tools mix their diagnostics
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// Runs adb with an optional `-s <serial>` prefix and a hard timeout.
///
/// A non-zero exit or an expired timeout both surface as `CommandFailed`.
/// The child is killed when the timeout drops its future.
#[derive(Debug, Clone)]
pub struct AdbRunner {
    adb_path: String,
    timeout: Duration,
}

impl AdbRunner {
    pub fn new(adb_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            adb_path: adb_path.into(),
            timeout,
        }
    }

    pub fn adb_path(&self) -> &str {
        &self.adb_path
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn run(&self, device: Option<&DeviceHandle>, args: &[&str]) -> Result<CommandOutput> {
        self.run_with_timeout(device, args, self.timeout).await
    }

    pub async fn run_with_timeout(
        &self,
        device: Option<&DeviceHandle>,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput> {
        let mut cmd = Command::new(&self.adb_path);
        if let Some(device) = device {
            cmd.arg("-s").arg(device.serial());
        }
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!("{} {}", self.adb_path, args.join(" "));

        let output = tokio::time::timeout(timeout, cmd.output())
            .await
            .map_err(|_| {
                AutomationError::command(format!(
                    "adb {} timed out after {}s",
                    args.join(" "),
                    timeout.as_secs_f64()
                ))
            })?
            .map_err(|e| {
                AutomationError::command(format!("failed to invoke {}: {}", self.adb_path, e))
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            let detail = if stderr.trim().is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            };
            return Err(AutomationError::CommandFailed {
                exit_code: output.status.code(),
                stderr: detail,
            });
        }

        Ok(CommandOutput { stdout, stderr })
    }

    /// Remove a scratch file on the device; a missing file is not an error.
    pub async fn remove_remote(&self, device: &DeviceHandle, path: &str) -> Result<()> {
        self.run(Some(device), &["shell", "rm", "-f", path]).await?;
        Ok(())
    }
}


/// A shell script standing in for adb; records every invocation
#[cfg(all(test, unix))]
pub(crate) mod fake {
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use std::time::Duration;

    use super::AdbRunner;

    pub(crate) struct FakeAdb {
        path: PathBuf,
        log: PathBuf,
    }

    impl FakeAdb {
        /// `body` runs with the `-s <serial>` prefix already shifted off
        pub(crate) fn new(dir: &Path, body: &str) -> Self {
            let path = dir.join("adb");
            let log = dir.join("calls.log");
            let script = format!(
                "#!/bin/sh\necho \"$*\" >> '{}'\nshift 2\n{}\n",
                log.display(),
                body
            );
            fs::write(&path, script).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            Self { path, log }
        }

        pub(crate) fn runner(&self) -> AdbRunner {
            AdbRunner::new(self.path.to_string_lossy(), Duration::from_secs(5))
        }

        /// Recorded argument lists, serial prefix included
        pub(crate) fn calls(&self) -> Vec<String> {
            fs::read_to_string(&self.log)
                .unwrap_or_default()
                .lines()
                .map(str::to_string)
                .collect()
        }
    }
}
