//! Workflow executor: drives a run through its pipeline
//!
//! Every step is bracketed by an interrupt check (cancellation and the
//! overall workflow budget) and a step record. A run that reaches `Running`
//! always ends with a terminal state persisted before `execute` returns.

use std::time::Duration;

use chrono::Utc;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::steps::{self, describe};
use super::{
    CancelToken, ExecutionReport, InstallResult, LogLevel, RunError, RunId, RunState,
    StepLog, StepOutcome, StepRecord, WorkflowKind, WorkflowRun,
};
use crate::config::AutomationConfig;
use crate::driver::{DeviceDriver, DeviceHandle, KeyCode, LaunchTarget};
use crate::error::{AutomationError, Result};
use crate::probe::{loose_mentions, AttributeProbe, UiProbe, UiProbeResult};
use crate::screenshot_saver::ScreenshotSaver;
use crate::store::{NewRun, RunStore, ScreenshotRecord};

/// Per-execution state; dropped when `execute` returns
struct RunContext {
    run_id: RunId,
    execution_id: Uuid,
    /// `None` when the budget does not fit in an `Instant`
    deadline: Option<Instant>,
    device: Option<DeviceHandle>,
    steps: StepLog,
    install_result: Option<InstallResult>,
    screenshot: Option<ScreenshotRecord>,
}

impl RunContext {
    fn device(&self) -> Result<DeviceHandle> {
        self.device.clone().ok_or(AutomationError::NoDevice)
    }
}

pub struct WorkflowExecutor<D, S, P = AttributeProbe> {
    driver: D,
    store: S,
    probe: P,
    config: AutomationConfig,
    saver: ScreenshotSaver,
    cancel: CancelToken,
}

impl<D, S> WorkflowExecutor<D, S>
where
    D: DeviceDriver,
    S: RunStore,
{
    pub fn new(driver: D, store: S, config: AutomationConfig) -> Self {
        Self {
            saver: ScreenshotSaver::from_config(&config),
            driver,
            store,
            probe: AttributeProbe,
            config,
            cancel: CancelToken::new(),
        }
    }
}

impl<D, S, P> WorkflowExecutor<D, S, P>
where
    D: DeviceDriver,
    S: RunStore,
    P: UiProbe,
{
    /// Swap the installed-state detector
    pub fn with_probe<Q: UiProbe>(self, probe: Q) -> WorkflowExecutor<D, S, Q> {
        WorkflowExecutor {
            driver: self.driver,
            store: self.store,
            probe,
            config: self.config,
            saver: self.saver,
            cancel: self.cancel,
        }
    }

    /// Token observed between steps and poll ticks
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &AutomationConfig {
        &self.config
    }

    /// Create a run for the configured target and execute it
    pub async fn run_workflow(
        &self,
        kind: WorkflowKind,
        owner: i64,
        force_restart: bool,
    ) -> Result<ExecutionReport> {
        let run_id = self
            .store
            .create_run(NewRun::new(kind, owner, self.config.target.package.clone()))
            .await?;
        info!("Created {} workflow run {}", kind, run_id);
        self.execute(run_id, force_restart).await
    }

    /// Execute an existing run.
    ///
    /// `Err` means the run was rejected before it started (unknown, finished,
    /// already running, wrong target) and its state is untouched. Once the run
    /// is `Running`, every outcome comes back as `Ok` with the terminal state
    /// in the report.
    pub async fn execute(&self, run_id: RunId, force_restart: bool) -> Result<ExecutionReport> {
        let run = self
            .store
            .get_run(run_id)
            .await?
            .ok_or(AutomationError::RunNotFound(run_id))?;

        self.admit(&run)?;

        let execution_id = Uuid::new_v4();
        let span = info_span!(
            "workflow",
            run_id,
            kind = %run.kind,
            execution_id = %execution_id
        );
        self.execute_admitted(run, execution_id, force_restart)
            .instrument(span)
            .await
    }

    /// Checks that need no store write: finished runs and the target.
    ///
    /// Mutual exclusion is decided by `RunStore::try_start`.
    fn admit(&self, run: &WorkflowRun) -> Result<()> {
        if run.state.is_terminal() {
            return Err(AutomationError::RunFinished {
                run_id: run.id,
                state: run.state,
            });
        }

        if run.target != self.config.target.package {
            return Err(AutomationError::TargetMismatch {
                run_target: run.target.clone(),
                configured: self.config.target.package.clone(),
            });
        }

        Ok(())
    }

    async fn execute_admitted(
        &self,
        run: WorkflowRun,
        execution_id: Uuid,
        force_restart: bool,
    ) -> Result<ExecutionReport> {
        let mut ctx = RunContext {
            run_id: run.id,
            execution_id,
            deadline: Instant::now().checked_add(self.config.timing.workflow.workflow_timeout),
            device: None,
            steps: StepLog::default(),
            install_result: None,
            screenshot: None,
        };

        let overridden = self.store.try_start(run.id, force_restart).await?;
        if !overridden.is_empty() {
            let message = format!("force_restart set; overriding running runs {:?}", overridden);
            self.record(
                &mut ctx,
                steps::FORCE_RESTART,
                StepOutcome::Ok,
                LogLevel::Warning,
                message,
                None,
            )
            .await;
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let start_message = format!(
            "{} ({} workflow for {}: {})",
            describe(steps::EXECUTION_START),
            run.kind,
            run.target,
            steps::pipeline(run.kind).join(", ")
        );
        self.record(
            &mut ctx,
            steps::EXECUTION_START,
            StepOutcome::Ok,
            LogLevel::Info,
            start_message,
            None,
        )
        .await;

        let result = self.run_pipeline(&run, &mut ctx).await;

        let (state, message, run_error) = match result {
            Ok(()) => (RunState::Completed, self.summary(&run, &ctx), None),
            Err(e) => {
                let state = match &e {
                    e if e.is_timeout() => RunState::TimedOut,
                    AutomationError::Cancelled => RunState::Cancelled,
                    _ => RunState::Failed,
                };
                (state, e.to_string(), Some(RunError::from(&e)))
            }
        };

        let level = match state {
            RunState::Completed => LogLevel::Info,
            RunState::Failed => LogLevel::Error,
            _ => LogLevel::Warning,
        };
        let outcome = StepOutcome::terminal(state).unwrap_or(StepOutcome::Failed);
        let terminal_message = match &run_error {
            Some(err) => format!("[{}] {}", err.code, err.message),
            None => message.clone(),
        };
        self.record(
            &mut ctx,
            steps::terminal_step(state),
            outcome,
            level,
            terminal_message,
            Some(clock.elapsed()),
        )
        .await;

        let stored_error = run_error.as_ref().map(|e| e.message.clone());
        if let Err(e) = self.store.update_run_state(run.id, state, stored_error).await {
            error!("Failed to persist terminal state {} for run {}: {}", state, run.id, e);
            return Err(e);
        }

        info!("Workflow run {} finished as {}: {}", run.id, state, message);

        Ok(ExecutionReport {
            run_id: ctx.run_id,
            execution_id: ctx.execution_id,
            kind: run.kind,
            state,
            message,
            install_result: ctx.install_result,
            screenshot: ctx.screenshot,
            error: run_error,
            started_at,
            finished_at: Utc::now(),
            steps: ctx.steps,
        })
    }

    fn summary(&self, run: &WorkflowRun, ctx: &RunContext) -> String {
        let install = match ctx.install_result {
            Some(InstallResult::AlreadyInstalled) => "Game already installed",
            Some(InstallResult::InstallSuccess) => "Game installed successfully",
            None => "",
        };
        let screenshot = ctx
            .screenshot
            .as_ref()
            .map(|s| format!("Screenshot saved: {}", s.file_name));

        match (run.kind, screenshot) {
            (WorkflowKind::Install, _) | (_, None) => install.to_string(),
            (WorkflowKind::Screenshot, Some(shot)) => shot,
            (WorkflowKind::Both, Some(shot)) => format!("{}; {}", install, shot),
        }
    }

    async fn run_pipeline(&self, run: &WorkflowRun, ctx: &mut RunContext) -> Result<()> {
        self.check_emulator(ctx).await?;

        match run.kind {
            WorkflowKind::Install => {
                ctx.install_result = Some(self.install(ctx).await?);
            }
            WorkflowKind::Screenshot => {
                ctx.screenshot = Some(self.screenshot(ctx).await?);
            }
            WorkflowKind::Both => {
                self.check_interrupt(ctx)?;
                let started = Instant::now();
                let result = self.install(ctx).await;
                let install = self
                    .complete(ctx, steps::INSTALL_WORKFLOW, started, result, |r| {
                        format!("Install workflow finished: {}", r)
                    })
                    .await?;
                ctx.install_result = Some(install);

                self.check_interrupt(ctx)?;
                let started = Instant::now();
                let result = self.screenshot(ctx).await;
                let shot = self
                    .complete(ctx, steps::SCREENSHOT_WORKFLOW, started, result, |s| {
                        format!("Screenshot workflow finished: {}", s.file_name)
                    })
                    .await?;
                ctx.screenshot = Some(shot);
            }
        }

        Ok(())
    }

    async fn check_emulator(&self, ctx: &mut RunContext) -> Result<()> {
        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let result = self.resolve_device().await;
        let device = self
            .complete(ctx, steps::CHECK_EMULATOR, started, result, |d| {
                format!("Using device {}", d)
            })
            .await?;
        ctx.device = Some(device);
        Ok(())
    }

    /// The configured serial if attached, else the first available device
    async fn resolve_device(&self) -> Result<DeviceHandle> {
        let devices = self.driver.list_devices().await?;
        debug!("Available devices: {:?}", devices);

        match &self.config.device_serial {
            Some(serial) => devices
                .into_iter()
                .find(|d| d.serial() == serial)
                .ok_or(AutomationError::NoDevice),
            None => devices.into_iter().next().ok_or(AutomationError::NoDevice),
        }
    }

    async fn install(&self, ctx: &mut RunContext) -> Result<InstallResult> {
        let settle = &self.config.timing.settle;
        let target = &self.config.target;

        self.reset_home(ctx).await?;

        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let device = ctx.device()?;
        let play_store = LaunchTarget::Component(target.store_component.clone());
        let result = self.launch(&device, play_store, settle.store_launch_settle).await;
        self.complete(ctx, steps::OPEN_PLAY_STORE, started, result, |_| {
            describe(steps::OPEN_PLAY_STORE).to_string()
        })
        .await?;

        // deep link straight to the details page; no UI search
        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let link = target.store_deep_link();
        let page = LaunchTarget::ViewUri(link.clone());
        let result = self.launch(&device, page, settle.store_page_settle).await;
        self.complete(ctx, steps::OPEN_STORE_PAGE, started, result, |_| {
            format!("Opened {}", link)
        })
        .await?;

        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let result = self.detect(&device).await;
        let probe = self
            .complete(ctx, steps::DETECT_INSTALLED, started, result, |p| {
                format!(
                    "play={} uninstall={}",
                    p.play_present, p.uninstall_present
                )
            })
            .await?;
        if probe.is_installed() {
            info!("{} is already installed, skipping install", target.package);
            return Ok(InstallResult::AlreadyInstalled);
        }

        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let result = self.tap_install(&device).await;
        self.complete(ctx, steps::CLICK_INSTALL, started, result, |taps| {
            format!(
                "Tapped install at ({}, {}) {} times",
                self.config.install_tap.x, self.config.install_tap.y, taps
            )
        })
        .await?;

        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let result = self.wait_for_installation(ctx, &device).await;
        self.complete(ctx, steps::WAIT_INSTALLATION, started, result, |ticks| {
            format!("Installation detected after {} polls", ticks)
        })
        .await?;

        Ok(InstallResult::InstallSuccess)
    }

    async fn screenshot(&self, ctx: &mut RunContext) -> Result<ScreenshotRecord> {
        let settle = &self.config.timing.settle;
        let target = &self.config.target;
        let device = ctx.device()?;

        // package list, not the UI, decides whether there is anything to launch
        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let result = self
            .driver
            .list_installed_packages(&device)
            .await
            .and_then(|packages| {
                if packages.contains(&target.package) {
                    Ok(())
                } else {
                    Err(AutomationError::AppNotInstalled(target.package.clone()))
                }
            });
        self.complete(ctx, steps::CHECK_INSTALLATION, started, result, |_| {
            format!("{} is installed", target.package)
        })
        .await?;

        self.reset_home(ctx).await?;

        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let game = LaunchTarget::Component(target.launch_component.clone());
        let result = self.launch(&device, game, settle.app_launch_settle).await;
        self.complete(ctx, steps::LAUNCH_GAME, started, result, |_| {
            format!("Launched {}", target.launch_component)
        })
        .await?;

        self.check_interrupt(ctx)?;
        let started = Instant::now();
        self.settle(settle.app_load_settle).await;
        self.complete(ctx, steps::WAIT_LOAD, started, Ok(()), |_| {
            format!("Waited {}s for the game to load", settle.app_load_settle.as_secs_f64())
        })
        .await?;

        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let result = self.driver.capture_screenshot(&device).await;
        let png = self
            .complete(ctx, steps::TAKE_SCREENSHOT, started, result, |bytes| {
                format!("Captured {} bytes", bytes.len())
            })
            .await?;

        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let result = self.save_screenshot(ctx.run_id, &png).await;
        self.complete(ctx, steps::SAVE_SCREENSHOT, started, result, |record| {
            format!(
                "Saved {} ({}x{}, {} bytes)",
                record.path, record.width, record.height, record.size_bytes
            )
        })
        .await
    }

    async fn reset_home(&self, ctx: &mut RunContext) -> Result<()> {
        self.check_interrupt(ctx)?;
        let started = Instant::now();
        let device = ctx.device()?;
        let result = self.driver.press_key(&device, KeyCode::Home).await;
        if result.is_ok() {
            self.settle(self.config.timing.settle.home_settle).await;
        }
        self.complete(ctx, steps::RESET_HOME, started, result, |_| {
            describe(steps::RESET_HOME).to_string()
        })
        .await
    }

    async fn launch(
        &self,
        device: &DeviceHandle,
        target: LaunchTarget,
        settle: Duration,
    ) -> Result<()> {
        debug!("Starting {}", target);
        self.driver.start_activity(device, &target).await?;
        self.settle(settle).await;
        Ok(())
    }

    /// Repeated taps guard against a tap landing before the button is live.
    async fn tap_install(&self, device: &DeviceHandle) -> Result<u32> {
        let point = self.config.install_tap;
        let repeats = self.config.install_tap_repeats.max(1);
        for attempt in 1..=repeats {
            debug!("Install tap {}/{} at ({}, {})", attempt, repeats, point.x, point.y);
            self.driver.tap(device, point.x, point.y).await?;
            self.settle(self.config.timing.settle.install_tap_interval).await;
        }
        Ok(repeats)
    }

    /// A fresh dump and probe; never reuses an earlier dump
    async fn detect(&self, device: &DeviceHandle) -> Result<UiProbeResult> {
        let dump = self.driver.dump_ui_hierarchy(device).await?;
        let result = self.probe.probe(&dump);
        let (play_word, uninstall_word) = loose_mentions(&dump);
        debug!(
            "UI probe: play={} uninstall={} (loose mentions: play={} uninstall={})",
            result.play_present, result.uninstall_present, play_word, uninstall_word
        );
        Ok(result)
    }

    /// Poll until the probe reports the app installed.
    ///
    /// Returns the tick the app was detected on. A failed dump counts as a
    /// miss; running out of ticks is `TimedOut`.
    async fn wait_for_installation(
        &self,
        ctx: &mut RunContext,
        device: &DeviceHandle,
    ) -> Result<u32> {
        let timing = &self.config.timing.workflow;
        let max_ticks = timing.max_poll_ticks();

        for tick in 1..=max_ticks {
            self.check_interrupt(ctx)?;
            sleep(timing.poll_interval).await;

            let started = Instant::now();
            let (installed, level, message) = match self.detect(device).await {
                Ok(result) if result.is_installed() => (
                    true,
                    LogLevel::Info,
                    format!("Installation detected on poll {}/{}", tick, max_ticks),
                ),
                Ok(_) => (
                    false,
                    LogLevel::Info,
                    format!("Not installed yet (poll {}/{})", tick, max_ticks),
                ),
                Err(e) => (
                    false,
                    LogLevel::Warning,
                    format!("Probe failed on poll {}/{}: {}", tick, max_ticks, e),
                ),
            };
            let outcome = if installed {
                StepOutcome::Ok
            } else {
                StepOutcome::InProgress
            };
            let elapsed = Some(started.elapsed());
            self.record(ctx, steps::POLL_INSTALLATION, outcome, level, message, elapsed).await;
            if installed {
                return Ok(tick);
            }
        }

        Err(AutomationError::TimedOut(format!(
            "{} not installed after {}s ({} polls)",
            self.config.target.package,
            timing.install_timeout.as_secs_f64(),
            max_ticks
        )))
    }

    async fn save_screenshot(&self, run_id: RunId, png: &[u8]) -> Result<ScreenshotRecord> {
        let saved = self.saver.save(run_id, png).await?;
        self.store
            .create_screenshot_record(run_id, saved.to_new_screenshot())
            .await
    }

    async fn settle(&self, duration: Duration) {
        if !duration.is_zero() {
            sleep(duration).await;
        }
    }

    fn check_interrupt(&self, ctx: &RunContext) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(AutomationError::Cancelled);
        }
        if ctx.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(AutomationError::WorkflowTimedOut(format!(
                "workflow exceeded its {}s budget",
                self.config.timing.workflow.workflow_timeout.as_secs_f64()
            )));
        }
        Ok(())
    }

    /// Record the step outcome and hand the result back
    async fn complete<T>(
        &self,
        ctx: &mut RunContext,
        step: &str,
        started: Instant,
        result: Result<T>,
        ok_message: impl FnOnce(&T) -> String,
    ) -> Result<T> {
        let elapsed = started.elapsed();
        match &result {
            Ok(value) => {
                let message = ok_message(value);
                self.record(ctx, step, StepOutcome::Ok, LogLevel::Info, message, Some(elapsed))
                    .await;
            }
            Err(e) => {
                let level = if e.is_timeout() || matches!(e, AutomationError::Cancelled) {
                    LogLevel::Warning
                } else {
                    LogLevel::Error
                };
                self.record(ctx, step, StepOutcome::Error, level, e.to_string(), Some(elapsed))
                    .await;
            }
        }
        result
    }

    /// Append to the run's step log and the store; a store failure is only logged
    async fn record(
        &self,
        ctx: &mut RunContext,
        step: &str,
        outcome: StepOutcome,
        level: LogLevel,
        message: String,
        duration: Option<Duration>,
    ) {
        match level {
            LogLevel::Debug => debug!("[{}] {}", step, message),
            LogLevel::Info => info!("[{}] {}", step, message),
            LogLevel::Warning => warn!("[{}] {}", step, message),
            LogLevel::Error | LogLevel::Critical => error!("[{}] {}", step, message),
        }

        let record = StepRecord {
            step: step.to_string(),
            outcome,
            level,
            message,
            timestamp: Utc::now(),
            duration_ms: duration.map(|d| d.as_millis() as u64),
        };

        if let Err(e) = self.store.append_log(ctx.run_id, &record).await {
            warn!("Failed to persist step record '{}': {}", step, e);
        }
        ctx.steps.push(record);
    }
}
