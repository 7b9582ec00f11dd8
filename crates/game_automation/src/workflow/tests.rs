use std::collections::{BTreeSet, VecDeque};
use std::io::Cursor;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::steps;
use super::*;
use crate::config::{AutomationConfig, TimingConfig};
use crate::driver::{DeviceDriver, DeviceHandle, KeyCode, LaunchTarget};
use crate::error::Result;
use crate::store::{
    MemoryStore, NewRun, NewScreenshot, Page, RunQuery, RunStatistics, RunStore,
    ScreenshotRecord,
};

const PACKAGE: &str = "com.garena.game.kgvn";

const STORE_PAGE_DUMP: &str = r#"<hierarchy rotation="1">
  <node text="Install" class="android.widget.Button" content-desc="Install" />
  <node text="Play Protect" class="android.widget.TextView" content-desc="" />
</hierarchy>"#;

const PLAY_DUMP: &str = r#"<hierarchy rotation="1">
  <node text="Play" class="android.widget.Button" content-desc="" />
</hierarchy>"#;

const UNINSTALL_DUMP: &str = r#"<hierarchy rotation="1">
  <node text="" class="android.widget.Button" content-desc="Uninstall" />
</hierarchy>"#;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    ListDevices,
    PressKey(KeyCode),
    Tap(i32, i32),
    Start(LaunchTarget),
    Packages,
    Capture,
    Dump,
}

#[derive(Debug, Clone, Copy)]
enum Dump {
    NotInstalled,
    Play,
    Uninstall,
    Fail,
}

/// In-memory device whose answers are scripted per test
struct ScriptedDriver {
    bridge_available: bool,
    devices: Vec<DeviceHandle>,
    packages: BTreeSet<String>,
    dumps: Mutex<VecDeque<Dump>>,
    screenshot: Vec<u8>,
    cancel_on_dump: Mutex<Option<(usize, CancelToken)>>,
    calls: Mutex<Vec<Call>>,
}

impl ScriptedDriver {
    fn new() -> Self {
        Self {
            bridge_available: true,
            devices: vec![DeviceHandle::new("emulator-5554")],
            packages: BTreeSet::new(),
            dumps: Mutex::new(VecDeque::new()),
            screenshot: png(24, 12),
            cancel_on_dump: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_dumps(self, dumps: &[Dump]) -> Self {
        *self.dumps.lock().unwrap() = dumps.iter().copied().collect();
        self
    }

    fn with_installed_package(mut self) -> Self {
        self.packages.insert(PACKAGE.to_string());
        self
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    fn log(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

fn png(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::new(width, height);
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

#[async_trait]
impl DeviceDriver for ScriptedDriver {
    async fn list_devices(&self) -> Result<Vec<DeviceHandle>> {
        self.log(Call::ListDevices);
        if !self.bridge_available {
            return Err(AutomationError::DriverUnavailable(
                "adb version exited with status 1".to_string(),
            ));
        }
        Ok(self.devices.clone())
    }

    async fn press_key(&self, _device: &DeviceHandle, key: KeyCode) -> Result<()> {
        self.log(Call::PressKey(key));
        Ok(())
    }

    async fn tap(&self, _device: &DeviceHandle, x: i32, y: i32) -> Result<()> {
        self.log(Call::Tap(x, y));
        Ok(())
    }

    async fn type_text(&self, _device: &DeviceHandle, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn start_activity(&self, _device: &DeviceHandle, target: &LaunchTarget) -> Result<()> {
        self.log(Call::Start(target.clone()));
        Ok(())
    }

    async fn list_installed_packages(&self, _device: &DeviceHandle) -> Result<BTreeSet<String>> {
        self.log(Call::Packages);
        Ok(self.packages.clone())
    }

    async fn capture_screenshot(&self, _device: &DeviceHandle) -> Result<Vec<u8>> {
        self.log(Call::Capture);
        Ok(self.screenshot.clone())
    }

    async fn dump_ui_hierarchy(&self, _device: &DeviceHandle) -> Result<String> {
        self.log(Call::Dump);
        let dumps_so_far = self.count(|c| *c == Call::Dump);
        if let Some((at, token)) = self.cancel_on_dump.lock().unwrap().as_ref() {
            if dumps_so_far >= *at {
                token.cancel();
            }
        }

        let next = self
            .dumps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Dump::NotInstalled);
        match next {
            Dump::NotInstalled => Ok(STORE_PAGE_DUMP.to_string()),
            Dump::Play => Ok(PLAY_DUMP.to_string()),
            Dump::Uninstall => Ok(UNINSTALL_DUMP.to_string()),
            Dump::Fail => Err(AutomationError::UiProbeFailed(
                "uiautomator dump: ERROR: null root node".to_string(),
            )),
        }
    }
}

/// Store that yields after every run lookup, so concurrent executions
/// interleave between loading a run and starting it
struct YieldingStore(MemoryStore);

#[async_trait]
impl RunStore for YieldingStore {
    async fn create_run(&self, run: NewRun) -> Result<RunId> {
        self.0.create_run(run).await
    }

    async fn get_run(&self, id: RunId) -> Result<Option<WorkflowRun>> {
        let run = self.0.get_run(id).await;
        tokio::task::yield_now().await;
        run
    }

    async fn try_start(&self, id: RunId, force_restart: bool) -> Result<Vec<RunId>> {
        self.0.try_start(id, force_restart).await
    }

    async fn update_run_state(
        &self,
        id: RunId,
        state: RunState,
        error: Option<String>,
    ) -> Result<()> {
        self.0.update_run_state(id, state, error).await
    }

    async fn append_log(&self, id: RunId, record: &StepRecord) -> Result<()> {
        self.0.append_log(id, record).await
    }

    async fn create_screenshot_record(
        &self,
        id: RunId,
        screenshot: NewScreenshot,
    ) -> Result<ScreenshotRecord> {
        self.0.create_screenshot_record(id, screenshot).await
    }

    async fn list_logs(&self, id: RunId, level: Option<LogLevel>) -> Result<Vec<StepRecord>> {
        self.0.list_logs(id, level).await
    }

    async fn list_screenshots(&self, id: RunId) -> Result<Vec<ScreenshotRecord>> {
        self.0.list_screenshots(id).await
    }

    async fn list_runs(&self, query: &RunQuery) -> Result<Page<WorkflowRun>> {
        self.0.list_runs(query).await
    }

    async fn statistics(&self, owner: Option<i64>) -> Result<RunStatistics> {
        self.0.statistics(owner).await
    }
}

fn config(dir: &std::path::Path) -> AutomationConfig {
    AutomationConfig::new()
        .with_screenshot_dir(dir)
        .with_timing(TimingConfig::default())
}

fn executor(
    driver: ScriptedDriver,
    dir: &std::path::Path,
) -> WorkflowExecutor<ScriptedDriver, MemoryStore> {
    WorkflowExecutor::new(driver, MemoryStore::new(), config(dir))
}

fn assert_terminal_record_matches(report: &ExecutionReport) {
    let last = report.steps.last().expect("step log is never empty");
    assert_eq!(last.outcome.run_state(), Some(report.state));
    assert_eq!(last.step, steps::terminal_step(report.state));
}

#[tokio::test(start_paused = true)]
async fn test_install_detected_on_second_poll() {
    let dir = tempfile::tempdir().unwrap();
    let driver =
        ScriptedDriver::new().with_dumps(&[Dump::NotInstalled, Dump::NotInstalled, Dump::Play]);
    let exec = executor(driver, dir.path());

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.install_result, Some(InstallResult::InstallSuccess));
    assert_eq!(report.steps.count(steps::POLL_INSTALLATION), 2);
    assert!(report.error.is_none());
    assert_terminal_record_matches(&report);

    // one dump for detect_installed plus one fresh dump per poll
    let driver = exec.driver();
    assert_eq!(driver.count(|c| *c == Call::Dump), 3);
    assert_eq!(driver.count(|c| *c == Call::Tap(2117, 350)), 3);
    assert!(driver
        .calls()
        .contains(&Call::Start(LaunchTarget::ViewUri(format!("market://details?id={}", PACKAGE)))));

    let run = exec.store().get_run(report.run_id).await.unwrap().unwrap();
    assert_eq!(run.state, RunState::Completed);
    assert!(run.started_at.is_some());
    assert!(run.finished_at.is_some());

    let logs = exec.store().list_logs(report.run_id, None).await.unwrap();
    assert_eq!(logs.len(), report.steps.len());
    assert_eq!(logs.last().unwrap().outcome, StepOutcome::Completed);
}

#[tokio::test(start_paused = true)]
async fn test_already_installed_skips_install_tap() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ScriptedDriver::new().with_dumps(&[Dump::Uninstall]);
    let exec = executor(driver, dir.path());

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.install_result, Some(InstallResult::AlreadyInstalled));
    assert!(!report.steps.contains(steps::CLICK_INSTALL));
    assert!(!report.steps.contains(steps::WAIT_INSTALLATION));
    assert_eq!(exec.driver().count(|c| matches!(c, Call::Tap(..))), 0);
    assert_terminal_record_matches(&report);
}

#[tokio::test(start_paused = true)]
async fn test_unavailable_bridge_fails_before_device_interaction() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = ScriptedDriver::new();
    driver.bridge_available = false;
    let exec = executor(driver, dir.path());

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::Failed);
    let error = report.error.clone().unwrap();
    assert_eq!(error.code, "EMULATOR_NOT_AVAILABLE");
    assert_eq!(exec.driver().calls(), vec![Call::ListDevices]);
    assert!(!report.steps.contains(steps::RESET_HOME));
    assert_terminal_record_matches(&report);

    let run = exec.store().get_run(report.run_id).await.unwrap().unwrap();
    assert_eq!(run.state, RunState::Failed);
    assert!(run.error.unwrap().contains("unavailable"));
}

#[cfg(unix)]
#[tokio::test]
async fn test_failed_version_probe_with_adb_driver() {
    use crate::adb::AdbDriver;

    let dir = tempfile::tempdir().unwrap();
    let driver = AdbDriver::new("false", Duration::from_secs(5), Duration::from_secs(5));
    let exec = WorkflowExecutor::new(
        driver,
        MemoryStore::new(),
        config(dir.path()).with_timing(TimingConfig::immediate()),
    );

    let report = exec.run_workflow(WorkflowKind::Screenshot, 1, false).await.unwrap();
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.error.unwrap().code, "EMULATOR_NOT_AVAILABLE");
    assert_eq!(
        report.steps.iter().map(|r| r.step.as_str()).collect::<Vec<_>>(),
        vec![steps::EXECUTION_START, steps::CHECK_EMULATOR, steps::EXECUTION_ERROR]
    );
}

#[tokio::test(start_paused = true)]
async fn test_no_device_attached() {
    let dir = tempfile::tempdir().unwrap();
    let mut driver = ScriptedDriver::new();
    driver.devices.clear();
    let exec = executor(driver, dir.path());

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();
    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.error.unwrap().message, "No emulator devices found");
}

#[tokio::test(start_paused = true)]
async fn test_screenshot_requires_installed_package() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(ScriptedDriver::new(), dir.path());

    let report = exec.run_workflow(WorkflowKind::Screenshot, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::Failed);
    let error = report.error.clone().unwrap();
    assert_eq!(error.code, "APP_NOT_INSTALLED");
    assert!(error.message.contains("not installed"));
    assert_eq!(
        exec.driver().calls(),
        vec![Call::ListDevices, Call::Packages]
    );
    assert_terminal_record_matches(&report);
}

#[tokio::test(start_paused = true)]
async fn test_screenshot_pipeline_saves_record() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(ScriptedDriver::new().with_installed_package(), dir.path());

    let report = exec.run_workflow(WorkflowKind::Screenshot, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    let shot = report.screenshot.clone().unwrap();
    assert_eq!((shot.width, shot.height), (24, 12));
    assert!(shot.file_name.starts_with(&format!("lienquan_workflow_{}_", report.run_id)));
    assert!(std::path::Path::new(&shot.path).exists());
    assert_eq!(report.message, format!("Screenshot saved: {}", shot.file_name));

    let launched = exec.driver().calls().contains(&Call::Start(LaunchTarget::Component(
        "com.garena.game.kgvn/com.garena.game.kgtw.SGameActivity".to_string(),
    )));
    assert!(launched);

    let stored = exec.store().list_screenshots(report.run_id).await.unwrap();
    assert_eq!(stored, vec![shot]);

    let start = report.steps.iter().next().unwrap();
    assert!(start.message.ends_with(
        "check_emulator, check_installation, reset_home, launch_game, wait_load, \
         take_screenshot, save_screenshot)"
    ));

    let steps: Vec<&str> = report.steps.iter().map(|r| r.step.as_str()).collect();
    assert_eq!(
        steps,
        vec![
            steps::EXECUTION_START,
            steps::CHECK_EMULATOR,
            steps::CHECK_INSTALLATION,
            steps::RESET_HOME,
            steps::LAUNCH_GAME,
            steps::WAIT_LOAD,
            steps::TAKE_SCREENSHOT,
            steps::SAVE_SCREENSHOT,
            steps::EXECUTION_COMPLETE,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_running_run_rejected_without_force() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(ScriptedDriver::new().with_dumps(&[Dump::Play]), dir.path());
    let store = exec.store();

    let id = store
        .create_run(NewRun::new(WorkflowKind::Install, 1, PACKAGE))
        .await
        .unwrap();
    store.update_run_state(id, RunState::Running, None).await.unwrap();
    let before = store.get_run(id).await.unwrap().unwrap();

    let err = exec.execute(id, false).await.unwrap_err();
    assert!(matches!(err, AutomationError::AlreadyRunning { run_id } if run_id == id));

    assert_eq!(store.get_run(id).await.unwrap().unwrap(), before);
    assert!(store.list_logs(id, None).await.unwrap().is_empty());
    assert!(exec.driver().calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_force_restart_overrides_and_is_logged() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(ScriptedDriver::new().with_dumps(&[Dump::Play]), dir.path());
    let store = exec.store();

    let id = store
        .create_run(NewRun::new(WorkflowKind::Install, 1, PACKAGE))
        .await
        .unwrap();
    store.update_run_state(id, RunState::Running, None).await.unwrap();

    let report = exec.execute(id, true).await.unwrap();
    assert_eq!(report.state, RunState::Completed);

    let first = report.steps.iter().next().unwrap();
    assert_eq!(first.step, steps::FORCE_RESTART);
    assert_eq!(first.level, LogLevel::Warning);

    let warnings = store.list_logs(id, Some(LogLevel::Warning)).await.unwrap();
    assert!(warnings.iter().any(|r| r.step == steps::FORCE_RESTART));
}

#[tokio::test(start_paused = true)]
async fn test_same_identity_runs_are_exclusive() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(ScriptedDriver::new().with_dumps(&[Dump::Play]), dir.path());
    let store = exec.store();

    let first = store
        .create_run(NewRun::new(WorkflowKind::Install, 1, PACKAGE))
        .await
        .unwrap();
    store.update_run_state(first, RunState::Running, None).await.unwrap();

    let second = store
        .create_run(NewRun::new(WorkflowKind::Install, 2, PACKAGE))
        .await
        .unwrap();
    let err = exec.execute(second, false).await.unwrap_err();
    assert!(matches!(err, AutomationError::AlreadyRunning { run_id } if run_id == first));
    assert_eq!(
        store.get_run(second).await.unwrap().unwrap().state,
        RunState::Pending
    );

    // a different kind is a different identity
    let other_kind = store
        .create_run(NewRun::new(WorkflowKind::Screenshot, 1, PACKAGE))
        .await
        .unwrap();
    let report = exec.execute(other_kind, false).await.unwrap();
    assert_eq!(report.state, RunState::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_executions_admit_one_run() {
    let dir = tempfile::tempdir().unwrap();
    let exec = WorkflowExecutor::new(
        ScriptedDriver::new().with_dumps(&[Dump::Play]),
        YieldingStore(MemoryStore::new()),
        config(dir.path()),
    );
    let store = exec.store();
    let a = store
        .create_run(NewRun::new(WorkflowKind::Install, 1, PACKAGE))
        .await
        .unwrap();
    let b = store
        .create_run(NewRun::new(WorkflowKind::Install, 2, PACKAGE))
        .await
        .unwrap();

    let (ra, rb) = tokio::join!(exec.execute(a, false), exec.execute(b, false));
    let (winner, rejected, rejected_id) = match (ra, rb) {
        (Ok(report), Err(e)) => (report, e, b),
        (Err(e), Ok(report)) => (report, e, a),
        _ => panic!("expected exactly one of the two runs to be admitted"),
    };

    assert_eq!(winner.state, RunState::Completed);
    assert!(matches!(
        rejected,
        AutomationError::AlreadyRunning { run_id } if run_id == winner.run_id
    ));
    let run = store.get_run(rejected_id).await.unwrap().unwrap();
    assert_eq!(run.state, RunState::Pending);
    assert!(store.list_logs(rejected_id, None).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_poll_budget_exhausted_is_timed_out() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(ScriptedDriver::new(), dir.path());

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::TimedOut);
    assert_eq!(report.error.clone().unwrap().code, "INSTALLATION_TIMEOUT");
    assert_eq!(report.steps.count(steps::POLL_INSTALLATION), 60);
    assert!(report.install_result.is_none());
    assert_terminal_record_matches(&report);

    let run = exec.store().get_run(report.run_id).await.unwrap().unwrap();
    assert_eq!(run.state, RunState::TimedOut);
}

#[tokio::test(start_paused = true)]
async fn test_probe_failure_while_polling_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let driver =
        ScriptedDriver::new().with_dumps(&[Dump::NotInstalled, Dump::Fail, Dump::Uninstall]);
    let exec = executor(driver, dir.path());

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    let polls: Vec<&StepRecord> = report
        .steps
        .iter()
        .filter(|r| r.step == steps::POLL_INSTALLATION)
        .collect();
    assert_eq!(polls.len(), 2);
    assert_eq!(polls[0].level, LogLevel::Warning);
    assert_eq!(polls[0].outcome, StepOutcome::InProgress);
    assert_eq!(polls[1].outcome, StepOutcome::Ok);
}

#[tokio::test(start_paused = true)]
async fn test_probe_failure_before_install_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(ScriptedDriver::new().with_dumps(&[Dump::Fail]), dir.path());

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.error.unwrap().code, "UI_PROBE_ERROR");
    assert_eq!(exec.driver().count(|c| matches!(c, Call::Tap(..))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_overall_budget_is_enforced_between_steps() {
    let dir = tempfile::tempdir().unwrap();
    let mut timing = TimingConfig::default();
    timing.workflow.workflow_timeout = Duration::from_secs(20);
    let exec = WorkflowExecutor::new(
        ScriptedDriver::new(),
        MemoryStore::new(),
        config(dir.path()).with_timing(timing),
    );

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();

    // settles reach 21s by the time the poll would start
    assert_eq!(report.state, RunState::TimedOut);
    assert_eq!(report.error.clone().unwrap().code, "WORKFLOW_TIMEOUT");
    assert!(report.steps.contains(steps::CLICK_INSTALL));
    assert_eq!(report.steps.count(steps::POLL_INSTALLATION), 0);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_workflow_budget_is_unbounded() {
    let dir = tempfile::tempdir().unwrap();
    let mut timing = TimingConfig::default();
    timing.workflow.workflow_timeout = Duration::MAX;
    let exec = WorkflowExecutor::new(
        ScriptedDriver::new().with_dumps(&[Dump::NotInstalled, Dump::Play]),
        MemoryStore::new(),
        config(dir.path()).with_timing(timing),
    );

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();
    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.install_result, Some(InstallResult::InstallSuccess));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_polling() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ScriptedDriver::new();
    let exec = executor(driver, dir.path());
    *exec.driver().cancel_on_dump.lock().unwrap() = Some((3, exec.cancel_token()));

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::Cancelled);
    assert_eq!(report.error.clone().unwrap().code, "WORKFLOW_CANCELLED");
    // cancellation lands at the next tick, never inside a call
    assert_eq!(report.steps.count(steps::POLL_INSTALLATION), 2);
    assert_terminal_record_matches(&report);
}

#[tokio::test(start_paused = true)]
async fn test_both_runs_install_then_screenshot() {
    let dir = tempfile::tempdir().unwrap();
    let driver = ScriptedDriver::new()
        .with_installed_package()
        .with_dumps(&[Dump::Play]);
    let exec = executor(driver, dir.path());

    let report = exec.run_workflow(WorkflowKind::Both, 1, false).await.unwrap();

    assert_eq!(report.state, RunState::Completed);
    assert_eq!(report.install_result, Some(InstallResult::AlreadyInstalled));
    assert!(report.screenshot.is_some());

    let steps: Vec<&str> = report.steps.iter().map(|r| r.step.as_str()).collect();
    let install_at = steps.iter().position(|s| *s == steps::INSTALL_WORKFLOW).unwrap();
    let shot_at = steps.iter().position(|s| *s == steps::SCREENSHOT_WORKFLOW).unwrap();
    assert!(install_at < shot_at);
    assert_eq!(report.steps.count(steps::CHECK_EMULATOR), 1);
    assert_terminal_record_matches(&report);
}

#[tokio::test(start_paused = true)]
async fn test_finished_run_is_not_reexecuted() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(ScriptedDriver::new().with_dumps(&[Dump::Play]), dir.path());

    let report = exec.run_workflow(WorkflowKind::Install, 1, false).await.unwrap();
    let err = exec.execute(report.run_id, true).await.unwrap_err();
    assert!(matches!(
        err,
        AutomationError::RunFinished {
            state: RunState::Completed,
            ..
        }
    ));
}

#[tokio::test(start_paused = true)]
async fn test_unknown_run_and_wrong_target() {
    let dir = tempfile::tempdir().unwrap();
    let exec = executor(ScriptedDriver::new(), dir.path());

    assert!(matches!(
        exec.execute(404, false).await.unwrap_err(),
        AutomationError::RunNotFound(404)
    ));

    let id = exec
        .store()
        .create_run(NewRun::new(WorkflowKind::Install, 1, "com.example.other"))
        .await
        .unwrap();
    let err = exec.execute(id, false).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_TARGET");
}

#[test]
fn test_workflow_kind_parsing() {
    assert_eq!("install".parse::<WorkflowKind>().unwrap(), WorkflowKind::Install);
    assert_eq!("BOTH".parse::<WorkflowKind>().unwrap(), WorkflowKind::Both);
    let err = "deploy".parse::<WorkflowKind>().unwrap_err();
    assert_eq!(err.error_code(), "INVALID_WORKFLOW_TYPE");
}

#[test]
fn test_terminal_states() {
    assert!(!RunState::Pending.is_terminal());
    assert!(!RunState::Running.is_terminal());
    for state in [
        RunState::Completed,
        RunState::Failed,
        RunState::TimedOut,
        RunState::Cancelled,
    ] {
        assert!(state.is_terminal());
        assert_eq!(state.as_str().parse::<RunState>().unwrap(), state);
        assert_eq!(StepOutcome::terminal(state).unwrap().run_state(), Some(state));
    }
}

#[test]
fn test_report_serializes_with_snake_case_states() {
    let value = serde_json::to_value(RunState::TimedOut).unwrap();
    assert_eq!(value, "timed_out");
    let value = serde_json::to_value(InstallResult::InstallSuccess).unwrap();
    assert_eq!(value, "INSTALL_SUCCESS");
}
