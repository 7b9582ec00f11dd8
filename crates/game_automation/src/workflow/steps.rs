//! Step names emitted into a run's step log, and their descriptions

use phf::phf_map;

use super::{RunState, WorkflowKind};

pub const EXECUTION_START: &str = "execution_start";
pub const EXECUTION_COMPLETE: &str = "execution_complete";
pub const EXECUTION_ERROR: &str = "execution_error";
pub const EXECUTION_TIMEOUT: &str = "execution_timeout";
pub const EXECUTION_CANCELLED: &str = "execution_cancelled";
pub const FORCE_RESTART: &str = "force_restart";

pub const CHECK_EMULATOR: &str = "check_emulator";
pub const RESET_HOME: &str = "reset_home";
pub const OPEN_PLAY_STORE: &str = "open_play_store";
pub const OPEN_STORE_PAGE: &str = "open_store_page";
pub const DETECT_INSTALLED: &str = "detect_installed";
pub const CLICK_INSTALL: &str = "click_install";
pub const WAIT_INSTALLATION: &str = "wait_installation";
pub const POLL_INSTALLATION: &str = "poll_installation";

pub const CHECK_INSTALLATION: &str = "check_installation";
pub const LAUNCH_GAME: &str = "launch_game";
pub const WAIT_LOAD: &str = "wait_load";
pub const TAKE_SCREENSHOT: &str = "take_screenshot";
pub const SAVE_SCREENSHOT: &str = "save_screenshot";

pub const INSTALL_WORKFLOW: &str = "install_workflow";
pub const SCREENSHOT_WORKFLOW: &str = "screenshot_workflow";

/// Human-readable step descriptions used in log lines
pub static STEP_DESCRIPTIONS: phf::Map<&'static str, &'static str> = phf_map! {
    "execution_start" => "Starting workflow execution",
    "execution_complete" => "Workflow completed",
    "execution_error" => "Workflow failed",
    "execution_timeout" => "Workflow timed out",
    "execution_cancelled" => "Workflow cancelled",
    "force_restart" => "Forcing restart of a running workflow",
    "check_emulator" => "Checking emulator connection",
    "reset_home" => "Returning to the home screen",
    "open_play_store" => "Opening the Play Store",
    "open_store_page" => "Opening the app's store page",
    "detect_installed" => "Checking whether the app is already installed",
    "click_install" => "Tapping the install button",
    "wait_installation" => "Waiting for installation to finish",
    "poll_installation" => "Polling installation state",
    "check_installation" => "Verifying the app is installed",
    "launch_game" => "Launching the game",
    "wait_load" => "Waiting for the game to load",
    "take_screenshot" => "Capturing a screenshot",
    "save_screenshot" => "Saving the screenshot",
    "install_workflow" => "Install workflow",
    "screenshot_workflow" => "Screenshot workflow",
};

/// Description for a step, or the step name itself when unknown
pub fn describe(step: &str) -> &str {
    match STEP_DESCRIPTIONS.get(step) {
        Some(desc) => desc,
        None => step,
    }
}

const INSTALL_PIPELINE: &[&str] = &[
    CHECK_EMULATOR,
    RESET_HOME,
    OPEN_PLAY_STORE,
    OPEN_STORE_PAGE,
    DETECT_INSTALLED,
    CLICK_INSTALL,
    WAIT_INSTALLATION,
];

const SCREENSHOT_PIPELINE: &[&str] = &[
    CHECK_EMULATOR,
    CHECK_INSTALLATION,
    RESET_HOME,
    LAUNCH_GAME,
    WAIT_LOAD,
    TAKE_SCREENSHOT,
    SAVE_SCREENSHOT,
];

const BOTH_PIPELINE: &[&str] = &[CHECK_EMULATOR, INSTALL_WORKFLOW, SCREENSHOT_WORKFLOW];

/// The ordered top-level steps a kind runs through.
///
/// `install` may stop after `detect_installed` when the app is already there.
pub fn pipeline(kind: WorkflowKind) -> &'static [&'static str] {
    match kind {
        WorkflowKind::Install => INSTALL_PIPELINE,
        WorkflowKind::Screenshot => SCREENSHOT_PIPELINE,
        WorkflowKind::Both => BOTH_PIPELINE,
    }
}

/// Name of the bookend record closing a run in `state`
pub fn terminal_step(state: RunState) -> &'static str {
    match state {
        RunState::Completed => EXECUTION_COMPLETE,
        RunState::TimedOut => EXECUTION_TIMEOUT,
        RunState::Cancelled => EXECUTION_CANCELLED,
        RunState::Failed | RunState::Pending | RunState::Running => EXECUTION_ERROR,
    }
}
