//! gameauto - Command-line entry point for the emulator game workflows
//!
//! Usage:
//!     gameauto [OPTIONS] <COMMAND>
//!
//! Environment Variables:
//!     GAME_AUTOMATION_DB: SQLite database file (default: automation.db)
//!     GAME_AUTOMATION_ADB: Path to the adb binary (default: adb)
//!     GAME_AUTOMATION_DEVICE: Device serial for multi-device setups
//!     GAME_AUTOMATION_SCREENSHOT_DIR: Directory for saved screenshots
//!     GAME_AUTOMATION_*_SETTLE / *_TIMEOUT / POLL_INTERVAL: timing overrides in seconds
//!     RUST_LOG: log filter (default: info)

use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use game_automation::{
    AdbDriver, AttributeProbe, AutomationConfig, DeviceDriver, ExecutionReport, LogLevel,
    NewRun, RunId, RunQuery, RunState, RunStore, SqliteStore, UiProbe, WorkflowExecutor,
    WorkflowKind, WorkflowRun,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Game Automation - install and screenshot workflows for an Android emulator
#[derive(Parser, Debug)]
#[command(name = "gameauto")]
#[command(about = "Game Automation - install and screenshot workflows for an Android emulator")]
#[command(after_help = r#"Examples:
    # Install the game (no-op when already installed)
    gameauto run install

    # Launch the game and save a screenshot
    gameauto run screenshot

    # Install, then screenshot, as one run
    gameauto run both

    # Take over a run that is stuck in 'running'
    gameauto execute 12 --force-restart

    # Inspect a run
    gameauto status 12
    gameauto logs 12 --level ERROR

    # Check adb and the emulator
    gameauto doctor
"#)]
struct Cli {
    /// SQLite database file
    #[arg(long, global = true, env = "GAME_AUTOMATION_DB", default_value = "automation.db")]
    db: String,

    /// Path to the adb binary
    #[arg(long, global = true, env = "GAME_AUTOMATION_ADB", default_value = "adb")]
    adb: String,

    /// Device serial (default: first attached device)
    #[arg(short = 'd', long, global = true, env = "GAME_AUTOMATION_DEVICE")]
    device: Option<String>,

    /// Directory to save screenshots
    #[arg(long, global = true, env = "GAME_AUTOMATION_SCREENSHOT_DIR")]
    screenshot_dir: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a run and execute it
    Run {
        /// install, screenshot or both
        kind: String,
        /// Execute even if a run with the same identity is running
        #[arg(long)]
        force_restart: bool,
        /// Owner recorded on the run
        #[arg(long, default_value = "1")]
        owner: i64,
        /// Run name
        #[arg(long)]
        name: Option<String>,
    },
    /// Execute an existing pending or running run
    Execute {
        run_id: RunId,
        #[arg(long)]
        force_restart: bool,
    },
    /// Create a pending run and print its id
    Create {
        kind: String,
        #[arg(long, default_value = "1")]
        owner: i64,
        #[arg(long)]
        name: Option<String>,
    },
    /// Show a run
    Status { run_id: RunId },
    /// Show a run's step log
    Logs {
        run_id: RunId,
        /// Only records at this level (DEBUG, INFO, WARNING, ERROR, CRITICAL)
        #[arg(long)]
        level: Option<String>,
    },
    /// Show a run's screenshots
    Screenshots { run_id: RunId },
    /// List runs, newest first
    List {
        #[arg(long)]
        state: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        owner: Option<i64>,
        #[arg(long, default_value = "1")]
        page: u32,
        #[arg(long, default_value = "10")]
        page_size: u32,
    },
    /// Run statistics
    Stats {
        #[arg(long)]
        owner: Option<i64>,
    },
    /// List attached devices
    Devices,
    /// Dump the UI once and report the installed-state probe
    Probe,
    /// Check system requirements
    Doctor,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_config(cli: &Cli) -> AutomationConfig {
    let mut config = AutomationConfig::from_env().with_adb_path(cli.adb.clone());
    if let Some(serial) = &cli.device {
        config = config.with_device_serial(serial.clone());
    }
    if let Some(dir) = &cli.screenshot_dir {
        config = config.with_screenshot_dir(dir.clone());
    }
    config
}

fn parse_kind(kind: &str) -> Result<WorkflowKind> {
    kind.parse::<WorkflowKind>().map_err(|e| anyhow!(e))
}

fn open_store(cli: &Cli) -> Result<SqliteStore> {
    SqliteStore::open(&cli.db).with_context(|| format!("opening database {}", cli.db))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_report(report: &ExecutionReport, json: bool) -> Result<()> {
    if json {
        return print_json(report);
    }

    println!("{}", "=".repeat(50));
    let icon = match report.state {
        RunState::Completed => "\u{2705}",
        RunState::TimedOut => "\u{23F1}",
        RunState::Cancelled => "\u{1F6D1}",
        _ => "\u{274C}",
    };
    println!("{} Run {} ({}): {}", icon, report.run_id, report.kind, report.state);
    println!("   {}", report.message);
    if let Some(result) = report.install_result {
        println!("   Install result: {}", result);
    }
    if let Some(shot) = &report.screenshot {
        println!("   Screenshot: {} ({}x{})", shot.path, shot.width, shot.height);
    }
    if let Some(err) = &report.error {
        println!("   Error code: {}", err.code);
    }
    println!(
        "   {} steps in {:.1}s (execution {})",
        report.steps.len(),
        report.duration_secs(),
        report.execution_id
    );
    println!("{}", "=".repeat(50));
    Ok(())
}

fn print_run(run: &WorkflowRun) {
    println!("Run {}: {}", run.id, run.name);
    println!("   Kind:     {}", run.kind);
    println!("   State:    {}", run.state);
    println!("   Target:   {}", run.target);
    println!("   Owner:    {}", run.owner);
    println!("   Created:  {}", run.created_at);
    if let Some(started) = run.started_at {
        println!("   Started:  {}", started);
    }
    if let Some(finished) = run.finished_at {
        println!("   Finished: {}", finished);
    }
    if let Some(error) = &run.error {
        println!("   Error:    {}", error);
    }
}

/// Execute with Ctrl-C wired to the executor's cancel token
async fn execute_run(cli: &Cli, run: RunOrCreate, force_restart: bool) -> Result<ExitCode> {
    let config = build_config(cli);
    let driver = AdbDriver::from_config(&config);
    let executor = WorkflowExecutor::new(driver, open_store(cli)?, config);

    let token = executor.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling after the current step");
            token.cancel();
        }
    });

    let report = match run {
        RunOrCreate::Existing(run_id) => executor.execute(run_id, force_restart).await?,
        RunOrCreate::New(new_run) => {
            let run_id = executor.store().create_run(new_run).await?;
            executor.execute(run_id, force_restart).await?
        }
    };

    print_report(&report, cli.json)?;
    Ok(if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

enum RunOrCreate {
    Existing(RunId),
    New(NewRun),
}

fn new_run(
    config: &AutomationConfig,
    kind: &str,
    owner: i64,
    name: Option<String>,
) -> Result<NewRun> {
    let run = NewRun::new(parse_kind(kind)?, owner, config.target.package.clone());
    Ok(match name {
        Some(name) => run.with_name(name),
        None => run,
    })
}

async fn show_devices(cli: &Cli) -> Result<ExitCode> {
    let driver = AdbDriver::from_config(&build_config(cli));
    let version = driver.version().await?;
    let devices = driver.device_infos().await?;

    if cli.json {
        let list: Vec<_> = devices
            .iter()
            .map(|d| {
                serde_json::json!({
                    "serial": d.serial,
                    "status": d.status,
                    "model": d.model,
                    "emulator": d.is_emulator(),
                })
            })
            .collect();
        print_json(&serde_json::json!({ "adb": version, "devices": list }))?;
        return Ok(ExitCode::SUCCESS);
    }

    println!("{}", version);
    if devices.is_empty() {
        println!("No devices connected.");
    }
    for device in &devices {
        let model = device.model.as_deref().unwrap_or("-");
        let marker = if device.is_available() { "\u{2705}" } else { "\u{26A0}" };
        println!("{} {:<24} {:<14} {}", marker, device.serial, device.status, model);
    }
    Ok(ExitCode::SUCCESS)
}

async fn probe_once(cli: &Cli) -> Result<ExitCode> {
    let config = build_config(cli);
    let driver = AdbDriver::from_config(&config);
    let devices = driver.list_devices().await?;
    let device = match &config.device_serial {
        Some(serial) => devices.into_iter().find(|d| d.serial() == serial),
        None => devices.into_iter().next(),
    }
    .ok_or_else(|| anyhow!("No emulator devices found"))?;

    let dump = driver.dump_ui_hierarchy(&device).await?;
    let result = AttributeProbe.probe(&dump);

    if cli.json {
        print_json(&serde_json::json!({
            "device": device.serial(),
            "play_present": result.play_present,
            "uninstall_present": result.uninstall_present,
            "installed": result.is_installed(),
        }))?;
    } else {
        println!("Device:    {}", device);
        println!("Play:      {}", result.play_present);
        println!("Uninstall: {}", result.uninstall_present);
        println!("Installed: {}", result.is_installed());
    }
    Ok(ExitCode::SUCCESS)
}

/// Check system requirements before running workflows
async fn check_system_requirements(cli: &Cli) -> bool {
    println!("\u{1F50D} Checking system requirements...");
    println!("{}", "-".repeat(50));

    // Check 1: adb installed
    print!("1. Checking ADB installation... ");
    io::stdout().flush().ok();
    if which::which(&cli.adb).is_err() {
        println!("\u{274C} FAILED");
        println!("   Error: {} is not installed or not in PATH.", cli.adb);
        println!("   Solution: Install ADB:");
        println!("     - macOS: brew install android-platform-tools");
        println!("     - Linux: sudo apt install android-tools-adb");
        println!(
            "     - Windows: Download from https://developer.android.com/studio/releases/platform-tools"
        );
        println!("{}", "-".repeat(50));
        println!("\u{274C} System check failed. Please fix the issues above.");
        return false;
    }
    println!("\u{2705} OK");

    // Check 2: version probe
    print!("2. Checking ADB version... ");
    io::stdout().flush().ok();
    let driver = AdbDriver::from_config(&build_config(cli));
    match driver.version().await {
        Ok(version) => println!("\u{2705} OK ({})", version),
        Err(e) => {
            println!("\u{274C} FAILED");
            println!("   Error: {}", e);
            println!("{}", "-".repeat(50));
            println!("\u{274C} System check failed. Please fix the issues above.");
            return false;
        }
    }

    // Check 3: device connected
    print!("3. Checking connected devices... ");
    io::stdout().flush().ok();
    let all_passed = match driver.list_devices().await {
        Ok(devices) if devices.is_empty() => {
            println!("\u{274C} FAILED");
            println!("   Error: No devices connected.");
            println!("   Solution:");
            println!("     1. Start the emulator");
            println!("     2. Verify: adb devices");
            false
        }
        Ok(devices) => {
            let display: Vec<&str> = devices.iter().take(2).map(|d| d.serial()).collect();
            let suffix = if devices.len() > 2 { "..." } else { "" };
            println!(
                "\u{2705} OK ({} device(s): {}{})",
                devices.len(),
                display.join(", "),
                suffix
            );
            true
        }
        Err(e) => {
            println!("\u{274C} FAILED");
            println!("   Error: {}", e);
            false
        }
    };

    println!("{}", "-".repeat(50));
    if all_passed {
        println!("\u{2705} All system checks passed!\n");
    } else {
        println!("\u{274C} System check failed. Please fix the issues above.");
    }
    all_passed
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match &cli.command {
        Command::Run {
            kind,
            force_restart,
            owner,
            name,
        } => {
            let run = new_run(&build_config(&cli), kind, *owner, name.clone())?;
            execute_run(&cli, RunOrCreate::New(run), *force_restart).await
        }
        Command::Execute {
            run_id,
            force_restart,
        } => execute_run(&cli, RunOrCreate::Existing(*run_id), *force_restart).await,
        Command::Create { kind, owner, name } => {
            let run = new_run(&build_config(&cli), kind, *owner, name.clone())?;
            let run_id = open_store(&cli)?.create_run(run).await?;
            if cli.json {
                print_json(&serde_json::json!({ "run_id": run_id }))?;
            } else {
                println!("{}", run_id);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Status { run_id } => {
            let run = open_store(&cli)?
                .get_run(*run_id)
                .await?
                .ok_or_else(|| anyhow!("Workflow run {} not found", run_id))?;
            if cli.json {
                print_json(&run)?;
            } else {
                print_run(&run);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Logs { run_id, level } => {
            let level = level
                .as_deref()
                .map(|l| l.parse::<LogLevel>())
                .transpose()
                .map_err(|e| anyhow!(e))?;
            let logs = open_store(&cli)?.list_logs(*run_id, level).await?;
            if cli.json {
                print_json(&logs)?;
            } else {
                for record in &logs {
                    let duration = record
                        .duration_ms
                        .map(|ms| format!(" ({}ms)", ms))
                        .unwrap_or_default();
                    println!(
                        "{} {:<8} {:<20} {:<12} {}{}",
                        record.timestamp.format("%H:%M:%S%.3f"),
                        record.level,
                        record.step,
                        record.outcome,
                        record.message,
                        duration
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Screenshots { run_id } => {
            let shots = open_store(&cli)?.list_screenshots(*run_id).await?;
            if cli.json {
                print_json(&shots)?;
            } else if shots.is_empty() {
                println!("No screenshots for run {}", run_id);
            } else {
                for shot in &shots {
                    println!(
                        "{} {} {}x{} {} bytes ({})",
                        shot.id,
                        shot.path,
                        shot.width,
                        shot.height,
                        shot.size_bytes,
                        shot.screenshot_type
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::List {
            state,
            kind,
            owner,
            page,
            page_size,
        } => {
            let query = RunQuery {
                owner: *owner,
                state: state
                    .as_deref()
                    .map(|s| s.parse::<RunState>())
                    .transpose()
                    .map_err(|e| anyhow!(e))?,
                kind: kind.as_deref().map(parse_kind).transpose()?,
                page: *page,
                page_size: *page_size,
            };
            let page = open_store(&cli)?.list_runs(&query).await?;
            if cli.json {
                print_json(&page)?;
            } else {
                for run in &page.items {
                    println!(
                        "{:>6} {:<10} {:<10} {}",
                        run.id, run.kind, run.state, run.created_at
                    );
                }
                println!(
                    "Page {}/{} ({} runs)",
                    page.page,
                    page.total_pages.max(1),
                    page.total_count
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Stats { owner } => {
            let stats = open_store(&cli)?.statistics(*owner).await?;
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("Total:        {}", stats.total_runs);
                println!("Completed:    {}", stats.completed_runs);
                println!("Failed:       {}", stats.failed_runs);
                println!("Timed out:    {}", stats.timed_out_runs);
                println!("Running:      {}", stats.running_runs);
                println!("Success rate: {:.2}%", stats.success_rate);
                match stats.average_execution_secs {
                    Some(secs) => println!("Average time: {:.2}s", secs),
                    None => println!("Average time: -"),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Devices => show_devices(&cli).await,
        Command::Probe => probe_once(&cli).await,
        Command::Doctor => Ok(if check_system_requirements(&cli).await {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }),
    }
}
