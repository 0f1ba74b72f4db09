//! ENSIME bridge CLI - a headless host for ENSIME server sessions.
//!
//! # Architecture
//!
//! The CLI plays the editor's part for [`ensime_engine::Bridge`]: the file
//! given on the command line is the "active buffer", notices go to stderr,
//! and command output goes to stdout.
//!
//! ```text
//! main() -> Bridge::new(TerminalEditor, settings) -> on_file_opened()
//!                                                      |
//!                                                      v
//!                               tick loop (tick_interval_ms) until Ready
//! ```
//!
//! Servers started here outlive the process unless `--stop` is given; the
//! next invocation adopts them through the cache dir markers.

mod editor;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;
use tokio::time::{self, MissedTickBehavior};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use ensime_config::{find_from, parse, settings_path};
use ensime_engine::debugger::{DEFAULT_DEBUG_HOST, DEFAULT_DEBUG_PORT};
use ensime_engine::{
    Bridge, BridgeSettings, ClientState, DEFAULT_EVENT_BUDGET, MAX_CONNECTION_ATTEMPTS,
    ResponseHandle,
};
use ensime_server::markers;
use ensime_server::process::{port_answers, running_server_pid};

use crate::editor::TerminalEditor;

#[derive(Parser, Debug)]
#[command(name = "ensime-bridge", version)]
#[command(about = "Start, adopt and talk to ENSIME servers for Scala projects")]
struct Cli {
    /// Settings file (defaults to <config_dir>/ensime-bridge/config.toml)
    #[arg(long, value_name = "PATH", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the .ensime file governing FILE
    Find { file: PathBuf },
    /// Parse a .ensime file and print it as JSON
    Parse { config: PathBuf },
    /// Show install, process and port state for FILE's project
    Status { file: PathBuf },
    /// Bootstrap the server classpath for FILE's project
    Install { file: PathBuf },
    /// Start or adopt the server for FILE's project and connect to it
    Start {
        file: PathBuf,
        /// Give up after this many ticks
        #[arg(long, default_value_t = 2 * MAX_CONNECTION_ATTEMPTS)]
        max_ticks: u32,
        /// Stop the server again once connected
        #[arg(long)]
        stop: bool,
    },
    /// Send one JSON request to FILE's server and print the reply
    Request {
        file: PathBuf,
        json: String,
        /// Seconds to wait for the reply
        #[arg(long, default_value_t = 30)]
        timeout: u64,
    },
    /// Stop the server recorded in FILE's project cache dir
    Stop { file: PathBuf },
    /// Drive the debugger of FILE's server (needs server_v2)
    Debug {
        file: PathBuf,
        /// Seconds to wait for each reply
        #[arg(long, default_value_t = 30)]
        timeout: u64,
        #[command(subcommand)]
        action: DebugAction,
    },
}

#[derive(Subcommand, Debug)]
enum DebugAction {
    /// Attach to a JVM listening for a debugger
    Attach {
        #[arg(long, default_value = DEFAULT_DEBUG_HOST)]
        host: String,
        #[arg(long, default_value_t = DEFAULT_DEBUG_PORT)]
        port: u16,
    },
    /// Set a breakpoint at SOURCE:LINE
    Break { source: PathBuf, line: u32 },
    /// Clear every breakpoint
    ClearBreaks,
    /// Wait for a breakpoint to be hit and print the stopped thread's frames
    Backtrace,
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Without a log file, keep stderr for notices.
    tracing_subscriber::registry().with(env_filter).init();
}

fn open_log_file() -> (Option<(PathBuf, File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: <config_dir>/ensime-bridge/logs/bridge.log
    if let Some(settings) = settings_path()
        && let Some(dir) = settings.parent()
    {
        candidates.push(dir.join("logs").join("bridge.log"));
    }

    // Fallback: ./.ensime-bridge/logs/bridge.log
    candidates.push(PathBuf::from(".ensime-bridge").join("logs").join("bridge.log"));

    candidates
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing();

    let settings = match &cli.settings {
        Some(path) => BridgeSettings::load_from(path),
        None => BridgeSettings::load(),
    };
    settings.migrate_legacy_install_dir();

    match cli.command {
        Command::Find { file } => find(&file),
        Command::Parse { config } => print_config(&config),
        Command::Status { file } => status(&file, settings).await,
        Command::Install { file } => install(file, settings).await,
        Command::Start {
            file,
            max_ticks,
            stop,
        } => start(file, settings, max_ticks, stop).await,
        Command::Request {
            file,
            json,
            timeout,
        } => request(file, settings, &json, Duration::from_secs(timeout)).await,
        Command::Stop { file } => stop_server(&file).await,
        Command::Debug {
            file,
            timeout,
            action,
        } => debug(file, settings, action, Duration::from_secs(timeout)).await,
    }
}

fn bridge_for(file: &Path, settings: BridgeSettings) -> Bridge {
    let editor = TerminalEditor::new(Some(file.to_path_buf()));
    Bridge::new(Arc::new(editor), settings)
}

fn find(file: &Path) -> Result<ExitCode> {
    match find_from(file) {
        Some(config) => {
            println!("{}", config.display());
            Ok(ExitCode::SUCCESS)
        }
        None => {
            eprintln!("No .ensime file found above {}", file.display());
            Ok(ExitCode::FAILURE)
        }
    }
}

fn print_config(path: &Path) -> Result<ExitCode> {
    let config = parse(path)?;
    let rendered = serde_json::to_string_pretty(config.raw()).context("rendering config")?;
    println!("{rendered}");
    Ok(ExitCode::SUCCESS)
}

async fn status(file: &Path, settings: BridgeSettings) -> Result<ExitCode> {
    let mut bridge = bridge_for(file, settings);
    let Some(entry) = bridge.current_session().await else {
        bail!("{} is not inside an ENSIME project", file.display());
    };
    let config = entry.session().config();
    let cache_dir = config.cache_dir();

    println!("project:   {} ({})", config.name(), config.path().display());
    println!("scala:     {}", config.scala_version());
    println!(
        "installed: {}",
        if entry.supervisor().is_installed() { "yes" } else { "no" }
    );
    match markers::read_pid(cache_dir) {
        Some(pid) if markers::pid_alive(pid) => println!("pid:       {pid} (alive)"),
        Some(pid) => println!("pid:       {pid} (stale)"),
        None => println!("pid:       none"),
    }
    match markers::read_port(cache_dir) {
        Some(port) if port_answers(port).await => println!("port:      {port} (reachable)"),
        Some(port) => println!("port:      {port} (unreachable)"),
        None => println!("port:      none"),
    }
    println!("log:       {}", markers::log_path(cache_dir).display());
    Ok(ExitCode::SUCCESS)
}

async fn install(file: PathBuf, settings: BridgeSettings) -> Result<ExitCode> {
    let mut bridge = bridge_for(&file, settings);
    if bridge.install_current().await {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Tick until the active project's session is ready, gives up, or Ctrl-C.
async fn drive(bridge: &mut Bridge, max_ticks: u32) -> ClientState {
    let interval = Duration::from_millis(bridge.settings().tick_interval_ms.max(1));
    let mut ticks = time::interval(interval);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut state = ClientState::Stopped;
    for _ in 0..max_ticks {
        tokio::select! {
            _ = ticks.tick() => {}
            _ = signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }

        bridge.tick().await;
        bridge.poll_events(DEFAULT_EVENT_BUDGET);

        let Some(entry) = bridge.current_session().await else {
            break;
        };
        let session = entry.session();
        state = session.state();
        if state == ClientState::Ready
            || session.connection_attempts() >= MAX_CONNECTION_ATTEMPTS
            || entry.supervisor().is_disabled()
        {
            break;
        }
    }
    state
}

async fn start(
    file: PathBuf,
    settings: BridgeSettings,
    max_ticks: u32,
    stop: bool,
) -> Result<ExitCode> {
    let mut bridge = bridge_for(&file, settings);
    if bridge.on_file_opened(&file).await.is_none() {
        bail!("{} is not inside an ENSIME project", file.display());
    }

    let state = drive(&mut bridge, max_ticks).await;
    bridge.report_statuses().await;

    if stop {
        bridge.shutdown().await;
    } else {
        bridge.detach().await;
    }

    println!("{state}");
    Ok(if state == ClientState::Ready {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

/// A bridge whose session for `file` is connected, or an error saying why not.
async fn ready_bridge(file: &Path, settings: BridgeSettings) -> Result<Bridge> {
    let mut bridge = bridge_for(file, settings);
    if bridge.on_file_opened(file).await.is_none() {
        bail!("{} is not inside an ENSIME project", file.display());
    }
    let state = drive(&mut bridge, 2 * MAX_CONNECTION_ATTEMPTS).await;
    if state != ClientState::Ready {
        bridge.detach().await;
        bail!("server for {} is not ready ({state})", file.display());
    }
    Ok(bridge)
}

async fn await_reply(handle: ResponseHandle, timeout: Duration) -> Result<Value> {
    tracing::debug!(call_id = %handle.id(), "Request sent");
    time::timeout(timeout, handle.wait())
        .await
        .with_context(|| format!("no reply within {}s", timeout.as_secs()))?
        .context("request failed")
}

async fn request(
    file: PathBuf,
    settings: BridgeSettings,
    json: &str,
    timeout: Duration,
) -> Result<ExitCode> {
    let payload: Value = serde_json::from_str(json).context("request is not valid JSON")?;

    let mut bridge = ready_bridge(&file, settings).await?;
    let Some(entry) = bridge.current_session().await else {
        bail!("{} is not inside an ENSIME project", file.display());
    };
    let sent = entry.session_mut().send_request(payload);
    let reply = match sent {
        Ok(handle) => await_reply(handle, timeout).await,
        Err(e) => Err(e.into()),
    };
    bridge.detach().await;

    println!("{}", serde_json::to_string_pretty(&reply?)?);
    Ok(ExitCode::SUCCESS)
}

async fn debug(
    file: PathBuf,
    settings: BridgeSettings,
    action: DebugAction,
    timeout: Duration,
) -> Result<ExitCode> {
    let mut bridge = ready_bridge(&file, settings).await?;
    let reply = debug_action(&mut bridge, &file, action, timeout).await;
    bridge.detach().await;

    println!("{}", serde_json::to_string_pretty(&reply?)?);
    Ok(ExitCode::SUCCESS)
}

async fn debug_action(
    bridge: &mut Bridge,
    file: &Path,
    action: DebugAction,
    timeout: Duration,
) -> Result<Value> {
    if matches!(action, DebugAction::Backtrace) {
        wait_for_break(bridge, file, timeout).await?;
    }

    let Some(entry) = bridge.current_session().await else {
        bail!("{} is not inside an ENSIME project", file.display());
    };
    let Some(mut debugger) = entry.session_mut().debugger() else {
        bail!("the debugger needs protocol v2; set server_v2 = true");
    };
    let handle = match action {
        DebugAction::Attach { host, port } => debugger.attach(&host, port)?,
        DebugAction::Break { source, line } => debugger.set_break(&source, line)?,
        DebugAction::ClearBreaks => debugger.clear_breaks()?,
        DebugAction::Backtrace => debugger.backtrace()?,
    };
    await_reply(handle, timeout).await
}

/// Pump server events until the debuggee stops on a thread.
async fn wait_for_break(bridge: &mut Bridge, file: &Path, timeout: Duration) -> Result<()> {
    let deadline = time::Instant::now() + timeout;
    let interval = Duration::from_millis(bridge.settings().tick_interval_ms.max(1));
    loop {
        bridge.poll_events(DEFAULT_EVENT_BUDGET);
        let Some(entry) = bridge.current_session().await else {
            bail!("{} is not inside an ENSIME project", file.display());
        };
        if entry
            .session_mut()
            .debugger()
            .and_then(|debugger| debugger.active_thread())
            .is_some()
        {
            return Ok(());
        }
        if time::Instant::now() >= deadline {
            bail!("no breakpoint was hit within {}s", timeout.as_secs());
        }
        time::sleep(interval).await;
    }
}

async fn stop_server(file: &Path) -> Result<ExitCode> {
    let Some(config_path) = find_from(file) else {
        bail!("{} is not inside an ENSIME project", file.display());
    };
    let config = parse(&config_path)?;
    let cache_dir = config.cache_dir();

    // Only signal a pid that still names a server; a reused pid is dropped.
    let Some(pid) = running_server_pid(cache_dir).await else {
        eprintln!("No server running for {}", config.name());
        return Ok(ExitCode::FAILURE);
    };

    markers::terminate(pid).with_context(|| format!("stopping server {pid}"))?;
    markers::remove_pid(cache_dir);
    tracing::info!(project = %config.path().display(), pid, "Server stopped");
    println!("stopped {pid}");
    Ok(ExitCode::SUCCESS)
}
