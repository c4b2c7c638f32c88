//! Ralph Daemon CLI entry point.
//!
//! Dispatches to the daemon's JSON-RPC control plane (`daemon start/stop/
//! status/ping`) or runs a single loop directly in this process (`run`,
//! `status`, `stop`, `checkpoint`, `attach` - local mode, no daemon involved).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, FromArgMatches};
use eyre::{Context, Result, eyre};
use serde_json::{Value, json};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, info, warn};

use taskdaemon::agent::AgentServer;
use taskdaemon::cli::{Cli, Command, DaemonCommand, default_pid_path, default_socket_path, generate_after_help, is_daemon_running};
use taskdaemon::config::{Config, ConfigOverrides};
use taskdaemon::domain::{AgentKind, LoopState, LoopStatus};
use taskdaemon::driver::{DriverOptions, run_loop};
use taskdaemon::progress::ProgressStore;
use taskdaemon::registry::{SessionInfo, SessionRegistry, SignalKind, read_signal, status, write_signal};
use taskdaemon::rpc::{ControlPlane, cleanup_socket};
use taskdaemon::scheduler::{LoopScheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    let overrides = ConfigOverrides {
        config_path: cli.config.clone(),
        workspace_dir: cli.workspace_dir.clone(),
        ziti_identity_path: None,
        log_level: cli.log_level.clone(),
    };
    let config = Config::load(&overrides);
    taskdaemon::config::setup_logging(&config, cli.log_level.as_deref()).context("failed to set up logging")?;

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
        Some(Command::Daemon { command }) => dispatch_daemon(command, config).await,
        Some(Command::Run { task_dir, branch, agent, max_iterations, push_frequency }) => {
            cmd_run(task_dir, branch, agent, max_iterations, push_frequency).await
        }
        Some(Command::Status { task }) => cmd_status(task),
        Some(Command::Stop { task }) => cmd_control_signal(task, SignalKind::Stop),
        Some(Command::Checkpoint { task }) => cmd_control_signal(task, SignalKind::Checkpoint),
        Some(Command::Attach { task }) => cmd_attach(task),
    }
}

async fn dispatch_daemon(command: DaemonCommand, config: Config) -> Result<()> {
    match command {
        DaemonCommand::Start { foreground } => cmd_daemon_start(config, foreground).await,
        DaemonCommand::Stop => cmd_daemon_stop().await,
        DaemonCommand::Status => cmd_daemon_status().await,
        DaemonCommand::Ping => cmd_daemon_ping().await,
    }
}

async fn cmd_daemon_start(config: Config, foreground: bool) -> Result<()> {
    if is_daemon_running() {
        eprintln!("Daemon is already running");
        std::process::exit(1);
    }

    if foreground {
        return run_daemon_foreground(config).await;
    }

    let exe = std::env::current_exe().context("failed to resolve current executable")?;
    let child = std::process::Command::new(exe)
        .arg("daemon")
        .arg("start")
        .arg("--foreground")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .context("failed to spawn daemon process")?;

    let pid_file = default_pid_path();
    if let Some(parent) = pid_file.parent() {
        std::fs::create_dir_all(parent).context("failed to create PID file directory")?;
    }
    std::fs::write(&pid_file, child.id().to_string()).context("failed to write PID file")?;

    info!(pid = child.id(), "cmd_daemon_start: daemon started in background");
    println!("Daemon started (pid {})", child.id());
    Ok(())
}

/// Runs the daemon in this process: recovers orphaned loops, binds the
/// control-plane socket, and blocks on SIGTERM/SIGINT (SIGHUP reloads config).
async fn run_daemon_foreground(config: Config) -> Result<()> {
    info!(workspace_dir = %config.workspace_dir.display(), "run_daemon_foreground: starting");

    let pid_file = default_pid_path();
    if let Some(parent) = pid_file.parent() {
        std::fs::create_dir_all(parent).context("failed to create PID file directory")?;
    }
    std::fs::write(&pid_file, std::process::id().to_string()).context("failed to write PID file")?;

    let registry_path = config.workspace_dir.join("loop_registry.json");
    let scheduler = Arc::new(LoopScheduler::new(SchedulerConfig {
        workspace_dir: config.workspace_dir.clone(),
        max_concurrent_loops: config.max_concurrent_loops,
        loop_timeout_hours: config.loop_timeout_hours,
        registry_path,
    }));

    info!("run_daemon_foreground: recovering orphaned loops from a previous run");
    scheduler.recover_orphans().await;

    let socket_path = default_socket_path();
    let control_plane = ControlPlane::new(socket_path.clone(), Arc::clone(&scheduler));
    let serve_handle = tokio::spawn(async move {
        if let Err(e) = control_plane.serve().await {
            tracing::error!(error = %e, "run_daemon_foreground: control plane exited with error");
        }
    });

    info!("Daemon running. Send SIGTERM or SIGINT to stop, SIGHUP to reload config.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind as UnixSignalKind, signal};

        let mut sighup = signal(UnixSignalKind::hangup())?;
        let mut sigint = signal(UnixSignalKind::interrupt())?;
        let mut sigterm = signal(UnixSignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("run_daemon_foreground: SIGHUP received, reloading configuration");
                    let _ = Config::load(&ConfigOverrides::default());
                }
                _ = sigint.recv() => {
                    warn!("run_daemon_foreground: SIGINT received, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("run_daemon_foreground: SIGTERM received, shutting down");
                    break;
                }
            }
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }

    serve_handle.abort();
    cleanup_socket(&socket_path);
    let _ = std::fs::remove_file(&pid_file);
    info!("run_daemon_foreground: shutdown complete");
    Ok(())
}

async fn cmd_daemon_stop() -> Result<()> {
    let pid_file = default_pid_path();
    let Ok(contents) = std::fs::read_to_string(&pid_file) else {
        eprintln!("Daemon is not running");
        std::process::exit(1);
    };
    let Ok(pid) = contents.trim().parse::<i32>() else {
        eprintln!("Daemon is not running");
        std::process::exit(1);
    };

    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;
    let nix_pid = Pid::from_raw(pid);
    if signal::kill(nix_pid, None).is_err() {
        warn!(pid, "cmd_daemon_stop: process not running, cleaning up stale PID file");
        let _ = std::fs::remove_file(&pid_file);
        eprintln!("Daemon is not running");
        std::process::exit(1);
    }

    info!(pid, "cmd_daemon_stop: sending SIGTERM");
    signal::kill(nix_pid, Signal::SIGTERM).context("failed to send SIGTERM")?;

    for _ in 0..50 {
        if signal::kill(nix_pid, None).is_err() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }

    if signal::kill(nix_pid, None).is_ok() {
        warn!(pid, "cmd_daemon_stop: daemon did not stop gracefully, sending SIGKILL");
        let _ = signal::kill(nix_pid, Signal::SIGKILL);
    }

    let _ = std::fs::remove_file(&pid_file);
    cleanup_socket(&default_socket_path());
    println!("Daemon stopped");
    Ok(())
}

async fn cmd_daemon_status() -> Result<()> {
    if !is_daemon_running() {
        println!("Daemon: not running");
        std::process::exit(1);
    }

    match rpc_call(&default_socket_path(), "get_health", json!({})).await {
        Ok(health) => {
            println!("{}", serde_json::to_string_pretty(&health)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("Daemon process is running but its control plane is unreachable: {e}");
            std::process::exit(1);
        }
    }
}

async fn cmd_daemon_ping() -> Result<()> {
    match rpc_call(&default_socket_path(), "get_health", json!({})).await {
        Ok(_) => {
            println!("pong");
            Ok(())
        }
        Err(e) => {
            eprintln!("Daemon did not respond: {e}");
            std::process::exit(1);
        }
    }
}

/// One-shot JSON-RPC 2.0 request/response round trip over a control-plane
/// Unix socket.
async fn rpc_call(socket_path: &Path, method: &str, params: Value) -> Result<Value> {
    let stream = UnixStream::connect(socket_path)
        .await
        .with_context(|| format!("failed to connect to control plane at {}", socket_path.display()))?;

    let (read_half, mut write_half) = stream.into_split();
    let request = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
    let mut line = serde_json::to_string(&request)?;
    line.push('\n');
    write_half.write_all(line.as_bytes()).await.context("failed to write request")?;

    let mut reader = BufReader::new(read_half);
    let mut response_line = String::new();
    reader.read_line(&mut response_line).await.context("failed to read response")?;

    let response: Value = serde_json::from_str(response_line.trim()).context("failed to parse response")?;
    if let Some(error) = response.get("error") {
        return Err(eyre!("RPC error: {error}"));
    }
    Ok(response.get("result").cloned().unwrap_or(Value::Null))
}

fn local_session_store_path() -> PathBuf {
    dirs::state_dir().or_else(dirs::data_local_dir).unwrap_or_else(|| PathBuf::from(".")).join("ralph-daemon").join("sessions.db")
}

fn local_signal_dir() -> PathBuf {
    dirs::runtime_dir().or_else(dirs::data_local_dir).unwrap_or_else(|| PathBuf::from("/tmp")).join("ralph-daemon").join("signals")
}

fn open_session_registry() -> Result<SessionRegistry> {
    let db_path = local_session_store_path();
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create session store directory")?;
    }
    let store = taskstore::Store::open(&db_path).context("failed to open session store")?;
    Ok(SessionRegistry::new(Arc::new(store), local_signal_dir()))
}

/// Runs a single loop to completion directly in this process, registering a
/// [`SessionInfo`] so a separate `status`/`stop`/`checkpoint` invocation can
/// observe and signal it.
async fn cmd_run(task_dir: PathBuf, branch: String, agent: Option<String>, max_iterations: u32, push_frequency: u32) -> Result<()> {
    let task_dir = task_dir.canonicalize().with_context(|| format!("task directory not found: {}", task_dir.display()))?;
    let worktree_path = std::env::current_dir().context("failed to resolve current directory")?;
    let task_name = task_dir.file_name().and_then(|s| s.to_str()).unwrap_or("unknown").to_string();

    let default_agent = match agent.as_deref() {
        Some(name) => name.parse::<AgentKind>().map_err(|e| eyre!("unknown agent '{name}': {e}"))?,
        None => AgentKind::Claude,
    };

    let registry = open_session_registry()?;
    let session =
        SessionInfo::new(&task_name, task_dir.display().to_string(), std::process::id(), "", default_agent.as_str(), max_iterations, "local");
    registry.register(&session).context("failed to register session")?;

    let mut server = None;
    let mut opencode_base_url = None;
    if default_agent == AgentKind::Opencode {
        let mut s = AgentServer::new(worktree_path.clone(), None, String::new(), false).await;
        s.start().context("failed to start opencode agent server")?;
        s.wait_until_healthy().await.context("opencode agent server did not become healthy")?;
        opencode_base_url = Some(s.base_url());
        server = Some(s);
    }

    let state = Arc::new(tokio::sync::Mutex::new(LoopState::new(
        format!("local-{task_name}"),
        task_dir.clone(),
        worktree_path,
        branch,
        max_iterations,
        push_frequency.max(1),
        0,
    )));

    let progress = ProgressStore::new(task_dir.clone());
    let mut options = DriverOptions::new(default_agent);
    options.opencode_base_url = opencode_base_url;

    let signal_watch = {
        let signal_dir = registry.signal_dir().to_path_buf();
        let watched_task = task_name.clone();
        let watched_state = Arc::clone(&state);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(std::time::Duration::from_secs(2)).await;
                if let Some(signal) = read_signal(&signal_dir, &watched_task) {
                    match signal.kind {
                        SignalKind::Stop => {
                            debug!(task = %watched_task, "cmd_run: stop signal received");
                            watched_state.lock().await.stop_requested = true;
                        }
                        SignalKind::Checkpoint => {
                            debug!(task = %watched_task, "cmd_run: checkpoint signal received");
                            watched_state.lock().await.checkpoint_requested = true;
                        }
                    }
                }
            }
        })
    };

    let outcome = run_loop(Arc::clone(&state), &progress, options).await;
    signal_watch.abort();

    if let Some(mut server) = server {
        server.stop().await;
    }

    let final_status = match outcome.status {
        LoopStatus::Completed | LoopStatus::Exhausted => status::COMPLETED,
        LoopStatus::Stopping => status::STOPPED,
        _ => status::FAILED,
    };
    if let Err(e) = registry.update_status(&task_name, final_status) {
        warn!(error = %e, "cmd_run: failed to persist final session status");
    }

    info!(status = %outcome.status, iterations = outcome.iterations_used, "cmd_run: loop finished");
    println!("Loop finished: {} ({} iterations)", outcome.status, outcome.iterations_used);

    match outcome.status {
        LoopStatus::Completed | LoopStatus::Exhausted => Ok(()),
        _ => std::process::exit(1),
    }
}

fn cmd_status(task: Option<String>) -> Result<()> {
    let registry = open_session_registry()?;
    match task {
        Some(name) => {
            let session = registry.get(&name).with_context(|| format!("no session registered for task '{name}'"))?;
            println!("{}", serde_json::to_string_pretty(&session)?);
        }
        None => {
            let sessions = registry.list_all().context("failed to list sessions")?;
            if sessions.is_empty() {
                println!("No registered sessions");
            } else {
                println!("{}", serde_json::to_string_pretty(&sessions)?);
            }
        }
    }
    Ok(())
}

fn cmd_control_signal(task: String, kind: SignalKind) -> Result<()> {
    let registry = open_session_registry()?;
    registry.get(&task).with_context(|| format!("no session registered for task '{task}'"))?;
    write_signal(registry.signal_dir(), &task, kind).context("failed to write signal file")?;
    match kind {
        SignalKind::Stop => println!("Stop requested for '{task}'"),
        SignalKind::Checkpoint => println!("Checkpoint requested for '{task}'"),
    }
    Ok(())
}

fn cmd_attach(task: String) -> Result<()> {
    let registry = open_session_registry()?;
    let session = registry.get(&task).with_context(|| format!("no session registered for task '{task}'"))?;

    if session.multiplex_session.is_empty() {
        eprintln!("Task '{task}' has no attachable terminal session (it is running in the foreground of its own process)");
        std::process::exit(1);
    }

    let status = std::process::Command::new("tmux")
        .args(["attach-session", "-t", &session.multiplex_session])
        .status()
        .context("failed to invoke tmux")?;

    if status.success() {
        Ok(())
    } else {
        std::process::exit(status.code().unwrap_or(1));
    }
}
