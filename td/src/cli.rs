//! CLI command definitions and subcommands.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// Ralph Daemon - Ralph Wiggum loop orchestrator
#[derive(Parser)]
#[command(
    name = "ralph-daemon",
    about = "Ralph Wiggum loop orchestrator for concurrent coding-agent workflows",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to TOML config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", global = true, help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,

    /// Override the workspace directory (bare repos + worktrees)
    #[arg(short, long, global = true, help = "Workspace root for bare repos and worktrees")]
    pub workspace_dir: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the ralph-daemon background process and its control plane
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Run a single loop to completion in this process (no daemon involved)
    Run {
        /// Directory containing the task's PRD, stories, and progress log
        task_dir: PathBuf,

        /// Branch to work on (created from the current HEAD if missing)
        #[arg(short, long, default_value = "ralph/loop")]
        branch: String,

        /// Agent to drive (claude, opencode)
        #[arg(short, long)]
        agent: Option<String>,

        /// Maximum iterations before giving up
        #[arg(short, long, default_value = "50")]
        max_iterations: u32,

        /// Push to origin every N iterations (0 disables periodic pushes)
        #[arg(short, long, default_value = "1")]
        push_frequency: u32,
    },

    /// Show status for one task, or every registered session if omitted
    Status {
        /// Task name (as registered in the SessionRegistry)
        task: Option<String>,
    },

    /// Request a running loop to stop at its next iteration boundary
    Stop {
        /// Task name
        task: String,
    },

    /// Request a running loop to write a checkpoint at its next iteration boundary
    Checkpoint {
        /// Task name
        task: String,
    },

    /// Attach to a running loop's terminal session
    Attach {
        /// Task name
        task: String,
    },
}

/// Daemon management subcommands
#[derive(Debug, Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon
    Start {
        /// Don't fork to background (run in foreground)
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the daemon
    Stop,

    /// Check daemon status (active loops, uptime, capacity)
    Status,

    /// Ping the daemon's control plane to check it's alive and responsive
    Ping,
}

/// Result of checking a required tool's availability and version.
pub struct ToolCheck {
    pub name: &'static str,
    pub available: bool,
    pub version: Option<String>,
}

impl ToolCheck {
    /// Check if a tool is available and get its version.
    pub fn check(name: &'static str, version_args: &[&str]) -> Self {
        debug!(name, ?version_args, "ToolCheck::check: called");
        let result = std::process::Command::new(name).args(version_args).output();

        match result {
            Ok(output) if output.status.success() => {
                debug!(name, "ToolCheck::check: tool available");
                let version_str = String::from_utf8_lossy(&output.stdout);
                Self { name, available: true, version: Some(parse_version(&version_str)) }
            }
            _ => {
                debug!(name, "ToolCheck::check: tool not available");
                Self { name, available: false, version: None }
            }
        }
    }
}

/// Parse a version string from command output (first version-like token).
fn parse_version(output: &str) -> String {
    for word in output.split_whitespace() {
        let word = word.trim_start_matches('v');
        if word.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false) {
            let version: String = word.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
            if !version.is_empty() {
                return version;
            }
        }
    }
    "unknown".to_string()
}

/// Check all required tools and return their status: `git` plus every known
/// agent kind's binary.
pub fn check_required_tools() -> Vec<ToolCheck> {
    debug!("check_required_tools: called");
    let mut tools = vec![ToolCheck::check("git", &["--version"])];
    for kind in crate::domain::ALL_AGENT_KINDS {
        tools.push(ToolCheck::check(kind.as_str(), &["--version"]));
    }
    tools
}

/// Default control-plane socket path (`$XDG_RUNTIME_DIR/ralph-daemon/control.sock`,
/// falling back to the data-local dir).
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ralph-daemon")
        .join("control.sock")
}

pub fn default_pid_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("ralph-daemon")
        .join("ralph-daemon.pid")
}

/// Lightweight daemon-running check for help display: does the pid file
/// exist and does the process it names still exist.
pub fn is_daemon_running() -> bool {
    debug!("is_daemon_running: called");
    let pid_file = default_pid_path();
    if !pid_file.exists() {
        return false;
    }

    if let Ok(contents) = std::fs::read_to_string(&pid_file)
        && let Ok(pid) = contents.trim().parse::<u32>()
    {
        let exists = PathBuf::from(format!("/proc/{pid}")).exists();
        debug!(pid, exists, "is_daemon_running: checked process existence");
        return exists;
    }

    false
}

/// Generate the after_help text with tool checks and daemon status.
pub fn generate_after_help() -> String {
    let tools = check_required_tools();
    let daemon_running = is_daemon_running();

    let mut help = String::new();
    help.push_str("Required Tools:\n");
    for tool in &tools {
        let icon = if tool.available { "\u{2705}" } else { "\u{274C}" };
        let version = tool.version.as_deref().unwrap_or("not found");
        help.push_str(&format!("  {icon} {:<10} {version}\n", tool.name));
    }

    help.push('\n');
    help.push_str("Daemon:\n");
    let daemon_icon = if daemon_running { "\u{2705}" } else { "\u{274C}" };
    let daemon_status = if daemon_running { "running" } else { "stopped" };
    help.push_str(&format!("  {daemon_icon} {daemon_status}\n"));

    help
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parse_no_command() {
        let cli = Cli::parse_from(["ralph-daemon"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn cli_parse_daemon_start() {
        let cli = Cli::parse_from(["ralph-daemon", "daemon", "start"]);
        assert!(matches!(cli.command, Some(Command::Daemon { command: DaemonCommand::Start { foreground: false } })));
    }

    #[test]
    fn cli_parse_daemon_start_foreground() {
        let cli = Cli::parse_from(["ralph-daemon", "daemon", "start", "--foreground"]);
        assert!(matches!(cli.command, Some(Command::Daemon { command: DaemonCommand::Start { foreground: true } })));
    }

    #[test]
    fn cli_parse_daemon_stop() {
        let cli = Cli::parse_from(["ralph-daemon", "daemon", "stop"]);
        assert!(matches!(cli.command, Some(Command::Daemon { command: DaemonCommand::Stop })));
    }

    #[test]
    fn cli_parse_run() {
        let cli = Cli::parse_from(["ralph-daemon", "run", "stories/us-001", "--agent", "claude"]);
        match cli.command {
            Some(Command::Run { task_dir, agent, max_iterations, .. }) => {
                assert_eq!(task_dir, PathBuf::from("stories/us-001"));
                assert_eq!(agent.as_deref(), Some("claude"));
                assert_eq!(max_iterations, 50);
            }
            other => panic!("expected Run command, got {other:?}"),
        }
    }

    #[test]
    fn cli_parse_stop_with_task() {
        let cli = Cli::parse_from(["ralph-daemon", "stop", "us-001"]);
        assert!(matches!(cli.command, Some(Command::Stop { task }) if task == "us-001"));
    }

    #[test]
    fn cli_with_config_and_workspace_override() {
        let cli = Cli::parse_from(["ralph-daemon", "-c", "/path/to/config.toml", "-w", "/tmp/ws", "daemon", "ping"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.toml")));
        assert_eq!(cli.workspace_dir, Some(PathBuf::from("/tmp/ws")));
    }

    #[test]
    fn parse_version_extracts_leading_number() {
        assert_eq!(parse_version("git version 2.43.0"), "2.43.0");
        assert_eq!(parse_version("v1.2.3"), "1.2.3");
    }
}
