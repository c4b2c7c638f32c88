//! LoopScheduler (C9): owns the set of active loops and coordinates
//! admission, cancellation, enumeration, health, and event fanout.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::AgentServer;
use crate::domain::{AgentKind, LoopEvent, LoopEventType, LoopInfo, LoopState, LoopStatus};
use crate::driver::{DriverOptions, run_loop};
use crate::progress::ProgressStore;
use crate::workspace::WorkspaceManager;

use super::broadcaster::EventBroadcaster;
use super::error::SchedulerError;
use super::registry::LoopRegistry;

const STOP_GRACE_PERIOD: Duration = Duration::from_secs(10);
const ORPHAN_SIGTERM_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workspace_dir: PathBuf,
    pub max_concurrent_loops: usize,
    pub loop_timeout_hours: u32,
    pub registry_path: PathBuf,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct StartLoopParams {
    pub origin_url: String,
    pub branch: String,
    pub task_dir: String,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_agent")]
    pub agent: String,
    #[serde(default = "default_push_frequency")]
    pub push_frequency: u32,
}

fn default_max_iterations() -> u32 {
    50
}
fn default_agent() -> String {
    "opencode".to_string()
}
fn default_push_frequency() -> u32 {
    1
}

#[derive(Debug, serde::Serialize)]
pub struct AgentAvailability {
    pub name: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, serde::Serialize)]
pub struct HealthInfo {
    pub hostname: String,
    pub started_at: chrono::DateTime<Utc>,
    pub uptime_seconds: i64,
    pub active_loops: usize,
    pub max_concurrent_loops: usize,
    pub workspace_dir: PathBuf,
    pub overlay_status: &'static str,
}

struct ActiveLoop {
    info: LoopInfo,
    state: Arc<Mutex<LoopState>>,
    server: Option<AgentServer>,
    handle: JoinHandle<()>,
}

pub struct LoopScheduler {
    config: SchedulerConfig,
    workspace: WorkspaceManager,
    registry: LoopRegistry,
    broadcaster: Arc<EventBroadcaster>,
    active: Mutex<HashMap<String, ActiveLoop>>,
    hostname: String,
    started_at: chrono::DateTime<Utc>,
}

impl LoopScheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        let workspace = WorkspaceManager::new(config.workspace_dir.clone());
        let registry = LoopRegistry::new(config.registry_path.clone());
        Self {
            config,
            workspace,
            registry,
            broadcaster: Arc::new(EventBroadcaster::new()),
            active: Mutex::new(HashMap::new()),
            hostname: hostname(),
            started_at: Utc::now(),
        }
    }

    pub fn broadcaster(&self) -> Arc<EventBroadcaster> {
        Arc::clone(&self.broadcaster)
    }

    /// Read the persisted registry and reap orphans left by a crashed daemon:
    /// kill any still-live agent-server process, leave worktrees for
    /// post-mortem, prune stale worktrees, then clear the registry.
    pub async fn recover_orphans(&self) {
        let orphans = self.registry.load().await;
        if orphans.is_empty() {
            debug!("recover_orphans: no orphans found");
        } else {
            info!(count = orphans.len(), "recover_orphans: cleaning up orphaned loop(s)");
            for orphan in &orphans {
                self.cleanup_orphan(orphan).await;
            }
        }

        match self.workspace.prune_stale_worktrees().await {
            Ok(n) => info!(pruned = n, "recover_orphans: pruned stale worktrees"),
            Err(e) => warn!(error = %e, "recover_orphans: prune_stale_worktrees failed"),
        }

        self.registry.clear().await;
    }

    async fn cleanup_orphan(&self, orphan: &LoopInfo) {
        let Some(pid) = orphan.opencode_pid else {
            debug!(loop_id = %orphan.loop_id, "cleanup_orphan: no opencode_pid recorded");
            return;
        };
        use nix::sys::signal::{self, Signal};
        use nix::unistd::Pid;

        let nix_pid = Pid::from_raw(pid as i32);
        if signal::kill(nix_pid, None).is_err() {
            debug!(loop_id = %orphan.loop_id, pid, "cleanup_orphan: process already gone");
            return;
        }

        info!(loop_id = %orphan.loop_id, pid, "cleanup_orphan: killing orphaned agent server");
        let _ = signal::kill(nix_pid, Signal::SIGTERM);
        tokio::time::sleep(ORPHAN_SIGTERM_GRACE).await;
        if signal::kill(nix_pid, None).is_ok() {
            let _ = signal::kill(nix_pid, Signal::SIGKILL);
            info!(loop_id = %orphan.loop_id, pid, "cleanup_orphan: sent SIGKILL");
        }
    }

    /// Admission sequence: validate, cap-check, agent-availability, allocate
    /// a loop id, set up the workspace, register, spawn the agent server
    /// (opencode only), then hand off to the IterationDriver. Any failure
    /// tears down prior steps in reverse order.
    pub async fn start_loop(self: &Arc<Self>, params: StartLoopParams) -> Result<LoopInfo, SchedulerError> {
        validate_params(&params)?;

        let active_count = self.active.lock().await.len();
        if active_count >= self.config.max_concurrent_loops {
            return Err(SchedulerError::MaxLoopsExceeded(self.config.max_concurrent_loops));
        }

        let resolved_agent: AgentKind = params
            .agent
            .parse()
            .map_err(|_| SchedulerError::AgentNotFound(params.agent.clone(), "unknown agent kind".to_string()))?;
        if !agent_binary_available(resolved_agent.as_str()) {
            return Err(SchedulerError::AgentNotFound(
                params.agent.clone(),
                format!("'{}' was not found on PATH; install it and retry", resolved_agent.as_str()),
            ));
        }

        let loop_id = format!("loop-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let task_name = extract_task_name(&params.task_dir);

        let worktree = self.workspace.setup_workspace(&params.origin_url, &params.branch, &task_name).await?;

        let task_dir = worktree.worktree_path.join(&params.task_dir);
        let mut info = LoopInfo {
            loop_id: loop_id.clone(),
            task_name: task_name.clone(),
            task_dir: task_dir.clone(),
            branch: params.branch.clone(),
            iteration: 0,
            max_iterations: params.max_iterations,
            agent: resolved_agent,
            status: LoopStatus::Starting,
            started_at: Utc::now(),
            opencode_port: None,
            opencode_pid: None,
            worktree_path: Some(worktree.worktree_path.clone()),
            service_name: None,
            push_frequency: params.push_frequency,
            final_story: None,
            last_error: None,
            timeout_hours: self.config.loop_timeout_hours,
        };

        // Step 7: start the agent server for HTTP-mode adapters. Failure tears
        // down the workspace we just set up.
        let mut server = None;
        let mut opencode_base_url = None;
        if resolved_agent == AgentKind::Opencode {
            let mut s = AgentServer::new(worktree.worktree_path.clone(), None, String::new(), false).await;
            if let Err(e) = s.start() {
                if let Err(cleanup_err) = self.workspace.cleanup_workspace(&worktree).await {
                    warn!(error = %cleanup_err, "start_loop: workspace cleanup after server start failure also failed");
                }
                return Err(SchedulerError::Agent(e));
            }
            if let Err(e) = s.wait_until_healthy().await {
                s.stop().await;
                if let Err(cleanup_err) = self.workspace.cleanup_workspace(&worktree).await {
                    warn!(error = %cleanup_err, "start_loop: workspace cleanup after health-check failure also failed");
                }
                return Err(SchedulerError::Agent(e));
            }
            info.opencode_port = Some(s.port());
            info.opencode_pid = s.pid();
            opencode_base_url = Some(s.base_url());
            server = Some(s);
        }

        self.registry.register_loop(info.clone()).await;

        let state = Arc::new(Mutex::new(LoopState::new(
            loop_id.clone(),
            task_dir.clone(),
            worktree.worktree_path.clone(),
            params.branch.clone(),
            params.max_iterations,
            params.push_frequency,
            self.config.loop_timeout_hours,
        )));

        let mut options = DriverOptions::new(resolved_agent);
        options.opencode_base_url = opencode_base_url;

        let scheduler = Arc::clone(self);
        let driver_loop_id = loop_id.clone();
        let driver_state = Arc::clone(&state);
        let handle = tokio::spawn(async move {
            scheduler.drive_loop(driver_loop_id, driver_state, options).await;
        });

        info.status = LoopStatus::Running;
        self.active.lock().await.insert(
            loop_id.clone(),
            ActiveLoop { info: info.clone(), state, server, handle },
        );

        info!(loop_id = %loop_id, task_name = %task_name, agent = resolved_agent.as_str(), "start_loop: admitted");
        Ok(info)
    }

    async fn drive_loop(self: Arc<Self>, loop_id: String, state: Arc<Mutex<LoopState>>, options: DriverOptions) {
        let task_dir = state.lock().await.task_dir.clone();
        let progress = ProgressStore::new(task_dir);
        let outcome = run_loop(Arc::clone(&state), &progress, options).await;

        let (branch, task_name) = {
            let mut active = self.active.lock().await;
            if let Some(entry) = active.get_mut(&loop_id) {
                entry.info.status = outcome.status;
                entry.info.iteration = outcome.iterations_used;
                entry.info.final_story = outcome.final_story.clone();
                entry.info.last_error = outcome.last_error.clone();
                if let Some(server) = entry.server.as_mut() {
                    server.stop().await;
                }
            }
            match active.get(&loop_id) {
                Some(entry) => (entry.info.branch.clone(), entry.info.task_name.clone()),
                None => (String::new(), String::new()),
            }
        };

        self.registry.update_loop(&loop_id, outcome.iterations_used, outcome.status).await;

        let event_type = match outcome.status {
            LoopStatus::Completed | LoopStatus::Exhausted => LoopEventType::LoopCompleted,
            _ => LoopEventType::LoopFailed,
        };
        let error = match outcome.status {
            LoopStatus::Failed | LoopStatus::TimedOut => outcome.last_error.clone(),
            _ => None,
        };
        self.broadcaster
            .broadcast(LoopEvent {
                event_type,
                loop_id: loop_id.clone(),
                task_name,
                status: outcome.status,
                iterations_used: outcome.iterations_used,
                branch,
                final_story: outcome.final_story,
                error,
            })
            .await;

        self.registry.unregister_loop(&loop_id).await;
        self.active.lock().await.remove(&loop_id);
        debug!(loop_id = %loop_id, status = %outcome.status, "drive_loop: task finished");
    }

    /// Mark the loop `stopping` and signal its driver; if it hasn't wound
    /// down within the grace period, abort its task directly.
    pub async fn stop_loop(self: &Arc<Self>, loop_id: &str) -> Result<LoopInfo, SchedulerError> {
        let info = {
            let mut active = self.active.lock().await;
            let entry = active.get_mut(loop_id).ok_or_else(|| SchedulerError::LoopNotFound(loop_id.to_string()))?;
            entry.info.status = LoopStatus::Stopping;
            entry.state.lock().await.stop_requested = true;
            entry.info.clone()
        };
        self.registry.update_loop(loop_id, info.iteration, LoopStatus::Stopping).await;
        info!(loop_id, "stop_loop: stop requested");

        let scheduler = Arc::clone(self);
        let watched_id = loop_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(STOP_GRACE_PERIOD).await;
            let mut active = scheduler.active.lock().await;
            if let Some(mut entry) = active.remove(&watched_id) {
                warn!(loop_id = %watched_id, "stop_loop: driver did not terminate within grace period, hard-cancelling");
                entry.handle.abort();
                if let Some(server) = entry.server.as_mut() {
                    server.stop().await;
                }
                scheduler.registry.unregister_loop(&watched_id).await;
            }
        });

        Ok(info)
    }

    pub async fn list_loops(&self) -> Vec<LoopInfo> {
        self.active.lock().await.values().map(|e| e.info.clone()).collect()
    }

    pub async fn get_health(&self) -> HealthInfo {
        HealthInfo {
            hostname: self.hostname.clone(),
            started_at: self.started_at,
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
            active_loops: self.active.lock().await.len(),
            max_concurrent_loops: self.config.max_concurrent_loops,
            workspace_dir: self.config.workspace_dir.clone(),
            overlay_status: "disabled",
        }
    }

    pub async fn get_agents(&self) -> Vec<AgentAvailability> {
        crate::domain::ALL_AGENT_KINDS
            .iter()
            .map(|kind| {
                let name = kind.as_str();
                match agent_binary_path(name) {
                    Some(path) => AgentAvailability {
                        name: name.to_string(),
                        available: true,
                        version: agent_version(name),
                        path: Some(path),
                    },
                    None => AgentAvailability { name: name.to_string(), available: false, path: None, version: None },
                }
            })
            .collect()
    }
}

fn validate_params(params: &StartLoopParams) -> Result<(), SchedulerError> {
    let mut missing = Vec::new();
    if params.origin_url.is_empty() {
        missing.push("origin_url");
    }
    if params.branch.is_empty() {
        missing.push("branch");
    }
    if params.task_dir.is_empty() {
        missing.push("task_dir");
    }
    if missing.is_empty() { Ok(()) } else { Err(SchedulerError::InvalidParams(missing.join(", "))) }
}

fn extract_task_name(task_dir: &str) -> String {
    task_dir.trim_end_matches('/').rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or("unknown").to_string()
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| {
            std::process::Command::new("hostname").output().ok().and_then(|o| String::from_utf8(o.stdout).ok())
        })
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn agent_binary_path(name: &str) -> Option<String> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(name)).find(|p| p.is_file()).map(|p| p.display().to_string())
}

fn agent_binary_available(name: &str) -> bool {
    agent_binary_path(name).is_some()
}

fn agent_version(name: &str) -> Option<String> {
    let output = std::process::Command::new(name).arg("--version").output().ok()?;
    let text = if output.stdout.is_empty() { output.stderr } else { output.stdout };
    String::from_utf8(text).ok().map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_config(root: &std::path::Path) -> SchedulerConfig {
        SchedulerConfig {
            workspace_dir: root.join("workspaces"),
            max_concurrent_loops: 2,
            loop_timeout_hours: 24,
            registry_path: root.join("loop_registry.json"),
        }
    }

    #[tokio::test]
    async fn rejects_missing_required_params() {
        let dir = tempdir().unwrap();
        let scheduler = Arc::new(LoopScheduler::new(test_config(dir.path())));
        let params = StartLoopParams {
            origin_url: String::new(),
            branch: "main".to_string(),
            task_dir: "task".to_string(),
            max_iterations: 50,
            agent: "claude".to_string(),
            push_frequency: 1,
        };
        let err = scheduler.start_loop(params).await.unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn stop_unknown_loop_is_not_found() {
        let dir = tempdir().unwrap();
        let scheduler = Arc::new(LoopScheduler::new(test_config(dir.path())));
        let err = scheduler.stop_loop("loop-missing").await.unwrap_err();
        assert!(matches!(err, SchedulerError::LoopNotFound(_)));
    }

    #[tokio::test]
    async fn list_loops_starts_empty() {
        let dir = tempdir().unwrap();
        let scheduler = Arc::new(LoopScheduler::new(test_config(dir.path())));
        assert!(scheduler.list_loops().await.is_empty());
    }

    #[tokio::test]
    async fn get_health_reports_configured_cap() {
        let dir = tempdir().unwrap();
        let scheduler = Arc::new(LoopScheduler::new(test_config(dir.path())));
        let health = scheduler.get_health().await;
        assert_eq!(health.max_concurrent_loops, 2);
        assert_eq!(health.active_loops, 0);
    }

    #[tokio::test]
    async fn recover_orphans_on_empty_registry_is_noop() {
        let dir = tempdir().unwrap();
        let scheduler = LoopScheduler::new(test_config(dir.path()));
        scheduler.recover_orphans().await;
    }

    #[test]
    fn extract_task_name_takes_last_segment() {
        assert_eq!(extract_task_name("stories/us-001/"), "us-001");
        assert_eq!(extract_task_name("us-002"), "us-002");
    }
}
