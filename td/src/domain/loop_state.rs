//! Per-loop state machine data: `LoopState` (driver-owned), `LoopInfo`
//! (control-plane view), and `LoopEvent` (broadcast payload).

use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::AgentKind;

/// Status of a loop. Terminal states: `completed`, `exhausted`, `failed`,
/// `timed_out`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopStatus {
    Starting,
    Running,
    Completed,
    Exhausted,
    Failed,
    Stopping,
    TimedOut,
}

impl LoopStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LoopStatus::Completed | LoopStatus::Exhausted | LoopStatus::Failed | LoopStatus::TimedOut
        )
    }
}

impl std::fmt::Display for LoopStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopStatus::Starting => "starting",
            LoopStatus::Running => "running",
            LoopStatus::Completed => "completed",
            LoopStatus::Exhausted => "exhausted",
            LoopStatus::Failed => "failed",
            LoopStatus::Stopping => "stopping",
            LoopStatus::TimedOut => "timed_out",
        };
        write!(f, "{}", s)
    }
}

/// Exclusively owned by its IterationDriver task; the scheduler holds only a
/// weak back-reference (via the in-memory `LoopInfo` table) for stop/list.
#[derive(Debug, Clone)]
pub struct LoopState {
    pub loop_id: String,
    pub task_dir: PathBuf,
    pub worktree_path: PathBuf,
    pub branch: String,
    pub max_iterations: u32,
    pub push_frequency: u32,
    pub iteration: u32,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
    pub status: LoopStatus,
    pub started_at: Instant,
    pub completed_at: Option<Instant>,
    pub stop_requested: bool,
    pub checkpoint_requested: bool,
    pub timeout_hours: u32,
}

impl LoopState {
    pub fn new(
        loop_id: String,
        task_dir: PathBuf,
        worktree_path: PathBuf,
        branch: String,
        max_iterations: u32,
        push_frequency: u32,
        timeout_hours: u32,
    ) -> Self {
        Self {
            loop_id,
            task_dir,
            worktree_path,
            branch,
            max_iterations,
            push_frequency,
            iteration: 0,
            consecutive_failures: 0,
            last_error: None,
            status: LoopStatus::Starting,
            started_at: Instant::now(),
            completed_at: None,
            stop_requested: false,
            checkpoint_requested: false,
            timeout_hours,
        }
    }

    /// `true` once the per-loop wall deadline has elapsed. `timeout_hours == 0`
    /// disables the deadline.
    pub fn is_timed_out(&self) -> bool {
        if self.timeout_hours == 0 {
            return false;
        }
        self.started_at.elapsed().as_secs() >= u64::from(self.timeout_hours) * 3600
    }
}

/// Control-plane view of a loop, returned by `list_loops` and embedded in
/// `start_loop`/`stop_loop` responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopInfo {
    pub loop_id: String,
    pub task_name: String,
    pub task_dir: PathBuf,
    pub branch: String,
    pub iteration: u32,
    pub max_iterations: u32,
    pub agent: AgentKind,
    pub status: LoopStatus,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opencode_port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opencode_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    pub push_frequency: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_story: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub timeout_hours: u32,
}

/// Lifecycle notification broadcast to subscribed control-plane streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopEventType {
    LoopCompleted,
    LoopFailed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopEvent {
    #[serde(rename = "type")]
    pub event_type: LoopEventType,
    pub loop_id: String,
    pub task_name: String,
    pub status: LoopStatus,
    pub iterations_used: u32,
    pub branch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_story: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_disabled_when_zero() {
        let state = LoopState::new(
            "loop-1".into(),
            "/tmp/t".into(),
            "/tmp/w".into(),
            "main".into(),
            50,
            1,
            0,
        );
        assert!(!state.is_timed_out());
    }

    #[test]
    fn terminal_states() {
        assert!(LoopStatus::Completed.is_terminal());
        assert!(LoopStatus::Failed.is_terminal());
        assert!(!LoopStatus::Running.is_terminal());
        assert!(!LoopStatus::Stopping.is_terminal());
    }
}
