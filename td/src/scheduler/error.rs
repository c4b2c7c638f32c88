//! Error taxonomy for LoopScheduler admission and control, mirrored onto the
//! JSON-RPC error codes at the ControlPlane boundary.

use crate::agent::AgentError;
use crate::workspace::WorkspaceError;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("missing required parameter(s): {0}")]
    InvalidParams(String),
    #[error("maximum concurrent loops reached ({0})")]
    MaxLoopsExceeded(usize),
    #[error("agent '{0}' is not available: {1}")]
    AgentNotFound(String, String),
    #[error("loop not found: {0}")]
    LoopNotFound(String),
    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),
    #[error("agent error: {0}")]
    Agent(#[from] AgentError),
}
