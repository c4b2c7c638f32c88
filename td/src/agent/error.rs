//! Error types for agent execution.

/// Errors an `AgentAdapter` can raise. These are domain errors in the sense of
/// the control plane's error-code mapping; ordinary I/O failures inside a
/// single run are folded into a failed `IterationResult` instead, matching
/// the source's "OSError -> failed result" behavior.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("failed to start agent process: {0}")]
    SpawnFailed(String),

    #[error("agent server error: {0}")]
    ServerError(String),

    #[error("agent server health check timed out after {0}s")]
    HealthCheckTimeout(u64),

    #[error("agent server exited during startup: {0}")]
    ServerDiedDuringStartup(String),

    #[error("unknown agent kind: {0}")]
    UnknownAgent(String),
}
