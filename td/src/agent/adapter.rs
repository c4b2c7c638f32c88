//! `AgentAdapter` trait (C2): the common surface every agent kind implements.

use async_trait::async_trait;

use crate::domain::IterationResult;

use super::config::AgentConfig;

pub const COMPLETION_SIGNAL: &str = "<promise>COMPLETE</promise>";

/// Runs a single agent invocation to completion.
///
/// Implementations drive either a plain subprocess (Claude) or an HTTP+SSE
/// backed server process (Opencode), but both are reduced to the same
/// start/poll/collect shape so the driver never branches on agent kind.
#[async_trait]
pub trait AgentAdapter: Send + Sync {
    /// The agent's identifier, as used in prompts, logs, and RPC payloads.
    fn name(&self) -> &'static str;

    /// Start, wait for completion, and return a structured result. Never
    /// returns `Err` for an agent-side failure: those are reported as a
    /// failed `IterationResult` so the driver can apply failover logic
    /// uniformly.
    async fn run(&self, config: &AgentConfig) -> IterationResult;
}
