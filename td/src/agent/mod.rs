//! Agent abstraction layer (C1 consumer / C2 / C3 / C7): a pluggable
//! interface for running coding agents with shared failure classification
//! and failover bookkeeping.

mod adapter;
mod claude;
mod config;
mod error;
mod failure;
mod opencode;
mod server;

pub use adapter::{AgentAdapter, COMPLETION_SIGNAL};
pub use claude::ClaudeAdapter;
pub use config::AgentConfig;
pub use error::AgentError;
pub use failure::{FailureTracker, detect_failure, extract_error};
pub use opencode::OpencodeAdapter;
pub use server::AgentServer;

use crate::domain::AgentKind;

/// Construct the adapter for a given agent kind. Opencode requires a running
/// [`AgentServer`]'s base URL; Claude is a bare subprocess adapter.
pub fn create_adapter(kind: AgentKind, opencode_base_url: Option<&str>) -> Box<dyn AgentAdapter> {
    match kind {
        AgentKind::Claude => Box::new(ClaudeAdapter::new()),
        AgentKind::Opencode => {
            let base_url = opencode_base_url
                .expect("opencode adapter requires a running AgentServer base URL")
                .to_string();
            Box::new(OpencodeAdapter::new(base_url))
        }
    }
}
