//! `SessionInfo`: the local-mode registry's per-task record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use taskstore::{IndexValue, Record};

/// Status values a session can hold. Stored as a plain string in the table so
/// unexpected values round-trip instead of failing to deserialize.
pub mod status {
    pub const RUNNING: &str = "running";
    pub const STOPPED: &str = "stopped";
    pub const COMPLETED: &str = "completed";
    pub const FAILED: &str = "failed";
    pub const CHECKPOINTED: &str = "checkpointed";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub task_name: String,
    pub task_dir: String,
    pub pid: u32,
    pub multiplex_session: String,
    pub agent: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub iteration: u32,
    pub current_story: String,
    pub max_iterations: u32,
    pub session_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_port: Option<u16>,
}

impl SessionInfo {
    pub fn new(
        task_name: impl Into<String>,
        task_dir: impl Into<String>,
        pid: u32,
        multiplex_session: impl Into<String>,
        agent: impl Into<String>,
        max_iterations: u32,
        session_type: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            task_name: task_name.into(),
            task_dir: task_dir.into(),
            pid,
            multiplex_session: multiplex_session.into(),
            agent: agent.into(),
            status: status::RUNNING.to_string(),
            started_at: now,
            updated_at: now,
            iteration: 0,
            current_story: String::new(),
            max_iterations,
            session_type: session_type.into(),
            server_port: None,
        }
    }
}

impl Record for SessionInfo {
    fn id(&self) -> &str {
        &self.task_name
    }

    fn updated_at(&self) -> i64 {
        self.updated_at.timestamp_millis()
    }

    fn collection_name() -> &'static str {
        "sessions"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("status".to_string(), IndexValue::String(self.status.clone()));
        fields.insert("agent".to_string(), IndexValue::String(self.agent.clone()));
        fields
    }
}
