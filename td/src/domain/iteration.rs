//! Result of a single agent invocation.

use serde::{Deserialize, Serialize};

/// Outcome of one `AgentAdapter::run` call.
///
/// `completed` and `failed` are independent; a completed result is never failed
/// (enforced by the constructors below, not by the type system, matching the
/// source's plain-struct shape).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IterationResult {
    pub output: String,
    pub exit_code: i32,
    pub duration_secs: f64,
    pub completed: bool,
    pub failed: bool,
    pub error_message: String,
}

impl IterationResult {
    pub fn success(output: String, exit_code: i32, duration_secs: f64, completed: bool) -> Self {
        Self {
            output,
            exit_code,
            duration_secs,
            completed,
            failed: false,
            error_message: String::new(),
        }
    }

    pub fn failure(output: String, exit_code: i32, duration_secs: f64, error_message: String) -> Self {
        Self {
            output,
            exit_code,
            duration_secs,
            completed: false,
            failed: true,
            error_message,
        }
    }
}
