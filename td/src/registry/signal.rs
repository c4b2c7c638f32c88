//! Per-task signal files: the out-of-band `stop`/`checkpoint` control channel
//! polled by the IterationDriver around each iteration.

use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Stop,
    Checkpoint,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub timestamp: chrono::DateTime<Utc>,
}

fn signal_path(signal_dir: &Path, task_name: &str) -> PathBuf {
    signal_dir.join(format!("{task_name}.signal"))
}

/// Write a signal file for `task_name`, overwriting any pending one.
pub fn write_signal(signal_dir: &Path, task_name: &str, kind: SignalKind) -> std::io::Result<()> {
    debug!(task_name, ?kind, "write_signal: called");
    std::fs::create_dir_all(signal_dir)?;
    let path = signal_path(signal_dir, task_name);
    let signal = Signal { kind, timestamp: Utc::now() };
    std::fs::write(path, serde_json::to_string(&signal).expect("Signal always serializes"))
}

/// Read and consume (unlink) the pending signal for `task_name`, if any.
/// A malformed signal file is treated as absent, not an error.
pub fn read_signal(signal_dir: &Path, task_name: &str) -> Option<Signal> {
    let path = signal_path(signal_dir, task_name);
    if !path.is_file() {
        return None;
    }
    let content = std::fs::read_to_string(&path).ok()?;
    let signal: Signal = serde_json::from_str(&content).ok()?;
    let _ = std::fs::remove_file(&path);
    debug!(task_name, ?signal.kind, "read_signal: consumed pending signal");
    Some(signal)
}

/// Remove any pending signal without consuming its meaning.
pub fn clear_signal(signal_dir: &Path, task_name: &str) {
    let path = signal_path(signal_dir, task_name);
    if path.is_file() {
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_consumes_signal() {
        let dir = tempdir().unwrap();
        write_signal(dir.path(), "task-a", SignalKind::Stop).unwrap();

        let signal = read_signal(dir.path(), "task-a").unwrap();
        assert_eq!(signal.kind, SignalKind::Stop);
        assert!(read_signal(dir.path(), "task-a").is_none());
    }

    #[test]
    fn read_signal_none_when_absent() {
        let dir = tempdir().unwrap();
        assert!(read_signal(dir.path(), "task-a").is_none());
    }

    #[test]
    fn clear_signal_removes_without_returning() {
        let dir = tempdir().unwrap();
        write_signal(dir.path(), "task-a", SignalKind::Checkpoint).unwrap();
        clear_signal(dir.path(), "task-a");
        assert!(read_signal(dir.path(), "task-a").is_none());
    }
}
