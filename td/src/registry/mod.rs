//! SessionRegistry (C5): a durable `task_name -> SessionInfo` table plus the
//! signal-file side channel for out-of-band stop/checkpoint requests.

mod error;
mod session;
mod signal;

pub use error::RegistryError;
pub use session::{SessionInfo, status};
pub use signal::{Signal, SignalKind, clear_signal, read_signal, write_signal};

use std::path::PathBuf;
use std::sync::Arc;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use taskstore::{Filter, FilterOp, IndexValue, Store};
use tracing::debug;

pub struct SessionRegistry {
    store: Arc<Store>,
    signal_dir: PathBuf,
}

impl SessionRegistry {
    pub fn new(store: Arc<Store>, signal_dir: PathBuf) -> Self {
        Self { store, signal_dir }
    }

    pub fn register(&self, session: &SessionInfo) -> Result<(), RegistryError> {
        debug!(task_name = %session.task_name, "SessionRegistry::register: called");
        self.store.put(session)?;
        clear_signal(&self.signal_dir, &session.task_name);
        Ok(())
    }

    pub fn update_status(&self, task_name: &str, new_status: &str) -> Result<(), RegistryError> {
        debug!(task_name, new_status, "SessionRegistry::update_status: called");
        let mut session = self.get(task_name)?;
        session.status = new_status.to_string();
        session.updated_at = chrono::Utc::now();
        self.store.put(&session)?;
        Ok(())
    }

    pub fn update_progress(&self, task_name: &str, iteration: u32, current_story: &str) -> Result<(), RegistryError> {
        debug!(task_name, iteration, current_story, "SessionRegistry::update_progress: called");
        let mut session = self.get(task_name)?;
        session.iteration = iteration;
        session.current_story = current_story.to_string();
        session.updated_at = chrono::Utc::now();
        self.store.put(&session)?;
        Ok(())
    }

    pub fn get(&self, task_name: &str) -> Result<SessionInfo, RegistryError> {
        self.store
            .get::<SessionInfo>(task_name)?
            .ok_or_else(|| RegistryError::NotFound(task_name.to_string()))
    }

    pub fn list_all(&self) -> Result<Vec<SessionInfo>, RegistryError> {
        Ok(self.store.list::<SessionInfo>()?)
    }

    /// List sessions whose status is `running`, demoting any whose backing
    /// process has died to `failed` as it's encountered.
    pub fn list_running(&self) -> Result<Vec<SessionInfo>, RegistryError> {
        debug!("SessionRegistry::list_running: called");
        let candidates =
            self.store.query::<SessionInfo>(&[Filter::new("status", FilterOp::Eq, IndexValue::String(status::RUNNING.to_string()))])?;

        let mut running = Vec::new();
        for session in candidates {
            if process_alive(session.pid) {
                running.push(session);
            } else {
                debug!(task_name = %session.task_name, pid = session.pid, "list_running: stale entry, demoting to failed");
                self.update_status(&session.task_name, status::FAILED)?;
            }
        }
        Ok(running)
    }

    pub fn remove(&self, task_name: &str) -> Result<(), RegistryError> {
        debug!(task_name, "SessionRegistry::remove: called");
        self.store.delete::<SessionInfo>(task_name)?;
        clear_signal(&self.signal_dir, task_name);
        Ok(())
    }

    pub fn signal_dir(&self) -> &std::path::Path {
        &self.signal_dir
    }
}

/// Liveness check for the process backing a session. Terminal-multiplexer
/// validation (e.g. the tmux pane still running) is external collaborator
/// territory; a bare PID check is what the daemon itself can verify.
fn process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry() -> (SessionRegistry, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open_in_memory().unwrap());
        let registry = SessionRegistry::new(store, dir.path().to_path_buf());
        (registry, dir)
    }

    #[test]
    fn register_then_get_roundtrips() {
        let (registry, _dir) = registry();
        let session = SessionInfo::new("task-a", "/tmp/task-a", std::process::id(), "", "claude", 50, "daemon");
        registry.register(&session).unwrap();
        let fetched = registry.get("task-a").unwrap();
        assert_eq!(fetched.task_name, "task-a");
        assert_eq!(fetched.status, status::RUNNING);
    }

    #[test]
    fn update_progress_persists() {
        let (registry, _dir) = registry();
        let session = SessionInfo::new("task-a", "/tmp/task-a", std::process::id(), "", "claude", 50, "daemon");
        registry.register(&session).unwrap();
        registry.update_progress("task-a", 3, "S2").unwrap();
        let fetched = registry.get("task-a").unwrap();
        assert_eq!(fetched.iteration, 3);
        assert_eq!(fetched.current_story, "S2");
    }

    #[test]
    fn list_running_demotes_dead_pid() {
        let (registry, _dir) = registry();
        let session = SessionInfo::new("task-a", "/tmp/task-a", 999_999, "", "claude", 50, "daemon");
        registry.register(&session).unwrap();
        let running = registry.list_running().unwrap();
        assert!(running.is_empty());
        assert_eq!(registry.get("task-a").unwrap().status, status::FAILED);
    }

    #[test]
    fn list_running_keeps_live_pid() {
        let (registry, _dir) = registry();
        let session = SessionInfo::new("task-a", "/tmp/task-a", std::process::id(), "", "claude", 50, "daemon");
        registry.register(&session).unwrap();
        let running = registry.list_running().unwrap();
        assert_eq!(running.len(), 1);
    }

    #[test]
    fn remove_clears_entry_and_signal() {
        let (registry, dir) = registry();
        let session = SessionInfo::new("task-a", "/tmp/task-a", std::process::id(), "", "claude", 50, "daemon");
        registry.register(&session).unwrap();
        write_signal(dir.path(), "task-a", SignalKind::Stop).unwrap();
        registry.remove("task-a").unwrap();
        assert!(registry.get("task-a").is_err());
        assert!(read_signal(dir.path(), "task-a").is_none());
    }
}
