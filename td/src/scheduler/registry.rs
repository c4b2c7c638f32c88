//! Persisted `LoopRegistry`: survives daemon restarts so orphaned loops (agent
//! servers and worktrees left behind by a crashed daemon) can be recovered.
//! A single JSON file, guarded by a mutex, rewritten in full on every change.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{LoopInfo, LoopStatus};

#[derive(Debug, serde::Serialize, serde::Deserialize, Default)]
struct RegistryFile {
    loops: HashMap<String, LoopInfo>,
}

pub struct LoopRegistry {
    path: PathBuf,
    loops: Mutex<HashMap<String, LoopInfo>>,
}

impl LoopRegistry {
    pub fn new(path: PathBuf) -> Self {
        Self { path, loops: Mutex::new(HashMap::new()) }
    }

    /// Load the registry from disk. Every entry found is a potential orphan:
    /// it was active when the daemon last wrote the file.
    pub async fn load(&self) -> Vec<LoopInfo> {
        debug!(path = ?self.path, "LoopRegistry::load: called");
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Vec::new();
            }
            Err(e) => {
                warn!(error = %e, "LoopRegistry::load: failed to read registry file");
                return Vec::new();
            }
        };

        let parsed: RegistryFile = match serde_json::from_str(&content) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "LoopRegistry::load: failed to parse registry file");
                return Vec::new();
            }
        };

        let orphans: Vec<LoopInfo> = parsed.loops.values().cloned().collect();
        info!(count = orphans.len(), "LoopRegistry::load: found potential orphan(s)");
        *self.loops.lock().await = parsed.loops;
        orphans
    }

    async fn save(&self, loops: &HashMap<String, LoopInfo>) {
        let data = RegistryFile { loops: loops.clone() };
        if let Some(parent) = self.path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            warn!(error = %e, "LoopRegistry::save: failed to create parent directory");
            return;
        }
        match serde_json::to_string_pretty(&data) {
            Ok(json) => {
                if let Err(e) = tokio::fs::write(&self.path, json).await {
                    warn!(error = %e, "LoopRegistry::save: failed to write registry file");
                }
            }
            Err(e) => warn!(error = %e, "LoopRegistry::save: failed to serialize registry"),
        }
    }

    pub async fn register_loop(&self, info: LoopInfo) {
        let mut loops = self.loops.lock().await;
        loops.insert(info.loop_id.clone(), info);
        self.save(&loops).await;
    }

    pub async fn update_loop(&self, loop_id: &str, iteration: u32, status: LoopStatus) {
        let mut loops = self.loops.lock().await;
        if let Some(info) = loops.get_mut(loop_id) {
            info.iteration = iteration;
            info.status = status;
        }
        self.save(&loops).await;
    }

    pub async fn unregister_loop(&self, loop_id: &str) {
        let mut loops = self.loops.lock().await;
        if loops.remove(loop_id).is_some() {
            debug!(loop_id, "LoopRegistry::unregister_loop: removed");
        }
        self.save(&loops).await;
    }

    pub async fn clear(&self) {
        let mut loops = self.loops.lock().await;
        loops.clear();
        self.save(&loops).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf as P;
    use tempfile::tempdir;

    fn sample_info(loop_id: &str) -> LoopInfo {
        LoopInfo {
            loop_id: loop_id.to_string(),
            task_name: "demo".to_string(),
            task_dir: P::from("/tmp/demo"),
            branch: "main".to_string(),
            iteration: 0,
            max_iterations: 50,
            agent: crate::domain::AgentKind::Claude,
            status: LoopStatus::Starting,
            started_at: chrono::Utc::now(),
            opencode_port: None,
            opencode_pid: None,
            worktree_path: Some(P::from("/tmp/wt")),
            service_name: None,
            push_frequency: 1,
            final_story: None,
            last_error: None,
            timeout_hours: 24,
        }
    }

    #[tokio::test]
    async fn register_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop_registry.json");

        let registry = LoopRegistry::new(path.clone());
        registry.register_loop(sample_info("loop-1")).await;

        let reloaded = LoopRegistry::new(path);
        let orphans = reloaded.load().await;
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].loop_id, "loop-1");
    }

    #[tokio::test]
    async fn unregister_removes_entry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop_registry.json");
        let registry = LoopRegistry::new(path.clone());
        registry.register_loop(sample_info("loop-1")).await;
        registry.unregister_loop("loop-1").await;

        let reloaded = LoopRegistry::new(path);
        assert!(reloaded.load().await.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_registry() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loop_registry.json");
        let registry = LoopRegistry::new(path.clone());
        registry.register_loop(sample_info("loop-1")).await;
        registry.register_loop(sample_info("loop-2")).await;
        registry.clear().await;

        let reloaded = LoopRegistry::new(path);
        assert!(reloaded.load().await.is_empty());
    }

    #[tokio::test]
    async fn load_missing_file_returns_empty() {
        let dir = tempdir().unwrap();
        let registry = LoopRegistry::new(dir.path().join("nonexistent.json"));
        assert!(registry.load().await.is_empty());
    }
}
