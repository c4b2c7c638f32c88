//! WorkspaceManager (C6): bare-repo cache plus isolated worktree allocation.
//!
//! Directory layout under the workspace root:
//!
//! ```text
//! <root>/
//!   <project>/
//!     bare.git/
//!     checkouts/
//!       <task>-<id>/
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::error::WorkspaceError;
use super::git::run_git;
use super::project_name::resolve_project_name;

const MIN_FREE_BYTES: u64 = 100 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct WorktreeInfo {
    pub worktree_path: PathBuf,
    pub project_name: String,
    pub branch: String,
    pub worktree_id: String,
    pub bare_repo_path: PathBuf,
}

pub struct WorkspaceManager {
    workspace_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(workspace_dir: impl Into<PathBuf>) -> Self {
        Self { workspace_dir: workspace_dir.into() }
    }

    /// Runs `git worktree prune` against every cached bare repository. Intended
    /// to be called once on daemon startup.
    pub async fn prune_stale_worktrees(&self) -> Result<usize, WorkspaceError> {
        info!(root = ?self.workspace_dir, "WorkspaceManager::prune_stale_worktrees: called");
        if !self.workspace_dir.is_dir() {
            return Ok(0);
        }

        let mut pruned = 0;
        let mut entries = tokio::fs::read_dir(&self.workspace_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let project_dir = entry.path();
            if !project_dir.is_dir() {
                continue;
            }
            let bare_repo = project_dir.join("bare.git");
            if !bare_repo.is_dir() {
                continue;
            }

            debug!(?bare_repo, "prune_stale_worktrees: pruning");
            match run_git(&["worktree", "prune"], &bare_repo, Duration::from_secs(30)).await {
                Ok(out) if out.success => pruned += 1,
                Ok(out) => warn!(?bare_repo, stderr = %out.stderr.trim(), "prune_stale_worktrees: prune failed"),
                Err(e) => warn!(?bare_repo, error = %e, "prune_stale_worktrees: prune errored"),
            }
        }

        if pruned > 0 {
            info!(pruned, "prune_stale_worktrees: pruned project(s)");
        }
        Ok(pruned)
    }

    /// Clone-or-validate the bare repo, fetch the branch, and allocate a fresh
    /// isolated worktree for `task_name`.
    pub async fn setup_workspace(&self, origin_url: &str, branch: &str, task_name: &str) -> Result<WorktreeInfo, WorkspaceError> {
        let project_name = resolve_project_name(origin_url)?;
        info!(project_name, branch, task_name, "setup_workspace: called");

        let project_dir = self.workspace_dir.join(&project_name);
        let bare_repo = project_dir.join("bare.git");
        let checkouts_dir = project_dir.join("checkouts");

        tokio::fs::create_dir_all(&self.workspace_dir).await?;

        if bare_repo.is_dir() {
            debug!("setup_workspace: bare repo exists, validating origin");
            validate_origin_url(&bare_repo, origin_url).await?;
        } else {
            info!(origin_url, "setup_workspace: cloning bare repo");
            clone_bare(origin_url, &bare_repo).await?;
        }

        info!(branch, "setup_workspace: fetching branch");
        fetch_branch(&bare_repo, branch).await?;

        info!(task_name, "setup_workspace: creating worktree");
        create_worktree(&bare_repo, &checkouts_dir, branch, task_name).await
    }

    /// Remove a worktree, falling back to a manual directory removal if `git
    /// worktree remove` fails.
    pub async fn cleanup_workspace(&self, worktree: &WorktreeInfo) -> Result<(), WorkspaceError> {
        info!(path = ?worktree.worktree_path, "cleanup_workspace: called");
        if !worktree.worktree_path.exists() {
            return Ok(());
        }

        let result = run_git(
            &["worktree", "remove", "--force", worktree.worktree_path.to_str().unwrap_or_default()],
            &worktree.bare_repo_path,
            Duration::from_secs(60),
        )
        .await?;

        if !result.success {
            warn!(stderr = %result.stderr.trim(), "cleanup_workspace: git worktree remove failed, falling back to manual removal");
            tokio::fs::remove_dir_all(&worktree.worktree_path).await.map_err(|e| {
                WorkspaceError::Other(format!("manual worktree removal failed for {:?}: {e}", worktree.worktree_path))
            })?;
        }

        Ok(())
    }

    pub fn worktree_path(&self, project_name: &str, task_name: &str, worktree_id: &str) -> PathBuf {
        self.workspace_dir.join(project_name).join("checkouts").join(format!("{task_name}-{worktree_id}"))
    }
}

async fn check_disk_space(path: &Path) -> Result<(), WorkspaceError> {
    let mut check_path = path.to_path_buf();
    while !check_path.exists() {
        match check_path.parent() {
            Some(parent) => check_path = parent.to_path_buf(),
            None => return Ok(()),
        }
    }

    let Ok(output) = Command::new("df").args(["-k", check_path.to_str().unwrap_or("/tmp")]).output().await else {
        return Ok(());
    };
    let stdout = String::from_utf8_lossy(&output.stdout);
    let Some(line) = stdout.lines().nth(1) else {
        return Ok(());
    };
    let Some(available_kb) = line.split_whitespace().nth(3).and_then(|s| s.parse::<u64>().ok()) else {
        return Ok(());
    };

    if available_kb * 1024 < MIN_FREE_BYTES {
        return Err(WorkspaceError::DiskFull(format!("only {available_kb}KB available")));
    }
    Ok(())
}

async fn validate_origin_url(bare_repo: &Path, expected_url: &str) -> Result<(), WorkspaceError> {
    let result = run_git(&["config", "--get", "remote.origin.url"], bare_repo, Duration::from_secs(10)).await?;
    if !result.success {
        return Err(WorkspaceError::OriginMismatch(format!("existing bare repo has no origin configured: {bare_repo:?}")));
    }

    fn normalize(url: &str) -> String {
        url.trim_end_matches('/').strip_suffix(".git").unwrap_or_else(|| url.trim_end_matches('/')).to_lowercase()
    }

    let existing = result.stdout.trim();
    if normalize(existing) != normalize(expected_url) {
        return Err(WorkspaceError::OriginMismatch(format!(
            "origin URL mismatch for {bare_repo:?}: existing={existing} requested={expected_url}"
        )));
    }
    Ok(())
}

async fn clone_bare(origin_url: &str, bare_repo: &Path) -> Result<(), WorkspaceError> {
    check_disk_space(bare_repo.parent().unwrap_or(bare_repo)).await?;
    if let Some(parent) = bare_repo.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let result = run_git(
        &["clone", "--bare", "--", origin_url, bare_repo.to_str().unwrap_or_default()],
        bare_repo.parent().unwrap_or(Path::new(".")),
        Duration::from_secs(600),
    )
    .await?;

    if result.success {
        return Ok(());
    }

    let combined = result.combined();
    if combined.contains("Could not resolve host") || combined.contains("unable to access") {
        return Err(WorkspaceError::OriginUnreachable(format!("cannot reach origin: {origin_url}\n{}", result.stderr.trim())));
    }
    if combined.contains("No space left") {
        return Err(WorkspaceError::DiskFull(format!("disk full during clone: {}", result.stderr.trim())));
    }
    if combined.contains("Permission denied") {
        return Err(WorkspaceError::OriginUnreachable(format!("permission denied accessing: {origin_url}")));
    }
    if combined.to_lowercase().contains("not found") || combined.to_lowercase().contains("does not exist") {
        return Err(WorkspaceError::OriginUnreachable(format!("repository not found: {origin_url}")));
    }
    Err(WorkspaceError::OriginUnreachable(format!("failed to clone {origin_url}: {}", result.stderr.trim())))
}

async fn fetch_branch(bare_repo: &Path, branch: &str) -> Result<(), WorkspaceError> {
    let result = run_git(&["fetch", "origin", &format!("{branch}:{branch}")], bare_repo, Duration::from_secs(300)).await?;
    if result.success {
        return Ok(());
    }

    let combined = result.combined().to_lowercase();
    if combined.contains("couldn't find remote ref") || combined.contains("not found") {
        return Err(WorkspaceError::BranchNotFound(format!("branch not found: {branch}")));
    }
    if combined.contains("could not resolve host") || combined.contains("unable to access") {
        return Err(WorkspaceError::OriginUnreachable(format!("cannot reach origin during fetch: {}", result.stderr.trim())));
    }
    if !combined.contains("non-fast-forward") {
        warn!(branch, stderr = %result.stderr.trim(), "fetch_branch: non-zero exit but may already be up to date");
    }
    Ok(())
}

async fn create_worktree(bare_repo: &Path, checkouts_dir: &Path, branch: &str, task_name: &str) -> Result<WorktreeInfo, WorkspaceError> {
    check_disk_space(checkouts_dir).await?;

    let worktree_id = Uuid::new_v4().simple().to_string()[..8].to_string();
    let worktree_path = checkouts_dir.join(format!("{task_name}-{worktree_id}"));
    tokio::fs::create_dir_all(checkouts_dir).await?;

    let result = run_git(&["worktree", "add", worktree_path.to_str().unwrap_or_default(), branch], bare_repo, Duration::from_secs(120)).await?;

    if !result.success {
        let combined = result.combined().to_lowercase();
        if combined.contains("invalid reference") || combined.contains("not a valid object") {
            return Err(WorkspaceError::BranchNotFound(format!("branch not found for worktree: {branch}")));
        }
        if combined.contains("no space left") {
            return Err(WorkspaceError::DiskFull(format!("disk full during worktree creation: {}", result.stderr.trim())));
        }
        return Err(WorkspaceError::Other(format!("failed to create worktree: {}", result.stderr.trim())));
    }

    if !worktree_path.exists() {
        return Err(WorkspaceError::Other(format!("worktree path not created: {worktree_path:?}")));
    }

    let project_name = bare_repo.parent().and_then(|p| p.file_name()).and_then(|n| n.to_str()).unwrap_or("unknown").to_string();

    Ok(WorktreeInfo {
        worktree_path,
        project_name,
        branch: branch.to_string(),
        worktree_id,
        bare_repo_path: bare_repo.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn init_repo(dir: &Path) {
        Command::new("git").args(["init", "-b", "main"]).current_dir(dir).output().await.unwrap();
        Command::new("git").args(["config", "user.email", "test@test.com"]).current_dir(dir).output().await.unwrap();
        Command::new("git").args(["config", "user.name", "Test"]).current_dir(dir).output().await.unwrap();
        Command::new("git").args(["commit", "--allow-empty", "-m", "initial"]).current_dir(dir).output().await.unwrap();
    }

    #[tokio::test]
    async fn setup_and_cleanup_workspace_round_trip() {
        let origin_dir = tempdir().unwrap();
        init_repo(origin_dir.path()).await;

        let workspace_root = tempdir().unwrap();
        let manager = WorkspaceManager::new(workspace_root.path());

        let worktree = manager
            .setup_workspace(origin_dir.path().to_str().unwrap(), "main", "task-a")
            .await
            .unwrap();

        assert!(worktree.worktree_path.exists());
        assert_eq!(worktree.branch, "main");

        manager.cleanup_workspace(&worktree).await.unwrap();
        assert!(!worktree.worktree_path.exists());
    }

    #[tokio::test]
    async fn setup_workspace_rejects_origin_mismatch() {
        // Two distinct origins that resolve to the same project name ("proj")
        // so the second setup_workspace call hits the existing bare repo.
        let parent_a = tempdir().unwrap();
        let origin_a = parent_a.path().join("proj");
        tokio::fs::create_dir_all(&origin_a).await.unwrap();
        init_repo(&origin_a).await;

        let parent_b = tempdir().unwrap();
        let origin_b = parent_b.path().join("proj");
        tokio::fs::create_dir_all(&origin_b).await.unwrap();
        init_repo(&origin_b).await;

        let workspace_root = tempdir().unwrap();
        let manager = WorkspaceManager::new(workspace_root.path());

        manager.setup_workspace(origin_a.to_str().unwrap(), "main", "task-a").await.unwrap();

        let result = manager.setup_workspace(origin_b.to_str().unwrap(), "main", "task-b").await;
        assert!(matches!(result, Err(WorkspaceError::OriginMismatch(_))));
    }

    #[tokio::test]
    async fn prune_stale_worktrees_on_empty_root_is_noop() {
        let workspace_root = tempdir().unwrap();
        let manager = WorkspaceManager::new(workspace_root.path());
        assert_eq!(manager.prune_stale_worktrees().await.unwrap(), 0);
    }
}
