//! Best-effort `git push` of the loop's branch back to its origin remote.
//! Failures here are never fatal to the loop; the caller logs and continues.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

pub async fn push_to_origin(worktree_path: &Path, branch: &str) -> Result<(), String> {
    debug!(?worktree_path, branch, "push_to_origin: called");
    let fut = Command::new("git").args(["push", "origin", branch, "--force-with-lease"]).current_dir(worktree_path).output();

    let output = tokio::time::timeout(Duration::from_secs(120), fut)
        .await
        .map_err(|_| format!("git push timed out for branch {branch}"))?
        .map_err(|e| format!("failed to spawn git push: {e}"))?;

    if output.status.success() {
        Ok(())
    } else {
        Err(String::from_utf8_lossy(&output.stderr).trim().to_string())
    }
}
