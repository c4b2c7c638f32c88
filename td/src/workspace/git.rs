//! Thin async wrapper over the `git` CLI used by the workspace manager.

use std::path::Path;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use super::error::WorkspaceError;

pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    pub fn combined(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

pub async fn run_git(args: &[&str], cwd: &Path, timeout: Duration) -> Result<GitOutput, WorkspaceError> {
    debug!(?args, ?cwd, "run_git: called");
    let fut = Command::new("git").args(args).current_dir(cwd).output();

    let output = tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| WorkspaceError::Other(format!("git {} timed out after {:?}", args.join(" "), timeout)))?
        .map_err(|e| WorkspaceError::Other(format!("failed to spawn git: {e}")))?;

    Ok(GitOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}
