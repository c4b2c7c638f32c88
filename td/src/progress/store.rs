//! Append-only progress log with size-triggered rotation.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::Local;
use regex::Regex;
use tracing::{debug, info};

use super::error::ProgressError;

const DEFAULT_ROTATE_THRESHOLD: usize = 300;

static STORY_ITERATION_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^## .* - S[0-9]").unwrap());

/// Manages `progress.txt` for a single task directory: appends entries and
/// rotates the file into `progress-N.txt` once it grows past the threshold,
/// carrying the `## Codebase Patterns` section forward into the new file.
pub struct ProgressStore {
    task_dir: PathBuf,
    rotate_threshold: usize,
}

impl ProgressStore {
    pub fn new(task_dir: PathBuf) -> Self {
        Self { task_dir, rotate_threshold: DEFAULT_ROTATE_THRESHOLD }
    }

    pub fn with_rotate_threshold(mut self, threshold: usize) -> Self {
        self.rotate_threshold = threshold;
        self
    }

    pub fn progress_file(&self) -> PathBuf {
        self.task_dir.join("progress.txt")
    }

    fn append(&self, text: &str) -> Result<(), ProgressError> {
        use std::io::Write;
        let path = self.progress_file();
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ProgressError::Write { path: path.clone(), source })?;
        file.write_all(text.as_bytes())
            .map_err(|source| ProgressError::Write { path, source })
    }

    pub fn log_failure(
        &self,
        agent: &str,
        story_id: &str,
        error_msg: &str,
        iteration: u32,
        consecutive_failures: u32,
    ) -> Result<(), ProgressError> {
        debug!(agent, story_id, iteration, "ProgressStore::log_failure: called");
        let now = Local::now().format("%Y-%m-%d %H:%M");
        let entry = format!(
            "\n## {now} - FAILURE (Iteration {iteration})\n\
             - **Agent:** {agent}\n\
             - **Story:** {story_id}\n\
             - **Consecutive failures:** {consecutive_failures}\n\
             - **Error:** {error_msg}\n\
             ---\n"
        );
        self.append(&entry)
    }

    pub fn log_failover(
        &self,
        from_agent: &str,
        to_agent: &str,
        story_id: &str,
        reason: &str,
        failures_before: u32,
    ) -> Result<(), ProgressError> {
        debug!(from_agent, to_agent, story_id, "ProgressStore::log_failover: called");
        let now = Local::now().format("%Y-%m-%d %H:%M");
        let entry = format!(
            "\n## {now} - FAILOVER\n\
             - **From agent:** {from_agent}\n\
             - **To agent:** {to_agent}\n\
             - **Story:** {story_id}\n\
             - **Consecutive failures before failover:** {failures_before}\n\
             - **Reason:** {reason}\n\
             ---\n"
        );
        self.append(&entry)
    }

    pub fn log_checkpoint(
        &self,
        iteration: u32,
        max_iterations: u32,
        completed: usize,
        total: usize,
        agent: &str,
        reason: &str,
    ) -> Result<(), ProgressError> {
        let now = Local::now().format("%Y-%m-%d %H:%M");
        let entry = format!(
            "\n---\n\
             CHECKPOINT at {now}\n\
             Iteration: {iteration}/{max_iterations} | Stories: {completed}/{total} | Agent: {agent}\n\
             Reason: {reason}\n\
             ---\n"
        );
        self.append(&entry)
    }

    /// Rotate `progress.txt` into `progress-N.txt` if it exceeds the
    /// configured line threshold, replacing it with a minimal summary that
    /// carries the `## Codebase Patterns` section forward.
    pub fn rotate_if_needed(&self) -> Result<Option<PathBuf>, ProgressError> {
        let path = self.progress_file();
        if !path.is_file() {
            return Ok(None);
        }

        let content = self.read(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        if lines.len() <= self.rotate_threshold {
            return Ok(None);
        }

        info!(threshold = self.rotate_threshold, "progress file exceeds threshold, rotating");

        let mut n = 1;
        while self.task_dir.join(format!("progress-{n}.txt")).exists() {
            n += 1;
        }

        let rotated_path = self.task_dir.join(format!("progress-{n}.txt"));
        std::fs::write(&rotated_path, &content)
            .map_err(|source| ProgressError::Write { path: rotated_path.clone(), source })?;

        let patterns_section = extract_patterns_section(&content);

        let mut effort_name = String::new();
        let mut effort_type = String::new();
        let mut started = String::new();
        for line in &lines {
            if let Some(rest) = line.strip_prefix("Effort:") {
                effort_name = format!("Effort:{rest}");
            } else if let Some(rest) = line.strip_prefix("Type:") {
                effort_type = format!("Type:{rest}");
            } else if let Some(rest) = line.strip_prefix("Started:") {
                started = format!("Started:{rest}");
            }
        }

        let story_count = lines.iter().filter(|l| STORY_ITERATION_RE.is_match(l)).count();
        let prior_ref = if n > 1 { format!(" (continues from progress-{}.txt)", n - 1) } else { String::new() };
        let now = Local::now().format("%Y-%m-%d %H:%M");

        let new_content = format!(
            "# Ralph Progress Log\n\
             {effort_name}\n\
             {effort_type}\n\
             {started}\n\
             Rotation: {n} (rotated at {now})\n\n\
             {patterns_section}\n\n\
             ## Prior Progress\n\
             Completed {story_count} iterations in progress-{n}.txt{prior_ref}.\n\
             _See progress-{n}.txt for detailed iteration logs._\n\n\
             ---\n"
        );
        std::fs::write(&path, new_content).map_err(|source| ProgressError::Write { path, source })?;

        Ok(Some(rotated_path))
    }

    fn read(&self, path: &Path) -> Result<String, ProgressError> {
        std::fs::read_to_string(path).map_err(|source| ProgressError::Read { path: path.to_path_buf(), source })
    }
}

/// Extract the `## Codebase Patterns` section, stopping at the next `## `
/// heading that isn't itself a "Codebase Patterns" variant.
fn extract_patterns_section(content: &str) -> String {
    let mut in_patterns = false;
    let mut out = Vec::new();

    for line in content.lines() {
        if line.trim() == "## Codebase Patterns" {
            in_patterns = true;
            out.push(line);
            continue;
        }
        if in_patterns {
            if line.starts_with("## ") && !line.contains("Codebase Patterns") {
                break;
            }
            out.push(line);
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_creates_file_and_accumulates() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::new(dir.path().to_path_buf());
        store.log_failure("claude", "S1", "boom", 1, 1).unwrap();
        store.log_failure("claude", "S1", "boom again", 2, 2).unwrap();
        let content = std::fs::read_to_string(store.progress_file()).unwrap();
        assert!(content.contains("boom"));
        assert!(content.contains("boom again"));
    }

    #[test]
    fn rotate_not_needed_below_threshold() {
        let dir = tempdir().unwrap();
        let store = ProgressStore::new(dir.path().to_path_buf()).with_rotate_threshold(300);
        store.log_failure("claude", "S1", "boom", 1, 1).unwrap();
        assert!(store.rotate_if_needed().unwrap().is_none());
    }

    #[test]
    fn rotate_moves_old_content_and_carries_patterns_forward() {
        let dir = tempdir().unwrap();
        let mut content = String::from("# Ralph Progress Log\nEffort: demo\nType: feature\nStarted: today\n\n");
        content.push_str("## Codebase Patterns\n- uses serde everywhere\n\n## 2026-01-01 00:00 - S1\ndid work\n");
        for i in 0..400 {
            content.push_str(&format!("line {i}\n"));
        }
        std::fs::write(dir.path().join("progress.txt"), &content).unwrap();

        let store = ProgressStore::new(dir.path().to_path_buf()).with_rotate_threshold(300);
        let rotated = store.rotate_if_needed().unwrap();
        assert!(rotated.is_some());
        assert!(rotated.unwrap().ends_with("progress-1.txt"));

        let new_content = std::fs::read_to_string(store.progress_file()).unwrap();
        assert!(new_content.contains("uses serde everywhere"));
        assert!(new_content.contains("Completed 1 iterations"));
    }

    #[test]
    fn extract_patterns_section_stops_at_next_heading() {
        let content = "## Codebase Patterns\nA\nB\n## Other Section\nC\n";
        assert_eq!(extract_patterns_section(content), "## Codebase Patterns\nA\nB");
    }

    #[test]
    fn extract_patterns_section_empty_when_absent() {
        assert_eq!(extract_patterns_section("## Other\nstuff\n"), "");
    }
}
