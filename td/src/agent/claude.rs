//! Subprocess-mode adapter for the Claude Code CLI.

use std::process::Stdio;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::domain::IterationResult;

use super::adapter::{AgentAdapter, COMPLETION_SIGNAL};
use super::config::AgentConfig;
use super::failure::{detect_failure, extract_error};

/// Drives `claude --print --output-format stream-json` with the prompt piped
/// via stdin.
pub struct ClaudeAdapter;

impl ClaudeAdapter {
    pub fn new() -> Self {
        Self
    }

    fn build_command(&self, config: &AgentConfig) -> Command {
        let mut cmd = Command::new("claude");
        cmd.args(["--print", "--output-format", "stream-json"]);
        if config.yolo_mode {
            cmd.arg("--dangerously-skip-permissions");
        }
        if config.verbose {
            cmd.arg("--verbose");
        }
        if !config.model.is_empty() {
            cmd.env("RALPH_MODEL_OVERRIDE", &config.model);
        }
        cmd.current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Pull the `result` field out of stream-json output; fall back to the
    /// raw output if no `result` line parses.
    fn parse_stream_json(&self, raw_output: &str) -> String {
        for line in raw_output.lines() {
            let is_result_line =
                line.contains("\"type\":\"result\"") || line.contains("\"type\": \"result\"");
            if !is_result_line {
                continue;
            }
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(line)
                && let Some(result) = value.get("result").and_then(|v| v.as_str())
                && !result.is_empty()
            {
                return result.to_string();
            }
        }
        raw_output.to_string()
    }
}

impl Default for ClaudeAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentAdapter for ClaudeAdapter {
    fn name(&self) -> &'static str {
        "claude"
    }

    async fn run(&self, config: &AgentConfig) -> IterationResult {
        debug!(working_dir = ?config.working_dir, "ClaudeAdapter::run: called");
        let start = Instant::now();

        let mut child = match self.build_command(config).spawn() {
            Ok(child) => child,
            Err(e) => {
                debug!(error = %e, "ClaudeAdapter::run: spawn failed");
                return IterationResult::failure(
                    String::new(),
                    1,
                    start.elapsed().as_secs_f64(),
                    format!("Failed to start agent: {e}"),
                );
            }
        };

        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(config.prompt.as_bytes()).await
        {
            debug!(error = %e, "ClaudeAdapter::run: failed writing prompt to stdin");
        }
        // Dropping stdin closes it, signalling EOF to the child.

        let output = match child.wait_with_output().await {
            Ok(output) => output,
            Err(e) => {
                return IterationResult::failure(
                    String::new(),
                    1,
                    start.elapsed().as_secs_f64(),
                    format!("Failed to wait for agent: {e}"),
                );
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let parsed = self.parse_stream_json(&stdout);

        let completed = parsed.contains(COMPLETION_SIGNAL);
        let failed = detect_failure(exit_code, &parsed);
        let duration = start.elapsed().as_secs_f64();

        if failed {
            let error_message = extract_error(exit_code, &parsed, &stderr);
            IterationResult::failure(parsed, exit_code, duration, error_message)
        } else {
            IterationResult::success(parsed, exit_code, duration, completed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_stream_json_falls_back_to_raw() {
        let adapter = ClaudeAdapter::new();
        assert_eq!(adapter.parse_stream_json("no json here"), "no json here");
    }

    #[test]
    fn parse_stream_json_extracts_result_field() {
        let adapter = ClaudeAdapter::new();
        let raw = "{\"type\":\"system\"}\n{\"type\":\"result\",\"result\":\"done\"}\n";
        assert_eq!(adapter.parse_stream_json(raw), "done");
    }
}
