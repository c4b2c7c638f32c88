//! HTTP/SSE-mode adapter for an already-running `opencode serve` instance
//! (see [`super::server::AgentServer`] for process supervision).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde_json::json;
use tracing::{debug, warn};

use crate::domain::IterationResult;

use super::adapter::{AgentAdapter, COMPLETION_SIGNAL};
use super::config::AgentConfig;
use super::failure::{detect_failure, extract_error};

/// SSE idle-wait is a secondary, best-effort signal; give up logging after
/// this long so a stuck server doesn't leak a background task forever.
const SSE_WATCH_TIMEOUT: Duration = Duration::from_secs(60 * 30);

pub struct OpencodeAdapter {
    base_url: String,
    http: reqwest::Client,
}

impl OpencodeAdapter {
    pub fn new(base_url: String) -> Self {
        Self { base_url, http: reqwest::Client::new() }
    }

    async fn create_session(&self) -> Result<String, String> {
        let url = format!("{}/session", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| format!("HTTP POST {url} failed: {e}"))?;
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("invalid JSON response from {url}: {e}"))?;
        body.get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| format!("failed to create session: no id in response: {body}"))
    }

    async fn send_prompt(&self, session_id: &str, prompt: &str) -> Result<serde_json::Value, String> {
        let url = format!("{}/session/{session_id}/message", self.base_url);
        let payload = json!({ "parts": [{ "type": "text", "text": prompt }] });
        let resp = self
            .http
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| format!("HTTP POST {url} failed: {e}"))?;
        resp.json().await.map_err(|e| format!("invalid JSON response from {url}: {e}"))
    }

    /// Best-effort background watcher: logs when the session goes idle via
    /// SSE, purely as a secondary signal for diagnosing hangs.
    fn spawn_idle_watcher(&self, session_id: String) {
        let url = format!("{}/event", self.base_url);
        tokio::spawn(async move {
            let mut source = EventSource::get(&url);
            let deadline = Instant::now() + SSE_WATCH_TIMEOUT;
            while Instant::now() < deadline {
                match tokio::time::timeout(Duration::from_secs(1), source.next()).await {
                    Ok(Some(Ok(Event::Message(msg)))) if msg.event == "session.idle" => {
                        if let Ok(data) = serde_json::from_str::<serde_json::Value>(&msg.data)
                            && data.get("sessionID").and_then(|v| v.as_str()) == Some(session_id.as_str())
                        {
                            debug!(session_id, "opencode session.idle observed via SSE");
                            return;
                        }
                    }
                    Ok(Some(_)) => continue,
                    Ok(None) => return,
                    Err(_) => continue,
                }
            }
        });
    }

    pub async fn abort_session(&self, session_id: &str) -> bool {
        let url = format!("{}/session/{session_id}/abort", self.base_url);
        match self.http.post(&url).json(&json!({})).send().await {
            Ok(_) => true,
            Err(e) => {
                warn!(session_id, error = %e, "OpencodeAdapter::abort_session: failed");
                false
            }
        }
    }
}

#[async_trait]
impl AgentAdapter for OpencodeAdapter {
    fn name(&self) -> &'static str {
        "opencode"
    }

    async fn run(&self, config: &AgentConfig) -> IterationResult {
        debug!(base_url = %self.base_url, "OpencodeAdapter::run: called");
        let start = Instant::now();

        let session_id = match self.create_session().await {
            Ok(id) => id,
            Err(e) => {
                return IterationResult::failure(String::new(), 1, start.elapsed().as_secs_f64(), e);
            }
        };

        self.spawn_idle_watcher(session_id.clone());

        let response = match self.send_prompt(&session_id, &config.prompt).await {
            Ok(value) => value,
            Err(e) => {
                return IterationResult::failure(String::new(), 1, start.elapsed().as_secs_f64(), e);
            }
        };

        let output = extract_text(&response);
        let completed = output.contains(COMPLETION_SIGNAL);
        let failed = detect_failure(0, &output);
        let duration = start.elapsed().as_secs_f64();

        if failed {
            let error_message = extract_error(0, &output, "");
            IterationResult::failure(output, 0, duration, error_message)
        } else {
            IterationResult::success(output, 0, duration, completed)
        }
    }
}

/// Concatenate the text parts of an opencode message response.
fn extract_text(response: &serde_json::Value) -> String {
    response
        .get("parts")
        .and_then(|p| p.as_array())
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_text_joins_parts() {
        let value = json!({ "parts": [{ "type": "text", "text": "a" }, { "type": "text", "text": "b" }] });
        assert_eq!(extract_text(&value), "ab");
    }

    #[test]
    fn extract_text_handles_missing_parts() {
        assert_eq!(extract_text(&json!({})), "");
    }
}
