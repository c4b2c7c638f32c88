//! Shared failure classification and per-agent failure tracking (C3).

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::domain::AgentKind;

static ERROR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"API error",
        r"rate limit",
        r"quota exceeded",
        r"authentication failed",
        r"Connection refused",
        r"timeout",
        r"\b503\b",
        r"\b502\b",
        r"\b429\b",
        r"overloaded",
    ]
    .iter()
    .map(|p| Regex::new(&format!("(?i){p}")).expect("static pattern is valid"))
    .collect()
});

static ERROR_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)error|failed|timeout|refused").unwrap());

/// Failure detection shared by every agent adapter: a non-zero exit, empty
/// output, or a known error pattern in the output all count as a failure.
pub fn detect_failure(exit_code: i32, output: &str) -> bool {
    if exit_code != 0 {
        return true;
    }
    if output.trim().is_empty() {
        return true;
    }
    ERROR_PATTERNS.iter().any(|re| re.is_match(output))
}

/// Extract a short, human-readable error message from a failed run.
pub fn extract_error(exit_code: i32, output: &str, stderr: &str) -> String {
    if exit_code != 0 {
        if !stderr.trim().is_empty() {
            let last_line = stderr.trim().lines().last().unwrap_or_default();
            let truncated: String = last_line.chars().take(100).collect();
            return format!("Exit code {exit_code}: {truncated}");
        }
        return format!("Exit code {exit_code}");
    }

    if output.trim().is_empty() {
        return "Empty output".to_string();
    }

    for line in output.lines() {
        if ERROR_LINE_RE.is_match(line) {
            return line.chars().take(100).collect();
        }
    }

    "Unknown error".to_string()
}

/// Tracks consecutive failures per agent kind so the driver can trigger
/// failover once a threshold is crossed.
#[derive(Debug, Clone)]
pub struct FailureTracker {
    counts: HashMap<AgentKind, u32>,
    last_errors: HashMap<AgentKind, String>,
}

impl Default for FailureTracker {
    fn default() -> Self {
        let mut counts = HashMap::new();
        let mut last_errors = HashMap::new();
        for kind in crate::domain::ALL_AGENT_KINDS {
            counts.insert(kind, 0);
            last_errors.insert(kind, String::new());
        }
        Self { counts, last_errors }
    }
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, agent: AgentKind, error_msg: impl Into<String>) {
        let error_msg = error_msg.into();
        debug!(agent = agent.as_str(), %error_msg, "FailureTracker::record_failure: called");
        *self.counts.entry(agent).or_insert(0) += 1;
        self.last_errors.insert(agent, error_msg);
    }

    pub fn reset(&mut self, agent: AgentKind) {
        debug!(agent = agent.as_str(), "FailureTracker::reset: called");
        self.counts.insert(agent, 0);
        self.last_errors.insert(agent, String::new());
    }

    pub fn count(&self, agent: AgentKind) -> u32 {
        *self.counts.get(&agent).unwrap_or(&0)
    }

    pub fn last_error(&self, agent: AgentKind) -> &str {
        self.last_errors.get(&agent).map(String::as_str).unwrap_or("")
    }

    pub fn should_failover(&self, agent: AgentKind, threshold: u32) -> bool {
        self.count(agent) >= threshold
    }

    pub fn all_failed(&self, threshold: u32) -> bool {
        crate::domain::ALL_AGENT_KINDS
            .iter()
            .all(|k| self.count(*k) >= threshold)
    }

    /// The alternate agent to fail over to, per the closed-set order.
    pub fn get_alternate(&self, current: AgentKind) -> AgentKind {
        current.alternate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_failure_on_nonzero_exit() {
        assert!(detect_failure(1, "all good"));
    }

    #[test]
    fn detect_failure_on_empty_output() {
        assert!(detect_failure(0, "   "));
    }

    #[test]
    fn detect_failure_on_pattern_match() {
        assert!(detect_failure(0, "we hit a rate limit, retry later"));
        assert!(!detect_failure(0, "story implemented successfully"));
    }

    #[test]
    fn extract_error_uses_last_stderr_line_on_nonzero_exit() {
        let msg = extract_error(2, "", "line one\nline two");
        assert_eq!(msg, "Exit code 2: line two");
    }

    #[test]
    fn extract_error_empty_output() {
        assert_eq!(extract_error(0, "  ", ""), "Empty output");
    }

    #[test]
    fn tracker_failover_threshold() {
        let mut tracker = FailureTracker::new();
        assert!(!tracker.should_failover(AgentKind::Claude, 3));
        tracker.record_failure(AgentKind::Claude, "boom");
        tracker.record_failure(AgentKind::Claude, "boom again");
        tracker.record_failure(AgentKind::Claude, "boom thrice");
        assert!(tracker.should_failover(AgentKind::Claude, 3));
        tracker.reset(AgentKind::Claude);
        assert!(!tracker.should_failover(AgentKind::Claude, 3));
    }

    #[test]
    fn tracker_all_failed_requires_every_kind_over_threshold() {
        let mut tracker = FailureTracker::new();
        tracker.record_failure(AgentKind::Claude, "x");
        tracker.record_failure(AgentKind::Claude, "x");
        assert!(!tracker.all_failed(2));
        tracker.record_failure(AgentKind::Opencode, "y");
        tracker.record_failure(AgentKind::Opencode, "y");
        assert!(tracker.all_failed(2));
    }

    #[test]
    fn get_alternate_matches_agent_kind_alternate() {
        let tracker = FailureTracker::new();
        assert_eq!(tracker.get_alternate(AgentKind::Claude), AgentKind::Opencode);
    }
}
