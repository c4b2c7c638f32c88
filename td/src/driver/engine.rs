//! IterationDriver (C8): the central per-loop state machine.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::agent::{AgentConfig, FailureTracker, create_adapter};
use crate::domain::{AgentKind, LoopState, LoopStatus, Prd, resolve_agent};
use crate::progress::ProgressStore;
use crate::prompts::{PromptContext, build_prompt};

use super::backoff::backoff_for;
use super::first_run::first_run_section;
use super::outcome::{IterationOutcome, IterationReport};
use super::push::push_to_origin;

const MAX_CONSECUTIVE_FAILURES: u32 = 3;
const ITERATION_SLEEP: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub default_agent: AgentKind,
    pub cli_agent_override: Option<String>,
    pub opencode_base_url: Option<String>,
    pub yolo_mode: bool,
    pub verbose: bool,
    pub model: String,
}

impl DriverOptions {
    pub fn new(default_agent: AgentKind) -> Self {
        Self {
            default_agent,
            cli_agent_override: None,
            opencode_base_url: None,
            yolo_mode: false,
            verbose: false,
            model: String::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoopOutcome {
    pub status: LoopStatus,
    pub final_story: Option<String>,
    pub last_error: Option<String>,
    pub iterations_used: u32,
}

/// Drive a loop to termination. `state` is shared with the scheduler so it
/// can observe `stop_requested`, iteration, and status for `list_loops`.
pub async fn run_loop(state: Arc<Mutex<LoopState>>, progress: &ProgressStore, mut options: DriverOptions) -> LoopOutcome {
    let mut failure_tracker = FailureTracker::new();
    let mut final_story: Option<String> = None;

    loop {
        if let Err(e) = progress.rotate_if_needed() {
            warn!(error = %e, "run_loop: progress rotation check failed");
        }

        let snapshot = {
            let mut s = state.lock().await;
            if s.stop_requested {
                debug!(loop_id = %s.loop_id, "run_loop: stop requested");
                s.status = LoopStatus::Stopping;
                None
            } else if s.is_timed_out() {
                debug!(loop_id = %s.loop_id, "run_loop: deadline exceeded");
                s.status = LoopStatus::TimedOut;
                s.completed_at = Some(Instant::now());
                None
            } else {
                Some((s.task_dir.clone(), s.worktree_path.clone(), s.branch.clone(), s.push_frequency, s.iteration, s.max_iterations))
            }
        };

        let Some((task_dir, worktree_path, branch, push_frequency, iteration, max_iterations)) = snapshot else {
            let status = state.lock().await.status;
            return settle(&state, status, final_story, None).await;
        };

        let prd = match Prd::read(&task_dir) {
            Ok(prd) => prd,
            Err(e) => {
                warn!(error = %e, "run_loop: failed to read PRD");
                return settle(&state, LoopStatus::Failed, final_story, Some(e.to_string())).await;
            }
        };

        let checkpoint_pending = {
            let mut s = state.lock().await;
            std::mem::take(&mut s.checkpoint_requested)
        };
        if checkpoint_pending {
            let completed = prd.user_stories.iter().filter(|s| s.passes).count();
            let total = prd.user_stories.len();
            if let Err(e) =
                progress.log_checkpoint(iteration, max_iterations, completed, total, options.default_agent.as_str(), "checkpoint signal received")
            {
                warn!(error = %e, "run_loop: failed to log checkpoint to progress file");
            }
        }

        let Some(story) = prd.next_story().cloned() else {
            info!(task_dir = ?task_dir, "run_loop: no incomplete stories remain, completing");
            if let Err(e) = push_to_origin(&worktree_path, &branch).await {
                warn!(error = %e, "run_loop: push on completion failed");
            }
            return settle(&state, LoopStatus::Completed, final_story, None).await;
        };

        let resolved_agent = match resolve_agent(
            options.cli_agent_override.as_deref(),
            story.agent.as_deref(),
            prd.agent.as_deref(),
            options.default_agent,
        ) {
            Ok(agent) => agent,
            Err(e) => return settle(&state, LoopStatus::Failed, final_story, Some(e.to_string())).await,
        };

        let next_iteration = iteration + 1;

        let mut prompt_ctx = PromptContext::new(task_dir.clone(), branch.clone(), resolved_agent);
        prompt_ctx.extra_vars.insert("STORY_ID".to_string(), story.id.clone());
        prompt_ctx.extra_vars.insert("STORY_TITLE".to_string(), story.title.clone());
        let mut prompt = build_prompt(&prompt_ctx);

        if next_iteration == 1 {
            let completed = prd.user_stories.iter().filter(|s| s.passes).count();
            let section = first_run_section(&worktree_path, &branch, &prd.description, prd.user_stories.len(), completed);
            prompt = format!("{section}{prompt}");
        }

        let agent_config = AgentConfig::new(prompt, worktree_path.clone())
            .with_yolo_mode(options.yolo_mode)
            .with_verbose(options.verbose)
            .with_model(options.model.clone());

        debug!(%next_iteration, agent = resolved_agent.as_str(), story_id = %story.id, "run_loop: running iteration");
        let adapter = create_adapter(resolved_agent, options.opencode_base_url.as_deref());
        let report = run_iteration(adapter.as_ref(), &agent_config, &task_dir).await;

        {
            let mut s = state.lock().await;
            s.iteration = next_iteration;
        }

        match report.outcome {
            IterationOutcome::Completed => {
                final_story = Some(story.id.clone());
                if let Err(e) = push_to_origin(&worktree_path, &branch).await {
                    warn!(error = %e, "run_loop: push on completion failed");
                }
                return settle(&state, LoopStatus::Completed, final_story, None).await;
            }
            IterationOutcome::Success => {
                failure_tracker.reset(resolved_agent);
                final_story = Some(story.id.clone());
                let mut s = state.lock().await;
                s.consecutive_failures = 0;
                s.last_error = None;
            }
            IterationOutcome::Failed => {
                failure_tracker.record_failure(resolved_agent, report.result.error_message.clone());
                let consecutive = {
                    let mut s = state.lock().await;
                    s.consecutive_failures += 1;
                    s.last_error = Some(report.result.error_message.clone());
                    s.consecutive_failures
                };

                if let Err(e) = progress.log_failure(resolved_agent.as_str(), &story.id, &report.result.error_message, next_iteration, consecutive) {
                    warn!(error = %e, "run_loop: failed to log failure to progress file");
                }

                if failure_tracker.should_failover(resolved_agent, MAX_CONSECUTIVE_FAILURES) {
                    if failure_tracker.all_failed(MAX_CONSECUTIVE_FAILURES) {
                        return settle(&state, LoopStatus::Failed, final_story, Some("all agents exceeded the failure threshold".to_string())).await;
                    }
                    let alternate = failure_tracker.get_alternate(resolved_agent);
                    if let Err(e) = progress.log_failover(resolved_agent.as_str(), alternate.as_str(), &story.id, &report.result.error_message, consecutive) {
                        warn!(error = %e, "run_loop: failed to log failover to progress file");
                    }
                    options.default_agent = alternate;
                    state.lock().await.consecutive_failures = 0;
                }

                tokio::time::sleep(backoff_for(consecutive)).await;
            }
            IterationOutcome::Aborted => {
                return settle(&state, LoopStatus::Stopping, final_story, None).await;
            }
        }

        if next_iteration % push_frequency.max(1) == 0
            && let Err(e) = push_to_origin(&worktree_path, &branch).await
        {
            warn!(error = %e, "run_loop: periodic push failed");
        }

        if next_iteration >= max_iterations {
            return settle(&state, LoopStatus::Exhausted, final_story, None).await;
        }

        tokio::time::sleep(ITERATION_SLEEP).await;
    }
}

/// `run_iteration`: invoke the adapter once, then classify the result against
/// a fresh read of the PRD.
async fn run_iteration(adapter: &dyn crate::agent::AgentAdapter, config: &AgentConfig, task_dir: &std::path::Path) -> IterationReport {
    let result = adapter.run(config).await;
    if result.failed {
        return IterationReport { outcome: IterationOutcome::Failed, result };
    }

    let prd_says_done = Prd::read(task_dir).map(|p| p.all_stories_pass()).unwrap_or(false);
    let outcome = if result.completed || prd_says_done { IterationOutcome::Completed } else { IterationOutcome::Success };
    IterationReport { outcome, result }
}

async fn settle(state: &Arc<Mutex<LoopState>>, status: LoopStatus, final_story: Option<String>, error: Option<String>) -> LoopOutcome {
    let mut s = state.lock().await;
    s.status = status;
    if error.is_some() {
        s.last_error = error.clone();
    }
    if status.is_terminal() && s.completed_at.is_none() {
        s.completed_at = Some(Instant::now());
    }
    LoopOutcome {
        status,
        final_story,
        last_error: s.last_error.clone(),
        iterations_used: s.iteration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write_prd(dir: &std::path::Path, json: &str) {
        std::fs::write(dir.join("prd.json"), json).unwrap();
    }

    #[tokio::test]
    async fn completes_immediately_when_no_incomplete_stories() {
        let task_dir = tempdir().unwrap();
        write_prd(
            task_dir.path(),
            r#"{"branchName":"main","userStories":[{"id":"a","title":"A","priority":1,"passes":true}]}"#,
        );
        // Not a real git repo: the completion push is expected to fail and be swallowed.
        let state = Arc::new(Mutex::new(LoopState::new(
            "loop-1".into(),
            task_dir.path().to_path_buf(),
            task_dir.path().to_path_buf(),
            "main".into(),
            50,
            1,
            0,
        )));
        let progress = ProgressStore::new(task_dir.path().to_path_buf());
        let outcome = run_loop(state, &progress, DriverOptions::new(AgentKind::Claude)).await;
        assert_eq!(outcome.status, LoopStatus::Completed);
    }

    #[tokio::test]
    async fn stop_requested_before_first_iteration_yields_stopping() {
        let task_dir = tempdir().unwrap();
        write_prd(
            task_dir.path(),
            r#"{"branchName":"main","userStories":[{"id":"a","title":"A","priority":1,"passes":false}]}"#,
        );
        let state = Arc::new(Mutex::new(LoopState::new(
            "loop-1".into(),
            task_dir.path().to_path_buf(),
            PathBuf::from("/nonexistent"),
            "main".into(),
            50,
            1,
            0,
        )));
        state.lock().await.stop_requested = true;
        let progress = ProgressStore::new(task_dir.path().to_path_buf());
        let outcome = run_loop(state, &progress, DriverOptions::new(AgentKind::Claude)).await;
        assert_eq!(outcome.status, LoopStatus::Stopping);
    }

    #[tokio::test]
    async fn failed_prd_read_yields_failed_status() {
        let task_dir = tempdir().unwrap();
        let state = Arc::new(Mutex::new(LoopState::new(
            "loop-1".into(),
            task_dir.path().to_path_buf(),
            PathBuf::from("/nonexistent"),
            "main".into(),
            50,
            1,
            0,
        )));
        let progress = ProgressStore::new(task_dir.path().to_path_buf());
        let outcome = run_loop(state, &progress, DriverOptions::new(AgentKind::Claude)).await;
        assert_eq!(outcome.status, LoopStatus::Failed);
        assert!(outcome.last_error.is_some());
    }
}
