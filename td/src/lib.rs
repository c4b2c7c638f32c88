//! Ralph Daemon - an orchestrator for concurrent, autonomous "Ralph Wiggum
//! loop" coding-agent workflows.
//!
//! Each loop restarts iterations with a fresh agent context window
//! (preventing context rot) while persisting state in git and in plain
//! files. Completion is determined by a literal completion token or by
//! re-reading the task's PRD, never by trusting an agent's self-report.
//!
//! # Modules
//!
//! - [`prompts`] - per-iteration prompt assembly (PromptBuilder)
//! - [`agent`] - pluggable agent adapters, failure classification, agent-server supervision
//! - [`progress`] - append-only cross-iteration progress log
//! - [`registry`] - durable session registry and signal-file control channel
//! - [`workspace`] - git bare-repo cache and worktree isolation
//! - [`driver`] - the per-loop iteration state machine
//! - [`scheduler`] - admission control, concurrency cap, orphan recovery, event fanout
//! - [`rpc`] - JSON-RPC 2.0 control plane over NDJSON Unix-socket streams
//! - [`domain`] - shared types: agent kinds, loop state, task descriptors
//! - [`config`] - configuration loading and logging setup
//! - [`cli`] - command-line interface

pub mod agent;
pub mod cli;
pub mod config;
pub mod domain;
pub mod driver;
pub mod progress;
pub mod prompts;
pub mod registry;
pub mod rpc;
pub mod scheduler;
pub mod workspace;

pub use config::Config;
pub use domain::{AgentKind, LoopEvent, LoopEventType, LoopInfo, LoopState, LoopStatus};
pub use scheduler::{LoopScheduler, SchedulerConfig, StartLoopParams};
