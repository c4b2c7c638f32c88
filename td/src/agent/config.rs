//! Per-run agent configuration.

use std::path::PathBuf;

/// Configuration for a single agent invocation.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub prompt: String,
    pub working_dir: PathBuf,
    pub yolo_mode: bool,
    pub verbose: bool,
    pub model: String,
}

impl AgentConfig {
    pub fn new(prompt: String, working_dir: PathBuf) -> Self {
        Self {
            prompt,
            working_dir,
            yolo_mode: false,
            verbose: false,
            model: String::new(),
        }
    }

    pub fn with_yolo_mode(mut self, yolo_mode: bool) -> Self {
        self.yolo_mode = yolo_mode;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}
