//! PromptBuilder (C1): assembles the per-iteration prompt from a template plus
//! run context.
//!
//! Template loading chain:
//! 1. `task_dir/prompt.md` (task override)
//! 2. `~/.config/ralph-daemon/prompt.md` (user config)
//! 3. `<project_root>/prompt.md` (two levels up from the task dir)
//! 4. `~/.local/share/ralph-daemon/prompt.md` (installed default)
//! 5. embedded fallback

mod builder;
mod embedded;

pub use builder::{
    PromptContext, build_prompt, find_agents_md, load_prompt_template, preprocess_agent_sections,
    substitute_variables,
};
