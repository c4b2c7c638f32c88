//! Template loading, variable substitution, and AGENTS.md injection.
//!
//! Grounded in the predecessor's `prompt.py`: same precedence order, same
//! substitution regex, same agent-conditional marker format, same header.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::domain::AgentKind;

use super::embedded;

/// Context variables available for template substitution.
#[derive(Debug, Clone)]
pub struct PromptContext {
    pub task_dir: PathBuf,
    pub prd_file: PathBuf,
    pub progress_file: PathBuf,
    pub branch_name: String,
    pub agent: AgentKind,
    pub extra_vars: HashMap<String, String>,
}

impl PromptContext {
    pub fn new(task_dir: PathBuf, branch_name: String, agent: AgentKind) -> Self {
        let prd_file = task_dir.join("prd.json");
        let progress_file = task_dir.join("progress.txt");
        Self {
            task_dir,
            prd_file,
            progress_file,
            branch_name,
            agent,
            extra_vars: HashMap::new(),
        }
    }

    /// Convert this context into the variable dictionary used for
    /// substitution.
    pub fn to_vars(&self) -> HashMap<String, String> {
        let mut vars = HashMap::new();
        vars.insert("TASK_DIR".to_string(), self.task_dir.display().to_string());
        vars.insert("PRD_FILE".to_string(), self.prd_file.display().to_string());
        vars.insert("PROGRESS_FILE".to_string(), self.progress_file.display().to_string());
        vars.insert("BRANCH_NAME".to_string(), self.branch_name.clone());
        vars.insert("AGENT".to_string(), self.agent.as_str().to_string());
        vars.extend(self.extra_vars.clone());
        vars
    }
}

/// Load `prompt.md` from the fixed precedence order. The first hit wins.
pub fn load_prompt_template(task_dir: &Path) -> String {
    debug!(?task_dir, "load_prompt_template: called");

    let task_prompt = task_dir.join("prompt.md");
    if task_prompt.is_file() {
        debug!(?task_prompt, "load_prompt_template: found task-directory prompt");
        if let Ok(content) = std::fs::read_to_string(&task_prompt) {
            return content;
        }
    }

    if let Some(home) = dirs::home_dir() {
        let config_prompt = home.join(".config").join("ralph-daemon").join("prompt.md");
        if config_prompt.is_file() {
            debug!(?config_prompt, "load_prompt_template: found user-config prompt");
            if let Ok(content) = std::fs::read_to_string(&config_prompt) {
                return content;
            }
        }
    }

    // tasks/ is typically one level under the project root, so task_dir's
    // parent's parent is the project root.
    if let Some(project_root) = task_dir.parent().and_then(|p| p.parent()) {
        let root_prompt = project_root.join("prompt.md");
        if root_prompt.is_file() {
            debug!(?root_prompt, "load_prompt_template: found project-root prompt");
            if let Ok(content) = std::fs::read_to_string(&root_prompt) {
                return content;
            }
        }
    }

    if let Some(home) = dirs::home_dir() {
        let installed_prompt = home.join(".local").join("share").join("ralph-daemon").join("prompt.md");
        if installed_prompt.is_file() {
            debug!(?installed_prompt, "load_prompt_template: found installed-location prompt");
            if let Ok(content) = std::fs::read_to_string(&installed_prompt) {
                return content;
            }
        }
    }

    debug!("load_prompt_template: falling back to embedded default");
    embedded::FALLBACK.to_string()
}

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{([A-Z][A-Z0-9_]*)\}").unwrap());

/// Apply `{VARIABLE}` substitution. Unrecognized variables are left as-is.
pub fn substitute_variables(template: &str, variables: &HashMap<String, String>) -> String {
    VARIABLE_RE
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            variables.get(name).cloned().unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Find and load `AGENTS.md` content: project root then task-specific,
/// joined with a blank line.
pub fn find_agents_md(task_dir: &Path) -> String {
    debug!(?task_dir, "find_agents_md: called");
    let mut parts = Vec::new();

    if let Some(project_root) = task_dir.parent().and_then(|p| p.parent()) {
        let root_agents = project_root.join("AGENTS.md");
        if root_agents.is_file()
            && let Ok(content) = std::fs::read_to_string(&root_agents)
        {
            parts.push(content.trim().to_string());
        }
    }

    let task_agents = task_dir.join("AGENTS.md");
    if task_agents.is_file()
        && let Ok(content) = std::fs::read_to_string(&task_agents)
    {
        parts.push(content.trim().to_string());
    }

    parts.join("\n\n")
}

/// Filter `<!-- agent:X --> ... <!-- /agent:X -->` conditional blocks: content
/// for the current agent is kept with markers stripped; content for any other
/// agent is removed entirely, markers included. Blocks do not nest.
pub fn preprocess_agent_sections(content: &str, agent: AgentKind) -> String {
    debug!(agent = agent.as_str(), "preprocess_agent_sections: called");
    let mut result = content.to_string();

    for candidate in crate::domain::ALL_AGENT_KINDS {
        let open_tag = format!("<!-- agent:{} -->", candidate.as_str());
        let close_tag = format!("<!-- /agent:{} -->", candidate.as_str());

        if candidate == agent {
            result = result.replace(&open_tag, "").replace(&close_tag, "");
        } else {
            let pattern = format!(
                "{}{}.*?{}",
                "(?s)",
                regex::escape(&open_tag),
                regex::escape(&close_tag)
            );
            if let Ok(re) = Regex::new(&pattern) {
                result = re.replace_all(&result, "").into_owned();
            }
        }
    }

    result
}

/// Build the complete prompt for an agent iteration:
/// 1. load the template, 2. filter agent sections, 3. substitute variables,
/// 4. inject AGENTS.md, 5. prepend the task-context header.
pub fn build_prompt(context: &PromptContext) -> String {
    debug!(task_dir = ?context.task_dir, agent = context.agent.as_str(), "build_prompt: called");

    let mut template = load_prompt_template(&context.task_dir);
    template = preprocess_agent_sections(&template, context.agent);

    let variables = context.to_vars();
    template = substitute_variables(&template, &variables);

    let agents_md = find_agents_md(&context.task_dir);

    let task_dir_str = context.task_dir.display();
    let header = format!(
        "# Ralph Agent Instructions\n\nTask Directory: {task_dir_str}\nPRD File: {task_dir_str}/prd.json\nProgress File: {task_dir_str}/progress.txt\n\n"
    );

    let agents_section = if agents_md.is_empty() {
        String::new()
    } else {
        format!("## Project Context (from AGENTS.md)\n\n{agents_md}\n\n---\n\n")
    };

    format!("{header}{agents_section}{template}\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn substitute_unknown_placeholders_preserved() {
        let mut vars = HashMap::new();
        vars.insert("AGENT".to_string(), "claude".to_string());
        let out = substitute_variables("Agent is {AGENT}, unknown is {FOO}", &vars);
        assert_eq!(out, "Agent is claude, unknown is {FOO}");
    }

    #[test]
    fn agent_sections_reduce_per_agent() {
        let template = "<!-- agent:claude -->X<!-- /agent:claude --><!-- agent:opencode -->Y<!-- /agent:opencode -->";
        assert_eq!(preprocess_agent_sections(template, AgentKind::Claude), "X");
        assert_eq!(preprocess_agent_sections(template, AgentKind::Opencode), "Y");
    }

    #[test]
    fn load_prompt_template_prefers_task_dir() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.md"), "hello from task dir").unwrap();
        assert_eq!(load_prompt_template(dir.path()), "hello from task dir");
    }

    #[test]
    fn load_prompt_template_falls_back_to_embedded() {
        let dir = tempdir().unwrap();
        let content = load_prompt_template(dir.path());
        assert!(content.contains("No prompt template found"));
    }

    #[test]
    fn build_prompt_includes_header_and_trailing_newline() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.md"), "Work on {BRANCH_NAME}.").unwrap();
        let ctx = PromptContext::new(dir.path().to_path_buf(), "feat/x".to_string(), AgentKind::Claude);
        let prompt = build_prompt(&ctx);
        assert!(prompt.starts_with("# Ralph Agent Instructions"));
        assert!(prompt.contains("Work on feat/x."));
        assert!(prompt.ends_with('\n'));
    }

    #[test]
    fn build_prompt_injects_agents_md() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("prompt.md"), "Body").unwrap();
        std::fs::write(dir.path().join("AGENTS.md"), "Project rules here").unwrap();
        let ctx = PromptContext::new(dir.path().to_path_buf(), "main".to_string(), AgentKind::Opencode);
        let prompt = build_prompt(&ctx);
        assert!(prompt.contains("Project Context (from AGENTS.md)"));
        assert!(prompt.contains("Project rules here"));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn var_name() -> impl Strategy<Value = String> {
        "[A-Z][A-Z0-9_]{0,10}"
    }

    fn var_value() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9/._-]{0,20}"
    }

    proptest! {
        #[test]
        fn known_variable_fully_replaced(name in var_name(), value in var_value()) {
            let template = format!("prefix|{{{name}}}|suffix|{{{name}}}|end");
            let mut vars = HashMap::new();
            vars.insert(name.clone(), value.clone());
            let out = substitute_variables(&template, &vars);
            let expected = format!("prefix|{value}|suffix|{value}|end");
            prop_assert_eq!(out, expected);
        }

        #[test]
        fn unknown_variable_left_verbatim(name in var_name()) {
            let template = format!("a {{{name}}} b");
            let vars = HashMap::new();
            let out = substitute_variables(&template, &vars);
            prop_assert_eq!(out, template);
        }

        #[test]
        fn substitution_is_idempotent_on_plain_text(text in "[a-zA-Z0-9 ._/-]{0,40}") {
            let vars = HashMap::new();
            let once = substitute_variables(&text, &vars);
            let twice = substitute_variables(&once, &vars);
            prop_assert_eq!(once, twice);
        }
    }
}
