//! The First-Run Setup section, prepended to the prompt on iteration 1.

use std::path::Path;

pub fn first_run_section(worktree_path: &Path, branch: &str, description: &str, total_stories: usize, completed_stories: usize) -> String {
    format!(
        "## First-Run Setup\n\n\
         This is the first iteration of this loop. Before working on a story, run any \
         environment bootstrap the project needs (install dependencies, build, etc.).\n\n\
         Worktree: {}\n\
         Branch: {}\n\
         Task: {}\n\
         Stories complete: {}/{}\n\n",
        worktree_path.display(),
        branch,
        description,
        completed_stories,
        total_stories,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn includes_worktree_branch_and_counts() {
        let section = first_run_section(&PathBuf::from("/tmp/wt"), "feat/x", "does a thing", 5, 2);
        assert!(section.contains("/tmp/wt"));
        assert!(section.contains("feat/x"));
        assert!(section.contains("does a thing"));
        assert!(section.contains("2/5"));
    }
}
