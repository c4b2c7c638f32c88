//! Task descriptor (`prd.json`) and its stories.

use std::path::Path;

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// A single user story inside a task's PRD.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Story {
    pub id: String,
    pub title: String,
    pub priority: i64,
    #[serde(default)]
    pub passes: bool,
    #[serde(default)]
    pub agent: Option<String>,
}

/// Task descriptor. Read fresh before each iteration; never mutated by the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prd {
    #[serde(rename = "branchName")]
    pub branch_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "userStories", default)]
    pub user_stories: Vec<Story>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(rename = "mergeTarget", default)]
    pub merge_target: Option<String>,
    #[serde(rename = "autoMerge", default)]
    pub auto_merge: bool,
}

impl Prd {
    /// Read and parse `prd.json` from a task directory. Always re-reads from
    /// disk; the driver must not cache this across iterations.
    pub fn read(task_dir: &Path) -> Result<Self> {
        let path = task_dir.join("prd.json");
        debug!(?path, "Prd::read: called");
        let content = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path.display()))?;
        let prd: Prd = serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        debug!(stories = prd.user_stories.len(), "Prd::read: parsed");
        Ok(prd)
    }

    /// The lowest-priority story with `passes=false`; ties broken by file order.
    pub fn next_story(&self) -> Option<&Story> {
        debug!("Prd::next_story: called");
        self.user_stories
            .iter()
            .filter(|s| !s.passes)
            .min_by_key(|s| s.priority)
    }

    /// `true` iff every story in this PRD has `passes=true` (vacuously true for
    /// an empty story list).
    pub fn all_stories_pass(&self) -> bool {
        self.user_stories.iter().all(|s| s.passes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_prd(dir: &Path, json: &str) {
        std::fs::write(dir.join("prd.json"), json).unwrap();
    }

    #[test]
    fn next_story_picks_lowest_priority_incomplete() {
        let dir = tempdir().unwrap();
        write_prd(
            dir.path(),
            r#"{"branchName":"feat/x","userStories":[
                {"id":"a","title":"A","priority":2,"passes":false},
                {"id":"b","title":"B","priority":1,"passes":false},
                {"id":"c","title":"C","priority":0,"passes":true}
            ]}"#,
        );
        let prd = Prd::read(dir.path()).unwrap();
        assert_eq!(prd.next_story().unwrap().id, "b");
    }

    #[test]
    fn next_story_none_when_all_pass() {
        let dir = tempdir().unwrap();
        write_prd(
            dir.path(),
            r#"{"branchName":"feat/x","userStories":[{"id":"a","title":"A","priority":1,"passes":true}]}"#,
        );
        let prd = Prd::read(dir.path()).unwrap();
        assert!(prd.next_story().is_none());
        assert!(prd.all_stories_pass());
    }

    #[test]
    fn read_missing_file_errors() {
        let dir = tempdir().unwrap();
        assert!(Prd::read(dir.path()).is_err());
    }
}
