//! Derives a stable project directory name from a git origin URL.

use std::sync::LazyLock;

use regex::Regex;

use super::error::WorkspaceError;

static SSH_SHORTHAND_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[\w.-]+@[\w.-]+:(.+)$").unwrap());

/// Extract the project name from a git origin URL, e.g.
/// `https://github.com/user/repo.git` -> `repo`, `git@github.com:user/repo.git` -> `repo`.
pub fn resolve_project_name(origin_url: &str) -> Result<String, WorkspaceError> {
    if origin_url.is_empty() {
        return Err(WorkspaceError::InvalidOrigin("empty origin URL".to_string()));
    }

    let path = if let Some(captures) = SSH_SHORTHAND_RE.captures(origin_url) {
        captures[1].to_string()
    } else if let Some(idx) = origin_url.find("://") {
        let rest = &origin_url[idx + 3..];
        rest.find('/').map(|i| rest[i..].to_string()).unwrap_or_else(|| rest.to_string())
    } else if origin_url.starts_with('/') {
        origin_url.to_string()
    } else {
        origin_url.to_string()
    };

    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(WorkspaceError::InvalidOrigin(format!("could not extract project name from: {origin_url}")));
    }

    let last = trimmed.rsplit('/').next().unwrap_or(trimmed);
    let name = last.strip_suffix(".git").unwrap_or(last);

    if name.is_empty() {
        return Err(WorkspaceError::InvalidOrigin(format!("could not extract project name from: {origin_url}")));
    }

    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_url_with_git_suffix() {
        assert_eq!(resolve_project_name("https://github.com/user/repo.git").unwrap(), "repo");
    }

    #[test]
    fn https_url_without_git_suffix() {
        assert_eq!(resolve_project_name("https://github.com/user/repo").unwrap(), "repo");
    }

    #[test]
    fn ssh_shorthand_url() {
        assert_eq!(resolve_project_name("git@github.com:user/repo.git").unwrap(), "repo");
    }

    #[test]
    fn local_path() {
        assert_eq!(resolve_project_name("/local/path/to/repo").unwrap(), "repo");
    }

    #[test]
    fn trailing_slash_is_stripped() {
        assert_eq!(resolve_project_name("https://github.com/user/repo/").unwrap(), "repo");
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(resolve_project_name("").is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn repo_name() -> impl Strategy<Value = String> {
        "[a-zA-Z][a-zA-Z0-9_-]{0,20}"
    }

    proptest! {
        #[test]
        fn https_url_round_trips_repo_name(name in repo_name()) {
            let url = format!("https://github.com/user/{name}.git");
            prop_assert_eq!(resolve_project_name(&url).unwrap(), name);
        }

        #[test]
        fn ssh_shorthand_round_trips_repo_name(name in repo_name()) {
            let url = format!("git@github.com:user/{name}.git");
            prop_assert_eq!(resolve_project_name(&url).unwrap(), name);
        }

        #[test]
        fn local_path_round_trips_repo_name(name in repo_name()) {
            let path = format!("/srv/repos/{name}");
            prop_assert_eq!(resolve_project_name(&path).unwrap(), name);
        }
    }
}
