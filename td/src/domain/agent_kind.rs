//! The closed set of agent kinds the daemon can drive.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tag identifying an agent's command shape, environment, and output parser.
///
/// Closed set, per the design notes: implemented as a tagged variant with a
/// per-variant dispatch table rather than open subclassing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    Claude,
    Opencode,
}

/// All known agent kinds, in the closed-set order used for deterministic
/// `get_alternate` resolution.
pub const ALL_AGENT_KINDS: [AgentKind; 2] = [AgentKind::Claude, AgentKind::Opencode];

impl AgentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentKind::Claude => "claude",
            AgentKind::Opencode => "opencode",
        }
    }

    /// Any agent kind other than `self`, chosen deterministically by closed-set
    /// order (first kind in `ALL_AGENT_KINDS` that isn't `self`).
    pub fn alternate(&self) -> AgentKind {
        debug!(current = self.as_str(), "AgentKind::alternate: called");
        ALL_AGENT_KINDS
            .into_iter()
            .find(|k| k != self)
            .expect("ALL_AGENT_KINDS has more than one member")
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AgentKind {
    type Err = UnknownAgentKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "claude" => Ok(AgentKind::Claude),
            "opencode" => Ok(AgentKind::Opencode),
            other => Err(UnknownAgentKind(other.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown agent kind: {0}")]
pub struct UnknownAgentKind(pub String);

/// Resolve the effective agent kind by precedence: CLI override > story.agent >
/// prd.agent > default.
pub fn resolve_agent(
    cli_override: Option<&str>,
    story_agent: Option<&str>,
    prd_agent: Option<&str>,
    default: AgentKind,
) -> Result<AgentKind, UnknownAgentKind> {
    debug!(?cli_override, ?story_agent, ?prd_agent, ?default, "resolve_agent: called");
    if let Some(v) = cli_override {
        return v.parse();
    }
    if let Some(v) = story_agent {
        return v.parse();
    }
    if let Some(v) = prd_agent {
        return v.parse();
    }
    Ok(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alternate_is_deterministic_and_different() {
        assert_eq!(AgentKind::Claude.alternate(), AgentKind::Opencode);
        assert_eq!(AgentKind::Opencode.alternate(), AgentKind::Claude);
    }

    #[test]
    fn resolve_precedence_cli_wins() {
        let r = resolve_agent(Some("claude"), Some("opencode"), Some("opencode"), AgentKind::Opencode).unwrap();
        assert_eq!(r, AgentKind::Claude);
    }

    #[test]
    fn resolve_precedence_story_then_prd_then_default() {
        assert_eq!(
            resolve_agent(None, Some("opencode"), Some("claude"), AgentKind::Claude).unwrap(),
            AgentKind::Opencode
        );
        assert_eq!(
            resolve_agent(None, None, Some("opencode"), AgentKind::Claude).unwrap(),
            AgentKind::Opencode
        );
        assert_eq!(resolve_agent(None, None, None, AgentKind::Claude).unwrap(), AgentKind::Claude);
    }

    #[test]
    fn from_str_rejects_unknown() {
        assert!("gizmo".parse::<AgentKind>().is_err());
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn agent_str() -> impl Strategy<Value = &'static str> {
        prop_oneof!["claude", "opencode"]
    }

    fn maybe_agent_str() -> impl Strategy<Value = Option<&'static str>> {
        prop_oneof![Just(None), agent_str().prop_map(Some)]
    }

    proptest! {
        #[test]
        fn resolve_agent_honors_precedence_order(
            cli in maybe_agent_str(),
            story in maybe_agent_str(),
            prd in maybe_agent_str(),
            default_is_claude: bool,
        ) {
            let default = if default_is_claude { AgentKind::Claude } else { AgentKind::Opencode };
            let resolved = resolve_agent(cli, story, prd, default).unwrap();

            let expected_str = cli.or(story).or(prd);
            let expected = match expected_str {
                Some(s) => s.parse::<AgentKind>().unwrap(),
                None => default,
            };
            prop_assert_eq!(resolved, expected);
        }

        #[test]
        fn resolve_agent_never_errors_on_known_strings(
            cli in maybe_agent_str(),
            story in maybe_agent_str(),
            prd in maybe_agent_str(),
        ) {
            prop_assert!(resolve_agent(cli, story, prd, AgentKind::Claude).is_ok());
        }
    }
}
