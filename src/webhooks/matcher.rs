//! Matching push events against configured deployment targets.

use regex::Regex;
use thiserror::Error;

use crate::config::{Config, TargetConfig};
use crate::types::{BRANCH_REF_PREFIX, PushEvent};

/// Errors from compiling a target's matcher.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("invalid branch pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("cannot determine parent from git URL prefix {0:?}")]
    NoParent(String),
}

/// Extracts the last component of a git URL prefix, lower-cased.
///
/// That component names the user, organization or project that webhook
/// deliveries must come from.
///
/// ```
/// use pages_builder::webhooks::parent_from_git_url_prefix;
///
/// assert_eq!(parent_from_git_url_prefix("git@github.com:mbland/"), Some("mbland".to_string()));
/// assert_eq!(parent_from_git_url_prefix("https://github.com/MBland"), Some("mbland".to_string()));
/// ```
pub fn parent_from_git_url_prefix(prefix: &str) -> Option<String> {
    let parent = prefix.trim_end_matches('/').rsplit([':', '/']).next()?;
    if parent.is_empty() {
        return None;
    }
    Some(parent.to_lowercase())
}

/// A compiled target: parent organization plus an anchored branch regex.
///
/// A `branchInUrlPattern` matches branch names case-insensitively; a plain
/// `branch` pattern does not.
#[derive(Debug, Clone)]
pub struct TargetMatcher {
    parent: String,
    branch_regex: Regex,
}

impl TargetMatcher {
    /// Compiles the matcher for `target`, falling back to the global git URL
    /// prefix when the target does not override it.
    pub fn new(config: &Config, target: &TargetConfig) -> Result<Self, MatchError> {
        let prefix = target
            .git_url_prefix
            .as_deref()
            .unwrap_or(&config.git_url_prefix);
        let parent =
            parent_from_git_url_prefix(prefix).ok_or_else(|| MatchError::NoParent(prefix.to_string()))?;

        let pattern = target.branch_pattern();
        let branch = if target.branch_in_url_pattern.is_some() {
            format!("(?i:{pattern})")
        } else {
            pattern.to_string()
        };
        let prefix = regex::escape(BRANCH_REF_PREFIX);
        let branch_regex = Regex::new(&format!("^{prefix}({branch})$")).map_err(|source| {
            MatchError::InvalidPattern {
                pattern: pattern.to_string(),
                source,
            }
        })?;

        Ok(TargetMatcher {
            parent,
            branch_regex,
        })
    }

    /// Returns the matched branch name if `event` belongs to this target.
    ///
    /// The whole ref must match; `refs/heads/pages-internal` does not match
    /// the pattern `pages`.
    pub fn matches(&self, event: &PushEvent) -> Option<String> {
        if event.parent_id != self.parent {
            return None;
        }
        self.branch_regex
            .captures(event.branch_ref.as_str())
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    }
}
