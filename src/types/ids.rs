//! Newtype wrappers for identifiers carried by push events.
//!
//! These keep commit ids, branch refs and repository names from being mixed
//! up as plain strings and make log formatting uniform.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix of a fully qualified branch ref.
pub const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// A commit id as reported by the provider.
///
/// Not validated: Bitbucket and GitHub both use 40-hex SHA-1 ids today, but
/// the pipeline only ever prints this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(pub String);

impl CommitId {
    pub fn new(s: impl Into<String>) -> Self {
        CommitId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CommitId {
    fn from(s: &str) -> Self {
        CommitId(s.to_string())
    }
}

/// A full ref string, e.g. `refs/heads/pages`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchRef(pub String);

impl BranchRef {
    pub fn new(s: impl Into<String>) -> Self {
        BranchRef(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BranchRef {
    fn from(s: &str) -> Self {
        BranchRef(s.to_string())
    }
}

/// Short and qualified name of the pushed repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoName {
    /// Short name, e.g. `foo`. Used for directory names and log lines.
    pub name: String,
    /// Qualified name, e.g. `mbland/foo`.
    pub full_name: String,
}

impl RepoName {
    pub fn new(name: impl Into<String>, full_name: impl Into<String>) -> Self {
        RepoName {
            name: name.into(),
            full_name: full_name.into(),
        }
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name)
    }
}
