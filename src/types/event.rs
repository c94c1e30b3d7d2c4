//! The canonical push event every provider parser produces.

use serde::{Deserialize, Serialize};

use super::ids::{BranchRef, CommitId, RepoName};

/// Head commit of a push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub id: CommitId,
    pub message: String,
    /// Provider-formatted timestamp, printed verbatim in build logs.
    pub timestamp: String,
}

/// A name/email pair (committer or pusher).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub name: String,
    pub email: String,
}

impl Person {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Person {
            name: name.into(),
            email: email.into(),
        }
    }

    /// `name email`, dropping whichever half is empty.
    pub fn describe(&self) -> String {
        match (self.name.is_empty(), self.email.is_empty()) {
            (false, false) => format!("{} {}", self.name, self.email),
            (false, true) => self.name.clone(),
            _ => self.email.clone(),
        }
    }
}

/// Provider-agnostic push notification.
///
/// Built once per accepted webhook delivery and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    /// Full ref, e.g. `refs/heads/pages`.
    pub branch_ref: BranchRef,
    /// Owning organization, user or project key, lower-cased.
    pub parent_id: String,
    pub repository: RepoName,
    pub commit: Commit,
    pub committer: Person,
    /// Not every provider reports who pushed.
    pub pusher: Option<Person>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_joins_name_and_email() {
        assert_eq!(
            Person::new("Mike Bland", "mbland@acm.org").describe(),
            "Mike Bland mbland@acm.org"
        );
    }

    #[test]
    fn describe_skips_missing_name() {
        assert_eq!(Person::new("", "mbland@acm.org").describe(), "mbland@acm.org");
        assert_eq!(Person::new("Mike Bland", "").describe(), "Mike Bland");
    }
}
