//! Provider-specific push payload parsers.
//!
//! Each provider's JSON is deserialized into `Raw*` structs with liberal
//! `Option`s, then required fields are checked explicitly. Anything missing
//! yields `None`: the delivery is unusable, which the HTTP layer reports as a
//! bad request.
//!
//! # Providers
//!
//! - GitHub push events
//!   (<https://docs.github.com/en/webhooks/webhook-events-and-payloads#push>)
//! - Bitbucket Server POST service webhooks. These deliver commits in pages;
//!   a delivery whose changeset page is not the last one is ignored.

use std::fmt;
use std::str::FromStr;

use chrono::DateTime;
use serde::Deserialize;
use thiserror::Error;

use crate::types::{BranchRef, Commit, CommitId, Person, PushEvent, RepoName};

/// The configured source of webhook deliveries.
///
/// Chosen once from configuration; every delivery is parsed with the same
/// provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WebhookProvider {
    GitHub,
    Bitbucket,
}

/// Returned when a configured provider name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown webhook provider: {0}")]
pub struct UnknownProvider(pub String);

impl FromStr for WebhookProvider {
    type Err = UnknownProvider;

    /// Case-insensitive: `GitHub`, `github` and `GITHUB` are all accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "github" => Ok(WebhookProvider::GitHub),
            "bitbucket" => Ok(WebhookProvider::Bitbucket),
            _ => Err(UnknownProvider(s.to_string())),
        }
    }
}

impl fmt::Display for WebhookProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WebhookProvider::GitHub => write!(f, "github"),
            WebhookProvider::Bitbucket => write!(f, "bitbucket"),
        }
    }
}

impl WebhookProvider {
    /// Parses a raw delivery body into a canonical push event.
    ///
    /// Returns `None` for non-JSON bodies, missing required fields, and
    /// incomplete paginated deliveries.
    pub fn parse_event(&self, payload: &[u8]) -> Option<PushEvent> {
        match self {
            WebhookProvider::GitHub => parse_github(payload),
            WebhookProvider::Bitbucket => parse_bitbucket(payload),
        }
    }
}

// ============================================================================
// GitHub push event
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawGitHubPush {
    #[serde(rename = "ref")]
    ref_name: Option<String>,
    repository: Option<RawGitHubRepository>,
    head_commit: Option<RawGitHubCommit>,
    pusher: Option<RawGitHubPerson>,
}

#[derive(Debug, Deserialize)]
struct RawGitHubRepository {
    name: Option<String>,
    full_name: Option<String>,
    /// Present for organization-owned repositories.
    organization: Option<String>,
    owner: Option<RawGitHubOwner>,
}

#[derive(Debug, Deserialize)]
struct RawGitHubOwner {
    login: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGitHubCommit {
    id: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    timestamp: String,
    committer: Option<RawGitHubPerson>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGitHubPerson {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email: String,
}

impl From<RawGitHubPerson> for Person {
    fn from(raw: RawGitHubPerson) -> Self {
        Person::new(raw.name, raw.email)
    }
}

fn parse_github(payload: &[u8]) -> Option<PushEvent> {
    let raw: RawGitHubPush = serde_json::from_slice(payload).ok()?;

    let ref_name = raw.ref_name?;
    let repository = raw.repository?;
    let commit = raw.head_commit?;
    let pusher = raw.pusher?;

    let parent = repository
        .organization
        .or_else(|| {
            repository
                .owner
                .and_then(|owner| owner.login.or(owner.name))
        })?
        .to_lowercase();

    let name = repository.name?;
    let full_name = repository
        .full_name
        .unwrap_or_else(|| format!("{parent}/{name}"));

    Some(PushEvent {
        branch_ref: BranchRef::new(ref_name),
        parent_id: parent,
        repository: RepoName::new(name, full_name),
        commit: Commit {
            id: CommitId::new(commit.id),
            message: commit.message,
            timestamp: commit.timestamp,
        },
        committer: commit.committer.unwrap_or_default().into(),
        pusher: Some(pusher.into()),
    })
}

// ============================================================================
// Bitbucket Server POST service webhook
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBitbucketPush {
    ref_changes: Option<Vec<RawRefChange>>,
    repository: Option<RawBitbucketRepository>,
    changesets: Option<RawChangesets>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRefChange {
    ref_id: String,
}

#[derive(Debug, Deserialize)]
struct RawBitbucketRepository {
    slug: String,
    project: RawProject,
}

#[derive(Debug, Deserialize)]
struct RawProject {
    key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChangesets {
    #[serde(default)]
    is_last_page: bool,
    #[serde(default)]
    values: Vec<RawChangeset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChangeset {
    to_commit: RawBitbucketCommit,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBitbucketCommit {
    id: String,
    #[serde(default)]
    message: String,
    /// Milliseconds since the Unix epoch.
    author_timestamp: Option<i64>,
    author: Option<RawBitbucketAuthor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBitbucketAuthor {
    #[serde(default)]
    name: String,
    #[serde(default)]
    email_address: String,
}

fn parse_bitbucket(payload: &[u8]) -> Option<PushEvent> {
    let raw: RawBitbucketPush = serde_json::from_slice(payload).ok()?;

    let ref_change = raw.ref_changes?.into_iter().next()?;
    let repository = raw.repository?;
    let changesets = raw.changesets?;

    // Earlier pages of a multi-page delivery do not carry the head commit.
    if !changesets.is_last_page {
        return None;
    }
    let commit = changesets.values.into_iter().next()?.to_commit;

    let timestamp = commit
        .author_timestamp
        .and_then(DateTime::from_timestamp_millis)
        .map(|t| t.to_rfc3339())
        .unwrap_or_default();
    let committer = commit
        .author
        .map(|a| Person::new(a.name, a.email_address))
        .unwrap_or_default();

    Some(PushEvent {
        branch_ref: BranchRef::new(ref_change.ref_id),
        parent_id: repository.project.key.to_lowercase(),
        repository: RepoName::new(
            repository.slug.clone(),
            format!("{}/{}", repository.project.key, repository.slug),
        ),
        commit: Commit {
            id: CommitId::new(commit.id),
            message: commit.message,
            timestamp,
        },
        committer,
        pusher: None,
    })
}
