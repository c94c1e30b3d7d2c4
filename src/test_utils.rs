//! Shared test fixtures, fakes and arbitrary generators for property-based testing.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use proptest::prelude::*;
use thiserror::Error;

use crate::build::log::BuildLog;
use crate::command::{CommandError, CommandRunner, Invocation};
use crate::publish::RemoteStore;
use crate::types::{BranchRef, Commit, CommitId, Person, PushEvent, RepoName};

// ============================================================================
// Generators
// ============================================================================

/// A single safe path component.
pub fn arb_path_component() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_][a-zA-Z0-9_.-]{0,20}".prop_map(String::from)
}

/// Paths that are not strict subdirectories of `home`.
pub fn arb_escaping_path(home: &'static str) -> impl Strategy<Value = PathBuf> {
    prop_oneof![
        Just(PathBuf::from(home)),
        Just(PathBuf::from(format!("{home}/"))),
        arb_path_component().prop_map(move |c| PathBuf::from(format!("{home}-{c}"))),
        arb_path_component().prop_map(move |c| PathBuf::from(format!("{home}/../{c}"))),
        arb_path_component().prop_map(move |c| PathBuf::from(format!("{home}/{c}/../.."))),
        arb_path_component().prop_map(|c| PathBuf::from(format!("/etc/{c}"))),
        arb_path_component().prop_map(PathBuf::from),
    ]
}

pub fn arb_branch_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,30}".prop_map(String::from)
}

// ============================================================================
// Push events and payloads
// ============================================================================

/// A push to `branch_ref` of `<org>/<repo>` at commit `deadbeef`.
pub fn push_event(org: &str, repo: &str, branch_ref: &str) -> PushEvent {
    PushEvent {
        branch_ref: BranchRef::new(branch_ref),
        parent_id: org.to_lowercase(),
        repository: RepoName::new(repo, format!("{org}/{repo}")),
        commit: Commit {
            id: CommitId::new("deadbeef"),
            message: "Build me".to_string(),
            timestamp: "2015-09-25".to_string(),
        },
        committer: Person::new("", "mbland@acm.org"),
        pusher: Some(Person::new("Mike Bland", "mbland@acm.org")),
    }
}

/// A GitHub push event body.
pub fn github_push_payload(org: &str, repo: &str, branch_ref: &str) -> serde_json::Value {
    serde_json::json!({
        "ref": branch_ref,
        "repository": {
            "name": repo,
            "full_name": format!("{org}/{repo}"),
            "organization": org,
        },
        "head_commit": {
            "id": "deadbeef",
            "message": "Build me",
            "timestamp": "2015-09-25",
            "committer": { "email": "mbland@acm.org" },
        },
        "pusher": { "name": "Mike Bland", "email": "mbland@acm.org" },
    })
}

/// A Bitbucket Server POST service body.
pub fn bitbucket_push_payload(
    project_key: &str,
    slug: &str,
    branch_ref: &str,
    is_last_page: bool,
) -> serde_json::Value {
    serde_json::json!({
        "repository": {
            "slug": slug,
            "project": { "key": project_key },
        },
        "refChanges": [{ "refId": branch_ref, "type": "UPDATE" }],
        "changesets": {
            "isLastPage": is_last_page,
            "values": [{
                "toCommit": {
                    "id": "deadbeef",
                    "message": "Build me",
                    "authorTimestamp": 1443139200000i64,
                    "author": { "name": "Mike Bland", "emailAddress": "mbland@acm.org" },
                },
            }],
        },
    })
}

// ============================================================================
// Fakes
// ============================================================================

struct Failure {
    tool: String,
    subcommand: Option<String>,
    exit_code: i32,
}

impl Failure {
    fn matches(&self, invocation: &Invocation) -> bool {
        self.tool == invocation.tool
            && self
                .subcommand
                .as_ref()
                .is_none_or(|sub| invocation.args.first() == Some(sub))
    }
}

/// A [`CommandRunner`] that records invocations instead of spawning them.
#[derive(Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<Invocation>>,
    failures: Vec<Failure>,
    panics: Option<String>,
    watched: Option<String>,
    captured: Mutex<Vec<(String, String)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails every invocation of `tool` (optionally only `tool <subcommand>`)
    /// with `exit_code`.
    pub fn fail_on(mut self, tool: &str, subcommand: Option<&str>, exit_code: i32) -> Self {
        self.failures.push(Failure {
            tool: tool.to_string(),
            subcommand: subcommand.map(String::from),
            exit_code,
        });
        self
    }

    /// Panics inside every invocation of `tool`.
    pub fn panic_on(mut self, tool: &str) -> Self {
        self.panics = Some(tool.to_string());
        self
    }

    /// Reads `file` from the invocation's working directory each time a
    /// command runs, while it exists.
    pub fn capture(mut self, file: &str) -> Self {
        self.watched = Some(file.to_string());
        self
    }

    /// `(tool, contents)` for each invocation that saw the captured file.
    pub fn captured(&self) -> Vec<(String, String)> {
        self.captured.lock().unwrap().clone()
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    /// `<tool> <args...>` for each invocation, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.invocations()
            .iter()
            .map(Invocation::command_line)
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation, _log: &BuildLog) -> Result<(), CommandError> {
        self.invocations.lock().unwrap().push(invocation.clone());
        if let Some(file) = &self.watched
            && let Ok(contents) = std::fs::read_to_string(invocation.cwd.join(file))
        {
            self.captured
                .lock()
                .unwrap()
                .push((invocation.tool.clone(), contents));
        }
        if self.panics.as_deref() == Some(invocation.tool.as_str()) {
            panic!("{} crashed", invocation.tool);
        }
        match self.failures.iter().find(|f| f.matches(invocation)) {
            Some(failure) => Err(CommandError::new(invocation, Some(failure.exit_code), vec![])),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct StoreFailure(pub String);

/// One recorded upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    pub source: PathBuf,
    pub bucket: String,
    pub prefix: String,
}

/// A [`RemoteStore`] that records uploads.
#[derive(Default)]
pub struct RecordingStore {
    uploads: Mutex<Vec<Upload>>,
    failure: Option<String>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(message: &str) -> Self {
        RecordingStore {
            uploads: Mutex::new(Vec::new()),
            failure: Some(message.to_string()),
        }
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }
}

impl RemoteStore for RecordingStore {
    type Error = StoreFailure;

    async fn sync(
        &self,
        source: &Path,
        bucket: &str,
        prefix: &str,
        _log: &BuildLog,
    ) -> Result<(), StoreFailure> {
        self.uploads.lock().unwrap().push(Upload {
            source: source.to_path_buf(),
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        });
        match &self.failure {
            Some(message) => Err(StoreFailure(message.clone())),
            None => Ok(()),
        }
    }
}
