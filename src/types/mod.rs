//! Core domain types shared by the webhook, dispatch and build layers.

pub mod event;
pub mod ids;

pub use event::{Commit, Person, PushEvent};
pub use ids::{BRANCH_REF_PREFIX, BranchRef, CommitId, RepoName};
