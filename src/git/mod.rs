//! Working-copy synchronization.
//!
//! Brings a working copy to the exact tip of a remote branch: a fresh clone
//! when the directory is missing, otherwise fetch, clean and hard reset,
//! followed by a recursive submodule sync and update. Untracked files are
//! removed and local changes discarded.

use std::path::Path;

use crate::build::log::BuildLog;
use crate::command::{CommandError, CommandRunner, Invocation, default_description, path_arg};

/// Synchronizes one repository's working copy.
pub struct RepositorySync<'a, R> {
    runner: &'a R,
    git: &'a str,
    repo: &'a str,
    log: &'a BuildLog,
}

impl<'a, R: CommandRunner> RepositorySync<'a, R> {
    /// `git` is the executable to run; `repo` names the repository in log
    /// lines and failure messages.
    pub fn new(runner: &'a R, git: &'a str, repo: &'a str, log: &'a BuildLog) -> Self {
        RepositorySync {
            runner,
            git,
            repo,
            log,
        }
    }

    /// Clones or updates `working_dir` to `origin/<branch>`.
    ///
    /// Running it twice in a row leaves the same state as running it once.
    pub async fn prepare(
        &self,
        working_dir: &Path,
        branch: &str,
        remote_url: &str,
    ) -> Result<(), CommandError> {
        if working_dir.exists() {
            self.sync(working_dir, branch).await
        } else {
            self.clone_repo(working_dir, branch, remote_url).await
        }
    }

    async fn clone_repo(
        &self,
        working_dir: &Path,
        branch: &str,
        remote_url: &str,
    ) -> Result<(), CommandError> {
        self.log.info(format!(
            "cloning {} into {}",
            self.repo,
            working_dir.display()
        ));

        let parent = working_dir.parent().unwrap_or(Path::new("/"));
        if let Err(e) = std::fs::create_dir_all(parent) {
            let message = format!("failed to create {}: {e}", parent.display());
            self.log.error(message.clone());
            let invocation = self.git_invocation(parent, format!("failed to clone {}", self.repo));
            return Err(CommandError::new(&invocation, None, vec![message]));
        }

        let invocation = self
            .git_invocation(parent, format!("failed to clone {}", self.repo))
            .args(["clone", remote_url, "--branch", branch])
            .arg(path_arg(working_dir));
        self.runner.run(&invocation, self.log).await
    }

    async fn sync(&self, working_dir: &Path, branch: &str) -> Result<(), CommandError> {
        self.log.info(format!("syncing repo: {}", self.repo));

        let origin_branch = format!("origin/{branch}");
        let steps: [&[&str]; 5] = [
            &["fetch", "origin", branch],
            &["clean", "-f"],
            &["reset", "--hard", origin_branch.as_str()],
            &["submodule", "sync", "--recursive"],
            &["submodule", "update", "--init", "--recursive"],
        ];

        for args in steps {
            let invocation = self
                .git_invocation(working_dir, default_description(self.repo))
                .args(args.iter().copied());
            self.runner.run(&invocation, self.log).await?;
        }
        Ok(())
    }

    /// Git never prompts for credentials; a missing credential is a failure.
    fn git_invocation(&self, cwd: &Path, description: String) -> Invocation {
        Invocation::new(self.git, cwd, description).env("GIT_TERMINAL_PROMPT", "0")
    }
}
