//! The staged build pipeline for one target and one push.
//!
//! ```text
//! Idle ─► LockAcquired ─► Synced ─┬─► Configured ─► [DependenciesInstalled] ─► Built ─► Published ─► Cleaned ─► Done
//!                                 └─► Built (rsync) ─► Published ─────────────────────────────────────────────► Done
//! ```
//!
//! Any stage may fail, moving the pipeline to `Failed(stage)`. Later stages
//! are skipped, but teardown always runs: a generated config is removed and
//! the lock is released before the failure is returned.
//!
//! The build log is written to the destination only while the lock is held,
//! and every build step leaves `build.log` in place.

use std::fmt;

use thiserror::Error;
use tracing::{debug, error};

use crate::command::{CommandError, CommandRunner, Invocation, default_description, path_arg};
use crate::config::Config;
use crate::git::RepositorySync;
use crate::lock::{LockError, TargetLock};
use crate::paths::PathError;
use crate::publish::{PublishError, Publisher, RemoteStore};
use crate::types::PushEvent;

use super::log::{BUILD_LOG_FILE, BuildLog};
use super::options::BuildOptions;
use super::site_config::{Backend, BuildConfiguration, SiteConfig, SiteConfigError};

/// Errors that end a pipeline run.
///
/// Messages are those of the underlying failure; they are what the build log
/// and the dispatch completion report.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Path(#[from] PathError),

    #[error("failed to open build log: {0}")]
    Log(#[source] std::io::Error),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    SiteConfig(#[from] SiteConfigError),

    #[error(transparent)]
    Publish(#[from] PublishError),
}

/// A pipeline stage, named for the state it leads to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Lock,
    Sync,
    Configure,
    InstallDependencies,
    Build,
    Publish,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Lock => "lock",
            Stage::Sync => "sync",
            Stage::Configure => "configure",
            Stage::InstallDependencies => "install dependencies",
            Stage::Build => "build",
            Stage::Publish => "publish",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Idle,
    LockAcquired,
    Synced,
    Configured,
    DependenciesInstalled,
    Built,
    Published,
    Cleaned,
    Done,
    Failed(Stage),
}

/// One build attempt, from lock acquisition through release.
pub struct BuildPipeline<'a, R, S> {
    config: &'a Config,
    options: &'a BuildOptions,
    event: &'a PushEvent,
    runner: &'a R,
    publisher: &'a Publisher<S>,
    log: &'a BuildLog,
    state: PipelineState,
}

impl<'a, R, S> BuildPipeline<'a, R, S>
where
    R: CommandRunner,
    S: RemoteStore,
{
    pub fn new(
        config: &'a Config,
        options: &'a BuildOptions,
        event: &'a PushEvent,
        runner: &'a R,
        publisher: &'a Publisher<S>,
        log: &'a BuildLog,
    ) -> Self {
        BuildPipeline {
            config,
            options,
            event,
            runner,
            publisher,
            log,
            state: PipelineState::Idle,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Runs every stage and reports the outcome to the build log.
    pub async fn run(&mut self) -> Result<(), PipelineError> {
        self.log_header();

        let result = self.run_locked().await;
        match &result {
            Ok(()) => {
                self.state = PipelineState::Done;
                self.log.info(format!("{}: build successful", self.options.repo));
            }
            Err(e) => {
                self.log.error(e.to_string());
                self.log.error(format!("{}: build failed", self.options.repo));
            }
        }
        result
    }

    fn log_header(&self) {
        let event = self.event;
        self.log.info(format!(
            "{}: starting build at commit {}",
            self.options.repo, event.commit.id
        ));
        self.log.info(format!("description: {}", event.commit.message));
        self.log.info(format!("timestamp: {}", event.commit.timestamp));
        self.log.info(format!("committer: {}", event.committer.describe()));
        if let Some(pusher) = &event.pusher {
            self.log.info(format!("pusher: {} {}", pusher.name, pusher.email));
        }
    }

    /// Records a stage outcome, advancing to `next` on success.
    fn advance<T, E>(
        &mut self,
        stage: Stage,
        next: PipelineState,
        result: Result<T, E>,
    ) -> Result<T, PipelineError>
    where
        E: Into<PipelineError>,
    {
        match result {
            Ok(value) => {
                debug!(repo = %self.options.repo, state = ?next, "pipeline advanced");
                self.state = next;
                Ok(value)
            }
            Err(e) => {
                debug!(repo = %self.options.repo, %stage, "pipeline stage failed");
                self.state = PipelineState::Failed(stage);
                Err(e.into())
            }
        }
    }

    async fn run_locked(&mut self) -> Result<(), PipelineError> {
        let lock = TargetLock::new(
            &self.options.lock_marker,
            self.config.lock_wait_timeout(),
            self.config.lock_poll_interval(),
        );
        let acquired = lock.acquire().await;
        let handle = self.advance(Stage::Lock, PipelineState::LockAcquired, acquired)?;

        let result = self.run_stages().await;

        let released = handle.release();
        match (result, released) {
            (Err(e), released) => {
                if let Err(release_error) = released {
                    error!(repo = %self.options.repo, error = %release_error, "lock release failed");
                }
                Err(e)
            }
            (Ok(()), released) => self.advance(Stage::Cleanup, self.state, released),
        }
    }

    async fn run_stages(&mut self) -> Result<(), PipelineError> {
        let options = self.options;

        let persisted = self
            .log
            .persist(&options.destination)
            .map_err(PipelineError::Log);
        self.advance(Stage::Lock, PipelineState::LockAcquired, persisted)?;

        let synced = RepositorySync::new(self.runner, &self.config.git, &options.repo, self.log)
            .prepare(&options.working_dir, &options.branch, &options.clone_url)
            .await;
        self.advance(Stage::Sync, PipelineState::Synced, synced)?;

        let mut site = SiteConfig::new(options, Backend::detect(&options.working_dir));
        site.init();

        match site.backend() {
            Backend::Mirror => {
                let built = self.rsync().await;
                self.advance(Stage::Build, PipelineState::Built, built)?;
                self.publish().await
            }
            Backend::Templated => {
                let result = self.build_templated(&mut site).await;
                self.cleanup(&mut site, result)
            }
        }
    }

    async fn build_templated(&mut self, site: &mut SiteConfig<'_>) -> Result<(), PipelineError> {
        let configured = site.read_or_write_config();
        self.advance(Stage::Configure, PipelineState::Configured, configured)?;

        if site.uses_bundler() {
            let installed = self.bundle_install().await;
            self.advance(
                Stage::InstallDependencies,
                PipelineState::DependenciesInstalled,
                installed,
            )?;
        }

        for build in site.build_configurations() {
            let built = self.jekyll_build(&build, site.uses_bundler()).await;
            self.advance(Stage::Build, PipelineState::Built, built)?;
        }

        self.publish().await
    }

    /// Removes the generated config whether or not the build succeeded.
    fn cleanup(
        &mut self,
        site: &mut SiteConfig<'_>,
        result: Result<(), PipelineError>,
    ) -> Result<(), PipelineError> {
        let removed = site.remove_generated_config();
        match result {
            Ok(()) => self.advance(Stage::Cleanup, PipelineState::Cleaned, removed),
            Err(e) => {
                if let Err(cleanup_error) = removed {
                    self.log.error(cleanup_error.to_string());
                }
                Err(e)
            }
        }
    }

    async fn publish(&mut self) -> Result<(), PipelineError> {
        let published = self
            .publisher
            .publish(&self.options.destination, self.log)
            .await;
        self.advance(Stage::Publish, PipelineState::Published, published)
    }

    fn invocation(&self, tool: &str) -> Invocation {
        Invocation::new(
            tool,
            &self.options.working_dir,
            default_description(&self.options.repo),
        )
    }

    async fn rsync(&self) -> Result<(), CommandError> {
        let invocation = self
            .invocation(&self.config.rsync)
            .args(self.config.rsync_opts.iter().cloned())
            .arg(format!("--exclude={BUILD_LOG_FILE}"))
            .arg("./")
            .arg(path_arg(&self.options.destination));
        self.runner.run(&invocation, self.log).await
    }

    async fn bundle_install(&self) -> Result<(), CommandError> {
        let invocation = self
            .invocation(&self.config.bundler)
            .arg("install")
            .arg(format!("--path={}", path_arg(&self.options.bundler_cache)));
        self.runner.run(&invocation, self.log).await
    }

    async fn jekyll_build(
        &self,
        build: &BuildConfiguration,
        uses_bundler: bool,
    ) -> Result<(), CommandError> {
        let invocation = if uses_bundler {
            self.invocation(&self.config.bundler)
                .args(["exec", self.config.jekyll.as_str()])
        } else {
            self.invocation(&self.config.jekyll)
        };
        let invocation = invocation
            .args(["build", "--trace", "--destination"])
            .arg(path_arg(&build.destination))
            .args(["--config".to_string(), build.config_arg()]);
        self.runner.run(&invocation, self.log).await
    }
}
