//! Routing push events to build pipelines.
//!
//! A delivery is parsed once, matched against every configured target, and
//! answered immediately. Each matched target then gets its own pipeline,
//! and all of them run concurrently:
//!
//! ```text
//! ┌─────────────┐     ┌──────────┐    ┌──► pipeline (target 0) ──┐
//! │   axum      │ ──► │ dispatch │ ───┤                          ├──► completion
//! │  (accepts)  │     │ by target│    └──► pipeline (target 2) ──┘
//! └─────────────┘     └──────────┘
//!       │
//!       │ returns 202 Accepted
//!       ▼
//! ```
//!
//! Targets for the same working copy are serialized by the target lock, not
//! here. A failing pipeline never cancels its siblings; the completion
//! reports every failure once all of them have finished.

use std::fmt;
use std::sync::Arc;

use axum::http::StatusCode;
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::build::{BuildLog, BuildOptions, BuildPipeline, PipelineError};
use crate::command::CommandRunner;
use crate::config::{Config, ConfigError, TargetConfig};
use crate::publish::{Publisher, RemoteStore};
use crate::types::PushEvent;
use crate::webhooks::{TargetMatcher, WebhookProvider};

/// One target's failed build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetFailure {
    /// `<full repository name>@<branch>`
    pub target: String,
    pub message: String,
}

impl fmt::Display for TargetFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.message)
    }
}

fn describe_failures(failures: &[TargetFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{} of {} builds failed: {}", .failures.len(), .total, describe_failures(.failures))]
    BuildsFailed {
        total: usize,
        failures: Vec<TargetFailure>,
    },
}

/// A target selected for a push, with the branch its pattern captured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedTarget {
    /// Index into `Config::builders`.
    pub index: usize,
    pub branch: String,
}

/// The immediate answer to a delivery, plus the pipelines it started.
#[derive(Debug)]
pub struct Dispatch {
    pub status: StatusCode,
    /// `None` when the delivery was rejected.
    pub completion: Option<JoinHandle<Result<(), DispatchError>>>,
}

impl Dispatch {
    pub fn rejected() -> Self {
        Dispatch {
            status: StatusCode::BAD_REQUEST,
            completion: None,
        }
    }
}

/// Routes deliveries to pipelines.
pub struct Router<R, S> {
    config: Arc<Config>,
    provider: WebhookProvider,
    matchers: Vec<TargetMatcher>,
    runner: Arc<R>,
    publisher: Arc<Publisher<S>>,
    tracker: TaskTracker,
}

impl<R, S> Router<R, S>
where
    R: CommandRunner + 'static,
    S: RemoteStore + 'static,
{
    /// Compiles every target's matcher. Pipelines are spawned on `tracker`
    /// so shutdown can wait for them.
    pub fn new(
        config: Arc<Config>,
        runner: Arc<R>,
        store: Arc<S>,
        tracker: TaskTracker,
    ) -> Result<Self, ConfigError> {
        let provider = config.provider()?;
        let matchers = config
            .builders
            .iter()
            .enumerate()
            .map(|(index, target)| {
                TargetMatcher::new(&config, target).map_err(|e| ConfigError::InvalidBuilder {
                    index,
                    branch: target.branch.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let bucket = config.s3.as_ref().map(|s3| s3.bucket.clone());
        let publisher = Arc::new(Publisher::new(config.home.clone(), bucket, store));

        Ok(Router {
            config,
            provider,
            matchers,
            runner,
            publisher,
            tracker,
        })
    }

    pub fn provider(&self) -> WebhookProvider {
        self.provider
    }

    /// Parses a raw delivery body with the configured provider.
    pub fn parse(&self, raw: &[u8]) -> Option<PushEvent> {
        self.provider.parse_event(raw)
    }

    /// Every target the event matches, in configuration order.
    pub fn match_targets(&self, event: &PushEvent) -> Vec<MatchedTarget> {
        self.matchers
            .iter()
            .enumerate()
            .filter_map(|(index, matcher)| {
                matcher
                    .matches(event)
                    .map(|branch| MatchedTarget { index, branch })
            })
            .collect()
    }

    /// Parses, matches and starts pipelines for a raw delivery.
    pub fn dispatch(&self, raw: &[u8]) -> Dispatch {
        let Some(event) = self.parse(raw) else {
            debug!(provider = %self.provider, "unparseable delivery");
            return Dispatch::rejected();
        };
        let matched = self.match_targets(&event);
        self.dispatch_event(event, matched)
    }

    /// Starts one pipeline per matched target and accepts the delivery.
    pub fn dispatch_event(&self, event: PushEvent, matched: Vec<MatchedTarget>) -> Dispatch {
        if matched.is_empty() {
            debug!(
                repo = %event.repository,
                branch_ref = %event.branch_ref,
                "no targets matched"
            );
        }

        let event = Arc::new(event);
        let mut builds = JoinSet::new();

        for MatchedTarget { index, branch } in matched {
            let Some(target) = self.config.builders.get(index).cloned() else {
                continue;
            };
            let label = format!("{}@{branch}", event.repository.full_name);
            info!(target = %label, "starting build");

            let config = Arc::clone(&self.config);
            let event = Arc::clone(&event);
            let runner = Arc::clone(&self.runner);
            let publisher = Arc::clone(&self.publisher);
            builds.spawn(async move {
                let build = tokio::spawn(async move {
                    run_target(&config, &target, &event, &branch, runner.as_ref(), &publisher)
                        .await
                });
                let result = match build.await {
                    Ok(result) => result.map_err(|e| e.to_string()),
                    Err(join_error) => {
                        error!(target = %label, error = %join_error, "build task panicked");
                        Err(format!("build task failed: {join_error}"))
                    }
                };
                (label, result)
            });
        }

        let completion = self.tracker.spawn(collect(builds));
        Dispatch {
            status: StatusCode::ACCEPTED,
            completion: Some(completion),
        }
    }
}

/// Resolves options and runs the pipeline. The build log reaches the
/// destination only once the pipeline holds the target lock.
async fn run_target<R, S>(
    config: &Config,
    target: &TargetConfig,
    event: &PushEvent,
    branch: &str,
    runner: &R,
    publisher: &Publisher<S>,
) -> Result<(), PipelineError>
where
    R: CommandRunner,
    S: RemoteStore,
{
    let options = BuildOptions::resolve(config, target, event, branch).inspect_err(|e| {
        error!(repo = %event.repository, branch, error = %e, "invalid build options");
    })?;
    let log = BuildLog::in_memory(&options.repo);

    let result = BuildPipeline::new(config, &options, event, runner, publisher, &log)
        .run()
        .await;

    if let Err(e) = log.close() {
        warn!(repo = %options.repo, error = %e, "failed to close build log");
    }
    result
}

/// Waits for every build; never aborts one because another failed.
async fn collect(mut builds: JoinSet<(String, Result<(), String>)>) -> Result<(), DispatchError> {
    let total = builds.len();
    let mut failures = Vec::new();

    while let Some(joined) = builds.join_next().await {
        let failure = match joined {
            Ok((_, Ok(()))) => continue,
            Ok((target, Err(message))) => TargetFailure { target, message },
            Err(join_error) => {
                error!(error = %join_error, "build task cancelled");
                TargetFailure {
                    target: String::new(),
                    message: format!("build task failed: {join_error}"),
                }
            }
        };
        failures.push(failure);
    }

    if failures.is_empty() {
        return Ok(());
    }
    failures.sort_by(|a, b| a.target.cmp(&b.target));
    let err = DispatchError::BuildsFailed { total, failures };
    error!(error = %err, "builds failed");
    Err(err)
}
