//! Publishing finished sites to remote storage.
//!
//! A build destination `<home>/<dir>/<site>` is mirrored to
//! `s3://<bucket>/<dir>/<site>`: the key prefix is the destination's path
//! relative to the home root, and remote objects with no local counterpart
//! are deleted.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::build::log::BuildLog;
use crate::command::{CommandError, CommandRunner, Invocation, path_arg};
use crate::paths::{relative_to_home, to_key};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(
        "invalid build destination {}; should be a subdirectory of {}",
        .dir.display(),
        .home.display()
    )]
    InvalidDestination { dir: PathBuf, home: PathBuf },

    #[error("s3 sync failed for s3://{bucket}/{prefix}: {source}")]
    Transfer {
        bucket: String,
        prefix: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Transfers a local directory to a bucket with mirror semantics.
pub trait RemoteStore: Send + Sync {
    /// The error type returned by this store.
    type Error: std::error::Error + Send + Sync + 'static;

    fn sync(
        &self,
        source: &Path,
        bucket: &str,
        prefix: &str,
        log: &BuildLog,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send;
}

/// Uploads with `aws s3 sync <dir> s3://<bucket>/<prefix> --delete`.
pub struct AwsCliStore<R> {
    aws: String,
    runner: Arc<R>,
}

impl<R> AwsCliStore<R> {
    pub fn new(aws: impl Into<String>, runner: Arc<R>) -> Self {
        AwsCliStore {
            aws: aws.into(),
            runner,
        }
    }
}

impl<R: CommandRunner> RemoteStore for AwsCliStore<R> {
    type Error = CommandError;

    async fn sync(
        &self,
        source: &Path,
        bucket: &str,
        prefix: &str,
        log: &BuildLog,
    ) -> Result<(), CommandError> {
        let url = format!("s3://{bucket}/{prefix}");
        let invocation = Invocation::new(&self.aws, source, format!("failed to sync to {url}"))
            .args(["s3", "sync"])
            .arg(path_arg(source))
            .arg(url)
            .arg("--delete");
        self.runner.run(&invocation, log).await
    }
}

/// Publishes build destinations under the home root.
pub struct Publisher<S> {
    home: PathBuf,
    bucket: Option<String>,
    store: Arc<S>,
}

impl<S: RemoteStore> Publisher<S> {
    /// With no bucket, [`Publisher::publish`] only validates.
    pub fn new(home: impl Into<PathBuf>, bucket: Option<String>, store: Arc<S>) -> Self {
        Publisher {
            home: home.into(),
            bucket,
            store,
        }
    }

    /// Mirrors `source_dir` to the bucket under its home-relative key.
    ///
    /// A directory outside the home root is rejected before anything is
    /// logged or transferred.
    pub async fn publish(&self, source_dir: &Path, log: &BuildLog) -> Result<(), PublishError> {
        let rel = relative_to_home(&self.home, source_dir).map_err(|_| {
            PublishError::InvalidDestination {
                dir: source_dir.to_path_buf(),
                home: self.home.clone(),
            }
        })?;

        let Some(bucket) = self.bucket.as_deref() else {
            debug!(dir = %source_dir.display(), "no bucket configured; skipping publish");
            return Ok(());
        };

        let prefix = to_key(&rel);
        log.info(format!("syncing to s3://{bucket}/{prefix}"));
        self.store
            .sync(source_dir, bucket, &prefix, log)
            .await
            .map_err(|e| PublishError::Transfer {
                bucket: bucket.to_string(),
                prefix,
                source: Box::new(e),
            })
    }
}
