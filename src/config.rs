//! Process configuration, loaded once at startup and shared read-only.
//!
//! The file format is JSON with camelCase keys:
//!
//! ```json
//! {
//!   "home": "/var/pages",
//!   "gitUrlPrefix": "git@github.com:mbland",
//!   "webhookType": "github",
//!   "s3": { "bucket": "mbland-pages" },
//!   "builders": [
//!     { "branch": "pages", "repositoryDir": "pages-repos", "generatedSiteDir": "pages-generated" }
//!   ]
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::paths::validate_path_component;
use crate::webhooks::{MatchError, TargetMatcher, WebhookProvider};

/// Errors from loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("home must be an absolute path: {0}")]
    RelativeHome(PathBuf),

    #[error("unknown webhookType: {0}")]
    UnknownProvider(String),

    #[error("builder {index} ({branch}): {reason}")]
    InvalidBuilder {
        index: usize,
        branch: String,
        reason: String,
    },

    #[error("fileLockPollTime must be greater than zero")]
    ZeroPollInterval,

    #[error("failed to read secret key file {path}: {source}")]
    SecretKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Remote storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct S3Config {
    pub bucket: String,
}

/// One deployment target ("builder" in the config file).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetConfig {
    /// Branch to build. A regular expression, matched against the whole
    /// branch name.
    pub branch: String,

    /// Overrides `branch` for matching; matching branches are published
    /// under `<repo>-<branch>`.
    #[serde(default)]
    pub branch_in_url_pattern: Option<String>,

    /// Directory under `home` holding working copies.
    pub repository_dir: String,

    /// Directory under `home` receiving generated sites.
    pub generated_site_dir: String,

    /// Optional directory under `home` receiving a second, internal build.
    #[serde(default)]
    pub internal_site_dir: Option<String>,

    #[serde(default)]
    pub git_url_prefix: Option<String>,

    #[serde(default)]
    pub pages_config: Option<String>,

    #[serde(default)]
    pub pages_yaml: Option<String>,

    /// Webhook secret used when a delivery matches this target.
    #[serde(default)]
    pub secret_key_file: Option<PathBuf>,
}

impl TargetConfig {
    /// Convenience constructor with only the required fields set.
    pub fn new(
        branch: impl Into<String>,
        repository_dir: impl Into<String>,
        generated_site_dir: impl Into<String>,
    ) -> Self {
        TargetConfig {
            branch: branch.into(),
            branch_in_url_pattern: None,
            repository_dir: repository_dir.into(),
            generated_site_dir: generated_site_dir.into(),
            internal_site_dir: None,
            git_url_prefix: None,
            pages_config: None,
            pages_yaml: None,
            secret_key_file: None,
        }
    }

    /// The pattern used for branch matching.
    pub fn branch_pattern(&self) -> &str {
        self.branch_in_url_pattern.as_deref().unwrap_or(&self.branch)
    }
}

fn default_port() -> u16 {
    5000
}

fn default_git() -> String {
    "git".to_string()
}

fn default_jekyll() -> String {
    "jekyll".to_string()
}

fn default_bundler() -> String {
    "bundle".to_string()
}

fn default_rsync() -> String {
    "rsync".to_string()
}

fn default_aws() -> String {
    "aws".to_string()
}

fn default_rsync_opts() -> Vec<String> {
    ["-vaxp", "--delete", "--ignore-errors"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_payload_limit() -> usize {
    1024 * 1024
}

fn default_pages_config() -> String {
    "_config_pages.yml".to_string()
}

fn default_bundler_cache_dir() -> String {
    "bundler_cache".to_string()
}

fn default_lock_wait_ms() -> u64 {
    30_000
}

fn default_lock_poll_ms() -> u64 {
    1_000
}

fn default_webhook_type() -> String {
    "github".to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_port")]
    pub port: u16,

    /// Root under which every working copy and destination lives.
    pub home: PathBuf,

    #[serde(default = "default_git")]
    pub git: String,

    #[serde(default = "default_jekyll")]
    pub jekyll: String,

    #[serde(default = "default_bundler")]
    pub bundler: String,

    #[serde(default = "default_rsync")]
    pub rsync: String,

    #[serde(default = "default_aws")]
    pub aws: String,

    #[serde(default = "default_rsync_opts")]
    pub rsync_opts: Vec<String>,

    #[serde(default = "default_payload_limit")]
    pub payload_limit: usize,

    /// e.g. `git@github.com:mbland/`; the last component is the parent
    /// organization that webhooks must come from.
    pub git_url_prefix: String,

    #[serde(default = "default_pages_config")]
    pub pages_config: String,

    #[serde(default)]
    pub pages_yaml: Option<String>,

    #[serde(default = "default_bundler_cache_dir")]
    pub bundler_cache_dir: String,

    #[serde(default = "default_lock_wait_ms", rename = "fileLockWaitTime")]
    pub file_lock_wait_ms: u64,

    #[serde(default = "default_lock_poll_ms", rename = "fileLockPollTime")]
    pub file_lock_poll_ms: u64,

    #[serde(default = "default_webhook_type")]
    pub webhook_type: String,

    #[serde(default)]
    pub secret_key_file: Option<PathBuf>,

    #[serde(default)]
    pub s3: Option<S3Config>,

    #[serde(default)]
    pub builders: Vec<TargetConfig>,
}

impl Config {
    /// Minimal configuration with defaults for everything optional.
    pub fn new(home: impl Into<PathBuf>, git_url_prefix: impl Into<String>) -> Self {
        Config {
            port: default_port(),
            home: home.into(),
            git: default_git(),
            jekyll: default_jekyll(),
            bundler: default_bundler(),
            rsync: default_rsync(),
            aws: default_aws(),
            rsync_opts: default_rsync_opts(),
            payload_limit: default_payload_limit(),
            git_url_prefix: git_url_prefix.into(),
            pages_config: default_pages_config(),
            pages_yaml: None,
            bundler_cache_dir: default_bundler_cache_dir(),
            file_lock_wait_ms: default_lock_wait_ms(),
            file_lock_poll_ms: default_lock_poll_ms(),
            webhook_type: default_webhook_type(),
            secret_key_file: None,
            s3: None,
            builders: Vec::new(),
        }
    }

    /// Reads, parses and validates a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_slice(&bytes).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that would otherwise fail per request.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.home.is_absolute() {
            return Err(ConfigError::RelativeHome(self.home.clone()));
        }
        if self.file_lock_poll_ms == 0 {
            return Err(ConfigError::ZeroPollInterval);
        }
        self.provider()?;

        for (index, target) in self.builders.iter().enumerate() {
            let invalid = |reason: String| ConfigError::InvalidBuilder {
                index,
                branch: target.branch.clone(),
                reason,
            };

            let mut dirs = vec![&target.repository_dir, &target.generated_site_dir];
            dirs.extend(target.internal_site_dir.as_ref());
            for dir in dirs {
                validate_path_component(dir).map_err(|e| invalid(e.to_string()))?;
            }

            TargetMatcher::new(self, target).map_err(|e: MatchError| invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// The configured webhook provider.
    pub fn provider(&self) -> Result<WebhookProvider, ConfigError> {
        self.webhook_type
            .parse()
            .map_err(|_| ConfigError::UnknownProvider(self.webhook_type.clone()))
    }

    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.file_lock_wait_ms)
    }

    pub fn lock_poll_interval(&self) -> Duration {
        Duration::from_millis(self.file_lock_poll_ms)
    }

    /// Reads the global webhook secret, if configured.
    pub fn default_secret(&self) -> Result<Option<Vec<u8>>, ConfigError> {
        self.secret_key_file.as_deref().map(read_secret).transpose()
    }
}

/// Reads a secret key file, trimming surrounding whitespace.
pub fn read_secret(path: &Path) -> Result<Vec<u8>, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::SecretKey {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(contents.trim().as_bytes().to_vec())
}
