//! Per-build paths and settings.
//!
//! [`BuildOptions`] merges the global [`Config`], one [`TargetConfig`] and a
//! [`PushEvent`] into the concrete values a single pipeline run needs. Every
//! path is checked to be a strict subdirectory of the home root before any
//! stage touches it.

use std::path::PathBuf;

use crate::config::{Config, TargetConfig};
use crate::paths::{PathError, join_component, relative_to_home, validate_path_component};
use crate::types::PushEvent;

/// Everything one pipeline run needs to know about where things live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    /// Repository name as reported by the push event, e.g. `foo`.
    pub repo: String,
    /// `<repo>`, or `<repo>-<branch>` for branch-in-URL targets.
    pub site_name: String,
    pub branch: String,
    pub home: PathBuf,
    /// `<home>/<repository_dir>`
    pub repository_dir: PathBuf,
    /// `<home>/<repository_dir>/<site_name>`
    pub working_dir: PathBuf,
    /// `<home>/<generated_site_dir>/<site_name>`
    pub destination: PathBuf,
    /// `<home>/<internal_site_dir>/<site_name>`
    pub internal_destination: Option<PathBuf>,
    pub clone_url: String,
    pub pages_config: String,
    pub pages_yaml: Option<String>,
    /// `<home>/<repository_dir>/<site_name>.lock`
    pub lock_marker: PathBuf,
    /// `<home>/<bundler_cache_dir>`
    pub bundler_cache: PathBuf,
}

impl BuildOptions {
    /// Resolves options for `event` matched to `target` on `branch`.
    ///
    /// Fails if the repository name or any configured name is not a single
    /// safe path component.
    pub fn resolve(
        config: &Config,
        target: &TargetConfig,
        event: &PushEvent,
        branch: &str,
    ) -> Result<Self, PathError> {
        let home = config.home.clone();
        let repo = event.repository.name.clone();
        validate_path_component(&repo)?;

        let site_name = if target.branch_in_url_pattern.is_some() {
            format!("{repo}-{branch}")
        } else {
            repo.clone()
        };

        let repository_dir = join_component(&home, &target.repository_dir)?;
        let working_dir = join_component(&repository_dir, &site_name)?;
        let lock_marker = join_component(&repository_dir, &format!("{site_name}.lock"))?;
        let destination =
            join_component(&join_component(&home, &target.generated_site_dir)?, &site_name)?;
        let internal_destination = target
            .internal_site_dir
            .as_deref()
            .map(|dir| join_component(&join_component(&home, dir)?, &site_name))
            .transpose()?;
        let bundler_cache = join_component(&home, &config.bundler_cache_dir)?;

        let pages_config = target
            .pages_config
            .clone()
            .unwrap_or_else(|| config.pages_config.clone());
        validate_path_component(&pages_config)?;
        let pages_yaml = target.pages_yaml.clone().or_else(|| config.pages_yaml.clone());
        if let Some(yaml) = &pages_yaml {
            validate_path_component(yaml)?;
        }

        let mut paths = vec![&repository_dir, &working_dir, &lock_marker, &destination];
        paths.extend(internal_destination.as_ref());
        for path in paths {
            relative_to_home(&home, path)?;
        }

        let prefix = target
            .git_url_prefix
            .as_deref()
            .unwrap_or(&config.git_url_prefix);

        Ok(BuildOptions {
            clone_url: clone_url(prefix, &repo),
            repo,
            site_name,
            branch: branch.to_string(),
            home,
            repository_dir,
            working_dir,
            destination,
            internal_destination,
            pages_config,
            pages_yaml,
            lock_marker,
            bundler_cache,
        })
    }
}

/// `<prefix><repo>.git`, adding a `/` unless the prefix already ends in
/// `/` or `:`.
fn clone_url(prefix: &str, repo: &str) -> String {
    if prefix.ends_with('/') || prefix.ends_with(':') {
        format!("{prefix}{repo}.git")
    } else {
        format!("{prefix}/{repo}.git")
    }
}
