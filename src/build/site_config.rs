//! Build backend detection and Jekyll configuration handling.

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::log::BUILD_LOG_FILE;
use super::options::BuildOptions;

/// Jekyll's own configuration file; its presence selects the templated backend.
pub const JEKYLL_CONFIG: &str = "_config.yml";

/// Bundler lockfile; its presence gates `bundle install` and `bundle exec`.
pub const GEMFILE_LOCK: &str = "Gemfile.lock";

/// Generated last in `--config`: keeps `build.log` when Jekyll cleans the
/// destination.
pub const BUILD_LOG_CONFIG: &str = "_config_build_log.yml";

#[derive(Debug, Error)]
pub enum SiteConfigError {
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to serialize {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to remove {}: {source}", .path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// How a working copy becomes a site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// `jekyll build`
    Templated,
    /// `rsync` of the working copy as-is.
    Mirror,
}

impl Backend {
    pub fn detect(working_dir: &Path) -> Backend {
        if working_dir.join(JEKYLL_CONFIG).exists() {
            Backend::Templated
        } else {
            Backend::Mirror
        }
    }
}

/// One `jekyll build` run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildConfiguration {
    pub destination: PathBuf,
    /// Config files in precedence order, later overriding earlier.
    pub configurations: Vec<String>,
}

impl BuildConfiguration {
    /// The value passed to `jekyll build --config`.
    pub fn config_arg(&self) -> String {
        self.configurations.join(",")
    }
}

#[derive(Serialize)]
struct GeneratedConfig {
    baseurl: String,
}

/// The one setting read back from the repository's own config files.
#[derive(Debug, Default, Serialize, Deserialize)]
struct KeepFilesConfig {
    #[serde(default)]
    keep_files: Option<Vec<String>>,
}

/// Jekyll's own `keep_files` default.
fn default_keep_files() -> Vec<String> {
    vec![".git".to_string(), ".svn".to_string()]
}

fn read_keep_files(path: &Path) -> Option<Vec<String>> {
    let contents = std::fs::read_to_string(path).ok()?;
    let config: KeepFilesConfig = serde_yaml::from_str(&contents).ok()?;
    config.keep_files
}

fn write_yaml<T: Serialize>(path: &Path, value: &T) -> Result<(), SiteConfigError> {
    let yaml = serde_yaml::to_string(value).map_err(|source| SiteConfigError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, yaml).map_err(|source| SiteConfigError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Backend state for one pipeline run.
#[derive(Debug)]
pub struct SiteConfig<'a> {
    options: &'a BuildOptions,
    backend: Backend,
    uses_bundler: bool,
    /// Files this run wrote into the working copy.
    generated: Vec<PathBuf>,
    keeps_build_log: bool,
}

impl<'a> SiteConfig<'a> {
    pub fn new(options: &'a BuildOptions, backend: Backend) -> Self {
        SiteConfig {
            options,
            backend,
            uses_bundler: false,
            generated: Vec::new(),
            keeps_build_log: false,
        }
    }

    pub fn backend(&self) -> Backend {
        self.backend
    }

    pub fn uses_bundler(&self) -> bool {
        self.uses_bundler
    }

    /// Inspects the working copy. Does nothing for [`Backend::Mirror`].
    pub fn init(&mut self) {
        if self.backend == Backend::Templated {
            self.uses_bundler = self.options.working_dir.join(GEMFILE_LOCK).exists();
        }
    }

    /// Writes `<working_dir>/<pages_config>` with the site's `baseurl` unless
    /// the repository commits that file itself, then writes
    /// [`BUILD_LOG_CONFIG`] so `jekyll build` leaves the build log in the
    /// destination.
    pub fn read_or_write_config(&mut self) -> Result<(), SiteConfigError> {
        let path = self.options.working_dir.join(&self.options.pages_config);
        if path.exists() {
            debug!(path = %path.display(), "using committed pages config");
        } else {
            let generated = GeneratedConfig {
                baseurl: format!("/{}", self.options.site_name),
            };
            write_yaml(&path, &generated)?;
            debug!(path = %path.display(), "generated pages config");
            self.generated.push(path);
        }

        self.write_keep_files_config()
    }

    /// `keep_files` as the repository's configs leave it, plus the build log.
    fn write_keep_files_config(&mut self) -> Result<(), SiteConfigError> {
        let path = self.options.working_dir.join(BUILD_LOG_CONFIG);
        if path.exists() {
            warn!(path = %path.display(), "repository commits its own build log config");
            return Ok(());
        }

        let working_dir = &self.options.working_dir;
        let mut keep_files = self
            .repository_configurations()
            .iter()
            .filter_map(|name| read_keep_files(&working_dir.join(name)))
            .next_back()
            .unwrap_or_else(default_keep_files);
        if !keep_files.iter().any(|f| f == BUILD_LOG_FILE) {
            keep_files.push(BUILD_LOG_FILE.to_string());
        }

        write_yaml(
            &path,
            &KeepFilesConfig {
                keep_files: Some(keep_files),
            },
        )?;
        self.generated.push(path);
        self.keeps_build_log = true;
        Ok(())
    }

    /// The repository's config files in precedence order.
    fn repository_configurations(&self) -> Vec<String> {
        let mut configurations = vec![
            JEKYLL_CONFIG.to_string(),
            self.options.pages_config.clone(),
        ];
        if let Some(yaml) = &self.options.pages_yaml
            && self.options.working_dir.join(yaml).exists()
        {
            configurations.push(yaml.clone());
        }
        configurations
    }

    /// One configuration per destination: the public one, plus the internal
    /// one when configured. Empty for [`Backend::Mirror`].
    pub fn build_configurations(&self) -> Vec<BuildConfiguration> {
        if self.backend == Backend::Mirror {
            return Vec::new();
        }

        let mut configurations = self.repository_configurations();
        if self.keeps_build_log {
            configurations.push(BUILD_LOG_CONFIG.to_string());
        }

        std::iter::once(&self.options.destination)
            .chain(self.options.internal_destination.as_ref())
            .map(|destination| BuildConfiguration {
                destination: destination.clone(),
                configurations: configurations.clone(),
            })
            .collect()
    }

    /// Deletes every file this run generated. Committed files are never
    /// touched, and a second call is a no-op.
    pub fn remove_generated_config(&mut self) -> Result<(), SiteConfigError> {
        self.keeps_build_log = false;
        for path in std::mem::take(&mut self.generated) {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => return Err(SiteConfigError::Remove { path, source }),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, TargetConfig};
    use crate::test_utils::push_event;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _home: TempDir,
        options: BuildOptions,
    }

    fn fixture(configure: impl FnOnce(&mut TargetConfig)) -> Fixture {
        let home = tempdir().unwrap();
        let config = Config::new(home.path(), "git@github.com:mbland/");
        let mut target = TargetConfig::new("pages", "repo_dir", "dest_dir");
        configure(&mut target);
        let event = push_event("mbland", "foo", "refs/heads/pages");
        let options = BuildOptions::resolve(&config, &target, &event, "pages").unwrap();
        std::fs::create_dir_all(&options.working_dir).unwrap();
        Fixture {
            _home: home,
            options,
        }
    }

    fn write(options: &BuildOptions, name: &str, contents: &str) {
        std::fs::write(options.working_dir.join(name), contents).unwrap();
    }

    #[test]
    fn detects_backend_from_jekyll_config() {
        let f = fixture(|_| {});
        assert_eq!(Backend::detect(&f.options.working_dir), Backend::Mirror);
        write(&f.options, JEKYLL_CONFIG, "name: foo\n");
        assert_eq!(Backend::detect(&f.options.working_dir), Backend::Templated);
    }

    #[test]
    fn init_detects_bundler() {
        let f = fixture(|_| {});
        let mut site = SiteConfig::new(&f.options, Backend::Templated);
        site.init();
        assert!(!site.uses_bundler());

        write(&f.options, GEMFILE_LOCK, "GEM\n");
        let mut site = SiteConfig::new(&f.options, Backend::Templated);
        site.init();
        assert!(site.uses_bundler());
    }

    #[test]
    fn init_is_a_no_op_for_mirror() {
        let f = fixture(|_| {});
        write(&f.options, GEMFILE_LOCK, "GEM\n");
        let mut site = SiteConfig::new(&f.options, Backend::Mirror);
        site.init();
        assert!(!site.uses_bundler());
        assert!(site.build_configurations().is_empty());
    }

    #[test]
    fn writes_baseurl_config_when_not_committed() {
        let f = fixture(|_| {});
        let mut site = SiteConfig::new(&f.options, Backend::Templated);
        site.read_or_write_config().unwrap();

        let path = f.options.working_dir.join("_config_pages.yml");
        let keep = f.options.working_dir.join(BUILD_LOG_CONFIG);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "baseurl: /foo\n");
        assert!(keep.exists());

        site.remove_generated_config().unwrap();
        assert!(!path.exists());
        assert!(!keep.exists());
        site.remove_generated_config().unwrap();
    }

    #[test]
    fn branch_in_url_baseurl_includes_branch() {
        let home = tempdir().unwrap();
        let config = Config::new(home.path(), "git@github.com:mbland/");
        let mut target = TargetConfig::new("pages", "repo_dir", "dest_dir");
        target.branch_in_url_pattern = Some(r"v[0-9]+\.[0-9]+\.[0-9]+".to_string());
        let event = push_event("mbland", "foo", "refs/heads/v3.6.9");
        let options = BuildOptions::resolve(&config, &target, &event, "v3.6.9").unwrap();
        std::fs::create_dir_all(&options.working_dir).unwrap();

        let mut site = SiteConfig::new(&options, Backend::Templated);
        site.read_or_write_config().unwrap();
        let written = std::fs::read_to_string(options.working_dir.join("_config_pages.yml")).unwrap();
        assert_eq!(written, "baseurl: /foo-v3.6.9\n");
    }

    #[test]
    fn committed_config_is_used_and_never_removed() {
        let f = fixture(|_| {});
        write(&f.options, "_config_pages.yml", "baseurl: /custom\n");

        let mut site = SiteConfig::new(&f.options, Backend::Templated);
        site.read_or_write_config().unwrap();
        site.remove_generated_config().unwrap();

        let path = f.options.working_dir.join("_config_pages.yml");
        assert_eq!(std::fs::read_to_string(path).unwrap(), "baseurl: /custom\n");
        assert!(!f.options.working_dir.join(BUILD_LOG_CONFIG).exists());
    }

    fn written_keep_files(options: &BuildOptions) -> Vec<String> {
        read_keep_files(&options.working_dir.join(BUILD_LOG_CONFIG)).unwrap()
    }

    #[test]
    fn keep_files_defaults_plus_build_log() {
        let f = fixture(|_| {});
        let mut site = SiteConfig::new(&f.options, Backend::Templated);
        site.read_or_write_config().unwrap();

        assert_eq!(written_keep_files(&f.options), vec![".git", ".svn", "build.log"]);
    }

    #[test]
    fn keep_files_from_the_last_config_that_sets_it() {
        let f = fixture(|t| t.pages_yaml = Some(".mbland-pages.yml".to_string()));
        write(&f.options, JEKYLL_CONFIG, "keep_files: [assets]\n");
        write(&f.options, ".mbland-pages.yml", "keep_files:\n  - feeds\n  - build.log\n");
        let mut site = SiteConfig::new(&f.options, Backend::Templated);
        site.read_or_write_config().unwrap();

        assert_eq!(written_keep_files(&f.options), vec!["feeds", "build.log"]);
    }

    #[test]
    fn unreadable_keep_files_falls_back_to_earlier_configs() {
        let f = fixture(|t| t.pages_yaml = Some(".mbland-pages.yml".to_string()));
        write(&f.options, JEKYLL_CONFIG, "keep_files: [assets]\ntitle: foo\n");
        write(&f.options, ".mbland-pages.yml", "keep_files: not-a-list\n");
        let mut site = SiteConfig::new(&f.options, Backend::Templated);
        site.read_or_write_config().unwrap();

        assert_eq!(written_keep_files(&f.options), vec!["assets", "build.log"]);
    }

    #[test]
    fn build_log_config_comes_last() {
        let f = fixture(|t| t.pages_yaml = Some(".mbland-pages.yml".to_string()));
        write(&f.options, ".mbland-pages.yml", "title: foo\n");
        let mut site = SiteConfig::new(&f.options, Backend::Templated);
        site.read_or_write_config().unwrap();

        assert_eq!(
            site.build_configurations()[0].config_arg(),
            "_config.yml,_config_pages.yml,.mbland-pages.yml,_config_build_log.yml"
        );

        site.remove_generated_config().unwrap();
        assert_eq!(
            site.build_configurations()[0].config_arg(),
            "_config.yml,_config_pages.yml,.mbland-pages.yml"
        );
    }

    #[test]
    fn committed_build_log_config_is_left_alone() {
        let f = fixture(|_| {});
        write(&f.options, BUILD_LOG_CONFIG, "keep_files: [mine]\n");
        let mut site = SiteConfig::new(&f.options, Backend::Templated);
        site.read_or_write_config().unwrap();
        site.remove_generated_config().unwrap();

        assert_eq!(written_keep_files(&f.options), vec!["mine"]);
        assert_eq!(
            site.build_configurations()[0].config_arg(),
            "_config.yml,_config_pages.yml"
        );
    }

    #[test]
    fn build_configurations_in_precedence_order() {
        let f = fixture(|t| t.pages_yaml = Some(".mbland-pages.yml".to_string()));
        let site = SiteConfig::new(&f.options, Backend::Templated);

        let configs = site.build_configurations();
        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].destination, f.options.destination);
        assert_eq!(configs[0].config_arg(), "_config.yml,_config_pages.yml");

        write(&f.options, ".mbland-pages.yml", "title: foo\n");
        let configs = site.build_configurations();
        assert_eq!(
            configs[0].config_arg(),
            "_config.yml,_config_pages.yml,.mbland-pages.yml"
        );
    }

    #[test]
    fn internal_destination_gets_its_own_configuration() {
        let f = fixture(|t| t.internal_site_dir = Some("internal_dir".to_string()));
        let site = SiteConfig::new(&f.options, Backend::Templated);

        let configs = site.build_configurations();
        let destinations: Vec<_> = configs.iter().map(|c| c.destination.clone()).collect();
        assert_eq!(
            destinations,
            vec![
                f.options.destination.clone(),
                f.options.internal_destination.clone().unwrap()
            ]
        );
        assert_eq!(configs[0].configurations, configs[1].configurations);
    }
}
