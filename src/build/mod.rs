//! Site builds: per-build options, backend configuration, the build log and
//! the staged pipeline that ties them together.

pub mod log;
pub mod options;
pub mod pipeline;
pub mod site_config;

pub use log::{BUILD_LOG_FILE, BuildLog, LogLevel, LogLine};
pub use options::BuildOptions;
pub use pipeline::{BuildPipeline, PipelineError, PipelineState, Stage};
pub use site_config::{Backend, BuildConfiguration, SiteConfig, SiteConfigError};
