//! Pages Builder - rebuilds and publishes static sites when branches are pushed.
//!
//! A push webhook is matched against the configured targets; each match syncs a
//! working copy, builds it with jekyll (or mirrors it with rsync) and publishes
//! the result to S3.

pub mod build;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod git;
pub mod lock;
pub mod paths;
pub mod publish;
pub mod server;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
