use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tokio_util::task::TaskTracker;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pages_builder::command::ProcessRunner;
use pages_builder::config::{Config, read_secret};
use pages_builder::dispatch::Router;
use pages_builder::publish::AwsCliStore;
use pages_builder::server::{AppState, build_router};
use pages_builder::webhooks::WebhookSecrets;

const DEFAULT_CONFIG_PATH: &str = "pages-config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pages_builder=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = config_path();
    let config = Arc::new(
        Config::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?,
    );
    let secrets = load_secrets(&config)?;

    let runner = Arc::new(ProcessRunner);
    let store = Arc::new(AwsCliStore::new(config.aws.clone(), Arc::clone(&runner)));
    let tracker = TaskTracker::new();
    let router = Router::new(Arc::clone(&config), runner, store, tracker.clone())
        .context("invalid builder configuration")?;
    let app = build_router(AppState::new(router, secrets), config.payload_limit);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding port {}", config.port))?;

    tracing::info!("{} v{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "{} pages: listening on port {}",
        config.git_url_prefix,
        config.port
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("waiting for running builds to finish");
    tracker.close();
    tracker.wait().await;
    Ok(())
}

/// First CLI argument, then `PAGES_CONFIG`, then the default file name.
fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("PAGES_CONFIG"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

fn load_secrets(config: &Config) -> anyhow::Result<WebhookSecrets> {
    let default = config.default_secret()?;
    let per_target = config
        .builders
        .iter()
        .map(|target| target.secret_key_file.as_deref().map(read_secret).transpose())
        .collect::<Result<Vec<_>, _>>()?;

    let secrets = WebhookSecrets::new(default, per_target);
    if secrets.is_disabled() {
        tracing::warn!("no secret key configured; webhook signatures are not checked");
    }
    Ok(secrets)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
