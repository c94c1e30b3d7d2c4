//! HTTP server for the pages builder.
//!
//! # Endpoints
//!
//! - `POST /` and `POST /webhook` - Accept push deliveries (returns 202 Accepted)
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;

pub mod webhook;

pub use webhook::webhook_handler;

use crate::command::CommandRunner;
use crate::dispatch::Router;
use crate::publish::RemoteStore;
use crate::webhooks::WebhookSecrets;

/// Shared application state, passed to handlers via Axum's `State` extractor.
pub struct AppState<R, S> {
    inner: Arc<AppStateInner<R, S>>,
}

struct AppStateInner<R, S> {
    router: Router<R, S>,
    secrets: WebhookSecrets,
}

// Derived Clone would require R: Clone and S: Clone.
impl<R, S> Clone for AppState<R, S> {
    fn clone(&self) -> Self {
        AppState {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<R, S> AppState<R, S> {
    pub fn new(router: Router<R, S>, secrets: WebhookSecrets) -> Self {
        AppState {
            inner: Arc::new(AppStateInner { router, secrets }),
        }
    }

    pub fn router(&self) -> &Router<R, S> {
        &self.inner.router
    }

    pub fn secrets(&self) -> &WebhookSecrets {
        &self.inner.secrets
    }
}

/// Liveness check.
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Builds the axum Router with all endpoints. Bodies over `payload_limit`
/// bytes are refused with 413.
pub fn build_router<R, S>(app_state: AppState<R, S>, payload_limit: usize) -> axum::Router
where
    R: CommandRunner + 'static,
    S: RemoteStore + 'static,
{
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/", post(webhook_handler::<R, S>))
        .route("/webhook", post(webhook_handler::<R, S>))
        .route("/health", get(health_handler))
        .layer(DefaultBodyLimit::max(payload_limit))
        .with_state(app_state)
}
