//! Webhook endpoint handler.
//!
//! Parses the delivery with the configured provider, verifies its signature
//! against the key of the targets it matches, and hands it to the dispatch
//! router. The response never waits for a build.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::command::CommandRunner;
use crate::publish::RemoteStore;

/// Header carrying the `sha256=<hex>` payload signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Not a push event this provider understands.
    #[error("invalid push payload")]
    InvalidPayload,

    #[error("invalid signature")]
    InvalidSignature,
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::InvalidPayload => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
        };
        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Response
///
/// - 202 Accepted: parsed; a pipeline was started for each matching target
///   (possibly none)
/// - 400 Bad Request: not a usable push payload
/// - 401 Unauthorized: signature missing or wrong while a key applies
/// - 413 Payload Too Large: body over `payloadLimit`
pub async fn webhook_handler<R, S>(
    State(app_state): State<AppState<R, S>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError>
where
    R: CommandRunner + 'static,
    S: RemoteStore + 'static,
{
    let router = app_state.router();

    let Some(event) = router.parse(&body) else {
        debug!(provider = %router.provider(), "rejecting unparseable delivery");
        return Err(WebhookError::InvalidPayload);
    };

    let matched = router.match_targets(&event);
    let indices: Vec<usize> = matched.iter().map(|m| m.index).collect();
    let signature = get_header(&headers, HEADER_SIGNATURE);
    if !app_state.secrets().verify(&body, signature, &indices) {
        warn!(repo = %event.repository, "invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    info!(
        repo = %event.repository,
        branch_ref = %event.branch_ref,
        targets = matched.len(),
        "webhook accepted"
    );
    let dispatch = router.dispatch_event(event, matched);
    Ok((dispatch.status, "Accepted"))
}

/// Extracts a header value as a string, if present and valid UTF-8.
fn get_header<'h>(headers: &'h HeaderMap, name: &'static str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}
