//! Billing webhook receiver: `POST /webhooks/billing`.
//!
//! The raw body is handed to the processor untouched; the signature covers
//! the exact bytes the provider sent.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::Serialize;
use tessera_core::webhook::{SIGNATURE_HEADER, WebhookAck};
use tracing::{debug, info};

use crate::error::AppError;
use crate::state::AppState;

/// Acknowledgement returned for every processed or ignored event.
#[derive(Debug, Serialize)]
pub struct ReceivedResponse {
    pub received: bool,
}

/// Verify and apply one delivery.
///
/// 200 for processed or benign events, 400 for forged or malformed ones
/// (never retried), 500 for transient failures (retried by the provider).
pub async fn receive(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ReceivedResponse>, AppError> {
    let signature = headers.get(SIGNATURE_HEADER).and_then(|v| v.to_str().ok());

    match state.webhooks.process(&body, signature).await? {
        WebhookAck::Applied { event_id, outcome } => {
            info!(event_id = %event_id, outcome = ?outcome, "webhook applied");
        }
        WebhookAck::Ignored { event_id, reason } => {
            debug!(event_id = %event_id, reason, "webhook acknowledged without changes");
        }
    }

    Ok(Json(ReceivedResponse { received: true }))
}
