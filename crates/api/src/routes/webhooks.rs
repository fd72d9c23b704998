//! Inbound checkout-platform webhooks

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use planautomator_engine::{IngestOutcome, OwnerId, Platform, RawPayload};
use serde::Serialize;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    #[serde(flatten)]
    pub outcome: IngestOutcome,
    /// Forwarding to the owner's endpoint was started in the background
    pub delivery_scheduled: bool,
}

/// Receive a platform notification.
///
/// Recorded events answer 202 and are forwarded asynchronously when an
/// endpoint is configured; replays answer 200 without side effects.
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path((owner_id, platform)): Path<(OwnerId, String)>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<WebhookResponse>)> {
    let platform: Platform = platform.parse().map_err(ApiError::Validation)?;
    let body: serde_json::Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::Validation(format!("Body is not valid JSON: {}", e)))?;

    let outcome = state
        .automator
        .ingest(owner_id, RawPayload::new(platform, body))
        .await?;

    match outcome {
        IngestOutcome::Recorded { ref event, .. } => {
            let delivery_scheduled = state.automator.endpoint(owner_id).await.is_some();
            if delivery_scheduled {
                state.automator.spawn_delivery(owner_id, event.id);
            } else {
                tracing::warn!(
                    owner_id = %owner_id,
                    event_id = %event.id,
                    "No delivery endpoint configured - event recorded only"
                );
            }
            Ok((
                StatusCode::ACCEPTED,
                Json(WebhookResponse {
                    outcome,
                    delivery_scheduled,
                }),
            ))
        }
        IngestOutcome::Duplicate { .. } => Ok((
            StatusCode::OK,
            Json(WebhookResponse {
                outcome,
                delivery_scheduled: false,
            }),
        )),
    }
}
