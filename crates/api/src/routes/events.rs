//! Event log, test triggers and manual redelivery

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use planautomator_engine::{DeliveryOutcome, EventType, LifecycleEvent, OwnerId};
use serde::Serialize;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub async fn list_events(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> Json<Vec<LifecycleEvent>> {
    Json(state.automator.events(owner_id).await)
}

#[derive(Debug, Serialize)]
pub struct ClearLogResponse {
    pub removed: usize,
}

pub async fn clear_events(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> ApiResult<Json<ClearLogResponse>> {
    let removed = state.automator.clear_log(owner_id).await?;
    Ok(Json(ClearLogResponse { removed }))
}

#[derive(Debug, Serialize)]
pub struct RedeliverResponse {
    pub event_id: Uuid,
    pub status: &'static str,
}

/// Start a new delivery attempt for a stored event
pub async fn redeliver_event(
    State(state): State<AppState>,
    Path((owner_id, event_id)): Path<(OwnerId, Uuid)>,
) -> ApiResult<(StatusCode, Json<RedeliverResponse>)> {
    state.automator.redeliver(owner_id, event_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(RedeliverResponse {
            event_id,
            status: "scheduled",
        }),
    ))
}

#[derive(Debug, Serialize)]
pub struct TestTriggerResponse {
    pub event: LifecycleEvent,
    pub delivery: DeliveryOutcome,
}

/// Send a synthetic `approved`, `canceled` or `expired` event to the endpoint
pub async fn trigger_test(
    State(state): State<AppState>,
    Path((owner_id, event)): Path<(OwnerId, String)>,
) -> ApiResult<Json<TestTriggerResponse>> {
    let event_type: EventType = event.parse().map_err(ApiError::Validation)?;
    let (event, delivery) = state.automator.trigger_test(owner_id, event_type).await?;
    Ok(Json(TestTriggerResponse { event, delivery }))
}
