//! Read-side dashboard routes: customers, deliveries and statistics

use axum::{
    extract::{Path, State},
    Json,
};
use planautomator_engine::{
    AccessSummary, ChurnSummary, CustomerAccessState, DeliveryOutcome, DeliveryStats,
    InvariantCheckSummary, OwnerId, TimelineBucket,
};
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

pub async fn list_customers(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> Json<Vec<CustomerAccessState>> {
    Json(
        state
            .automator
            .reconcile(owner_id, OffsetDateTime::now_utc())
            .await,
    )
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path((owner_id, email)): Path<(OwnerId, String)>,
) -> ApiResult<Json<CustomerAccessState>> {
    state
        .automator
        .customer_state(owner_id, &email, OffsetDateTime::now_utc())
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No events for customer '{}'", email)))
}

pub async fn list_deliveries(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> Json<Vec<DeliveryOutcome>> {
    Json(state.automator.deliveries(owner_id).await)
}

#[derive(Debug, Serialize)]
pub struct TroubleshootResponse {
    pub delivery_id: Uuid,
    /// Markdown
    pub advice: String,
}

pub async fn troubleshoot_delivery(
    State(state): State<AppState>,
    Path((owner_id, delivery_id)): Path<(OwnerId, Uuid)>,
) -> ApiResult<Json<TroubleshootResponse>> {
    let advice = state.automator.troubleshoot(owner_id, delivery_id).await?;
    Ok(Json(TroubleshootResponse {
        delivery_id,
        advice,
    }))
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub access: AccessSummary,
    pub churn: ChurnSummary,
    pub deliveries: DeliveryStats,
    pub timeline: Vec<TimelineBucket>,
}

pub async fn get_stats(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> Json<StatsResponse> {
    let now = OffsetDateTime::now_utc();
    let automator = &state.automator;

    Json(StatsResponse {
        access: automator.access_summary(owner_id, now).await,
        churn: automator.churn_summary(owner_id, now).await,
        deliveries: automator.delivery_stats(owner_id).await,
        timeline: automator.delivery_timeline(owner_id).await,
    })
}

pub async fn check_invariants(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> Json<InvariantCheckSummary> {
    Json(
        state
            .automator
            .check_invariants(owner_id, OffsetDateTime::now_utc())
            .await,
    )
}
