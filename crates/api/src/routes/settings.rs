//! Owner settings: plan mappings and the delivery endpoint

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use planautomator_engine::{EndpointConfig, OwnerId, PlanMapping, UpsertOutcome};
use serde::{Deserialize, Serialize};

use crate::{
    error::{ApiError, ApiResult},
    state::AppState,
};

// =============================================================================
// Plan mappings
// =============================================================================

pub async fn list_mappings(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> Json<Vec<PlanMapping>> {
    Json(state.automator.mappings(owner_id).await)
}

#[derive(Debug, Serialize)]
pub struct UpsertMappingResponse {
    pub mapping: PlanMapping,
    /// Mapping previously stored under the same product id
    pub replaced: Option<PlanMapping>,
}

pub async fn upsert_mapping(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
    Json(mapping): Json<PlanMapping>,
) -> ApiResult<Json<UpsertMappingResponse>> {
    let product_id = mapping.checkout_product_id.trim().to_string();
    let outcome = state.automator.upsert_mapping(owner_id, mapping).await?;

    let mapping = state
        .automator
        .mappings(owner_id)
        .await
        .into_iter()
        .find(|m| m.checkout_product_id == product_id)
        .ok_or_else(|| ApiError::NotFound(format!("mapping {}", product_id)))?;

    Ok(Json(UpsertMappingResponse {
        mapping,
        replaced: match outcome {
            UpsertOutcome::Inserted => None,
            UpsertOutcome::Replaced(previous) => Some(previous),
        },
    }))
}

pub async fn delete_mapping(
    State(state): State<AppState>,
    Path((owner_id, product_id)): Path<(OwnerId, String)>,
) -> ApiResult<StatusCode> {
    state
        .automator
        .remove_mapping(owner_id, &product_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("No mapping for product '{}'", product_id)))?;
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Delivery endpoint
// =============================================================================

#[derive(Debug, Serialize)]
pub struct EndpointResponse {
    pub url: String,
    /// Only the last characters of the key are ever returned
    pub api_key: Option<String>,
}

impl From<EndpointConfig> for EndpointResponse {
    fn from(endpoint: EndpointConfig) -> Self {
        Self {
            api_key: endpoint.masked_api_key(),
            url: endpoint.url,
        }
    }
}

pub async fn get_endpoint(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
) -> ApiResult<Json<EndpointResponse>> {
    state
        .automator
        .endpoint(owner_id)
        .await
        .map(|endpoint| Json(endpoint.into()))
        .ok_or_else(|| ApiError::NotFound("No delivery endpoint configured".to_string()))
}

#[derive(Debug, Deserialize)]
pub struct UpdateEndpointRequest {
    pub url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

pub async fn put_endpoint(
    State(state): State<AppState>,
    Path(owner_id): Path<OwnerId>,
    Json(req): Json<UpdateEndpointRequest>,
) -> ApiResult<Json<EndpointResponse>> {
    let endpoint = EndpointConfig::new(req.url.trim(), req.api_key);
    state
        .automator
        .set_endpoint(owner_id, endpoint.clone())
        .await?;
    Ok(Json(endpoint.into()))
}
