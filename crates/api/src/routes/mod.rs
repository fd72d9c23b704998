//! HTTP routes
//!
//! Everything an owner touches is scoped under `/v1/owners/{owner_id}`.

pub mod dashboard;
pub mod events;
pub mod settings;
pub mod webhooks;

use axum::{
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/v1/owners/{owner_id}/webhook/{platform}",
            post(webhooks::receive_webhook),
        )
        .route(
            "/v1/owners/{owner_id}/mappings",
            get(settings::list_mappings).put(settings::upsert_mapping),
        )
        .route(
            "/v1/owners/{owner_id}/mappings/{product_id}",
            delete(settings::delete_mapping),
        )
        .route(
            "/v1/owners/{owner_id}/endpoint",
            get(settings::get_endpoint).put(settings::put_endpoint),
        )
        .route("/v1/owners/{owner_id}/test/{event}", post(events::trigger_test))
        .route(
            "/v1/owners/{owner_id}/events",
            get(events::list_events).delete(events::clear_events),
        )
        .route(
            "/v1/owners/{owner_id}/events/{event_id}/deliver",
            post(events::redeliver_event),
        )
        .route(
            "/v1/owners/{owner_id}/deliveries",
            get(dashboard::list_deliveries),
        )
        .route(
            "/v1/owners/{owner_id}/deliveries/{delivery_id}/troubleshoot",
            get(dashboard::troubleshoot_delivery),
        )
        .route(
            "/v1/owners/{owner_id}/customers",
            get(dashboard::list_customers),
        )
        .route(
            "/v1/owners/{owner_id}/customers/{email}",
            get(dashboard::get_customer),
        )
        .route("/v1/owners/{owner_id}/stats", get(dashboard::get_stats))
        .route(
            "/v1/owners/{owner_id}/invariants",
            get(dashboard::check_invariants),
        )
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
