//! Kiwify webhook payloads
//!
//! Kiwify capitalizes its nested objects (`Customer`, `Product`,
//! `Subscription`) and names the event in `webhook_event_type`, falling back
//! to `order_status` on older accounts.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use super::{
    classify_with, frequency_days, lenient_string, lenient_timestamp, parse_body, PlatformFields,
    PlatformNormalizer,
};
use crate::error::EngineResult;
use crate::event::{EventType, Platform};

const EVENT_TABLE: &[(&str, EventType)] = &[
    ("order_approved", EventType::Approved),
    ("paid", EventType::Approved),
    ("subscription_renewed", EventType::Approved),
    ("subscription_canceled", EventType::Canceled),
    ("canceled", EventType::Canceled),
    ("refunded", EventType::Canceled),
    ("chargedback", EventType::Canceled),
    ("subscription_late", EventType::Expired),
    ("subscription_expired", EventType::Expired),
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KiwifyPayload {
    #[serde(deserialize_with = "lenient_string")]
    order_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    order_status: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    webhook_event_type: Option<String>,
    #[serde(deserialize_with = "lenient_timestamp")]
    approved_date: Option<OffsetDateTime>,
    #[serde(deserialize_with = "lenient_timestamp")]
    updated_at: Option<OffsetDateTime>,
    #[serde(rename = "Product")]
    product: Option<KiwifyProduct>,
    #[serde(rename = "Customer")]
    customer: Option<KiwifyCustomer>,
    #[serde(rename = "Subscription")]
    subscription: Option<KiwifySubscription>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KiwifyProduct {
    #[serde(deserialize_with = "lenient_string")]
    product_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    product_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KiwifyCustomer {
    #[serde(deserialize_with = "lenient_string")]
    email: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    full_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KiwifySubscription {
    plan: Option<KiwifyPlan>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KiwifyPlan {
    #[serde(deserialize_with = "lenient_string")]
    frequency: Option<String>,
}

pub struct KiwifyNormalizer;

impl PlatformNormalizer for KiwifyNormalizer {
    fn platform(&self) -> Platform {
        Platform::Kiwify
    }

    fn extract(&self, body: &Value) -> EngineResult<PlatformFields> {
        let payload: KiwifyPayload = parse_body(Platform::Kiwify, body)?;
        let product = payload.product.unwrap_or_default();
        let customer = payload.customer.unwrap_or_default();

        let billing_period_days = payload
            .subscription
            .as_ref()
            .and_then(|s| s.plan.as_ref())
            .and_then(|p| p.frequency.as_deref())
            .and_then(frequency_days);

        Ok(PlatformFields {
            customer_email: customer.email,
            customer_name: customer.full_name,
            product_id: product.product_id,
            product_name: product.product_name,
            event_code: payload.webhook_event_type.or(payload.order_status),
            source_event_id: payload.order_id,
            occurred_at: payload.approved_date.or(payload.updated_at),
            billing_period_days,
            recurring_hint: payload.subscription.is_some(),
        })
    }

    fn classify(&self, event_code: &str) -> Option<EventType> {
        classify_with(EVENT_TABLE, event_code)
    }
}
