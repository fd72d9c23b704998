//! Kirvano webhook payloads
//!
//! Kirvano sends upper-case event names in `event` and a `products` array;
//! the first product is the one that was purchased (order bumps follow it).

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
    ("SALE_APPROVED", EventType::Approved),
    ("SUBSCRIPTION_RENEWED", EventType::Approved),
    ("SUBSCRIPTION_CANCELED", EventType::Canceled),
    ("SALE_REFUNDED", EventType::Canceled),
    ("SALE_CHARGEBACK", EventType::Canceled),
    ("SUBSCRIPTION_EXPIRED", EventType::Expired),
    ("SUBSCRIPTION_OVERDUE", EventType::Expired),
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KirvanoPayload {
    #[serde(deserialize_with = "lenient_string")]
    event: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    sale_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    checkout_id: Option<String>,
    #[serde(deserialize_with = "lenient_timestamp")]
    created_at: Option<OffsetDateTime>,
    customer: Option<KirvanoCustomer>,
    products: Vec<KirvanoProduct>,
    plan: Option<KirvanoPlan>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KirvanoCustomer {
    #[serde(deserialize_with = "lenient_string")]
    email: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KirvanoProduct {
    #[serde(deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    offer_id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct KirvanoPlan {
    #[serde(deserialize_with = "lenient_string")]
    charge_frequency: Option<String>,
}

pub struct KirvanoNormalizer;

impl PlatformNormalizer for KirvanoNormalizer {
    fn platform(&self) -> Platform {
        Platform::Kirvano
    }

    fn extract(&self, body: &Value) -> EngineResult<PlatformFields> {
        let payload: KirvanoPayload = parse_body(Platform::Kirvano, body)?;
        let customer = payload.customer.unwrap_or_default();
        let product = payload.products.into_iter().next().unwrap_or_default();

        let billing_period_days = payload
            .plan
            .as_ref()
            .and_then(|p| p.charge_frequency.as_deref())
            .and_then(frequency_days);

        Ok(PlatformFields {
            customer_email: customer.email,
            customer_name: customer.name,
            product_id: product.id.or(product.offer_id),
            product_name: product.name,
            event_code: payload.event,
            source_event_id: payload.sale_id.or(payload.checkout_id),
            occurred_at: payload.created_at,
            billing_period_days,
            recurring_hint: payload.plan.is_some(),
        })
    }

    fn classify(&self, event_code: &str) -> Option<EventType> {
        classify_with(EVENT_TABLE, event_code)
    }
}
