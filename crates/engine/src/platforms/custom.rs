//! Owner-built integrations
//!
//! Custom senders post the same normalized shape the delivery adapter emits,
//! optionally with `id`, `timestamp` and `billing_period_days`.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use super::{
    billing_period, lenient_i64, lenient_string, lenient_timestamp, parse_body, PlatformFields,
    PlatformNormalizer,
};
use crate::error::EngineResult;
use crate::event::{EventType, Platform};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CustomPayload {
    #[serde(deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    event: Option<String>,
    #[serde(deserialize_with = "lenient_timestamp")]
    timestamp: Option<OffsetDateTime>,
    #[serde(deserialize_with = "lenient_i64")]
    billing_period_days: Option<i64>,
    customer: Option<CustomParty>,
    product: Option<CustomParty>,
    subscription: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CustomParty {
    #[serde(deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    email: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
}

pub struct CustomNormalizer;

impl PlatformNormalizer for CustomNormalizer {
    fn platform(&self) -> Platform {
        Platform::Custom
    }

    fn extract(&self, body: &Value) -> EngineResult<PlatformFields> {
        let payload: CustomPayload = parse_body(Platform::Custom, body)?;
        let customer = payload.customer.unwrap_or_default();
        let product = payload.product.unwrap_or_default();

        Ok(PlatformFields {
            customer_email: customer.email,
            customer_name: customer.name,
            product_id: product.id,
            product_name: product.name,
            event_code: payload.event,
            source_event_id: payload.id,
            occurred_at: payload.timestamp,
            billing_period_days: billing_period(payload.billing_period_days),
            recurring_hint: payload.subscription.as_ref().is_some_and(|s| !s.is_null()),
        })
    }

    fn classify(&self, event_code: &str) -> Option<EventType> {
        EventType::from_wire_name(event_code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_accepts_outbound_shape() {
        let body = json!({
            "event": "subscription_canceled",
            "customer": { "email": "d@x.com", "name": "Davi" },
            "product": { "id": "prod_K123", "name": "Plano Pro" },
            "subscription": { "status": "canceled", "renews_at": null }
        });

        let fields = CustomNormalizer.extract(&body).unwrap();
        assert_eq!(fields.customer_email.as_deref(), Some("d@x.com"));
        assert_eq!(fields.product_id.as_deref(), Some("prod_K123"));
        assert!(fields.recurring_hint);
        assert_eq!(
            CustomNormalizer.classify(fields.event_code.as_deref().unwrap()),
            Some(EventType::Canceled)
        );
    }

    #[test]
    fn test_non_positive_period_is_ignored() {
        let body = json!({
            "event": "order_approved",
            "billing_period_days": 0,
            "customer": { "email": "d@x.com" },
            "subscription": null
        });
        let fields = CustomNormalizer.extract(&body).unwrap();
        assert_eq!(fields.billing_period_days, None);
        assert!(!fields.recurring_hint);
    }

    #[test]
    fn test_period_accepts_numeric_string() {
        let body = json!({
            "event": "order_approved",
            "billing_period_days": " 90 ",
            "customer": { "email": "d@x.com" }
        });
        let fields = CustomNormalizer.extract(&body).unwrap();
        assert_eq!(fields.billing_period_days, Some(90));
    }

    #[test]
    fn test_unreadable_or_huge_period_is_absent() {
        for period in [json!("monthly"), json!(true), json!(9_000_000_000_000_000_000_i64)] {
            let body = json!({
                "event": "order_approved",
                "billing_period_days": period,
                "customer": { "email": "d@x.com" }
            });
            let fields = CustomNormalizer.extract(&body).unwrap();
            assert_eq!(fields.billing_period_days, None);
        }
    }
}
