//! Cakto webhook payloads
//!
//! Cakto wraps everything but the event name in a `data` object and states the
//! billing cycle as an interval count plus unit on the offer.

use serde::Deserialize;
use serde_json::Value;
use time::OffsetDateTime;

use super::{
    billing_period, classify_with, frequency_days, lenient_i64, lenient_string, lenient_timestamp,
    parse_body, PlatformFields, PlatformNormalizer,
};
use crate::error::EngineResult;
use crate::event::{EventType, Platform};

const EVENT_TABLE: &[(&str, EventType)] = &[
    ("purchase_approved", EventType::Approved),
    ("subscription_renewed", EventType::Approved),
    ("subscription_canceled", EventType::Canceled),
    ("refund", EventType::Canceled),
    ("chargeback", EventType::Canceled),
    ("subscription_renewal_refused", EventType::Expired),
    ("subscription_expired", EventType::Expired),
];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaktoPayload {
    #[serde(deserialize_with = "lenient_string")]
    event: Option<String>,
    data: Option<CaktoData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CaktoData {
    #[serde(deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(deserialize_with = "lenient_timestamp")]
    paid_at: Option<OffsetDateTime>,
    #[serde(deserialize_with = "lenient_timestamp")]
    created_at: Option<OffsetDateTime>,
    customer: Option<CaktoCustomer>,
    product: Option<CaktoProduct>,
    offer: Option<CaktoOffer>,
    subscription: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaktoCustomer {
    #[serde(deserialize_with = "lenient_string")]
    email: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CaktoProduct {
    #[serde(deserialize_with = "lenient_string")]
    id: Option<String>,
    #[serde(deserialize_with = "lenient_string")]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct CaktoOffer {
    #[serde(deserialize_with = "lenient_string")]
    interval_type: Option<String>,
    #[serde(deserialize_with = "lenient_i64")]
    interval: Option<i64>,
}

impl CaktoOffer {
    /// `interval` units of `interval_type` (`day`, `week`, `month`, `year`)
    fn period_days(&self) -> Option<i64> {
        let count = self.interval.filter(|n| *n > 0).unwrap_or(1);
        let unit_days: i64 = match self.interval_type.as_deref()?.trim().to_lowercase().as_str() {
            "day" | "days" => 1,
            "week" | "weeks" => 7,
            "month" | "months" => 30,
            "year" | "years" => 365,
            other => return frequency_days(other),
        };
        billing_period(unit_days.checked_mul(count))
    }
}

pub struct CaktoNormalizer;

impl PlatformNormalizer for CaktoNormalizer {
    fn platform(&self) -> Platform {
        Platform::Cakto
    }

    fn extract(&self, body: &Value) -> EngineResult<PlatformFields> {
        let payload: CaktoPayload = parse_body(Platform::Cakto, body)?;
        let data = payload.data.unwrap_or_default();
        let customer = data.customer.unwrap_or_default();
        let product = data.product.unwrap_or_default();

        let billing_period_days = data.offer.as_ref().and_then(CaktoOffer::period_days);
        let recurring_hint = data.subscription.as_ref().is_some_and(|s| !s.is_null())
            || billing_period_days.is_some();

        Ok(PlatformFields {
            customer_email: customer.email,
            customer_name: customer.name,
            product_id: product.id,
            product_name: product.name,
            event_code: payload.event,
            source_event_id: data.id,
            occurred_at: data.paid_at.or(data.created_at),
            billing_period_days,
            recurring_hint,
        })
    }

    fn classify(&self, event_code: &str) -> Option<EventType> {
        classify_with(EVENT_TABLE, event_code)
    }
}
