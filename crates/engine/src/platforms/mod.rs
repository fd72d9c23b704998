//! Per-platform payload normalizers
//!
//! Each checkout platform posts its own JSON shape. A [`PlatformNormalizer`]
//! pulls the handful of fields ingestion needs out of that shape and translates
//! the platform's native event code. Normalizers are looked up by [`Platform`]
//! in a [`NormalizerRegistry`].

mod cakto;
mod custom;
mod kirvano;
mod kiwify;

use std::collections::HashMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime};

use crate::config::MAX_BILLING_PERIOD_DAYS;
use crate::error::{EngineError, EngineResult};
use crate::event::{EventType, Platform};

pub use cakto::CaktoNormalizer;
pub use custom::CustomNormalizer;
pub use kirvano::KirvanoNormalizer;
pub use kiwify::KiwifyNormalizer;

/// Fields extracted from a raw platform payload, before mapping resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlatformFields {
    pub customer_email: Option<String>,
    pub customer_name: Option<String>,
    pub product_id: Option<String>,
    pub product_name: Option<String>,
    pub event_code: Option<String>,
    pub source_event_id: Option<String>,
    pub occurred_at: Option<OffsetDateTime>,
    /// Billing period stated by the platform, in days
    pub billing_period_days: Option<i64>,
    /// Payload carried subscription data (used when the product is unmapped)
    pub recurring_hint: bool,
}

pub trait PlatformNormalizer: Send + Sync {
    fn platform(&self) -> Platform;

    /// Extract the fields ingestion needs. Unknown fields are ignored.
    fn extract(&self, body: &Value) -> EngineResult<PlatformFields>;

    /// Translate a native event code. `None` means the code has no lifecycle meaning.
    fn classify(&self, event_code: &str) -> Option<EventType>;
}

/// Lookup table of normalizers keyed by platform
pub struct NormalizerRegistry {
    normalizers: HashMap<Platform, Box<dyn PlatformNormalizer>>,
}

impl NormalizerRegistry {
    pub fn empty() -> Self {
        Self {
            normalizers: HashMap::new(),
        }
    }

    /// Registry with the built-in Kirvano, Cakto, Kiwify and custom normalizers
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(KirvanoNormalizer));
        registry.register(Box::new(CaktoNormalizer));
        registry.register(Box::new(KiwifyNormalizer));
        registry.register(Box::new(CustomNormalizer));
        registry
    }

    pub fn register(&mut self, normalizer: Box<dyn PlatformNormalizer>) {
        self.normalizers.insert(normalizer.platform(), normalizer);
    }

    pub fn get(&self, platform: Platform) -> EngineResult<&dyn PlatformNormalizer> {
        self.normalizers
            .get(&platform)
            .map(|n| n.as_ref())
            .ok_or_else(|| {
                EngineError::MalformedPayload(format!("no normalizer registered for {}", platform))
            })
    }
}

impl Default for NormalizerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Deserialize payload bodies into a platform struct, mapping shape errors
/// (e.g. a non-object body) to `MalformedPayload`
pub(crate) fn parse_body<T: for<'de> Deserialize<'de>>(
    platform: Platform,
    body: &Value,
) -> EngineResult<T> {
    if !body.is_object() {
        return Err(EngineError::MalformedPayload(format!(
            "{} payload must be a JSON object",
            platform
        )));
    }
    serde_json::from_value(body.clone()).map_err(|e| {
        EngineError::MalformedPayload(format!("unreadable {} payload: {}", platform, e))
    })
}

/// Accept strings or numbers for identifier fields; anything else reads as absent
pub(crate) fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| value_to_string(&v)))
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Integer from a number or numeric string; anything else reads as absent
pub(crate) fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }))
}

/// Keep a stated period only when it is positive and within [`MAX_BILLING_PERIOD_DAYS`]
pub(crate) fn billing_period(days: Option<i64>) -> Option<i64> {
    days.filter(|d| (1..=MAX_BILLING_PERIOD_DAYS).contains(d))
}

/// Accept RFC 3339, `YYYY-MM-DD HH:MM:SS` (UTC) or unix seconds
pub(crate) fn lenient_timestamp<'de, D>(
    deserializer: D,
) -> Result<Option<OffsetDateTime>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

pub(crate) fn parse_timestamp(value: &Value) -> Option<OffsetDateTime> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok()),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = OffsetDateTime::parse(s, &Rfc3339) {
                return Some(ts);
            }
            let plain = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
            if let Ok(ts) = PrimitiveDateTime::parse(s, plain) {
                return Some(ts.assume_utc());
            }
            s.parse::<i64>()
                .ok()
                .and_then(|secs| OffsetDateTime::from_unix_timestamp(secs).ok())
        }
        _ => None,
    }
}

/// Translate a billing frequency word into days
pub(crate) fn frequency_days(frequency: &str) -> Option<i64> {
    let days = match frequency.trim().to_lowercase().as_str() {
        "weekly" | "week" | "semanal" => 7,
        "monthly" | "month" | "mensal" => 30,
        "bimonthly" | "bimestral" => 60,
        "quarterly" | "trimestral" => 90,
        "semiannual" | "semiannually" | "biannual" | "semestral" => 180,
        "annual" | "annually" | "yearly" | "year" | "anual" => 365,
        _ => return None,
    };
    Some(days)
}

/// Translate a native code through a fixed (code, type) table, case-insensitively
pub(crate) fn classify_with(table: &[(&str, EventType)], event_code: &str) -> Option<EventType> {
    let code = event_code.trim();
    table
        .iter()
        .find(|(native, _)| native.eq_ignore_ascii_case(code))
        .map(|(_, event_type)| *event_type)
}
