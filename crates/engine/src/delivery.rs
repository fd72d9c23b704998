//! Delivery adapter
//!
//! Forwards a normalized event to the owner's application with a single,
//! time-bounded HTTP POST. Every attempt yields a [`DeliveryOutcome`]; failures
//! are recorded, never retried automatically.

use std::time::Duration;

use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

use crate::config::DEFAULT_DELIVERY_TIMEOUT_SECS;
use crate::error::{EngineError, EngineResult};
use crate::event::{DeliveryOutcome, LifecycleEvent};
use crate::reconcile::effective_status;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_HEADER: &str = "X-API-KEY";
pub const SIGNATURE_HEADER: &str = "X-Plan-Automator-Signature";

/// Where the owner's application receives events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    /// Key with all but the last four characters masked, for display
    pub fn masked_api_key(&self) -> Option<String> {
        self.api_key.as_ref().map(|key| {
            let chars: Vec<char> = key.chars().collect();
            let (hidden, visible) = chars.split_at(chars.len().saturating_sub(4));
            format!(
                "{}{}",
                "*".repeat(hidden.len()),
                visible.iter().collect::<String>()
            )
        })
    }
}

/// Parse and check an endpoint URL: absolute http(s) with a host
pub fn validate_endpoint(url: &str) -> EngineResult<Url> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(EngineError::InvalidEndpoint("URL must not be empty".to_string()));
    }
    let parsed = Url::parse(trimmed)
        .map_err(|e| EngineError::InvalidEndpoint(format!("'{}': {}", trimmed, e)))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(EngineError::InvalidEndpoint(format!(
            "unsupported scheme '{}'",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(EngineError::InvalidEndpoint(format!("'{}' has no host", trimmed)));
    }
    Ok(parsed)
}

/// JSON body posted to the owner's endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundPayload {
    pub event: String,
    pub customer: OutboundCustomer,
    pub product: OutboundProduct,
    pub subscription: Option<OutboundSubscription>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundCustomer {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundProduct {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundSubscription {
    pub status: String,
    pub renews_at: Option<String>,
}

impl OutboundPayload {
    pub fn from_event(event: &LifecycleEvent, now: OffsetDateTime) -> Self {
        let name = event
            .customer_name
            .clone()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                event
                    .customer_email
                    .split('@')
                    .next()
                    .unwrap_or_default()
                    .to_string()
            });

        let subscription = event.is_recurring().then(|| OutboundSubscription {
            status: effective_status(event, now).as_str().to_string(),
            renews_at: event
                .expiry_date
                .and_then(|expiry| expiry.format(&Rfc3339).ok()),
        });

        Self {
            event: event.event_type.wire_name().to_string(),
            customer: OutboundCustomer {
                email: event.customer_email.clone(),
                name,
            },
            product: OutboundProduct {
                id: event.plan.product_id().to_string(),
                name: event.plan.display_name().to_string(),
            },
            subscription,
        }
    }
}

/// Why a delivery attempt failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryFailure {
    Timeout(Duration),
    Status(String),
    Network(String),
}

impl std::fmt::Display for DeliveryFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryFailure::Timeout(after) => write!(f, "timeout after {}s", after.as_secs()),
            DeliveryFailure::Status(status) => f.write_str(status),
            DeliveryFailure::Network(error) => write!(f, "network error: {}", error),
        }
    }
}

/// `t=<unix>,v1=<hex hmac-sha256(key, "<t>.<body>")>`
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> EngineResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| EngineError::InvalidEndpoint("unusable signing key".to_string()))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        hex::encode(mac.finalize().into_bytes())
    ))
}

#[derive(Clone)]
pub struct DeliveryAdapter {
    client: Client,
    timeout: Duration,
}

impl Default for DeliveryAdapter {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_DELIVERY_TIMEOUT_SECS))
    }
}

impl DeliveryAdapter {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::new(),
            timeout,
        }
    }

    /// POST `event` to the endpoint once.
    ///
    /// Returns `InvalidEndpoint` without touching the network when the URL is
    /// unusable; every attempted call returns an outcome, successful or not.
    pub async fn deliver(
        &self,
        event: &LifecycleEvent,
        endpoint: &EndpointConfig,
        test_mode: bool,
    ) -> EngineResult<DeliveryOutcome> {
        let url = validate_endpoint(&endpoint.url)?;
        let now = OffsetDateTime::now_utc();
        let body = serde_json::to_vec(&OutboundPayload::from_event(event, now))?;

        let mut request = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(key) = endpoint.api_key.as_deref() {
            request = request
                .header(API_KEY_HEADER, key)
                .header(SIGNATURE_HEADER, sign_payload(key, now.unix_timestamp(), &body)?);
        }

        let result = match request.body(body).send().await {
            Ok(response) if response.status().is_success() => Ok(response.status().to_string()),
            Ok(response) => Err(DeliveryFailure::Status(response.status().to_string())),
            Err(e) if e.is_timeout() => Err(DeliveryFailure::Timeout(self.timeout)),
            Err(e) => Err(DeliveryFailure::Network(e.to_string())),
        };

        let outcome = DeliveryOutcome {
            id: Uuid::new_v4(),
            event_id: event.id,
            attempted_at: now,
            success: result.is_ok(),
            http_status_or_error: match &result {
                Ok(status) => status.clone(),
                Err(failure) => failure.to_string(),
            },
            test_mode,
        };

        match &result {
            Ok(_) => tracing::info!(
                event_id = %event.id,
                status = %outcome.http_status_or_error,
                test_mode,
                "Event delivered"
            ),
            Err(failure) => tracing::warn!(
                event_id = %event.id,
                error = %failure,
                test_mode,
                "Event delivery failed"
            ),
        }

        Ok(outcome)
    }
}
