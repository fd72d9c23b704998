//! Event ingestion and normalization
//!
//! Turns a raw platform payload into a [`LifecycleEvent`] and appends it to the
//! owner's log. Forwarding to the owner's application is a separate step (see
//! [`crate::delivery`]), so recording never depends on the network.

use serde::Serialize;
use serde_json::Value;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::config::{DEFAULT_BILLING_PERIOD_DAYS, MAX_BILLING_PERIOD_DAYS};
use crate::error::{EngineError, EngineResult};
use crate::event::{EventType, LifecycleEvent, OwnerId, Platform, PlanRef};
use crate::platforms::{billing_period, NormalizerRegistry};
use crate::store::OwnerWorkspace;

/// Payload as received from a checkout platform
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub platform: Platform,
    pub body: Value,
}

impl RawPayload {
    pub fn new(platform: Platform, body: Value) -> Self {
        Self { platform, body }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    Recorded {
        event: LifecycleEvent,
        /// Product id had no plan mapping
        unresolved: bool,
    },
    /// Same platform notification was already recorded; nothing appended
    Duplicate { existing_event_id: Uuid },
}

/// Normalized fields of an event before it is appended
#[derive(Debug, Clone)]
pub(crate) struct EventDraft {
    pub platform: Platform,
    pub source_event_id: Option<String>,
    pub timestamp: OffsetDateTime,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub plan: PlanRef,
    pub event_type: EventType,
    pub billing_period_days: Option<i64>,
    /// Recurrence for unresolved plans
    pub recurring_hint: bool,
}

pub struct Ingestor {
    registry: NormalizerRegistry,
    default_billing_period_days: i64,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new(DEFAULT_BILLING_PERIOD_DAYS)
    }
}

impl Ingestor {
    pub fn new(default_billing_period_days: i64) -> Self {
        Self::with_registry(NormalizerRegistry::with_defaults(), default_billing_period_days)
    }

    pub fn with_registry(registry: NormalizerRegistry, default_billing_period_days: i64) -> Self {
        Self {
            registry,
            default_billing_period_days,
        }
    }

    /// Normalize `raw` against the owner's mappings and append it to the log.
    ///
    /// Fails only with `MalformedPayload`; an unmapped product still produces
    /// a recorded event.
    pub fn ingest(
        &self,
        owner: OwnerId,
        workspace: &mut OwnerWorkspace,
        raw: &RawPayload,
        now: OffsetDateTime,
    ) -> EngineResult<IngestOutcome> {
        let draft = match self.normalize(workspace, raw, now) {
            Ok(draft) => draft,
            Err(e) => {
                tracing::warn!(
                    owner_id = %owner,
                    platform = %raw.platform,
                    error = %e,
                    "Rejected inbound payload"
                );
                return Err(e);
            }
        };

        if let Some(source_id) = draft.source_event_id.as_deref() {
            if let Some(existing_event_id) = workspace.find_duplicate(draft.platform, source_id) {
                tracing::info!(
                    owner_id = %owner,
                    platform = %draft.platform,
                    source_event_id = %source_id,
                    existing_event_id = %existing_event_id,
                    "Duplicate platform event - already recorded"
                );
                return Ok(IngestOutcome::Duplicate { existing_event_id });
            }
        }

        let unresolved = !draft.plan.is_resolved();
        if unresolved {
            tracing::warn!(
                owner_id = %owner,
                platform = %draft.platform,
                product_id = %draft.plan.product_id(),
                "No plan mapping for product - recording event as unresolved"
            );
        }

        let event = self.compose(workspace, draft);
        let event = workspace.append_event(event).clone();

        tracing::info!(
            owner_id = %owner,
            event_id = %event.id,
            platform = %event.platform,
            event_type = ?event.event_type,
            plan = %event.plan.display_name(),
            "Lifecycle event recorded"
        );

        Ok(IngestOutcome::Recorded { event, unresolved })
    }

    pub(crate) fn normalize(
        &self,
        workspace: &OwnerWorkspace,
        raw: &RawPayload,
        now: OffsetDateTime,
    ) -> EngineResult<EventDraft> {
        let normalizer = self.registry.get(raw.platform)?;
        let fields = normalizer.extract(&raw.body)?;

        let customer_email = fields
            .customer_email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .ok_or_else(|| EngineError::MalformedPayload("missing customer email".to_string()))?;
        if !is_email_like(customer_email) {
            return Err(EngineError::MalformedPayload(format!(
                "'{}' is not a valid email address",
                customer_email
            )));
        }

        let event_code = fields
            .event_code
            .as_deref()
            .ok_or_else(|| EngineError::MalformedPayload("missing event type".to_string()))?;
        let event_type = normalizer.classify(event_code).ok_or_else(|| {
            EngineError::MalformedPayload(format!(
                "{} event '{}' has no lifecycle meaning",
                raw.platform, event_code
            ))
        })?;

        let product_id = fields.product_id.unwrap_or_default();
        let plan = match workspace.mappings.resolve(&product_id) {
            Ok(mapping) => PlanRef::Resolved(mapping.clone()),
            Err(_) => PlanRef::Unresolved { product_id },
        };

        Ok(EventDraft {
            platform: raw.platform,
            source_event_id: fields.source_event_id,
            timestamp: fields.occurred_at.unwrap_or(now),
            customer_email: customer_email.to_string(),
            customer_name: fields.customer_name,
            plan,
            event_type,
            billing_period_days: fields.billing_period_days,
            recurring_hint: fields.recurring_hint,
        })
    }

    /// Build the event, computing its expiry from the draft and the customer's history
    pub(crate) fn compose(&self, workspace: &OwnerWorkspace, draft: EventDraft) -> LifecycleEvent {
        let expiry_date = match draft.event_type {
            EventType::Approved => {
                let recurring = draft
                    .plan
                    .mapping()
                    .map(|m| m.is_recurring)
                    .unwrap_or(draft.recurring_hint);
                if recurring {
                    let days = billing_period(draft.billing_period_days)
                        .unwrap_or(self.default_billing_period_days)
                        .clamp(1, MAX_BILLING_PERIOD_DAYS);
                    let expiry = draft.timestamp.checked_add(Duration::days(days));
                    if expiry.is_none() {
                        tracing::warn!(
                            customer_email = %draft.customer_email,
                            timestamp = %draft.timestamp,
                            billing_period_days = days,
                            "Expiry out of range, recording approval without one"
                        );
                    }
                    expiry
                } else {
                    None
                }
            }
            EventType::Canceled => workspace.last_known_expiry(&draft.customer_email),
            EventType::Expired => Some(draft.timestamp),
        };

        LifecycleEvent {
            id: Uuid::new_v4(),
            sequence: 0,
            source_event_id: draft.source_event_id,
            timestamp: draft.timestamp,
            platform: draft.platform,
            customer_email: draft.customer_email,
            customer_name: draft.customer_name,
            plan: draft.plan,
            event_type: draft.event_type,
            expiry_date,
        }
    }
}

/// `local@domain.tld` with no whitespace and exactly one `@`
pub fn is_email_like(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2 && labels.iter().all(|label| !label.is_empty())
}
