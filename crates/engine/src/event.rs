//! Lifecycle event model
//!
//! A [`LifecycleEvent`] is the normalized, immutable record of one purchase,
//! cancellation or expiry received from a checkout platform. Events are only
//! ever appended to an owner's log; [`CustomerAccessState`] is derived from
//! that log and never stored.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::mapping::PlanMapping;

/// Owner scope. Every store, ingestion and delivery call takes one explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(pub Uuid);

impl OwnerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OwnerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for OwnerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Checkout platform that produced an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Kirvano,
    Cakto,
    Kiwify,
    /// Owner-built integrations posting the normalized shape directly
    Custom,
}

impl Platform {
    pub const ALL: [Platform; 4] = [
        Platform::Kirvano,
        Platform::Cakto,
        Platform::Kiwify,
        Platform::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Kirvano => "kirvano",
            Platform::Cakto => "cakto",
            Platform::Kiwify => "kiwify",
            Platform::Custom => "custom",
        }
    }

    /// Label shown in the dashboard
    pub fn label(&self) -> &'static str {
        match self {
            Platform::Kirvano => "Kirvano",
            Platform::Cakto => "Cakto",
            Platform::Kiwify => "Kiwify",
            Platform::Custom => "Webhook Personalizado",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown platform '{}'", s))
    }
}

/// Normalized lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Approved,
    Canceled,
    Expired,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Approved, EventType::Canceled, EventType::Expired];

    /// Event name used in the outbound payload
    pub fn wire_name(&self) -> &'static str {
        match self {
            EventType::Approved => "order_approved",
            EventType::Canceled => "subscription_canceled",
            EventType::Expired => "subscription_expired",
        }
    }

    pub fn from_wire_name(name: &str) -> Option<Self> {
        EventType::ALL
            .into_iter()
            .find(|t| t.wire_name().eq_ignore_ascii_case(name.trim()))
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    /// Accepts `approved`/`canceled`/`expired` as well as the wire names
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(EventType::Approved),
            "canceled" | "cancelled" => Ok(EventType::Canceled),
            "expired" => Ok(EventType::Expired),
            other => {
                EventType::from_wire_name(other).ok_or_else(|| format!("unknown event type '{}'", s))
            }
        }
    }
}

/// Plan an event refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlanRef {
    Resolved(PlanMapping),
    /// Product id had no mapping at ingestion time. Kept so the owner can see
    /// and fix mis-mapped products.
    Unresolved { product_id: String },
}

impl PlanRef {
    pub fn product_id(&self) -> &str {
        match self {
            PlanRef::Resolved(mapping) => &mapping.checkout_product_id,
            PlanRef::Unresolved { product_id } => product_id,
        }
    }

    /// Internal plan name, or the raw product id when unresolved
    pub fn display_name(&self) -> &str {
        match self {
            PlanRef::Resolved(mapping) => &mapping.internal_plan_name,
            PlanRef::Unresolved { product_id } => product_id,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, PlanRef::Resolved(_))
    }

    pub fn mapping(&self) -> Option<&PlanMapping> {
        match self {
            PlanRef::Resolved(mapping) => Some(mapping),
            PlanRef::Unresolved { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    /// Append position in the owner's log; used only to break timestamp ties
    pub sequence: u64,
    /// Platform's own id for the notification, when it sends one
    pub source_event_id: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub platform: Platform,
    pub customer_email: String,
    pub customer_name: Option<String>,
    pub plan: PlanRef,
    pub event_type: EventType,
    #[serde(with = "time::serde::rfc3339::option")]
    pub expiry_date: Option<OffsetDateTime>,
}

impl LifecycleEvent {
    /// Case-folded identity key
    pub fn customer_key(&self) -> String {
        customer_key(&self.customer_email)
    }

    pub fn is_recurring(&self) -> bool {
        self.plan.mapping().is_some_and(|m| m.is_recurring) || self.expiry_date.is_some()
    }
}

pub fn customer_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Derived access status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveStatus {
    Active,
    /// Canceled but still inside the paid window
    Canceled,
    Expired,
}

impl EffectiveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EffectiveStatus::Active => "active",
            EffectiveStatus::Canceled => "canceled",
            EffectiveStatus::Expired => "expired",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerAccessState {
    pub customer_email: String,
    pub most_recent_event: LifecycleEvent,
    pub effective_status: EffectiveStatus,
}

impl CustomerAccessState {
    /// Active, or canceled with time left on the paid window
    pub fn has_access(&self) -> bool {
        matches!(
            self.effective_status,
            EffectiveStatus::Active | EffectiveStatus::Canceled
        )
    }

    /// Lost access, through an explicit expiry or a lapsed window
    pub fn is_churned(&self) -> bool {
        self.effective_status == EffectiveStatus::Expired
    }
}

/// One delivery attempt against the owner's endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub id: Uuid,
    pub event_id: Uuid,
    #[serde(with = "time::serde::rfc3339")]
    pub attempted_at: OffsetDateTime,
    pub success: bool,
    pub http_status_or_error: String,
    #[serde(default)]
    pub test_mode: bool,
}
