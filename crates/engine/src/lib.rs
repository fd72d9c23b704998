// Engine crate clippy configuration
#![allow(clippy::result_large_err)] // EngineError carries owned context strings
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Plan Automator Engine
//!
//! Turns checkout-platform webhooks into plan access for a micro-SaaS.
//!
//! ## Features
//!
//! - **Ingestion**: Normalize Kiwify, Kirvano, Cakto and custom payloads into lifecycle events
//! - **Plan Mapping**: Translate checkout product ids into internal plans
//! - **Reconciliation**: Derive each customer's effective access from the event log
//! - **Delivery**: Forward events to the owner's application, one attempt per event
//! - **Statistics**: Delivery success rate and per-minute timeline
//! - **Troubleshooting**: AI-assisted diagnosis of failed deliveries
//! - **Invariants**: Read-only consistency checks over a workspace

pub mod automator;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod ingest;
pub mod invariants;
pub mod mapping;
pub mod platforms;
pub mod reconcile;
pub mod stats;
pub mod store;
pub mod troubleshoot;

#[cfg(test)]
mod edge_case_tests;

// Automator
pub use automator::{PlanAutomator, TEST_CUSTOMER_EMAIL, TEST_CUSTOMER_NAME, TEST_PRODUCT_ID};

// Config
pub use config::{AssistantConfig, ConfigError, EngineConfig};

// Delivery
pub use delivery::{
    validate_endpoint, DeliveryAdapter, DeliveryFailure, EndpointConfig, OutboundPayload,
    API_KEY_HEADER, SIGNATURE_HEADER,
};

// Error
pub use error::{EngineError, EngineResult};

// Events
pub use event::{
    CustomerAccessState, DeliveryOutcome, EffectiveStatus, EventType, LifecycleEvent, OwnerId,
    Platform, PlanRef,
};

// Ingestion
pub use ingest::{IngestOutcome, Ingestor, RawPayload};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Mapping
pub use mapping::{PlanMapping, PlanMappingTable, UpsertOutcome};

// Platforms
pub use platforms::{NormalizerRegistry, PlatformFields, PlatformNormalizer};

// Reconciliation
pub use reconcile::{AccessSummary, ChurnSummary};

// Stats
pub use stats::{DeliveryStats, TimelineBucket};

// Store
pub use store::{OwnerStore, OwnerWorkspace};

// Troubleshooting
pub use troubleshoot::TroubleshootAssistant;
