//! Plan automator service
//!
//! Facade over the owner store, ingestion, delivery and troubleshooting. Every
//! operation takes the owner explicitly; nothing here is global.

use std::sync::Arc;

use time::OffsetDateTime;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::delivery::{validate_endpoint, DeliveryAdapter, EndpointConfig};
use crate::error::{EngineError, EngineResult};
use crate::event::{
    CustomerAccessState, DeliveryOutcome, EventType, LifecycleEvent, OwnerId, Platform, PlanRef,
};
use crate::ingest::{EventDraft, IngestOutcome, Ingestor, RawPayload};
use crate::invariants::{InvariantCheckSummary, InvariantChecker};
use crate::mapping::{PlanMapping, UpsertOutcome};
use crate::reconcile::{self, AccessSummary, ChurnSummary};
use crate::stats::{self, DeliveryStats, TimelineBucket};
use crate::store::OwnerStore;
use crate::troubleshoot::TroubleshootAssistant;

pub const TEST_CUSTOMER_EMAIL: &str = "test.customer@example.com";
pub const TEST_CUSTOMER_NAME: &str = "Test Customer";
/// Product id used by test events when the owner has no mappings yet
pub const TEST_PRODUCT_ID: &str = "test_product";

/// Main service that combines all plan automation functionality
#[derive(Clone)]
pub struct PlanAutomator {
    store: OwnerStore,
    ingestor: Arc<Ingestor>,
    delivery: DeliveryAdapter,
    assistant: TroubleshootAssistant,
}

impl PlanAutomator {
    /// Create a service over an existing store
    pub fn new(config: &EngineConfig, store: OwnerStore) -> Self {
        Self {
            store,
            ingestor: Arc::new(Ingestor::new(config.default_billing_period_days)),
            delivery: DeliveryAdapter::new(config.delivery_timeout),
            assistant: TroubleshootAssistant::new(config.assistant.clone()),
        }
    }

    /// Create a service, loading snapshots from `config.data_dir` when set
    pub async fn from_config(config: &EngineConfig) -> EngineResult<Self> {
        let store = match &config.data_dir {
            Some(dir) => OwnerStore::open(dir).await?,
            None => OwnerStore::new_in_memory(),
        };
        Ok(Self::new(config, store))
    }

    pub fn store(&self) -> &OwnerStore {
        &self.store
    }

    pub fn assistant_enabled(&self) -> bool {
        self.assistant.is_enabled()
    }

    // =========================================================================
    // Ingestion & delivery
    // =========================================================================

    /// Record an inbound platform payload. Does not deliver.
    pub async fn ingest(&self, owner: OwnerId, raw: RawPayload) -> EngineResult<IngestOutcome> {
        let now = OffsetDateTime::now_utc();
        let ingestor = &self.ingestor;
        self.store
            .write(owner, |workspace| ingestor.ingest(owner, workspace, &raw, now))
            .await?
    }

    /// Deliver a stored event to the owner's endpoint and record the outcome.
    ///
    /// The store lock is released for the duration of the HTTP call.
    pub async fn deliver(&self, owner: OwnerId, event_id: Uuid) -> EngineResult<DeliveryOutcome> {
        let (event, endpoint) = self.delivery_target(owner, event_id).await?;
        let outcome = self.delivery.deliver(&event, &endpoint, false).await?;
        self.record(owner, &outcome).await?;
        Ok(outcome)
    }

    /// Deliver on a background task. The outcome is recorded whether or not
    /// anyone awaits the handle.
    pub fn spawn_delivery(&self, owner: OwnerId, event_id: Uuid) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            if let Err(e) = service.deliver(owner, event_id).await {
                tracing::error!(
                    owner_id = %owner,
                    event_id = %event_id,
                    error = %e,
                    "Background delivery not attempted"
                );
            }
        })
    }

    /// Manual re-trigger of a stored event: checks the event and endpoint up
    /// front, then delivers in the background as a new attempt.
    pub async fn redeliver(&self, owner: OwnerId, event_id: Uuid) -> EngineResult<JoinHandle<()>> {
        let (_, endpoint) = self.delivery_target(owner, event_id).await?;
        validate_endpoint(&endpoint.url)?;

        tracing::info!(owner_id = %owner, event_id = %event_id, "Manual redelivery requested");
        Ok(self.spawn_delivery(owner, event_id))
    }

    /// Append a synthetic event through the normal expiry rules and deliver it
    /// with the outcome flagged as a test.
    pub async fn trigger_test(
        &self,
        owner: OwnerId,
        event_type: EventType,
    ) -> EngineResult<(LifecycleEvent, DeliveryOutcome)> {
        let endpoint = self
            .endpoint(owner)
            .await
            .ok_or(EngineError::EndpointNotConfigured)?;
        validate_endpoint(&endpoint.url)?;

        let now = OffsetDateTime::now_utc();
        let ingestor = &self.ingestor;
        let event = self
            .store
            .write(owner, |workspace| {
                let plan = match workspace.mappings.first() {
                    Some(mapping) => PlanRef::Resolved(mapping.clone()),
                    None => PlanRef::Unresolved {
                        product_id: TEST_PRODUCT_ID.to_string(),
                    },
                };
                let draft = EventDraft {
                    platform: Platform::Custom,
                    source_event_id: None,
                    timestamp: now,
                    customer_email: TEST_CUSTOMER_EMAIL.to_string(),
                    customer_name: Some(TEST_CUSTOMER_NAME.to_string()),
                    plan,
                    event_type,
                    billing_period_days: None,
                    recurring_hint: true,
                };
                let event = ingestor.compose(workspace, draft);
                workspace.append_event(event).clone()
            })
            .await?;

        tracing::info!(
            owner_id = %owner,
            event_id = %event.id,
            event_type = ?event_type,
            "Test event recorded"
        );

        let outcome = self.delivery.deliver(&event, &endpoint, true).await?;
        self.record(owner, &outcome).await?;
        Ok((event, outcome))
    }

    async fn delivery_target(
        &self,
        owner: OwnerId,
        event_id: Uuid,
    ) -> EngineResult<(LifecycleEvent, EndpointConfig)> {
        let (event, endpoint) = self
            .store
            .read(owner, |workspace| {
                (workspace.event(event_id).cloned(), workspace.endpoint.clone())
            })
            .await;
        let event = event.ok_or_else(|| EngineError::NotFound(format!("event {}", event_id)))?;
        let endpoint = endpoint.ok_or(EngineError::EndpointNotConfigured)?;
        Ok((event, endpoint))
    }

    async fn record(&self, owner: OwnerId, outcome: &DeliveryOutcome) -> EngineResult<()> {
        let outcome = outcome.clone();
        self.store
            .write(owner, |workspace| workspace.record_outcome(outcome))
            .await
    }

    // =========================================================================
    // Reconciliation
    // =========================================================================

    /// Per-customer access states. Computed outside the store lock.
    pub async fn reconcile(&self, owner: OwnerId, now: OffsetDateTime) -> Vec<CustomerAccessState> {
        let events = self.events(owner).await;
        reconcile::reconcile(&events, now)
    }

    pub async fn customer_state(
        &self,
        owner: OwnerId,
        email: &str,
        now: OffsetDateTime,
    ) -> Option<CustomerAccessState> {
        let events = self.events(owner).await;
        reconcile::customer_state(&events, email, now)
    }

    pub async fn access_summary(&self, owner: OwnerId, now: OffsetDateTime) -> AccessSummary {
        reconcile::access_summary(&self.reconcile(owner, now).await)
    }

    pub async fn churn_summary(&self, owner: OwnerId, now: OffsetDateTime) -> ChurnSummary {
        reconcile::churn_summary(&self.reconcile(owner, now).await)
    }

    pub async fn check_invariants(&self, owner: OwnerId, now: OffsetDateTime) -> InvariantCheckSummary {
        self.store
            .read(owner, |workspace| {
                InvariantChecker::new(owner, workspace).run_all_checks(now)
            })
            .await
    }

    // =========================================================================
    // Delivery history
    // =========================================================================

    pub async fn delivery_stats(&self, owner: OwnerId) -> DeliveryStats {
        self.store
            .read(owner, |workspace| stats::delivery_stats(workspace.deliveries()))
            .await
    }

    pub async fn delivery_timeline(&self, owner: OwnerId) -> Vec<TimelineBucket> {
        self.store
            .read(owner, |workspace| stats::delivery_timeline(workspace.deliveries()))
            .await
    }

    pub async fn deliveries(&self, owner: OwnerId) -> Vec<DeliveryOutcome> {
        self.store
            .read(owner, |workspace| workspace.deliveries().to_vec())
            .await
    }

    /// Markdown troubleshooting advice for a recorded delivery
    pub async fn troubleshoot(&self, owner: OwnerId, outcome_id: Uuid) -> EngineResult<String> {
        let (outcome, event) = self
            .store
            .read(owner, |workspace| {
                let outcome = workspace.delivery(outcome_id).cloned();
                let event = outcome
                    .as_ref()
                    .and_then(|o| workspace.event(o.event_id).cloned());
                (outcome, event)
            })
            .await;

        let outcome = outcome
            .ok_or_else(|| EngineError::NotFound(format!("delivery {}", outcome_id)))?;
        let event = event.ok_or_else(|| {
            EngineError::NotFound(format!("event {} is no longer in the log", outcome.event_id))
        })?;

        Ok(self.assistant.explain(&outcome, &event).await)
    }

    // =========================================================================
    // Event log
    // =========================================================================

    pub async fn events(&self, owner: OwnerId) -> Vec<LifecycleEvent> {
        self.store
            .read(owner, |workspace| workspace.events().to_vec())
            .await
    }

    pub async fn clear_log(&self, owner: OwnerId) -> EngineResult<usize> {
        let removed = self.store.write(owner, |workspace| workspace.clear_log()).await?;
        tracing::info!(owner_id = %owner, removed, "Event log cleared");
        Ok(removed)
    }

    // =========================================================================
    // Configuration
    // =========================================================================

    pub async fn mappings(&self, owner: OwnerId) -> Vec<PlanMapping> {
        self.store
            .read(owner, |workspace| workspace.mappings.list().to_vec())
            .await
    }

    pub async fn upsert_mapping(
        &self,
        owner: OwnerId,
        mapping: PlanMapping,
    ) -> EngineResult<UpsertOutcome> {
        self.store
            .write(owner, |workspace| workspace.mappings.upsert(mapping))
            .await?
    }

    pub async fn remove_mapping(
        &self,
        owner: OwnerId,
        product_id: &str,
    ) -> EngineResult<Option<PlanMapping>> {
        self.store
            .write(owner, |workspace| workspace.mappings.remove(product_id))
            .await
    }

    pub async fn endpoint(&self, owner: OwnerId) -> Option<EndpointConfig> {
        self.store
            .read(owner, |workspace| workspace.endpoint.clone())
            .await
    }

    /// Replace the delivery endpoint. Invalid URLs are rejected and the
    /// previous configuration is kept.
    pub async fn set_endpoint(&self, owner: OwnerId, endpoint: EndpointConfig) -> EngineResult<()> {
        validate_endpoint(&endpoint.url)?;
        tracing::info!(
            owner_id = %owner,
            url = %endpoint.url,
            has_api_key = endpoint.api_key.is_some(),
            "Delivery endpoint updated"
        );
        self.store
            .write(owner, |workspace| workspace.endpoint = Some(endpoint))
            .await
    }
}
