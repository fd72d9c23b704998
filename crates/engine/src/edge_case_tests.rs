// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Plan Automator
//!
//! Tests boundary conditions across the pipeline:
//! - Ingestion (duplicates, unresolved products, rejected payloads)
//! - Expiry computation and time overrides
//! - Reconciliation ordering and idempotence
//! - Mapping determinism
//! - Delivery failures

#[cfg(test)]
mod ingestion_tests {
    use crate::error::EngineError;
    use crate::event::{EventType, OwnerId, Platform};
    use crate::ingest::{IngestOutcome, Ingestor, RawPayload};
    use crate::mapping::PlanMapping;
    use crate::store::OwnerWorkspace;
    use serde_json::json;
    use time::macros::datetime;

    fn kiwify(order_id: &str, event: &str, email: &str) -> RawPayload {
        RawPayload::new(
            Platform::Kiwify,
            json!({
                "order_id": order_id,
                "webhook_event_type": event,
                "approved_date": "2024-05-01 12:30:00",
                "Product": { "product_id": "prod_K123" },
                "Customer": { "email": email }
            }),
        )
    }

    // =========================================================================
    // Same platform notification delivered twice - appended once
    // =========================================================================
    #[test]
    fn test_duplicate_notification_not_appended() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = OwnerWorkspace::default();
        let now = datetime!(2024-05-01 13:00 UTC);

        let first = ingestor
            .ingest(owner, &mut workspace, &kiwify("ord_1", "order_approved", "a@x.com"), now)
            .unwrap();
        let IngestOutcome::Recorded { event, .. } = first else {
            panic!("first delivery should record");
        };

        let second = ingestor
            .ingest(owner, &mut workspace, &kiwify("ord_1", "order_approved", "a@x.com"), now)
            .unwrap();
        match second {
            IngestOutcome::Duplicate { existing_event_id } => {
                assert_eq!(existing_event_id, event.id)
            }
            other => panic!("expected duplicate, got {other:?}"),
        }
        assert_eq!(workspace.events().len(), 1);
    }

    // =========================================================================
    // Same source id on a different platform is a different notification
    // =========================================================================
    #[test]
    fn test_source_ids_are_scoped_by_platform() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = OwnerWorkspace::default();
        let now = datetime!(2024-05-01 13:00 UTC);

        ingestor
            .ingest(owner, &mut workspace, &kiwify("42", "order_approved", "a@x.com"), now)
            .unwrap();
        let custom = RawPayload::new(
            Platform::Custom,
            json!({
                "id": "42",
                "event": "subscription_canceled",
                "customer": { "email": "a@x.com" },
                "product": { "id": "prod_K123" }
            }),
        );
        let outcome = ingestor.ingest(owner, &mut workspace, &custom, now).unwrap();
        assert!(matches!(outcome, IngestOutcome::Recorded { .. }));
        assert_eq!(workspace.events().len(), 2);
    }

    // =========================================================================
    // Unmapped product - event recorded and flagged, not dropped
    // =========================================================================
    #[test]
    fn test_unresolved_mapping_is_non_fatal() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = OwnerWorkspace::default();
        workspace
            .mappings
            .upsert(PlanMapping::new("other", "Other", true))
            .unwrap();

        let outcome = ingestor
            .ingest(
                owner,
                &mut workspace,
                &kiwify("ord_9", "order_approved", "a@x.com"),
                datetime!(2024-05-01 13:00 UTC),
            )
            .unwrap();

        match outcome {
            IngestOutcome::Recorded { event, unresolved } => {
                assert!(unresolved);
                assert!(!event.plan.is_resolved());
                assert_eq!(event.plan.product_id(), "prod_K123");
            }
            other => panic!("expected recorded, got {other:?}"),
        }
        assert_eq!(workspace.events().len(), 1);
    }

    // =========================================================================
    // Missing or invalid email - rejected and never logged
    // =========================================================================
    #[test]
    fn test_payload_without_identity_rejected() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = OwnerWorkspace::default();
        let now = datetime!(2024-05-01 13:00 UTC);

        for email in ["", "   ", "not-an-email", "a b@x.com"] {
            let result =
                ingestor.ingest(owner, &mut workspace, &kiwify("o", "order_approved", email), now);
            assert!(
                matches!(result, Err(EngineError::MalformedPayload(_))),
                "{email:?} should be rejected"
            );
        }
        assert!(workspace.events().is_empty());
    }

    // =========================================================================
    // Informational platform events with no lifecycle meaning are rejected
    // =========================================================================
    #[test]
    fn test_unknown_event_code_rejected() {
        let ingestor = Ingestor::default();
        let mut workspace = OwnerWorkspace::default();
        let result = ingestor.ingest(
            OwnerId::new(),
            &mut workspace,
            &kiwify("o", "pix_created", "a@x.com"),
            datetime!(2024-05-01 13:00 UTC),
        );
        assert!(matches!(result, Err(EngineError::MalformedPayload(_))));
        assert!(workspace.events().is_empty());
    }

    #[test]
    fn test_canceled_carries_forward_expiry() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = OwnerWorkspace::default();
        workspace
            .mappings
            .upsert(PlanMapping::new("prod_K123", "Plano Pro", true))
            .unwrap();
        let now = datetime!(2024-05-01 13:00 UTC);

        ingestor
            .ingest(owner, &mut workspace, &kiwify("o1", "order_approved", "a@x.com"), now)
            .unwrap();
        ingestor
            .ingest(owner, &mut workspace, &kiwify("o2", "subscription_canceled", "A@X.com"), now)
            .unwrap();

        let events = workspace.events();
        assert_eq!(events[0].event_type, EventType::Approved);
        assert_eq!(events[1].event_type, EventType::Canceled);
        assert_eq!(events[1].expiry_date, events[0].expiry_date);
        assert_eq!(events[1].expiry_date, Some(datetime!(2024-05-31 12:30 UTC)));
    }

    // =========================================================================
    // Out-of-range periods and timestamps never panic expiry computation
    // =========================================================================
    fn custom_approval(timestamp: &str, period: serde_json::Value) -> RawPayload {
        RawPayload::new(
            Platform::Custom,
            json!({
                "event": "order_approved",
                "timestamp": timestamp,
                "billing_period_days": period,
                "customer": { "email": "a@x.com" },
                "product": { "id": "prod_K123" }
            }),
        )
    }

    #[test]
    fn test_huge_billing_period_falls_back_to_default() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = OwnerWorkspace::default();
        workspace
            .mappings
            .upsert(PlanMapping::new("prod_K123", "Plano Pro", true))
            .unwrap();

        let outcome = ingestor
            .ingest(
                owner,
                &mut workspace,
                &custom_approval("2024-05-01T12:30:00Z", json!(9_000_000_000_000_000_000_i64)),
                datetime!(2024-05-01 13:00 UTC),
            )
            .unwrap();

        let IngestOutcome::Recorded { event, .. } = outcome else {
            panic!("approval should record");
        };
        assert_eq!(event.expiry_date, Some(datetime!(2024-05-31 12:30 UTC)));
    }

    #[test]
    fn test_far_future_timestamp_records_without_expiry() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = OwnerWorkspace::default();
        workspace
            .mappings
            .upsert(PlanMapping::new("prod_K123", "Plano Pro", true))
            .unwrap();

        let outcome = ingestor
            .ingest(
                owner,
                &mut workspace,
                &custom_approval("9999-12-31T00:00:00Z", json!(30)),
                datetime!(2024-05-01 13:00 UTC),
            )
            .unwrap();

        let IngestOutcome::Recorded { event, .. } = outcome else {
            panic!("approval should record");
        };
        assert_eq!(event.expiry_date, None);
        assert_eq!(workspace.events().len(), 1);
    }
}

#[cfg(test)]
mod reconciliation_tests {
    use crate::event::{EffectiveStatus, OwnerId, Platform};
    use crate::ingest::{Ingestor, RawPayload};
    use crate::mapping::PlanMapping;
    use crate::reconcile::reconcile;
    use crate::store::OwnerWorkspace;
    use serde_json::json;
    use time::macros::datetime;
    use time::Duration;

    fn custom(event: &str, email: &str, timestamp: &str) -> RawPayload {
        RawPayload::new(
            Platform::Custom,
            json!({
                "event": event,
                "timestamp": timestamp,
                "customer": { "email": email },
                "product": { "id": "prod_K123" }
            }),
        )
    }

    fn workspace_with_pro_plan() -> OwnerWorkspace {
        let mut workspace = OwnerWorkspace::default();
        workspace
            .mappings
            .upsert(PlanMapping::new("prod_K123", "Plano Pro", true))
            .unwrap();
        workspace
    }

    // =========================================================================
    // Approved at T0 on a monthly plan, reconciled at T0+31d - expired
    // =========================================================================
    #[test]
    fn test_recurring_approval_lapses_after_period() {
        let ingestor = Ingestor::default();
        let mut workspace = workspace_with_pro_plan();
        let t0 = datetime!(2024-05-01 10:00 UTC);

        ingestor
            .ingest(
                OwnerId::new(),
                &mut workspace,
                &custom("order_approved", "a@x.com", "2024-05-01T10:00:00Z"),
                t0,
            )
            .unwrap();
        assert_eq!(workspace.events()[0].expiry_date, Some(t0 + Duration::days(30)));

        let during = reconcile(workspace.events(), t0 + Duration::days(29));
        assert_eq!(during[0].effective_status, EffectiveStatus::Active);

        let after = reconcile(workspace.events(), t0 + Duration::days(31));
        assert_eq!(after[0].effective_status, EffectiveStatus::Expired);
        assert!(after[0].is_churned());
    }

    // =========================================================================
    // Approved 10:00 then canceled 11:00 - canceled, access kept until expiry
    // =========================================================================
    #[test]
    fn test_most_recent_wins_through_ingestion() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = workspace_with_pro_plan();
        let now = datetime!(2024-06-01 12:00 UTC);

        ingestor
            .ingest(owner, &mut workspace, &custom("order_approved", "a@x.com", "2024-06-01T10:00:00Z"), now)
            .unwrap();
        ingestor
            .ingest(owner, &mut workspace, &custom("subscription_canceled", "a@x.com", "2024-06-01T11:00:00Z"), now)
            .unwrap();

        let states = reconcile(workspace.events(), now);
        assert_eq!(states[0].effective_status, EffectiveStatus::Canceled);
        assert!(states[0].has_access());
    }

    // =========================================================================
    // Late-arriving older event does not override the newer one
    // =========================================================================
    #[test]
    fn test_backfill_does_not_override() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = workspace_with_pro_plan();
        let now = datetime!(2024-06-01 12:00 UTC);

        ingestor
            .ingest(owner, &mut workspace, &custom("order_approved", "a@x.com", "2024-06-01T10:00:00Z"), now)
            .unwrap();
        ingestor
            .ingest(owner, &mut workspace, &custom("subscription_expired", "a@x.com", "2024-05-20T10:00:00Z"), now)
            .unwrap();

        let states = reconcile(workspace.events(), now);
        assert_eq!(states[0].effective_status, EffectiveStatus::Active);
    }

    // =========================================================================
    // Projection is a pure function of (log, now)
    // =========================================================================
    #[test]
    fn test_projection_is_idempotent() {
        let ingestor = Ingestor::default();
        let owner = OwnerId::new();
        let mut workspace = workspace_with_pro_plan();
        let now = datetime!(2024-06-01 12:00 UTC);

        for (event, email, at) in [
            ("order_approved", "a@x.com", "2024-04-01T10:00:00Z"),
            ("order_approved", "b@x.com", "2024-05-25T10:00:00Z"),
            ("subscription_canceled", "b@x.com", "2024-05-26T10:00:00Z"),
            ("subscription_expired", "c@x.com", "2024-05-26T10:00:00Z"),
        ] {
            ingestor
                .ingest(owner, &mut workspace, &custom(event, email, at), now)
                .unwrap();
        }
        let before = workspace.events().to_vec();

        let first = reconcile(workspace.events(), now);
        let second = reconcile(workspace.events(), now);
        assert_eq!(first, second);
        assert_eq!(workspace.events(), before.as_slice());

        let statuses: Vec<EffectiveStatus> = first.iter().map(|s| s.effective_status).collect();
        assert_eq!(
            statuses,
            vec![
                EffectiveStatus::Expired,
                EffectiveStatus::Canceled,
                EffectiveStatus::Expired
            ]
        );
    }
}

#[cfg(test)]
mod mapping_tests {
    use crate::error::EngineError;
    use crate::mapping::{PlanMapping, PlanMappingTable, UpsertOutcome};

    // =========================================================================
    // Resolution stays stable until the mapping for that id changes
    // =========================================================================
    #[test]
    fn test_resolution_is_deterministic() {
        let mut table = PlanMappingTable::new();
        table.upsert(PlanMapping::new("prod_1", "Basic", false)).unwrap();
        table.upsert(PlanMapping::new("prod_2", "Pro", true)).unwrap();

        let first = table.resolve("prod_1").unwrap().clone();
        for _ in 0..3 {
            assert_eq!(table.resolve("prod_1").unwrap(), &first);
        }

        // unrelated change leaves prod_1 alone
        table.upsert(PlanMapping::new("prod_2", "Pro Plus", true)).unwrap();
        assert_eq!(table.resolve("prod_1").unwrap(), &first);

        let outcome = table.upsert(PlanMapping::new("prod_1", "Basic v2", false)).unwrap();
        assert_eq!(outcome, UpsertOutcome::Replaced(first));
        assert_eq!(table.resolve("prod_1").unwrap().internal_plan_name, "Basic v2");
    }

    #[test]
    fn test_no_fuzzy_matching() {
        let mut table = PlanMappingTable::new();
        table.upsert(PlanMapping::new("prod_1", "Basic", false)).unwrap();
        for near_miss in ["PROD_1", "prod_1 ", "prod_", "prod_10"] {
            assert!(
                matches!(
                    table.resolve(near_miss),
                    Err(EngineError::UnresolvedMapping { .. })
                ),
                "{near_miss:?} should not resolve"
            );
        }
    }
}

#[cfg(test)]
mod delivery_tests {
    use crate::automator::PlanAutomator;
    use crate::config::EngineConfig;
    use crate::delivery::EndpointConfig;
    use crate::event::{OwnerId, Platform};
    use crate::ingest::{IngestOutcome, RawPayload};
    use crate::store::OwnerStore;
    use serde_json::json;
    use std::time::Duration;

    // =========================================================================
    // Failed delivery - exactly one outcome, event log unchanged
    // =========================================================================
    #[tokio::test]
    async fn test_failed_delivery_records_one_outcome() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let service = PlanAutomator::new(&EngineConfig::default(), OwnerStore::new_in_memory());
        let owner = OwnerId::new();
        service
            .set_endpoint(owner, EndpointConfig::new(format!("{}/hook", server.url()), None))
            .await
            .unwrap();
        let IngestOutcome::Recorded { event, .. } = service
            .ingest(
                owner,
                RawPayload::new(
                    Platform::Custom,
                    json!({
                        "event": "order_approved",
                        "customer": { "email": "a@x.com" },
                        "product": { "id": "p" }
                    }),
                ),
            )
            .await
            .unwrap()
        else {
            panic!("expected recorded event");
        };
        let log_before = service.events(owner).await;

        let outcome = service.deliver(owner, event.id).await.unwrap();

        assert!(!outcome.success);
        assert_eq!(outcome.http_status_or_error, "503 Service Unavailable");
        assert_eq!(service.deliveries(owner).await.len(), 1);
        assert_eq!(service.events(owner).await, log_before);
    }

    // =========================================================================
    // Slow endpoint - bounded by the configured timeout, recorded as failure
    // =========================================================================
    #[tokio::test]
    async fn test_timeout_is_recorded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // accept and never answer
        let _server = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let config = EngineConfig {
            delivery_timeout: Duration::from_millis(200),
            ..EngineConfig::default()
        };
        let service = PlanAutomator::new(&config, OwnerStore::new_in_memory());
        let owner = OwnerId::new();
        service
            .set_endpoint(owner, EndpointConfig::new(format!("http://{}/hook", addr), None))
            .await
            .unwrap();
        let IngestOutcome::Recorded { event, .. } = service
            .ingest(
                owner,
                RawPayload::new(
                    Platform::Custom,
                    json!({ "event": "subscription_expired", "customer": { "email": "a@x.com" } }),
                ),
            )
            .await
            .unwrap()
        else {
            panic!("expected recorded event");
        };

        let outcome = service.deliver(owner, event.id).await.unwrap();
        assert!(!outcome.success);
        assert!(
            outcome.http_status_or_error.starts_with("timeout"),
            "{}",
            outcome.http_status_or_error
        );
    }
}
