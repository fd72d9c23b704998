//! Workspace Invariants Module
//!
//! Runnable consistency checks over an owner's workspace. They can be run
//! after any replay, snapshot load or periodic sweep to confirm the log is in
//! a state the reconciler can trust.
//!
//! Checks only read; they never repair.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::event::{EventType, OwnerId};
use crate::store::OwnerWorkspace;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    pub owner_id: OwnerId,
    /// Events involved, when the violation is about specific events
    pub event_ids: Vec<Uuid>,
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - reconciliation may grant or revoke access wrongly
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - informational, usually an owner action item
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    #[serde(with = "time::serde::rfc3339")]
    pub checked_at: OffsetDateTime,
    pub checks_run: usize,
    pub checks_passed: usize,
    pub checks_failed: usize,
    pub violations: Vec<InvariantViolation>,
    pub healthy: bool,
}

type Check = fn(&InvariantChecker<'_>) -> Vec<InvariantViolation>;

const CHECKS: &[(&str, Check)] = &[
    ("unique_event_ids", |c| c.check_unique_event_ids()),
    ("increasing_sequence", |c| c.check_increasing_sequence()),
    ("unique_source_events", |c| c.check_unique_source_events()),
    ("expired_expiry_matches_timestamp", |c| c.check_expired_expiry()),
    ("approved_expiry_matches_plan", |c| c.check_approved_expiry()),
    ("unresolved_now_mappable", |c| c.check_unresolved_now_mappable()),
];

/// Read-only checker over one owner's workspace
pub struct InvariantChecker<'a> {
    owner: OwnerId,
    workspace: &'a OwnerWorkspace,
}

impl<'a> InvariantChecker<'a> {
    pub fn new(owner: OwnerId, workspace: &'a OwnerWorkspace) -> Self {
        Self { owner, workspace }
    }

    /// Run all invariant checks and return summary
    pub fn run_all_checks(&self, now: OffsetDateTime) -> InvariantCheckSummary {
        let violations: Vec<InvariantViolation> =
            CHECKS.iter().flat_map(|(_, check)| check(self)).collect();

        let checks_run = CHECKS.len();
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<HashSet<_>>()
            .len();

        InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed: checks_run - checks_failed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        }
    }

    /// Run a single invariant check by name; `None` for unknown names
    pub fn run_check(&self, name: &str) -> Option<Vec<InvariantViolation>> {
        CHECKS
            .iter()
            .find(|(check_name, _)| *check_name == name)
            .map(|(_, check)| check(self))
    }

    pub fn available_checks() -> Vec<&'static str> {
        CHECKS.iter().map(|(name, _)| *name).collect()
    }

    fn violation(
        &self,
        invariant: &str,
        event_ids: Vec<Uuid>,
        description: String,
        context: serde_json::Value,
        severity: ViolationSeverity,
    ) -> InvariantViolation {
        InvariantViolation {
            invariant: invariant.to_string(),
            owner_id: self.owner,
            event_ids,
            description,
            context,
            severity,
        }
    }

    /// Event ids are unique within the log
    fn check_unique_event_ids(&self) -> Vec<InvariantViolation> {
        let mut counts: HashMap<Uuid, usize> = HashMap::new();
        for event in self.workspace.events() {
            *counts.entry(event.id).or_default() += 1;
        }

        let mut duplicated: Vec<(Uuid, usize)> =
            counts.into_iter().filter(|(_, count)| *count > 1).collect();
        duplicated.sort();
        duplicated
            .into_iter()
            .map(|(id, count)| {
                self.violation(
                    "unique_event_ids",
                    vec![id],
                    format!("Event id appears {} times in the log", count),
                    serde_json::json!({ "count": count }),
                    ViolationSeverity::Critical,
                )
            })
            .collect()
    }

    /// Sequences strictly increase in append order. Tie-breaking relies on it.
    fn check_increasing_sequence(&self) -> Vec<InvariantViolation> {
        self.workspace
            .events()
            .windows(2)
            .filter(|pair| pair[1].sequence <= pair[0].sequence)
            .map(|pair| {
                self.violation(
                    "increasing_sequence",
                    vec![pair[0].id, pair[1].id],
                    format!(
                        "Sequence {} follows {} in the log",
                        pair[1].sequence, pair[0].sequence
                    ),
                    serde_json::json!({
                        "previous": pair[0].sequence,
                        "next": pair[1].sequence,
                    }),
                    ViolationSeverity::Critical,
                )
            })
            .collect()
    }

    /// At most one event per platform notification
    fn check_unique_source_events(&self) -> Vec<InvariantViolation> {
        let mut seen: HashMap<(String, &str), Vec<Uuid>> = HashMap::new();
        for event in self.workspace.events() {
            if let Some(source_id) = event.source_event_id.as_deref() {
                seen.entry((event.platform.to_string(), source_id))
                    .or_default()
                    .push(event.id);
            }
        }

        let mut groups: Vec<((String, &str), Vec<Uuid>)> =
            seen.into_iter().filter(|(_, ids)| ids.len() > 1).collect();
        groups.sort();
        groups
            .into_iter()
            .map(|((platform, source_id), ids)| {
                self.violation(
                    "unique_source_events",
                    ids.clone(),
                    format!(
                        "{} notification {} was recorded {} times",
                        platform,
                        source_id,
                        ids.len()
                    ),
                    serde_json::json!({
                        "platform": platform,
                        "source_event_id": source_id,
                    }),
                    ViolationSeverity::High,
                )
            })
            .collect()
    }

    /// An expired event's expiry is its own timestamp
    fn check_expired_expiry(&self) -> Vec<InvariantViolation> {
        self.workspace
            .events()
            .iter()
            .filter(|e| e.event_type == EventType::Expired && e.expiry_date != Some(e.timestamp))
            .map(|e| {
                self.violation(
                    "expired_expiry_matches_timestamp",
                    vec![e.id],
                    "Expired event carries an expiry different from its timestamp".to_string(),
                    serde_json::json!({
                        "customer_email": e.customer_email,
                        "timestamp": e.timestamp.unix_timestamp(),
                        "expiry_date": e.expiry_date.map(|d| d.unix_timestamp()),
                    }),
                    ViolationSeverity::High,
                )
            })
            .collect()
    }

    /// Approved events on mapped plans have an expiry iff the plan recurs
    fn check_approved_expiry(&self) -> Vec<InvariantViolation> {
        self.workspace
            .events()
            .iter()
            .filter(|e| e.event_type == EventType::Approved)
            .filter_map(|e| {
                let mapping = e.plan.mapping()?;
                if mapping.is_recurring == e.expiry_date.is_some() {
                    return None;
                }
                Some(self.violation(
                    "approved_expiry_matches_plan",
                    vec![e.id],
                    if mapping.is_recurring {
                        "Approved event on a recurring plan has no expiry".to_string()
                    } else {
                        "Approved event on a one-time plan has an expiry".to_string()
                    },
                    serde_json::json!({
                        "customer_email": e.customer_email,
                        "plan": mapping.internal_plan_name,
                    }),
                    ViolationSeverity::Medium,
                ))
            })
            .collect()
    }

    /// Unresolved events whose product has since been mapped.
    /// Mappings are not applied retroactively, so the owner has to act.
    fn check_unresolved_now_mappable(&self) -> Vec<InvariantViolation> {
        self.workspace
            .events()
            .iter()
            .filter(|e| !e.plan.is_resolved())
            .filter_map(|e| {
                let mapping = self.workspace.mappings.resolve(e.plan.product_id()).ok()?;
                Some(self.violation(
                    "unresolved_now_mappable",
                    vec![e.id],
                    format!(
                        "Event for product {} was recorded before it was mapped to {}",
                        mapping.checkout_product_id, mapping.internal_plan_name
                    ),
                    serde_json::json!({
                        "customer_email": e.customer_email,
                        "product_id": mapping.checkout_product_id,
                    }),
                    ViolationSeverity::Low,
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{LifecycleEvent, Platform, PlanRef};
    use crate::mapping::PlanMapping;
    use time::macros::datetime;
    use time::Duration;

    const NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

    fn event(product: &str, event_type: EventType, source: Option<&str>) -> LifecycleEvent {
        LifecycleEvent {
            id: Uuid::new_v4(),
            sequence: 0,
            source_event_id: source.map(str::to_string),
            timestamp: NOW,
            platform: Platform::Kiwify,
            customer_email: "ana@x.com".to_string(),
            customer_name: None,
            plan: PlanRef::Unresolved {
                product_id: product.to_string(),
            },
            event_type,
            expiry_date: None,
        }
    }

    /// Round-trip through the snapshot format to plant states `append_event` never produces
    fn tampered(workspace: &OwnerWorkspace, f: impl FnOnce(&mut serde_json::Value)) -> OwnerWorkspace {
        let mut value = serde_json::to_value(workspace).unwrap();
        f(&mut value);
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_violation_severity_display() {
        assert_eq!(ViolationSeverity::Critical.to_string(), "CRITICAL");
        assert_eq!(ViolationSeverity::High.to_string(), "HIGH");
        assert_eq!(ViolationSeverity::Medium.to_string(), "MEDIUM");
        assert_eq!(ViolationSeverity::Low.to_string(), "LOW");
    }

    #[test]
    fn test_available_checks() {
        let checks = InvariantChecker::available_checks();
        assert_eq!(checks.len(), 6);
        assert!(checks.contains(&"increasing_sequence"));
        assert!(checks.contains(&"unresolved_now_mappable"));
    }

    #[test]
    fn test_healthy_workspace() {
        let mut workspace = OwnerWorkspace::default();
        let mut approved = event("prod_1", EventType::Approved, Some("evt_1"));
        approved.plan = PlanRef::Resolved(PlanMapping::new("prod_1", "Pro", true));
        approved.expiry_date = Some(NOW + Duration::days(30));
        workspace.append_event(approved);
        let mut expired = event("prod_1", EventType::Expired, Some("evt_2"));
        expired.expiry_date = Some(expired.timestamp);
        workspace.append_event(expired);

        let summary = InvariantChecker::new(OwnerId::new(), &workspace).run_all_checks(NOW);
        assert!(summary.healthy, "{:?}", summary.violations);
        assert_eq!(summary.checks_passed, 6);
    }

    #[test]
    fn test_unresolved_event_flagged_once_product_is_mapped() {
        let mut workspace = OwnerWorkspace::default();
        workspace.append_event(event("prod_late", EventType::Canceled, None));
        let checker_owner = OwnerId::new();

        let before = InvariantChecker::new(checker_owner, &workspace)
            .run_check("unresolved_now_mappable")
            .unwrap();
        assert!(before.is_empty());

        workspace
            .mappings
            .upsert(PlanMapping::new("prod_late", "Basic", false))
            .unwrap();
        let after = InvariantChecker::new(checker_owner, &workspace)
            .run_check("unresolved_now_mappable")
            .unwrap();
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].severity, ViolationSeverity::Low);
        assert_eq!(after[0].owner_id, checker_owner);
    }

    #[test]
    fn test_detects_tampered_sequences_and_duplicate_sources() {
        let mut workspace = OwnerWorkspace::default();
        workspace.append_event(event("p", EventType::Canceled, Some("evt_1")));
        workspace.append_event(event("p", EventType::Canceled, Some("evt_1")));

        let broken = tampered(&workspace, |value| {
            value["events"][1]["sequence"] = serde_json::json!(0);
        });
        let summary = InvariantChecker::new(OwnerId::new(), &broken).run_all_checks(NOW);

        assert!(!summary.healthy);
        assert_eq!(summary.checks_failed, 2);
        let names: HashSet<&str> = summary.violations.iter().map(|v| v.invariant.as_str()).collect();
        assert!(names.contains("increasing_sequence"));
        assert!(names.contains("unique_source_events"));
    }

    #[test]
    fn test_detects_expiry_mismatches() {
        let mut workspace = OwnerWorkspace::default();
        workspace.append_event(event("p", EventType::Expired, None));
        let mut one_time = event("p", EventType::Approved, None);
        one_time.plan = PlanRef::Resolved(PlanMapping::new("p", "Lifetime", false));
        one_time.expiry_date = Some(NOW);
        workspace.append_event(one_time);

        let checker = InvariantChecker::new(OwnerId::new(), &workspace);
        assert_eq!(
            checker.run_check("expired_expiry_matches_timestamp").unwrap().len(),
            1
        );
        assert_eq!(checker.run_check("approved_expiry_matches_plan").unwrap().len(), 1);
        assert!(checker.run_check("no_such_check").is_none());
    }
}
