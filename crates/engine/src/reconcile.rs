//! Lifecycle reconciliation
//!
//! Folds an owner's event log into one [`CustomerAccessState`] per customer.
//! The projection is a pure function of the log and the reference time: it
//! never mutates the log and running it twice gives the same answer.
//!
//! Rules, per case-folded customer email:
//!
//! 1. The most recent event wins: greatest timestamp, ties broken by the later
//!    log sequence. Insertion order alone never decides (backfills happen).
//! 2. An `Expired` event means `Expired`.
//! 3. Otherwise a lapsed expiry date means `Expired`, whatever the event type.
//! 4. Otherwise `Canceled` stays `Canceled` (access until expiry), and
//!    everything else is `Active`.

use std::collections::BTreeMap;

use serde::Serialize;
use time::OffsetDateTime;

use crate::event::{customer_key, CustomerAccessState, EffectiveStatus, EventType, LifecycleEvent};

/// Status implied by a single event at `now`
pub fn effective_status(event: &LifecycleEvent, now: OffsetDateTime) -> EffectiveStatus {
    if event.event_type == EventType::Expired {
        return EffectiveStatus::Expired;
    }
    if event.expiry_date.is_some_and(|expiry| expiry < now) {
        return EffectiveStatus::Expired;
    }
    match event.event_type {
        EventType::Canceled => EffectiveStatus::Canceled,
        _ => EffectiveStatus::Active,
    }
}

/// Project the log into per-customer access states, ordered by email
pub fn reconcile(events: &[LifecycleEvent], now: OffsetDateTime) -> Vec<CustomerAccessState> {
    let mut latest: BTreeMap<String, &LifecycleEvent> = BTreeMap::new();

    for event in events {
        latest
            .entry(event.customer_key())
            .and_modify(|current| {
                if (event.timestamp, event.sequence) > (current.timestamp, current.sequence) {
                    *current = event;
                }
            })
            .or_insert(event);
    }

    latest
        .into_iter()
        .map(|(customer_email, event)| CustomerAccessState {
            customer_email,
            effective_status: effective_status(event, now),
            most_recent_event: event.clone(),
        })
        .collect()
}

/// Projection for a single customer
pub fn customer_state(
    events: &[LifecycleEvent],
    email: &str,
    now: OffsetDateTime,
) -> Option<CustomerAccessState> {
    let key = customer_key(email);
    let own: Vec<LifecycleEvent> = events
        .iter()
        .filter(|e| e.customer_key() == key)
        .cloned()
        .collect();
    reconcile(&own, now).into_iter().next()
}

/// Who has access right now
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccessSummary {
    pub total_customers: usize,
    pub active: usize,
    /// Canceled but still inside the paid window
    pub canceled_with_access: usize,
    pub with_access: usize,
    pub expired: usize,
}

pub fn access_summary(states: &[CustomerAccessState]) -> AccessSummary {
    let mut summary = AccessSummary {
        total_customers: states.len(),
        ..Default::default()
    };
    for state in states {
        match state.effective_status {
            EffectiveStatus::Active => summary.active += 1,
            EffectiveStatus::Canceled => summary.canceled_with_access += 1,
            EffectiveStatus::Expired => summary.expired += 1,
        }
        if state.has_access() {
            summary.with_access += 1;
        }
    }
    summary
}

/// Who has lost access. Kept separate from [`AccessSummary`]: a canceled
/// customer still counts toward access until the window lapses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ChurnSummary {
    pub total_customers: usize,
    pub churned: usize,
    /// Churned over total, 0.0 with no customers
    pub churn_rate: f64,
}

pub fn churn_summary(states: &[CustomerAccessState]) -> ChurnSummary {
    let churned = states.iter().filter(|s| s.is_churned()).count();
    let churn_rate = if states.is_empty() {
        0.0
    } else {
        churned as f64 / states.len() as f64
    };
    ChurnSummary {
        total_customers: states.len(),
        churned,
        churn_rate,
    }
}
