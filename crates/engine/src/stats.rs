//! Delivery statistics for the dashboard

use serde::Serialize;
use time::OffsetDateTime;

use crate::event::DeliveryOutcome;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DeliveryStats {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Percentage rounded to one decimal; 0.0 with no deliveries
    pub success_rate: f64,
}

pub fn delivery_stats(outcomes: &[DeliveryOutcome]) -> DeliveryStats {
    let total = outcomes.len();
    let succeeded = outcomes.iter().filter(|o| o.success).count();
    let success_rate = if total == 0 {
        0.0
    } else {
        (succeeded as f64 / total as f64 * 1000.0).round() / 10.0
    };

    DeliveryStats {
        total,
        succeeded,
        failed: total - succeeded,
        success_rate,
    }
}

/// Deliveries that fell in the same wall-clock minute
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineBucket {
    #[serde(with = "time::serde::rfc3339")]
    pub minute: OffsetDateTime,
    pub succeeded: usize,
    pub failed: usize,
}

/// Outcomes in chronological order, folded into per-minute buckets
pub fn delivery_timeline(outcomes: &[DeliveryOutcome]) -> Vec<TimelineBucket> {
    let mut sorted: Vec<&DeliveryOutcome> = outcomes.iter().collect();
    sorted.sort_by_key(|o| o.attempted_at);

    let mut buckets: Vec<TimelineBucket> = Vec::new();
    for outcome in sorted {
        let minute = truncate_to_minute(outcome.attempted_at);
        if buckets.last().map_or(true, |last| last.minute != minute) {
            buckets.push(TimelineBucket {
                minute,
                succeeded: 0,
                failed: 0,
            });
        }
        if let Some(bucket) = buckets.last_mut() {
            if outcome.success {
                bucket.succeeded += 1;
            } else {
                bucket.failed += 1;
            }
        }
    }
    buckets
}

fn truncate_to_minute(at: OffsetDateTime) -> OffsetDateTime {
    at.replace_second(0)
        .and_then(|t| t.replace_nanosecond(0))
        .unwrap_or(at)
}
