use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::cognitive::normalizer::SignalRejection;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    signals_accepted: AtomicU64,
    rejected_unknown_kind: AtomicU64,
    rejected_malformed: AtomicU64,
    rejected_missing_field: AtomicU64,
    rejected_timestamp: AtomicU64,
    rejected_out_of_order: AtomicU64,
    duplicate_signals: AtomicU64,
    interventions_emitted: AtomicU64,
    delivery_failures: AtomicU64,
    reviews_applied: AtomicU64,
    reviews_stale: AtomicU64,
    reviews_duplicate: AtomicU64,
    estimator_underfit: AtomicU64,
    difficulty_adjustments: AtomicU64,
    alerts_opened: AtomicU64,
    alerts_closed: AtomicU64,
    profile_retries: AtomicU64,
    profile_conflicts: AtomicU64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub signals_accepted: u64,
    pub rejected_unknown_kind: u64,
    pub rejected_malformed: u64,
    pub rejected_missing_field: u64,
    pub rejected_timestamp: u64,
    pub rejected_out_of_order: u64,
    pub duplicate_signals: u64,
    pub interventions_emitted: u64,
    pub delivery_failures: u64,
    pub reviews_applied: u64,
    pub reviews_stale: u64,
    pub reviews_duplicate: u64,
    pub estimator_underfit: u64,
    pub difficulty_adjustments: u64,
    pub alerts_opened: u64,
    pub alerts_closed: u64,
    pub profile_retries: u64,
    pub profile_conflicts: u64,
}

impl MetricsSnapshot {
    pub fn signals_rejected(&self) -> u64 {
        self.rejected_unknown_kind
            + self.rejected_malformed
            + self.rejected_missing_field
            + self.rejected_timestamp
            + self.rejected_out_of_order
    }
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_accepted(&self) {
        bump(&self.signals_accepted);
    }

    pub fn record_rejection(&self, rejection: &SignalRejection) {
        let counter = match rejection {
            SignalRejection::UnknownKind(_) => &self.rejected_unknown_kind,
            SignalRejection::MalformedPayload { .. } => &self.rejected_malformed,
            SignalRejection::MissingField(_) => &self.rejected_missing_field,
            SignalRejection::InvalidTimestamp(_) => &self.rejected_timestamp,
            SignalRejection::OutOfOrder { .. } => &self.rejected_out_of_order,
            SignalRejection::Duplicate => &self.duplicate_signals,
        };
        bump(counter);
    }

    pub fn record_intervention(&self) {
        bump(&self.interventions_emitted);
    }

    pub fn record_delivery_failure(&self) {
        bump(&self.delivery_failures);
    }

    pub fn record_review_applied(&self) {
        bump(&self.reviews_applied);
    }

    pub fn record_review_stale(&self) {
        bump(&self.reviews_stale);
    }

    pub fn record_review_duplicate(&self) {
        bump(&self.reviews_duplicate);
    }

    pub fn record_underfit(&self) {
        bump(&self.estimator_underfit);
    }

    pub fn record_difficulty_adjustment(&self) {
        bump(&self.difficulty_adjustments);
    }

    pub fn record_alert_opened(&self) {
        bump(&self.alerts_opened);
    }

    pub fn record_alert_closed(&self) {
        bump(&self.alerts_closed);
    }

    pub fn record_profile_retry(&self) {
        bump(&self.profile_retries);
    }

    pub fn record_profile_conflict(&self) {
        bump(&self.profile_conflicts);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        MetricsSnapshot {
            signals_accepted: load(&self.signals_accepted),
            rejected_unknown_kind: load(&self.rejected_unknown_kind),
            rejected_malformed: load(&self.rejected_malformed),
            rejected_missing_field: load(&self.rejected_missing_field),
            rejected_timestamp: load(&self.rejected_timestamp),
            rejected_out_of_order: load(&self.rejected_out_of_order),
            duplicate_signals: load(&self.duplicate_signals),
            interventions_emitted: load(&self.interventions_emitted),
            delivery_failures: load(&self.delivery_failures),
            reviews_applied: load(&self.reviews_applied),
            reviews_stale: load(&self.reviews_stale),
            reviews_duplicate: load(&self.reviews_duplicate),
            estimator_underfit: load(&self.estimator_underfit),
            difficulty_adjustments: load(&self.difficulty_adjustments),
            alerts_opened: load(&self.alerts_opened),
            alerts_closed: load(&self.alerts_closed),
            profile_retries: load(&self.profile_retries),
            profile_conflicts: load(&self.profile_conflicts),
        }
    }
}
