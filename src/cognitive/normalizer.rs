use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::cognitive::config::NormalizerParams;
use crate::cognitive::metrics::EngineMetrics;
use crate::cognitive::types::{
    InteractionSignal, NormalizedSignal, RawEvent, ReviewSubmission, SessionKey, SignalKind,
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SignalRejection {
    #[error("unknown signal kind: {0}")]
    UnknownKind(String),
    #[error("malformed {kind} payload: {reason}")]
    MalformedPayload { kind: &'static str, reason: String },
    #[error("missing field: {0}")]
    MissingField(&'static str),
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(i64),
    #[error("signal at {timestamp_ms} is older than last applied signal at {watermark_ms}")]
    OutOfOrder { timestamp_ms: i64, watermark_ms: i64 },
    #[error("duplicate signal")]
    Duplicate,
}

impl SignalRejection {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownKind(_) => "UNKNOWN_KIND",
            Self::MalformedPayload { .. } => "MALFORMED_PAYLOAD",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::InvalidTimestamp(_) => "INVALID_TIMESTAMP",
            Self::OutOfOrder { .. } => "OUT_OF_ORDER",
            Self::Duplicate => "DUPLICATE",
        }
    }
}

/// Turns raw page events into typed signals. Rejections are counted and
/// logged here and never travel further.
pub struct SignalNormalizer {
    params: NormalizerParams,
    metrics: Arc<EngineMetrics>,
}

impl SignalNormalizer {
    pub fn new(params: NormalizerParams, metrics: Arc<EngineMetrics>) -> Self {
        Self { params, metrics }
    }

    pub fn normalize(&self, raw: &RawEvent, now_ms: i64) -> Result<NormalizedSignal, SignalRejection> {
        match self.classify(raw, now_ms) {
            Ok(signal) => {
                self.metrics.record_accepted();
                Ok(signal)
            }
            Err(rejection) => {
                self.metrics.record_rejection(&rejection);
                debug!(
                    session_id = %raw.session_id,
                    kind = %raw.kind,
                    code = rejection.code(),
                    reason = %rejection,
                    "signal dropped"
                );
                Err(rejection)
            }
        }
    }

    fn classify(&self, raw: &RawEvent, now_ms: i64) -> Result<NormalizedSignal, SignalRejection> {
        if raw.session_id.trim().is_empty() {
            return Err(SignalRejection::MissingField("sessionId"));
        }
        if raw.learner_id.trim().is_empty() {
            return Err(SignalRejection::MissingField("learnerId"));
        }
        if raw.context_id.trim().is_empty() {
            return Err(SignalRejection::MissingField("contextId"));
        }
        if raw.timestamp <= 0 || raw.timestamp > now_ms + self.params.max_future_skew_ms {
            return Err(SignalRejection::InvalidTimestamp(raw.timestamp));
        }

        let kind = SignalKind::parse(&raw.kind)
            .ok_or_else(|| SignalRejection::UnknownKind(raw.kind.clone()))?;

        let signal = match kind {
            SignalKind::Hover => InteractionSignal::Hover {
                duration_ms: bounded_u64(&raw.value, kind, self.params.max_hover_ms)?,
            },
            SignalKind::ScrollReversal => {
                let count = if raw.value.is_null() {
                    1
                } else {
                    bounded_u64(&raw.value, kind, u64::from(self.params.max_scroll_reversals))?
                };
                if count == 0 {
                    return Err(malformed(kind, "count must be at least 1"));
                }
                InteractionSignal::ScrollReversal { count: count as u32 }
            }
            SignalKind::IdleGap => InteractionSignal::IdleGap {
                gap_ms: bounded_u64(&raw.value, kind, self.params.max_idle_gap_ms)?,
            },
            SignalKind::KeystrokeBurst => InteractionSignal::KeystrokeBurst {
                keys: bounded_u64(&raw.value, kind, u64::from(self.params.max_keystroke_burst))?
                    as u32,
            },
            SignalKind::ReviewSubmitted => {
                InteractionSignal::ReviewSubmitted(self.review_payload(&raw.value)?)
            }
        };

        Ok(NormalizedSignal {
            session_id: raw.session_id.clone(),
            key: SessionKey::new(raw.learner_id.clone(), raw.context_id.clone()),
            timestamp_ms: raw.timestamp,
            signal,
        })
    }

    fn review_payload(&self, value: &Value) -> Result<ReviewSubmission, SignalRejection> {
        let kind = SignalKind::ReviewSubmitted;
        if !value.is_object() {
            return Err(malformed(kind, "expected an object"));
        }
        let submission: ReviewSubmission = serde_json::from_value(value.clone())
            .map_err(|e| malformed(kind, e.to_string()))?;
        if submission.item_id.trim().is_empty() {
            return Err(SignalRejection::MissingField("itemId"));
        }
        if submission.latency_ms > self.params.max_latency_ms {
            return Err(malformed(kind, "latencyMs out of range"));
        }
        if submission.hint_count > self.params.max_hint_count {
            return Err(malformed(kind, "hintCount out of range"));
        }
        Ok(submission)
    }
}

fn malformed(kind: SignalKind, reason: impl Into<String>) -> SignalRejection {
    SignalRejection::MalformedPayload {
        kind: kind.as_str(),
        reason: reason.into(),
    }
}

fn bounded_u64(value: &Value, kind: SignalKind, max: u64) -> Result<u64, SignalRejection> {
    let number = match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f.round() as u64)),
        Value::Null => return Err(SignalRejection::MissingField("value")),
        _ => None,
    };
    match number {
        Some(n) if n <= max => Ok(n),
        Some(n) => Err(malformed(kind, format!("value {n} exceeds {max}"))),
        None => Err(malformed(kind, "expected a non-negative number")),
    }
}
