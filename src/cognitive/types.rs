use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Visual,
    Textual,
    Mathematical,
    Procedural,
}

impl ContentType {
    pub const ALL: [ContentType; 4] = [
        ContentType::Visual,
        ContentType::Textual,
        ContentType::Mathematical,
        ContentType::Procedural,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visual => "visual",
            Self::Textual => "textual",
            Self::Mathematical => "mathematical",
            Self::Procedural => "procedural",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "visual" => Some(Self::Visual),
            "textual" => Some(Self::Textual),
            "mathematical" => Some(Self::Mathematical),
            "procedural" => Some(Self::Procedural),
            _ => None,
        }
    }

    pub fn is_conceptual(&self) -> bool {
        !matches!(self, Self::Procedural)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SignalKind {
    Hover,
    ScrollReversal,
    IdleGap,
    KeystrokeBurst,
    ReviewSubmitted,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hover => "hover",
            Self::ScrollReversal => "scroll-reversal",
            Self::IdleGap => "idle-gap",
            Self::KeystrokeBurst => "keystroke-burst",
            Self::ReviewSubmitted => "review-submitted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "hover" => Some(Self::Hover),
            "scroll-reversal" => Some(Self::ScrollReversal),
            "idle-gap" => Some(Self::IdleGap),
            "keystroke-burst" => Some(Self::KeystrokeBurst),
            "review-submitted" => Some(Self::ReviewSubmitted),
            _ => None,
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Self::Hover => 1,
            Self::ScrollReversal => 2,
            Self::IdleGap => 3,
            Self::KeystrokeBurst => 4,
            Self::ReviewSubmitted => 5,
        }
    }
}

/// Untyped event as it arrives from the page; `timestamp` is epoch milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawEvent {
    pub session_id: String,
    pub learner_id: String,
    pub context_id: String,
    pub kind: String,
    #[serde(default)]
    pub value: serde_json::Value,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKey {
    pub learner_id: String,
    pub context_id: String,
}

impl SessionKey {
    pub fn new(learner_id: impl Into<String>, context_id: impl Into<String>) -> Self {
        Self {
            learner_id: learner_id.into(),
            context_id: context_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewSubmission {
    #[serde(default)]
    pub review_id: Option<String>,
    pub item_id: String,
    pub content_type: ContentType,
    pub correct: bool,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub hint_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum InteractionSignal {
    Hover { duration_ms: u64 },
    ScrollReversal { count: u32 },
    IdleGap { gap_ms: u64 },
    KeystrokeBurst { keys: u32 },
    ReviewSubmitted(ReviewSubmission),
}

impl InteractionSignal {
    pub fn kind(&self) -> SignalKind {
        match self {
            Self::Hover { .. } => SignalKind::Hover,
            Self::ScrollReversal { .. } => SignalKind::ScrollReversal,
            Self::IdleGap { .. } => SignalKind::IdleGap,
            Self::KeystrokeBurst { .. } => SignalKind::KeystrokeBurst,
            Self::ReviewSubmitted(_) => SignalKind::ReviewSubmitted,
        }
    }

    /// Identity of a signal within a session, used to recognise replays.
    pub fn fingerprint(&self, timestamp_ms: i64) -> SignalFingerprint {
        let value = match self {
            Self::Hover { duration_ms } => *duration_ms,
            Self::ScrollReversal { count } => u64::from(*count),
            Self::IdleGap { gap_ms } => *gap_ms,
            Self::KeystrokeBurst { keys } => u64::from(*keys),
            Self::ReviewSubmitted(review) => {
                let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
                for byte in review.item_id.bytes() {
                    hash ^= u64::from(byte);
                    hash = hash.wrapping_mul(0x0100_0000_01b3);
                }
                hash ^ u64::from(review.correct)
            }
        };
        SignalFingerprint {
            timestamp_ms,
            kind: self.kind().tag(),
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalFingerprint {
    pub timestamp_ms: i64,
    pub kind: u8,
    pub value: u64,
}

/// A validated signal, ready for the session actor.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSignal {
    pub session_id: String,
    pub key: SessionKey,
    pub timestamp_ms: i64,
    pub signal: InteractionSignal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewRecord {
    pub review_id: String,
    pub learner_id: String,
    pub item_id: String,
    pub content_type: ContentType,
    pub reviewed_at: DateTime<Utc>,
    pub correct: bool,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub hint_count: u32,
}

impl ReviewRecord {
    pub fn from_submission(
        learner_id: &str,
        submission: &ReviewSubmission,
        reviewed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            review_id: submission
                .review_id
                .clone()
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            learner_id: learner_id.to_string(),
            item_id: submission.item_id.clone(),
            content_type: submission.content_type,
            reviewed_at,
            correct: submission.correct,
            latency_ms: submission.latency_ms,
            hint_count: submission.hint_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionEvent {
    pub learner_id: String,
    pub context_id: String,
    pub session_id: String,
    pub triggered_at: DateTime<Utc>,
    pub score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskCondition {
    LowEngagement,
    LowSuccess,
    LowTimeOnTask,
}

impl RiskCondition {
    pub const ALL: [RiskCondition; 3] = [
        RiskCondition::LowEngagement,
        RiskCondition::LowSuccess,
        RiskCondition::LowTimeOnTask,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowEngagement => "low-engagement",
            Self::LowSuccess => "low-success",
            Self::LowTimeOnTask => "low-time-on-task",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    /// `shortfall` is the relative distance below the floor, `(floor - value) / floor`.
    pub fn from_shortfall(shortfall: f64) -> Self {
        if shortfall >= 0.35 {
            Self::High
        } else if shortfall >= 0.15 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFactor {
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskAlert {
    pub alert_id: String,
    pub learner_id: String,
    pub condition: RiskCondition,
    pub level: RiskLevel,
    pub factors: Vec<RiskFactor>,
    pub week: u32,
    pub opened_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

impl RiskAlert {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DueItem {
    pub item_id: String,
    pub due_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOutcome {
    pub ended_at: DateTime<Utc>,
    #[serde(default)]
    pub scheduled_reviews: u32,
    #[serde(default)]
    pub completed_reviews: u32,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub correct: u32,
    #[serde(default)]
    pub time_on_task_secs: f64,
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_else(Utc::now)
}
