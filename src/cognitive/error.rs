use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::cognitive::normalizer::SignalRejection;
use crate::cognitive::profile::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid signal: {0}")]
    InvalidSignal(#[from] SignalRejection),

    #[error("stale review for item {item_id}: received {received_at}, last applied {last_reviewed_at}")]
    StaleReview {
        item_id: String,
        last_reviewed_at: DateTime<Utc>,
        received_at: DateTime<Utc>,
    },

    #[error("profile {learner_id} still conflicting after {attempts} attempts")]
    ProfileConflict { learner_id: String, attempts: u32 },

    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("session is closed")]
    SessionClosed,

    #[error("learner not found: {0}")]
    NotFound(String),
}

impl EngineError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidSignal(rejection) => rejection.code(),
            Self::StaleReview { .. } => "STALE_REVIEW",
            Self::ProfileConflict { .. } => "PROFILE_CONFLICT",
            Self::DeliveryFailure(_) => "DELIVERY_FAILURE",
            Self::Store(_) => "STORE_ERROR",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::NotFound(_) => "NOT_FOUND",
        }
    }

    /// Whether the caller may resubmit the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProfileConflict { .. } | Self::Store(_) | Self::SessionClosed
        )
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
