use axum::extract::State;
use axum::response::Response;
use axum::routing::post;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::cognitive::{ContentType, ReviewRecord};
use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReviewRequest {
    review_id: Option<String>,
    learner_id: String,
    item_id: String,
    content_type: ContentType,
    reviewed_at: Option<DateTime<Utc>>,
    correct: bool,
    #[serde(default)]
    latency_ms: u64,
    #[serde(default)]
    hint_count: u32,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(submit_review))
}

async fn submit_review(
    State(state): State<AppState>,
    Json(payload): Json<ReviewRequest>,
) -> Result<Response, AppError> {
    if payload.learner_id.trim().is_empty() {
        return Err(AppError::validation("learnerId must not be empty"));
    }
    if payload.item_id.trim().is_empty() {
        return Err(AppError::validation("itemId must not be empty"));
    }

    let record = ReviewRecord {
        review_id: payload
            .review_id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        learner_id: payload.learner_id,
        item_id: payload.item_id,
        content_type: payload.content_type,
        reviewed_at: payload.reviewed_at.unwrap_or_else(Utc::now),
        correct: payload.correct,
        latency_ms: payload.latency_ms,
        hint_count: payload.hint_count,
    };

    let outcome = state.engine().record_review(record).await?;
    Ok(ok(outcome))
}
