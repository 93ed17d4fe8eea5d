use axum::extract::{Path, State};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::cognitive::SessionOutcome;
use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EndSessionRequest {
    ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    scheduled_reviews: u32,
    #[serde(default)]
    completed_reviews: u32,
    #[serde(default)]
    attempts: u32,
    #[serde(default)]
    correct: u32,
    #[serde(default)]
    time_on_task_secs: f64,
}

impl EndSessionRequest {
    fn into_outcome(self) -> SessionOutcome {
        SessionOutcome {
            ended_at: self.ended_at.unwrap_or_else(Utc::now),
            scheduled_reviews: self.scheduled_reviews,
            completed_reviews: self.completed_reviews,
            attempts: self.attempts,
            correct: self.correct,
            time_on_task_secs: self.time_on_task_secs.max(0.0),
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:learner_id/:context_id", get(snapshot))
        .route("/:learner_id/:context_id/flush", post(flush))
        .route("/:learner_id/:context_id/end", post(end_session))
}

async fn snapshot(
    State(state): State<AppState>,
    Path((learner_id, context_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    state
        .engine()
        .session_snapshot(&learner_id, &context_id)
        .await
        .map(ok)
        .ok_or_else(|| AppError::not_found(format!("no live session for {learner_id}/{context_id}")))
}

async fn flush(
    State(state): State<AppState>,
    Path((learner_id, context_id)): Path<(String, String)>,
) -> Result<Response, AppError> {
    state
        .engine()
        .flush_session(&learner_id, &context_id)
        .await
        .map(ok)
        .ok_or_else(|| AppError::not_found(format!("no live session for {learner_id}/{context_id}")))
}

/// The body is optional; without one the session is torn down and no
/// engagement is recorded.
async fn end_session(
    State(state): State<AppState>,
    Path((learner_id, context_id)): Path<(String, String)>,
    body: Option<Json<EndSessionRequest>>,
) -> Result<Response, AppError> {
    let outcome = body.map(|Json(req)| req.into_outcome());
    let summary = state
        .engine()
        .end_session(&learner_id, &context_id, outcome)
        .await?;
    Ok(ok(summary))
}
