use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cognitive::{ContentType, DueItem};
use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
struct DueQuery {
    before: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DueData {
    content_type: ContentType,
    items: Vec<DueItem>,
    count: usize,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/:learner_id/:content_type", get(next_due))
}

async fn next_due(
    State(state): State<AppState>,
    Path((learner_id, content_type)): Path<(String, String)>,
    Query(query): Query<DueQuery>,
) -> Result<Response, AppError> {
    let content_type = ContentType::parse(&content_type)
        .ok_or_else(|| AppError::validation(format!("unknown content type: {content_type}")))?;
    let items = state
        .engine()
        .next_due(&learner_id, content_type, query.before)
        .await?;
    Ok(ok(DueData {
        content_type,
        count: items.len(),
        items,
    }))
}
