use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::cognitive::{ContentType, EngineError, ProfileView, RiskAlert};
use crate::response::{ok, AppError};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileQuery {
    content_type: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AlertsData {
    alerts: Vec<RiskAlert>,
    open: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeletedData {
    learner_id: String,
    deleted: bool,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:learner_id", axum::routing::delete(delete_learner))
        .route("/:learner_id/alerts", get(alerts))
        .route("/:learner_id/profile", get(profile))
        .route("/:learner_id/export", get(export))
}

async fn alerts(
    State(state): State<AppState>,
    Path(learner_id): Path<String>,
) -> Result<Response, AppError> {
    let alerts = state.engine().alerts(&learner_id).await?;
    let open = alerts.iter().filter(|a| a.is_open()).count();
    Ok(ok(AlertsData { alerts, open }))
}

/// One category when `contentType` is given, otherwise every category.
async fn profile(
    State(state): State<AppState>,
    Path(learner_id): Path<String>,
    Query(query): Query<ProfileQuery>,
) -> Result<Response, AppError> {
    let engine = state.engine();
    match query.content_type.as_deref() {
        Some(raw) => {
            let content_type = ContentType::parse(raw)
                .ok_or_else(|| AppError::validation(format!("unknown content type: {raw}")))?;
            let view = engine
                .read_profile(&learner_id, content_type)
                .await?
                .ok_or_else(|| EngineError::NotFound(learner_id.clone()))?;
            Ok(ok(view))
        }
        None => {
            let mut views: Vec<ProfileView> = Vec::with_capacity(ContentType::ALL.len());
            for content_type in ContentType::ALL {
                match engine.read_profile(&learner_id, content_type).await? {
                    Some(view) => views.push(view),
                    None => return Err(EngineError::NotFound(learner_id.clone()).into()),
                }
            }
            Ok(ok(views))
        }
    }
}

async fn export(
    State(state): State<AppState>,
    Path(learner_id): Path<String>,
) -> Result<Response, AppError> {
    let snapshot = state
        .engine()
        .export_profile(&learner_id)
        .await?
        .ok_or_else(|| EngineError::NotFound(learner_id))?;
    Ok(ok(snapshot))
}

async fn delete_learner(
    State(state): State<AppState>,
    Path(learner_id): Path<String>,
) -> Result<Response, AppError> {
    let deleted = state.engine().delete_profile(&learner_id).await?;
    Ok(ok(DeletedData {
        learner_id,
        deleted,
    }))
}
