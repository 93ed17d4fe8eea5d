use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::cognitive::MetricsSnapshot;
use crate::response::ok;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    store: &'static str,
    active_sessions: usize,
    start_time: String,
    uptime: u64,
    timestamp: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MetricsData {
    #[serde(flatten)]
    counters: MetricsSnapshot,
    signals_rejected: u64,
    active_sessions: usize,
    event_subscribers: usize,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/metrics", get(metrics))
}

async fn root(State(state): State<AppState>) -> Response {
    let response = HealthResponse {
        status: "ok",
        store: state.store_backend(),
        active_sessions: state.engine().sessions().active_sessions(),
        start_time: DateTime::<Utc>::from(state.started_at_system())
            .to_rfc3339_opts(SecondsFormat::Millis, true),
        uptime: state.uptime_seconds(),
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    };
    Json(response).into_response()
}

async fn metrics(State(state): State<AppState>) -> Response {
    let engine = state.engine();
    let counters = engine.metrics().snapshot();
    ok(MetricsData {
        signals_rejected: counters.signals_rejected(),
        counters,
        active_sessions: engine.sessions().active_sessions(),
        event_subscribers: engine.events().subscriber_count(),
    })
}
