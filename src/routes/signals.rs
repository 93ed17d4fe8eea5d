use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;

use crate::cognitive::{IngestAck, RawEvent};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/", post(ingest))
}

/// Accepts one event object or an array of them. Every element gets an ack,
/// including ones that are not valid JSON events.
async fn ingest(State(state): State<AppState>, body: Bytes) -> Response {
    let engine = state.engine();
    let value: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => {
            let ack = engine.reject_unparsable(e.to_string());
            return (StatusCode::ACCEPTED, Json(ack)).into_response();
        }
    };

    match value {
        Value::Array(items) => {
            let mut acks: Vec<IngestAck> = Vec::with_capacity(items.len());
            for item in items {
                acks.push(ingest_value(&state, item).await);
            }
            (StatusCode::ACCEPTED, Json(acks)).into_response()
        }
        other => {
            let ack = ingest_value(&state, other).await;
            (StatusCode::ACCEPTED, Json(ack)).into_response()
        }
    }
}

async fn ingest_value(state: &AppState, value: Value) -> IngestAck {
    match serde_json::from_value::<RawEvent>(value) {
        Ok(raw) => state.engine().ingest(raw).await,
        Err(e) => state.engine().reject_unparsable(e.to_string()),
    }
}
