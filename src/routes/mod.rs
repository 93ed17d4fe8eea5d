mod health;
mod learners;
mod reviews;
mod schedule;
mod sessions;
mod signals;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Router;

use crate::response::json_error;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest("/api/v1/signals", signals::router())
        .nest("/api/v1/reviews", reviews::router())
        .nest("/api/v1/sessions", sessions::router())
        .nest("/api/v1/schedule", schedule::router())
        .nest("/api/v1/learners", learners::router())
        .fallback(fallback_handler)
        .with_state(state)
}

async fn fallback_handler() -> Response {
    json_error(StatusCode::NOT_FOUND, "NOT_FOUND", "route not found").into_response()
}
