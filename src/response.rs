use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::{error, warn};

use crate::cognitive::EngineError;

#[derive(Debug, Serialize)]
pub struct SuccessResponse<T> {
    pub success: bool,
    pub data: T,
}

pub fn ok<T: Serialize>(data: T) -> Response {
    Json(SuccessResponse {
        success: true,
        data,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    is_operational: bool,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::operational(StatusCode::CONFLICT, code, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::operational(StatusCode::SERVICE_UNAVAILABLE, code, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            is_operational: false,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    fn operational(
        status: StatusCode,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            is_operational: true,
        }
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let code = err.code();
        match &err {
            EngineError::InvalidSignal(_) => Self::validation(err.to_string()),
            EngineError::StaleReview { .. } => Self::conflict(code, err.to_string()),
            EngineError::NotFound(_) => Self::not_found(err.to_string()),
            EngineError::ProfileConflict { .. } | EngineError::SessionClosed => {
                warn!(code, error = %err, "retryable engine error");
                Self::unavailable(code, "learner state is busy, retry shortly")
            }
            EngineError::DeliveryFailure(_) | EngineError::Store(_) => {
                error!(code, error = %err, "engine failure");
                Self {
                    code: code.to_string(),
                    ..Self::internal(err.to_string())
                }
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = if self.is_operational {
            self.message
        } else {
            "internal server error".to_string()
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: self.code,
        };

        (self.status, Json(body)).into_response()
    }
}

pub fn json_error(
    status: StatusCode,
    code: impl Into<String>,
    message: impl Into<String>,
) -> AppError {
    AppError {
        status,
        code: code.into(),
        message: message.into(),
        is_operational: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_engine_errors_map_to_statuses() {
        let stale: AppError = EngineError::StaleReview {
            item_id: "A".into(),
            last_reviewed_at: Utc::now(),
            received_at: Utc::now(),
        }
        .into();
        assert_eq!(stale.status(), StatusCode::CONFLICT);
        assert_eq!(stale.code(), "STALE_REVIEW");

        let conflict: AppError = EngineError::ProfileConflict {
            learner_id: "amy".into(),
            attempts: 6,
        }
        .into();
        assert_eq!(conflict.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(conflict.code(), "PROFILE_CONFLICT");

        let missing: AppError = EngineError::NotFound("learner amy".into()).into();
        assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    }
}
