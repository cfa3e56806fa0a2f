use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::error;

use crate::mastery::PipelineError;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

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

pub fn created<T: Serialize>(data: T) -> Response {
    (
        StatusCode::CREATED,
        Json(SuccessResponse {
            success: true,
            data,
        }),
    )
        .into_response()
}

#[derive(Debug, Clone)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    is_operational: bool,
    details: Option<serde_json::Value>,
}

impl AppError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::operational(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
            is_operational: false,
            details: None,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
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
            details: None,
        }
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let status = match &err {
            PipelineError::InvalidInput(_) | PipelineError::MalformedSubmission { .. } => {
                StatusCode::BAD_REQUEST
            }
            PipelineError::NoTranscript(_) | PipelineError::InsufficientQuizItems { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            PipelineError::SourceUnavailable(_) | PipelineError::Generation(_) => {
                StatusCode::BAD_GATEWAY
            }
            PipelineError::SessionNotFound(_) | PipelineError::QuizNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            PipelineError::SessionConflict(_) => StatusCode::CONFLICT,
        };
        Self::operational(status, err.code(), err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = if self.is_operational {
            self.message
        } else {
            error!(code = %self.code, message = %self.message, "internal error");
            "Internal server error".to_string()
        };

        let body = ErrorResponse {
            success: false,
            error: message,
            code: self.code,
            details: self.details,
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
        details: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn pipeline_errors_map_to_statuses() {
        let cases = [
            (PipelineError::invalid_input("x"), StatusCode::BAD_REQUEST),
            (
                PipelineError::MalformedSubmission { expected: 6, actual: 4 },
                StatusCode::BAD_REQUEST,
            ),
            (
                PipelineError::InsufficientQuizItems { valid: 1, required: 3 },
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (PipelineError::generation("x"), StatusCode::BAD_GATEWAY),
            (PipelineError::SessionNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (PipelineError::QuizNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (PipelineError::conflict("x"), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            let code = err.code();
            let app: AppError = err.into();
            assert_eq!(app.status(), status);
            assert_eq!(app.code(), code);
        }
    }

    #[test]
    fn internal_errors_are_masked() {
        let response = AppError::internal("db password leaked").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
