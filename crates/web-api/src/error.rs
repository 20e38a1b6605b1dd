use application::{ApplicationError, ErrorCode};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorBody {
                code,
                message: message.into(),
                details: None,
            },
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, ErrorCode::ValidationError.as_str(), message)
    }

    pub fn payload_too_large(limit: usize) -> Self {
        Self::new(
            StatusCode::PAYLOAD_TOO_LARGE,
            "PAYLOAD_TOO_LARGE",
            format!("request body exceeds {limit} bytes"),
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<ApplicationError> for ApiError {
    fn from(error: ApplicationError) -> Self {
        let code = error.code().as_str();
        match error {
            ApplicationError::Authentication(message) => {
                ApiError::new(StatusCode::UNAUTHORIZED, code, message)
            }
            ApplicationError::Authorization { message, .. } => {
                ApiError::new(StatusCode::FORBIDDEN, code, message)
            }
            ApplicationError::Validation {
                message, details, ..
            } => {
                let mut api = ApiError::new(StatusCode::BAD_REQUEST, code, message);
                api.body.details = details;
                api
            }
            err @ ApplicationError::NotFound { .. } => {
                ApiError::new(StatusCode::NOT_FOUND, code, err.to_string())
            }
            ApplicationError::Persistence(detail) => {
                tracing::error!(error = %detail, "持久化失败");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    code,
                    "Internal server error, please retry later",
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
