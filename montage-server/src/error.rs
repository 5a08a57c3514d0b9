use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use montage_core::MontageError;
use serde_json::json;

/// Request-level failure rendered as a structured `{error}` body.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Internal {
        message: String,
        details: Option<String>,
    },
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, json!({ "error": message })),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, json!({ "error": message })),
            ApiError::Internal { message, details } => {
                let body = match details {
                    Some(details) => json!({ "error": message, "details": details }),
                    None => json!({ "error": message }),
                };
                (StatusCode::INTERNAL_SERVER_ERROR, body)
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<MontageError> for ApiError {
    fn from(err: MontageError) -> Self {
        match err {
            MontageError::SessionNotFound(id) => {
                ApiError::NotFound(format!("unknown upload session: {}", id))
            }
            MontageError::ValidationError(message) => ApiError::BadRequest(message),
            MontageError::ChunkCountMismatch { expected, received } => ApiError::BadRequest(
                format!("Expected {} chunks, received {}", expected, received),
            ),
            other => ApiError::Internal {
                message: other.to_string(),
                details: None,
            },
        }
    }
}
