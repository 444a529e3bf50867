use std::any::Any;

use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use replay_core::error::CoreError;
use replay_core::storage::StorageError;
use replay_pipeline::PipelineError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps domain and pipeline errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `replay_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An upload that ended without a recorded session.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Reading stored records failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The request body exceeded the configured upload limit.
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    /// The request did not complete within `REQUEST_TIMEOUT_SECS`.
    #[error("Request timed out")]
    Timeout,

    /// A handler panicked; carries the panic message for the log.
    #[error("Handler panicked: {0}")]
    Panic(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

fn internal(err: &dyn std::fmt::Display) -> (StatusCode, &'static str, String) {
    tracing::error!(error = %err, "Internal error");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        "INTERNAL_ERROR",
        "An internal error occurred".to_string(),
    )
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Core(CoreError::Validation(msg)) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }

            // --- Pipeline errors ---
            AppError::Pipeline(err) => match err {
                PipelineError::Input(msg) => {
                    (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone())
                }
                PipelineError::EncoderUnavailable(detail) => {
                    tracing::error!(error = %detail, "Video encoder unavailable");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "ENCODER_UNAVAILABLE",
                        "Video conversion failed: no encoder available".to_string(),
                    )
                }
                PipelineError::EncodeFailed(detail) => {
                    tracing::error!(error = %detail, "Video conversion failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "VIDEO_CONVERSION_FAILED",
                        "Video conversion failed".to_string(),
                    )
                }
                PipelineError::Storage(e) => internal(e),
            },

            AppError::Storage(e) => internal(e),

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", msg.clone())
            }
            AppError::Timeout => (
                StatusCode::REQUEST_TIMEOUT,
                "REQUEST_TIMEOUT",
                "Request timed out".to_string(),
            ),
            AppError::Panic(detail) => internal(detail),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Panic handler for `CatchPanicLayer::custom`.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic payload".to_string()
    };
    AppError::Panic(detail).into_response()
}

/// `TimeoutLayer` answers with an empty 408; give it the JSON error body.
pub async fn timeout_as_json(response: Response) -> Response {
    if response.status() == StatusCode::REQUEST_TIMEOUT
        && !response.headers().contains_key(CONTENT_TYPE)
    {
        tracing::warn!("Request timed out");
        return AppError::Timeout.into_response();
    }
    response
}
