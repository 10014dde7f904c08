use crate::backend::BackendError;
use crate::protocol::error_shapes::openai_error_payload;
use crate::stream::StreamIntegrityError;

/// Error type shared by the request handlers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Stream integrity error: {0}")]
    StreamIntegrity(#[from] StreamIntegrityError),
    #[error("Generation error: {0}")]
    Generation(#[from] BackendError),
    #[error("Model busy: {0}")]
    Busy(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category for status code selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Overloaded,
    ServerError,
}

impl GatewayError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            GatewayError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            GatewayError::Busy(_) => ErrorCategory::Overloaded,
            GatewayError::Config(_)
            | GatewayError::StreamIntegrity(_)
            | GatewayError::Generation(_)
            | GatewayError::Internal(_) => ErrorCategory::ServerError,
        }
    }
}

// ---------------------------------------------------------------------------
// Category -> HTTP status code
// ---------------------------------------------------------------------------

fn http_status_for_category(cat: ErrorCategory) -> http::StatusCode {
    match cat {
        ErrorCategory::InvalidRequest => http::StatusCode::BAD_REQUEST,
        ErrorCategory::Overloaded => http::StatusCode::SERVICE_UNAVAILABLE,
        ErrorCategory::ServerError => http::StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Format an error as (`status_code`, OpenAI-style JSON body).
#[must_use]
pub fn format_error(err: &GatewayError) -> (http::StatusCode, serde_json::Value) {
    let cat = err.category();
    let status = http_status_for_category(cat);
    (status, openai_error_payload(cat, &err.to_string()))
}

// ---------------------------------------------------------------------------
// Axum integration
// ---------------------------------------------------------------------------

/// Convert a `GatewayError` into an axum response.
#[must_use]
pub fn into_axum_response(err: &GatewayError) -> axum::response::Response {
    use axum::response::IntoResponse;
    let (status, body) = format_error(err);
    (status, axum::Json(body)).into_response()
}

impl axum::response::IntoResponse for GatewayError {
    fn into_response(self) -> axum::response::Response {
        into_axum_response(&self)
    }
}
