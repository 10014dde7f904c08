use axum::http::StatusCode;

/// Liveness check: `200 OK` with an empty body.
#[must_use]
pub fn health_handler() -> StatusCode {
    StatusCode::OK
}
