pub mod chat_completions;
pub mod embeddings;
pub mod health;
pub mod models;
mod streaming;

use serde::de::DeserializeOwned;

use crate::error::GatewayError;

/// Decode a JSON request body, mapping failures to `400`.
pub(crate) fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, GatewayError> {
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequest(format!("Invalid JSON body: {e}")))
}
