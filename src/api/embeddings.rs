use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use tracing::debug;

use super::parse_json_body;
use crate::error::{into_axum_response, GatewayError};
use crate::observability::token_counter::embedding_usage;
use crate::protocol::openai_chat::{EmbeddingRequest, EmbeddingResponse};
use crate::state::AppState;

/// `POST /v1/embeddings`.
pub async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    match embed(&state, &body).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => into_axum_response(&err),
    }
}

async fn embed(state: &AppState, body: &[u8]) -> Result<EmbeddingResponse, GatewayError> {
    let request: EmbeddingRequest = parse_json_body(body)?;
    let inputs = request.input.as_slice().to_vec();
    debug!(inputs = inputs.len(), "embedding request");

    let usage = embedding_usage(inputs.iter().map(String::as_str));
    let embedder = state.embedder();
    let embeddings = tokio::task::spawn_blocking(move || {
        inputs
            .iter()
            .map(|text| embedder.embed(text))
            .collect::<Result<Vec<_>, _>>()
    })
    .await
    .map_err(|e| GatewayError::Internal(format!("embedding task failed: {e}")))??;

    let model = if request.model.is_empty() {
        state.model_name().to_owned()
    } else {
        request.model
    };
    Ok(EmbeddingResponse::new(model, embeddings, usage))
}
