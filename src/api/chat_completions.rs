use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use tracing::{debug, warn};

use super::parse_json_body;
use super::streaming::stream_chat;
use crate::batch::BatchAssembler;
use crate::error::{into_axum_response, GatewayError};
use crate::fc::{parse_tool_call, ToolCallParseError};
use crate::observability::log_request_complete;
use crate::protocol::canonical::{ChatMessage, CompletionChoice, FinishReason, Role};
use crate::protocol::openai_chat::{ChatCompletionRequest, ChatCompletionResponse};
use crate::state::AppState;
use crate::util::unix_now_secs;

/// `POST /v1/chat/completions`.
///
/// `stream=true` answers with SSE chunks. Otherwise a single message is a
/// plain chat turn and several messages are completed as one padded batch,
/// one prompt per message.
pub async fn handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let start = Instant::now();
    match handle(state, &body, start).await {
        Ok(response) => response,
        Err(err) => {
            debug!("chat completion rejected: {err}");
            into_axum_response(&err)
        }
    }
}

async fn handle(
    state: Arc<AppState>,
    body: &[u8],
    start: Instant,
) -> Result<Response, GatewayError> {
    let request: ChatCompletionRequest = parse_json_body(body)?;
    request.validate()?;
    debug!(
        messages = request.messages.len(),
        stream = request.stream,
        tools = request.tools.is_some(),
        "chat completion request"
    );

    let model = response_model(&state, &request);
    if request.stream {
        let params = request.generation_params(state.config.features.default_max_tokens);
        let slot = state.slot().acquire().await?;
        return stream_chat(slot, params, state.sniff_policy(), model, unix_now_secs()).await;
    }
    if request.is_batch() {
        return complete_batch(&state, &request, model, start).await;
    }
    complete_single(&state, &request, model, start).await
}

async fn complete_single(
    state: &AppState,
    request: &ChatCompletionRequest,
    model: String,
    start: Instant,
) -> Result<Response, GatewayError> {
    let params = request.generation_params(state.config.features.default_max_tokens);
    let parse_tools = params.has_tools();
    let mut slot = state.slot().acquire().await?;
    let completion = tokio::task::spawn_blocking(move || slot.chat(&params))
        .await
        .map_err(|e| GatewayError::Internal(format!("generation task failed: {e}")))??;

    let text = completion.text.strip_prefix('\n').unwrap_or(&completion.text).trim();
    let mut message = ChatMessage::new(Role::Assistant, text);
    let mut finish_reason = completion.finish_reason;
    if parse_tools {
        match parse_tool_call(text) {
            Ok(call) => {
                debug!(name = %call.name, "parsed function call");
                message.function_call = Some(call);
                finish_reason = FinishReason::FunctionCall;
            }
            Err(ToolCallParseError::NotAToolCall) => {}
            Err(err) => warn!(
                "Failed to parse tool call, maybe the response is not a tool call: {err}"
            ),
        }
    }
    if message.function_call.is_none() {
        finish_reason = finish_reason.without_call();
    }

    log_request_complete(&model, &completion.usage, start);
    let choice = CompletionChoice {
        index: 0,
        message,
        finish_reason,
    };
    Ok(Json(ChatCompletionResponse::new(
        model,
        unix_now_secs(),
        vec![choice],
        Some(completion.usage),
    ))
    .into_response())
}

async fn complete_batch(
    state: &AppState,
    request: &ChatCompletionRequest,
    model: String,
    start: Instant,
) -> Result<Response, GatewayError> {
    let assembler = BatchAssembler::new(
        request.batch_params(state.config.features.default_max_length),
    );
    let prompts = request.batch_prompts();
    let mut slot = state.slot().acquire().await?;
    let choices = tokio::task::spawn_blocking(move || assembler.run(&mut **slot, &prompts))
        .await
        .map_err(|e| GatewayError::Internal(format!("batch task failed: {e}")))??;

    debug!(
        choices = choices.len(),
        elapsed_ms = start.elapsed().as_millis(),
        "batch completion finished"
    );
    Ok(Json(ChatCompletionResponse::new(model, unix_now_secs(), choices, None)).into_response())
}

/// The request's `model` echoed back, or the served model when it is empty.
fn response_model(state: &AppState, request: &ChatCompletionRequest) -> String {
    if request.model.is_empty() {
        state.model_name().to_owned()
    } else {
        request.model.clone()
    }
}
