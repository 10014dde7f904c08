use std::convert::Infallible;
use std::time::Instant;

use axum::body::Body;
use axum::response::Response;
use bytes::Bytes;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::backend::{GenerationParams, SlotGuard};
use crate::error::GatewayError;
use crate::protocol::openai_chat::encoder::ChunkEncoder;
use crate::stream::pump::{self, FrameSink, PumpOutcome, StreamFrame};
use crate::stream::{SniffPolicy, StreamAssembler};

const STREAM_CHANNEL_CAPACITY: usize = 16;

/// Stream one generation as `chat.completion.chunk` SSE frames.
///
/// The generation runs on a blocking thread holding `slot`. Its first
/// message decides the response: a failure before any frame becomes a plain
/// JSON error, anything else starts the event stream. Dropping the response
/// body cancels the generation at its next step.
pub(crate) async fn stream_chat(
    slot: SlotGuard,
    params: GenerationParams,
    policy: std::sync::Arc<SniffPolicy>,
    model: String,
    created: u64,
) -> Result<Response, GatewayError> {
    let cancel = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<StreamFrame>(STREAM_CHANNEL_CAPACITY);

    let worker_cancel = cancel.clone();
    tokio::task::spawn_blocking(move || {
        let start = Instant::now();
        let mut slot = slot;
        let mut tx = tx;
        let mut assembler = StreamAssembler::new(policy, params.has_tools());
        let encoder = ChunkEncoder::new(&model, created);

        let outcome = match slot.stream_chat(&params) {
            Ok(steps) => pump::run(steps, &mut assembler, &encoder, &worker_cancel, &mut tx),
            Err(err) => {
                tx.fail(err.into());
                PumpOutcome::Failed
            }
        };
        debug!(
            model = %model,
            outcome = ?outcome,
            evaluations = assembler.sniffer().evaluations(),
            elapsed_ms = start.elapsed().as_millis(),
            "stream generation finished"
        );
    });

    // Cancels the worker if this future or the body is dropped.
    let cancel_on_drop = cancel.drop_guard();
    let first = match rx.recv().await {
        Some(StreamFrame::Data(bytes)) => bytes,
        Some(StreamFrame::Failed(err)) => return Err(err),
        None => {
            return Err(GatewayError::Internal(
                "generation ended without producing output".to_string(),
            ))
        }
    };

    let rest = futures_util::stream::unfold((rx, cancel_on_drop), |(mut rx, guard)| async move {
        match rx.recv().await? {
            StreamFrame::Data(bytes) => Some((bytes, (rx, guard))),
            StreamFrame::Failed(_) => None,
        }
    });
    let frames = futures_util::stream::once(std::future::ready(first)).chain(rest);
    Ok(sse_ok_response(Body::from_stream(
        frames.map(Ok::<Bytes, Infallible>),
    )))
}

#[inline]
pub(crate) fn sse_ok_response(body: Body) -> Response {
    let mut response = Response::new(body);
    *response.status_mut() = http::StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(
        http::header::CACHE_CONTROL,
        http::HeaderValue::from_static("no-cache"),
    );
    headers.insert(
        http::header::CONNECTION,
        http::HeaderValue::from_static("keep-alive"),
    );
    response
}
