#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use bytes::Bytes;
use llmbase::backend::echo::{EchoEmbedder, EchoModel};
use llmbase::backend::{
    BackendError, BatchParams, ChatTemplate, GenerationParams, LanguageModel, LoadedModel,
    StepStream, Tokenizer,
};
use llmbase::batch::PaddedBatch;
use llmbase::config::AppConfig;
use llmbase::protocol::canonical::{FinishReason, GenerationStep};
use llmbase::routing::dispatch::dispatch_request;
use llmbase::state::AppState;

/// One scripted tick of a [`ScriptedModel`].
#[derive(Debug, Clone)]
pub enum Tick {
    Text(String),
    Done(String, FinishReason),
    Fail(String),
}

impl Tick {
    pub fn text(text: &str) -> Self {
        Tick::Text(text.to_string())
    }

    pub fn done(text: &str, reason: FinishReason) -> Self {
        Tick::Done(text.to_string(), reason)
    }

    pub fn fail(reason: &str) -> Self {
        Tick::Fail(reason.to_string())
    }
}

/// Model that replays a fixed script of cumulative texts.
///
/// Batch generation and tokenization are delegated to the echo model.
pub struct ScriptedModel {
    script: Vec<Tick>,
    inner: EchoModel,
    pulled: Arc<AtomicUsize>,
    tick_delay: Option<Duration>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Tick>) -> Self {
        Self {
            script,
            inner: EchoModel::new("scripted"),
            pulled: Arc::new(AtomicUsize::new(0)),
            tick_delay: None,
        }
    }

    /// Cumulative texts for `pieces`, the last one terminal with `reason`.
    pub fn splitting(pieces: &[&str], reason: FinishReason) -> Self {
        let mut text = String::new();
        let mut script = Vec::with_capacity(pieces.len());
        for (i, piece) in pieces.iter().enumerate() {
            text.push_str(piece);
            if i + 1 == pieces.len() {
                script.push(Tick::Done(text.clone(), reason));
            } else {
                script.push(Tick::Text(text.clone()));
            }
        }
        Self::new(script)
    }

    pub fn with_tick_delay(mut self, delay: Duration) -> Self {
        self.tick_delay = Some(delay);
        self
    }

    /// Shared counter of steps pulled from the model.
    pub fn pulled(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.pulled)
    }
}

impl LanguageModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn template(&self) -> ChatTemplate {
        self.inner.template()
    }

    fn tokenizer(&self) -> &dyn Tokenizer {
        self.inner.tokenizer()
    }

    fn stream_chat(&mut self, _params: &GenerationParams) -> Result<StepStream<'_>, BackendError> {
        let pulled = Arc::clone(&self.pulled);
        let delay = self.tick_delay;
        Ok(Box::new(self.script.clone().into_iter().map(move |tick| {
            pulled.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = delay {
                std::thread::sleep(delay);
            }
            match tick {
                Tick::Text(text) => Ok(GenerationStep::partial(text)),
                Tick::Done(text, reason) => Ok(GenerationStep::terminal(text, reason)),
                Tick::Fail(reason) => Err(BackendError::Generation(reason)),
            }
        })))
    }

    fn generate_padded(
        &mut self,
        batch: &PaddedBatch,
        params: &BatchParams,
    ) -> Result<Vec<Vec<u32>>, BackendError> {
        self.inner.generate_padded(batch, params)
    }
}

pub fn build_state_with(model: Box<dyn LanguageModel>, config: AppConfig) -> Arc<AppState> {
    Arc::new(AppState::new(
        config,
        LoadedModel {
            model,
            embedder: Arc::new(EchoEmbedder::new(config_dim())),
        },
    ))
}

pub fn build_state(model: impl LanguageModel + 'static) -> Arc<AppState> {
    build_state_with(Box::new(model), AppConfig::default())
}

fn config_dim() -> usize {
    AppConfig::default().model.embedding_dim
}

pub async fn send(state: &Arc<AppState>, method: Method, path: &str, body: Body) -> Response {
    let request = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .body(body)
        .unwrap();
    dispatch_request(Arc::clone(state), Arc::from(""), request)
        .await
        .unwrap()
}

pub async fn post_json(state: &Arc<AppState>, path: &str, body: serde_json::Value) -> Response {
    send(state, Method::POST, path, Body::from(body.to_string())).await
}

pub async fn body_bytes(response: Response) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// One `data:` frame of a streamed response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub data: String,
}

/// Split a complete streamed body into its blank-line separated frames.
pub fn sse_events(bytes: &[u8]) -> Vec<SseEvent> {
    let body = std::str::from_utf8(bytes).unwrap();
    assert!(body.is_empty() || body.ends_with("\n\n"), "truncated frame: {body:?}");
    body.split("\n\n")
        .filter(|frame| !frame.is_empty())
        .map(|frame| {
            let data = frame
                .strip_prefix("data: ")
                .unwrap_or_else(|| panic!("not a data frame: {frame:?}"));
            SseEvent {
                data: data.to_owned(),
            }
        })
        .collect()
}

pub fn is_done_event(event: &SseEvent) -> bool {
    event.data == "[DONE]"
}

pub fn chat_request(content: &str, stream: bool) -> serde_json::Value {
    serde_json::json!({
        "model": "chatglm3-6b",
        "messages": [{"role": "user", "content": content}],
        "stream": stream,
    })
}
