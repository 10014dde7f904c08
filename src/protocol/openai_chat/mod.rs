pub mod encoder;

use serde::{Deserialize, Serialize};

use crate::backend::{BatchParams, GenerationParams};
use crate::error::GatewayError;
use crate::protocol::canonical::{ChatMessage, CompletionChoice, Role, UsageInfo};

const fn default_temperature() -> f64 {
    0.8
}

const fn default_top_p() -> f64 {
    0.8
}

const fn default_repetition_penalty() -> f64 {
    1.1
}

/// `POST /v1/chat/completions` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_beams: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(default)]
    pub echo: bool,
}

impl ChatCompletionRequest {
    /// Reject requests no generation could answer.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::InvalidRequest`] when `messages` is empty or
    /// ends with an assistant turn.
    pub fn validate(&self) -> Result<(), GatewayError> {
        match self.messages.last() {
            None => Err(GatewayError::InvalidRequest(
                "messages must not be empty".to_string(),
            )),
            Some(last) if last.role == Role::Assistant => Err(GatewayError::InvalidRequest(
                "the last message must not come from the assistant".to_string(),
            )),
            Some(_) => Ok(()),
        }
    }

    /// More than one message selects the padded-batch path.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.messages.len() > 1
    }

    #[must_use]
    pub fn generation_params(&self, default_max_tokens: u32) -> GenerationParams {
        GenerationParams {
            messages: self.messages.clone(),
            temperature: self.temperature,
            top_p: self.top_p,
            max_tokens: self.max_tokens.unwrap_or(default_max_tokens),
            repetition_penalty: self.repetition_penalty,
            tools: self.tools.clone(),
            echo: self.echo,
        }
    }

    #[must_use]
    pub fn batch_params(&self, default_max_length: u32) -> BatchParams {
        BatchParams {
            max_length: self.max_length.unwrap_or(default_max_length),
            num_beams: self.num_beams.unwrap_or(1),
            do_sample: true,
            top_p: self.top_p,
            temperature: self.temperature,
            repetition_penalty: self.repetition_penalty,
            eos_token_ids: Vec::new(),
        }
    }

    /// One prompt per message, in request order.
    #[must_use]
    pub fn batch_prompts(&self) -> Vec<String> {
        self.messages.iter().map(|m| m.content.clone()).collect()
    }
}

/// Non-streamed chat completion body.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionResponse {
    pub model: String,
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub choices: Vec<CompletionChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageInfo>,
}

impl ChatCompletionResponse {
    #[must_use]
    pub fn new(
        model: impl Into<String>,
        created: u64,
        choices: Vec<CompletionChoice>,
        usage: Option<UsageInfo>,
    ) -> Self {
        Self {
            model: model.into(),
            id: String::new(),
            object: "chat.completion",
            created,
            choices,
            usage,
        }
    }
}

/// One entry of `GET /v1/models`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelCard {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub owned_by: String,
}

impl ModelCard {
    #[must_use]
    pub fn new(id: impl Into<String>, created: u64) -> Self {
        Self {
            id: id.into(),
            object: "model".to_string(),
            created,
            owned_by: "owner".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelCard>,
}

impl ModelList {
    #[must_use]
    pub fn single(card: ModelCard) -> Self {
        Self {
            object: "list".to_string(),
            data: vec![card],
        }
    }
}

/// `input` of an embeddings request: one text or many.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EmbeddingInput {
    Single(String),
    Many(Vec<String>),
}

impl EmbeddingInput {
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        match self {
            EmbeddingInput::Single(text) => std::slice::from_ref(text),
            EmbeddingInput::Many(texts) => texts,
        }
    }
}

/// `POST /v1/embeddings` request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRequest {
    pub input: EmbeddingInput,
    #[serde(default)]
    pub model: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingData {
    pub object: &'static str,
    pub embedding: Vec<f32>,
    pub index: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct EmbeddingResponse {
    pub data: Vec<EmbeddingData>,
    pub model: String,
    pub object: &'static str,
    pub usage: UsageInfo,
}

impl EmbeddingResponse {
    #[must_use]
    pub fn new(model: impl Into<String>, embeddings: Vec<Vec<f32>>, usage: UsageInfo) -> Self {
        let data = embeddings
            .into_iter()
            .enumerate()
            .map(|(index, embedding)| EmbeddingData {
                object: "embedding",
                embedding,
                index: u32::try_from(index).unwrap_or(u32::MAX),
            })
            .collect();
        Self {
            data,
            model: model.into(),
            object: "list",
            usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let req: ChatCompletionRequest =
            serde_json::from_value(json!({"messages": [{"role": "user", "content": "hi"}]}))
                .unwrap();
        assert!((req.temperature - 0.8).abs() < f64::EPSILON);
        assert!((req.top_p - 0.8).abs() < f64::EPSILON);
        assert!((req.repetition_penalty - 1.1).abs() < f64::EPSILON);
        assert!(!req.stream);
        assert!(req.max_tokens.is_none());
        assert_eq!(req.generation_params(1024).max_tokens, 1024);
        assert_eq!(req.batch_params(2048).max_length, 2048);
        assert_eq!(req.batch_params(2048).num_beams, 1);
    }

    #[test]
    fn test_validation() {
        let mut req: ChatCompletionRequest =
            serde_json::from_value(json!({"messages": []})).unwrap();
        assert!(matches!(req.validate(), Err(GatewayError::InvalidRequest(_))));

        req.messages.push(ChatMessage::new(Role::User, "hi"));
        assert!(req.validate().is_ok());

        req.messages.push(ChatMessage::new(Role::Assistant, "hello"));
        assert!(matches!(req.validate(), Err(GatewayError::InvalidRequest(_))));
    }

    #[test]
    fn test_embedding_input_forms() {
        let one: EmbeddingRequest = serde_json::from_value(json!({"input": "a b"})).unwrap();
        assert_eq!(one.input.as_slice(), ["a b".to_string()]);
        let many: EmbeddingRequest =
            serde_json::from_value(json!({"input": ["a", "b"], "model": "m"})).unwrap();
        assert_eq!(many.input.as_slice().len(), 2);
    }

    #[test]
    fn test_model_list_shape() {
        let list = serde_json::to_value(ModelList::single(ModelCard::new("echo", 7))).unwrap();
        assert_eq!(
            list,
            json!({"object": "list", "data": [
                {"id": "echo", "object": "model", "created": 7, "owned_by": "owner"}
            ]})
        );
    }

    #[test]
    fn test_response_envelope() {
        let body = serde_json::to_value(ChatCompletionResponse::new("m", 1, Vec::new(), None))
            .unwrap();
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["id"], "");
        assert!(body.get("usage").is_none());
    }
}
