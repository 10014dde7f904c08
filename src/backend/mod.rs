//! Seam between the protocol layer and the model runtime.
//!
//! The protocol machinery only sees the traits below. Loading weights and
//! running inference belong to whatever implements them; the crate ships one
//! deterministic implementation ([`echo`]) and a [`ModelRegistry`] that maps
//! each [`ModelKind`] to its constructor.

pub mod echo;
pub mod registry;
pub mod slot;

use crate::batch::PaddedBatch;
use crate::protocol::canonical::{ChatMessage, FinishReason, GenerationStep, UsageInfo};

pub use registry::{ChatTemplate, LoadedModel, ModelConstructor, ModelKind, ModelRegistry};
pub use slot::{GenerationSlot, SlotGuard};

/// Failure reported by a model runtime.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("generation failed: {0}")]
    Generation(String),
}

/// Lazy sequence of generation steps for one request.
pub type StepStream<'a> =
    Box<dyn Iterator<Item = Result<GenerationStep, BackendError>> + Send + 'a>;

/// Sampling parameters for a chat generation.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub top_p: f64,
    /// Upper bound on newly generated tokens.
    pub max_tokens: u32,
    pub repetition_penalty: f64,
    pub tools: Option<serde_json::Value>,
    pub echo: bool,
}

impl GenerationParams {
    #[must_use]
    pub fn has_tools(&self) -> bool {
        match &self.tools {
            None | Some(serde_json::Value::Null) => false,
            Some(serde_json::Value::Array(items)) => !items.is_empty(),
            Some(serde_json::Value::Object(map)) => !map.is_empty(),
            Some(_) => true,
        }
    }
}

/// Parameters for a single padded-batch generation pass.
#[derive(Debug, Clone)]
pub struct BatchParams {
    /// Upper bound on the total row length, prompt included.
    pub max_length: u32,
    pub num_beams: u32,
    pub do_sample: bool,
    pub top_p: f64,
    pub temperature: f64,
    pub repetition_penalty: f64,
    pub eos_token_ids: Vec<u32>,
}

/// Result of a non-streamed chat generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: FinishReason,
    pub usage: UsageInfo,
}

pub trait Tokenizer: Send + Sync {
    /// Encode text, recognising the template's special tokens.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Tokenizer`] when the text cannot be encoded.
    fn encode(&self, text: &str) -> Result<Vec<u32>, BackendError>;

    /// Decode token ids, skipping special tokens.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Tokenizer`] for ids outside the vocabulary.
    fn decode(&self, ids: &[u32]) -> Result<String, BackendError>;

    fn pad_token_id(&self) -> u32;

    fn eos_token_id(&self) -> u32;

    /// Id of a special token such as `<|user|>`, if the vocabulary has one.
    fn special_token_id(&self, token: &str) -> Option<u32>;
}

/// A loaded causal language model.
///
/// Methods take `&mut self`: a model handle runs one generation at a time.
pub trait LanguageModel: Send {
    fn name(&self) -> &str;

    fn template(&self) -> ChatTemplate;

    fn tokenizer(&self) -> &dyn Tokenizer;

    /// Start a streamed generation. Each item carries the cumulative decode.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] when the generation cannot be started.
    fn stream_chat(&mut self, params: &GenerationParams) -> Result<StepStream<'_>, BackendError>;

    /// Run a generation to completion.
    ///
    /// # Errors
    ///
    /// Propagates any error raised while generating or tokenizing.
    fn chat(&mut self, params: &GenerationParams) -> Result<Completion, BackendError> {
        let mut last = None;
        for step in self.stream_chat(params)? {
            let step = step?;
            let terminal = step.is_terminal();
            last = Some(step);
            if terminal {
                break;
            }
        }
        let last = last.unwrap_or_else(|| GenerationStep::partial(String::new()));
        let finish_reason = last.finish_reason.unwrap_or(FinishReason::Stop);

        let template = self.template();
        let tokenizer = self.tokenizer();
        let prompt_tokens = tokenizer.encode(&template.render(&params.messages))?.len() as u64;
        let completion_tokens = tokenizer.encode(&last.cumulative_text)?.len() as u64;
        Ok(Completion {
            text: last.cumulative_text,
            finish_reason,
            usage: UsageInfo::new(prompt_tokens, completion_tokens),
        })
    }

    /// Generate for every row of a padded batch in one pass.
    ///
    /// Each returned row starts with the corresponding padded input row.
    ///
    /// # Errors
    ///
    /// Returns a [`BackendError`] when the batch cannot be generated.
    fn generate_padded(
        &mut self,
        batch: &PaddedBatch,
        params: &BatchParams,
    ) -> Result<Vec<Vec<u32>>, BackendError>;
}

/// Sentence embedding model.
pub trait Embedder: Send + Sync {
    /// # Errors
    ///
    /// Returns a [`BackendError`] when the text cannot be embedded.
    fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;
}
