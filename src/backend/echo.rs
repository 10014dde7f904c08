//! Deterministic reference runtime.
//!
//! The echo model answers with the last user message, streamed word by word,
//! and embeds text as a hashed bag of words. It needs no weights, which makes
//! it the default for local runs and the backend behind the test-suite.

use std::hash::Hasher;
use std::sync::Arc;

use rustc_hash::FxHasher;

use super::{
    BackendError, BatchParams, ChatTemplate, Embedder, GenerationParams, LanguageModel,
    LoadedModel, StepStream, Tokenizer,
};
use crate::batch::PaddedBatch;
use crate::config::ModelConfig;
use crate::protocol::canonical::{FinishReason, GenerationStep, Role};
use crate::util::mix_u64;

const PAD_ID: u32 = 0;
const EOS_ID: u32 = 1;
const SPECIAL_TOKENS: [(&str, u32); 4] = [
    ("<|system|>", 2),
    ("<|user|>", 3),
    ("<|assistant|>", 4),
    ("<|observation|>", 5),
];
/// Ids below this value are special; text ids are `CHAR_BASE + codepoint`.
const CHAR_BASE: u32 = 16;

/// Character-level tokenizer with GLM-style special tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoTokenizer;

impl Tokenizer for EchoTokenizer {
    fn encode(&self, text: &str) -> Result<Vec<u32>, BackendError> {
        let mut ids = Vec::with_capacity(text.len());
        let mut rest = text;
        'outer: while let Some(ch) = rest.chars().next() {
            if ch == '<' {
                for (token, id) in SPECIAL_TOKENS {
                    if let Some(after) = rest.strip_prefix(token) {
                        ids.push(id);
                        rest = after;
                        continue 'outer;
                    }
                }
            }
            ids.push(CHAR_BASE + u32::from(ch));
            rest = &rest[ch.len_utf8()..];
        }
        Ok(ids)
    }

    fn decode(&self, ids: &[u32]) -> Result<String, BackendError> {
        let mut out = String::with_capacity(ids.len());
        for &id in ids {
            if id < CHAR_BASE {
                continue;
            }
            let ch = char::from_u32(id - CHAR_BASE)
                .ok_or_else(|| BackendError::Tokenizer(format!("token id {id} is not in vocabulary")))?;
            out.push(ch);
        }
        Ok(out)
    }

    fn pad_token_id(&self) -> u32 {
        PAD_ID
    }

    fn eos_token_id(&self) -> u32 {
        EOS_ID
    }

    fn special_token_id(&self, token: &str) -> Option<u32> {
        SPECIAL_TOKENS
            .iter()
            .find(|(name, _)| *name == token)
            .map(|(_, id)| *id)
    }
}

/// Model that replays the last user message.
pub struct EchoModel {
    name: String,
    tokenizer: EchoTokenizer,
}

impl EchoModel {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tokenizer: EchoTokenizer,
        }
    }
}

/// Split `text` into cumulative prefixes ending after each space.
fn word_prefixes(text: &str) -> Vec<&str> {
    let mut prefixes: Vec<&str> = text
        .match_indices(' ')
        .map(|(idx, _)| &text[..=idx])
        .collect();
    if prefixes.last().copied() != Some(text) {
        prefixes.push(text);
    }
    prefixes
}

impl LanguageModel for EchoModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn template(&self) -> ChatTemplate {
        ChatTemplate::GLM
    }

    fn tokenizer(&self) -> &dyn Tokenizer {
        &self.tokenizer
    }

    fn stream_chat(&mut self, params: &GenerationParams) -> Result<StepStream<'_>, BackendError> {
        let reply = params
            .messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.as_str())
            .unwrap_or_default();

        let limit = usize::try_from(params.max_tokens).unwrap_or(usize::MAX);
        let (reply, finish_reason) = match reply.char_indices().nth(limit) {
            Some((cut, _)) => (&reply[..cut], FinishReason::Length),
            None => (reply, FinishReason::Stop),
        };

        let prefixes = word_prefixes(reply);
        let last = prefixes.len() - 1;
        let steps: Vec<GenerationStep> = prefixes
            .into_iter()
            .enumerate()
            .map(|(i, prefix)| {
                if i == last {
                    GenerationStep::terminal(prefix, finish_reason)
                } else {
                    GenerationStep::partial(prefix)
                }
            })
            .collect();
        Ok(Box::new(steps.into_iter().map(Ok)))
    }

    fn generate_padded(
        &mut self,
        batch: &PaddedBatch,
        params: &BatchParams,
    ) -> Result<Vec<Vec<u32>>, BackendError> {
        let user_id = self.tokenizer.special_token_id(ChatTemplate::GLM.user);
        let assistant_id = self.tokenizer.special_token_id(ChatTemplate::GLM.assistant);
        let newline = CHAR_BASE + u32::from('\n');
        let max_length = usize::try_from(params.max_length).unwrap_or(usize::MAX);

        let mut outputs = Vec::with_capacity(batch.len());
        for row in &batch.input_ids {
            let start = row
                .iter()
                .position(|id| Some(*id) == user_id)
                .map_or(0, |pos| pos + 1);
            let end = row
                .iter()
                .rposition(|id| Some(*id) == assistant_id)
                .unwrap_or(row.len())
                .max(start);
            let mut body = &row[start..end];
            if body.first() == Some(&newline) {
                body = &body[1..];
            }
            if body.last() == Some(&newline) {
                body = &body[..body.len() - 1];
            }

            let mut out = Vec::with_capacity(row.len() + body.len() + 1);
            out.extend_from_slice(row);
            out.extend_from_slice(body);
            out.push(params.eos_token_ids.first().copied().unwrap_or(EOS_ID));
            out.truncate(max_length.max(row.len()));
            outputs.push(out);
        }
        Ok(outputs)
    }
}

/// Normalised hashed bag-of-words embedding.
pub struct EchoEmbedder {
    dim: usize,
}

impl EchoEmbedder {
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }
}

impl Embedder for EchoEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut vector = vec![0.0_f32; self.dim];
        for word in text.split_whitespace() {
            let mut hasher = FxHasher::default();
            hasher.write(word.as_bytes());
            let hash = mix_u64(hasher.finish());
            let slot = usize::try_from(hash % self.dim as u64).unwrap_or(0);
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }
}

/// [`super::ModelConstructor`] for [`super::ModelKind::Echo`].
///
/// # Errors
///
/// Never fails; the signature matches the registry's constructor type.
pub fn load(config: &ModelConfig) -> Result<LoadedModel, BackendError> {
    Ok(LoadedModel {
        model: Box::new(EchoModel::new(config.display_name())),
        embedder: Arc::new(EchoEmbedder::new(config.embedding_dim)),
    })
}
