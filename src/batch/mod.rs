//! Padded-batch completion: N prompts, one generation pass, N ordered choices.
//!
//! The batch path never looks for function calls; every choice finishes
//! with `stop`.

mod padding;

pub use padding::{pad_longest, PaddedBatch, PaddingSide};

use tracing::debug;

use crate::backend::{BackendError, BatchParams, LanguageModel};
use crate::protocol::canonical::{ChatMessage, CompletionChoice, FinishReason, Role};

/// Drives a [`LanguageModel`] in padded-batch form.
#[derive(Debug, Clone)]
pub struct BatchAssembler {
    params: BatchParams,
    side: PaddingSide,
}

impl BatchAssembler {
    #[must_use]
    pub fn new(params: BatchParams) -> Self {
        Self {
            params,
            side: PaddingSide::default(),
        }
    }

    #[must_use]
    pub fn with_padding_side(mut self, side: PaddingSide) -> Self {
        self.side = side;
        self
    }

    /// Generate one completion per prompt. `index` is the prompt position.
    ///
    /// # Errors
    ///
    /// Propagates tokenizer and generation failures, and reports a
    /// [`BackendError::Generation`] when the model returns the wrong number of
    /// rows or a row shorter than its padded input.
    pub fn run(
        &self,
        model: &mut dyn LanguageModel,
        prompts: &[String],
    ) -> Result<Vec<CompletionChoice>, BackendError> {
        if prompts.is_empty() {
            return Ok(Vec::new());
        }

        let template = model.template();
        let (batch, params) = {
            let tokenizer = model.tokenizer();
            let rows = prompts
                .iter()
                .map(|prompt| tokenizer.encode(&template.batch_prompt(prompt)))
                .collect::<Result<Vec<_>, _>>()?;
            let batch = pad_longest(rows, tokenizer.pad_token_id(), self.side);

            let mut params = self.params.clone();
            let stop_ids = std::iter::once(tokenizer.eos_token_id()).chain(
                template
                    .stop_tags()
                    .into_iter()
                    .filter_map(|tag| tokenizer.special_token_id(tag)),
            );
            for id in stop_ids {
                if !params.eos_token_ids.contains(&id) {
                    params.eos_token_ids.push(id);
                }
            }
            (batch, params)
        };
        debug!(
            rows = batch.len(),
            width = batch.width(),
            "running padded batch generation"
        );

        let outputs = model.generate_padded(&batch, &params)?;
        if outputs.len() != batch.len() {
            return Err(BackendError::Generation(format!(
                "batch generation returned {} rows for {} prompts",
                outputs.len(),
                batch.len()
            )));
        }

        let tokenizer = model.tokenizer();
        let width = batch.width();
        outputs
            .iter()
            .enumerate()
            .map(|(position, row)| {
                let generated = row.get(width..).ok_or_else(|| {
                    BackendError::Generation(format!(
                        "output row {position} is shorter than its padded input ({} < {width})",
                        row.len()
                    ))
                })?;
                let text = tokenizer.decode(generated)?;
                Ok(CompletionChoice {
                    index: u32::try_from(position).unwrap_or(u32::MAX),
                    message: ChatMessage::new(Role::Assistant, text.trim()),
                    finish_reason: FinishReason::Stop,
                })
            })
            .collect()
    }
}
