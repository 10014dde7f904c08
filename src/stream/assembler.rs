use std::sync::Arc;

use tracing::{debug, warn};

use super::delta::{DeltaExtractor, StreamIntegrityError};
use super::sniffer::{Classification, FunctionCallSniffer, SniffPolicy};
use crate::fc::parse_tool_call;
use crate::protocol::canonical::{
    Delta, FinishReason, GenerationStep, Role, StreamChunk,
};

// Stream assembler.
//
// Turns the cumulative-text steps of one generation into protocol chunks:
//
//   Init --first step--> Peeking --plain--> Streaming --terminal--> Done
//                           \--call--> FunctionCallPending --terminal--> Done
//
// Invariants:
// - The first chunk is a bare `{role: assistant}` header.
// - Nothing but the header leaves while Peeking; the plain-text decision
//   flushes everything buffered so far as one content chunk.
// - While FunctionCallPending nothing is emitted until the terminal step.
// - Exactly one chunk carries a finish reason, and it is the last one.

/// Current phase of a [`StreamAssembler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    Init,
    Peeking,
    Streaming,
    FunctionCallPending,
    Done,
}

/// Per-request stream state machine.
#[derive(Debug)]
pub struct StreamAssembler {
    state: AssemblerState,
    sniffer: FunctionCallSniffer,
    extractor: DeltaExtractor,
    parse_tool_calls: bool,
}

impl StreamAssembler {
    /// `parse_tool_calls` is set when the request supplied tools; without it a
    /// detected call is always delivered as plain content.
    #[must_use]
    pub fn new(policy: Arc<SniffPolicy>, parse_tool_calls: bool) -> Self {
        Self {
            state: AssemblerState::Init,
            sniffer: FunctionCallSniffer::new(policy),
            extractor: DeltaExtractor::new(),
            parse_tool_calls,
        }
    }

    #[must_use]
    pub fn state(&self) -> AssemblerState {
        self.state
    }

    #[must_use]
    pub fn is_done(&self) -> bool {
        self.state == AssemblerState::Done
    }

    #[must_use]
    pub fn sniffer(&self) -> &FunctionCallSniffer {
        &self.sniffer
    }

    /// Cumulative text received so far.
    #[must_use]
    pub fn text(&self) -> &str {
        self.extractor.text()
    }

    /// Feed one generation step, appending any chunks it produces to `out`.
    ///
    /// # Errors
    ///
    /// Returns [`StreamIntegrityError`] when the step rewrites earlier text or
    /// arrives after the terminal step. The assembler state is unchanged.
    pub fn push(
        &mut self,
        step: &GenerationStep,
        out: &mut Vec<StreamChunk>,
    ) -> Result<(), StreamIntegrityError> {
        if self.state == AssemblerState::Done {
            return Err(StreamIntegrityError::StepAfterTerminal);
        }
        let delta = self.extractor.advance(&step.cumulative_text)?;

        if self.state == AssemblerState::Init {
            out.push(StreamChunk::new(Delta::role(Role::Assistant), None));
            self.state = AssemblerState::Peeking;
        }

        match self.state {
            AssemblerState::Peeking => match self.sniffer.classify(self.extractor.text()) {
                Classification::Undecided => {
                    if let Some(reason) = step.finish_reason {
                        // Ended before a decision was possible; too short to be a call.
                        let text = self.extractor.text().to_owned();
                        self.emit_content(text, Some(reason), out);
                    }
                }
                Classification::PlainText => {
                    debug!("stream classified as plain text");
                    self.state = AssemblerState::Streaming;
                    let text = self.extractor.text().to_owned();
                    self.emit_content(text, step.finish_reason, out);
                }
                Classification::FunctionCall => {
                    debug!("stream classified as function call; buffering");
                    self.state = AssemblerState::FunctionCallPending;
                    if let Some(reason) = step.finish_reason {
                        self.resolve_function_call(reason, out);
                    }
                }
            },
            AssemblerState::Streaming => self.emit_content(delta, step.finish_reason, out),
            AssemblerState::FunctionCallPending => {
                if let Some(reason) = step.finish_reason {
                    self.resolve_function_call(reason, out);
                }
            }
            AssemblerState::Init | AssemblerState::Done => {}
        }
        Ok(())
    }

    /// Close a stream whose source ended without a terminal step.
    ///
    /// Behaves as if a final `stop` step repeating the current text arrived.
    /// Does nothing once the stream is done.
    pub fn finish(&mut self, out: &mut Vec<StreamChunk>) {
        if self.is_done() {
            return;
        }
        warn!(
            state = ?self.state,
            "generation source ended without a terminal step; closing with stop"
        );
        let step = GenerationStep::terminal(self.extractor.text(), FinishReason::Stop);
        // Same text as the last step, so this cannot violate integrity.
        let _ = self.push(&step, out);
    }

    fn emit_content(
        &mut self,
        text: String,
        finish_reason: Option<FinishReason>,
        out: &mut Vec<StreamChunk>,
    ) {
        let finish_reason = finish_reason.map(FinishReason::without_call);
        if finish_reason.is_some() {
            self.state = AssemblerState::Done;
        } else if text.is_empty() {
            return;
        }
        let delta = if text.is_empty() {
            Delta::default()
        } else {
            Delta::content(text)
        };
        out.push(StreamChunk::new(delta, finish_reason));
    }

    fn resolve_function_call(&mut self, source_reason: FinishReason, out: &mut Vec<StreamChunk>) {
        let text = self.extractor.text().to_owned();
        if self.parse_tool_calls {
            match parse_tool_call(&text) {
                Ok(call) => {
                    debug!(name = %call.name, "parsed function call");
                    out.push(StreamChunk::new(Delta::function_call(call), None));
                    out.push(StreamChunk::new(
                        Delta::default(),
                        Some(FinishReason::FunctionCall),
                    ));
                    self.state = AssemblerState::Done;
                    return;
                }
                Err(err) => warn!("Failed to parse tool call, sending raw text: {err}"),
            }
        } else {
            debug!("function-call marker seen but request has no tools; sending raw text");
        }

        out.push(StreamChunk::new(Delta::content(text), None));
        out.push(StreamChunk::new(
            Delta::default(),
            Some(source_reason.without_call()),
        ));
        self.state = AssemblerState::Done;
    }
}
