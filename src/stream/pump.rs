use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::assembler::StreamAssembler;
use crate::backend::BackendError;
use crate::error::GatewayError;
use crate::protocol::canonical::{GenerationStep, StreamChunk};
use crate::protocol::openai_chat::encoder::{done_frame, encode_error_event, ChunkEncoder};

/// Message from the generation thread to the response body.
#[derive(Debug)]
pub enum StreamFrame {
    Data(Bytes),
    /// Generation failed before anything was sent; answer with a plain error.
    Failed(GatewayError),
}

/// Where the pump delivers encoded frames.
pub trait FrameSink {
    /// Returns `false` once the receiver is gone.
    fn send_frame(&mut self, frame: Bytes) -> bool;

    fn fail(&mut self, err: GatewayError);
}

impl FrameSink for mpsc::Sender<StreamFrame> {
    fn send_frame(&mut self, frame: Bytes) -> bool {
        self.blocking_send(StreamFrame::Data(frame)).is_ok()
    }

    fn fail(&mut self, err: GatewayError) {
        let _ = self.blocking_send(StreamFrame::Failed(err));
    }
}

impl FrameSink for Vec<StreamFrame> {
    fn send_frame(&mut self, frame: Bytes) -> bool {
        self.push(StreamFrame::Data(frame));
        true
    }

    fn fail(&mut self, err: GatewayError) {
        self.push(StreamFrame::Failed(err));
    }
}

/// How a pump run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpOutcome {
    Completed,
    Cancelled,
    Failed,
}

/// Drive `steps` through `assembler` and deliver the encoded frames.
///
/// Runs on a blocking thread. Cancellation is checked before each step is
/// pulled, so an abandoned request stops generating at the next step
/// boundary. A failure after the first frame ends the stream with an error
/// event and `[DONE]`; a failure before it is handed to [`FrameSink::fail`].
pub fn run<I, S>(
    steps: I,
    assembler: &mut StreamAssembler,
    encoder: &ChunkEncoder,
    cancel: &CancellationToken,
    sink: &mut S,
) -> PumpOutcome
where
    I: IntoIterator<Item = Result<GenerationStep, BackendError>>,
    S: FrameSink + ?Sized,
{
    let mut pump = Pump {
        encoder,
        sink,
        chunks: Vec::with_capacity(4),
        sent: 0,
    };
    let mut steps = steps.into_iter();

    loop {
        if cancel.is_cancelled() {
            debug!(frames = pump.sent, "client went away; stopping generation");
            return PumpOutcome::Cancelled;
        }
        let Some(step) = steps.next() else {
            break;
        };
        let step = match step {
            Ok(step) => step,
            Err(err) => return pump.fail(err.into()),
        };
        if let Err(err) = assembler.push(&step, &mut pump.chunks) {
            return pump.fail(err.into());
        }
        if !pump.flush() {
            return PumpOutcome::Cancelled;
        }
        if assembler.is_done() {
            break;
        }
    }

    if !assembler.is_done() {
        assembler.finish(&mut pump.chunks);
        if !pump.flush() {
            return PumpOutcome::Cancelled;
        }
    }
    if !pump.sink.send_frame(done_frame()) {
        return PumpOutcome::Cancelled;
    }
    PumpOutcome::Completed
}

struct Pump<'a, S: ?Sized> {
    encoder: &'a ChunkEncoder,
    sink: &'a mut S,
    chunks: Vec<StreamChunk>,
    sent: usize,
}

impl<S: FrameSink + ?Sized> Pump<'_, S> {
    fn flush(&mut self) -> bool {
        for chunk in self.chunks.drain(..) {
            if !self.sink.send_frame(self.encoder.encode_chunk(&chunk)) {
                return false;
            }
            self.sent += 1;
        }
        true
    }

    fn fail(&mut self, err: GatewayError) -> PumpOutcome {
        if self.sent == 0 {
            warn!("generation failed before streaming began: {err}");
            self.sink.fail(err);
        } else {
            warn!(frames = self.sent, "generation failed mid-stream: {err}");
            if self.sink.send_frame(encode_error_event(&err)) {
                self.sink.send_frame(done_frame());
            }
        }
        PumpOutcome::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::FinishReason;
    use std::sync::Arc;

    fn data(frames: &[StreamFrame]) -> Vec<String> {
        frames
            .iter()
            .filter_map(|f| match f {
                StreamFrame::Data(bytes) => Some(String::from_utf8(bytes.to_vec()).unwrap()),
                StreamFrame::Failed(_) => None,
            })
            .collect()
    }

    fn pump(steps: Vec<Result<GenerationStep, BackendError>>) -> (PumpOutcome, Vec<StreamFrame>) {
        let mut assembler = StreamAssembler::new(Arc::default(), false);
        let encoder = ChunkEncoder::new("m", 1);
        let mut sink = Vec::new();
        let outcome = run(steps, &mut assembler, &encoder, &CancellationToken::new(), &mut sink);
        (outcome, sink)
    }

    #[test]
    fn test_done_sent_once_after_terminal() {
        let (outcome, frames) = pump(vec![
            Ok(GenerationStep::partial("Hello there")),
            Ok(GenerationStep::terminal("Hello there!", FinishReason::Stop)),
            Ok(GenerationStep::terminal("Hello there!!", FinishReason::Stop)),
        ]);
        assert_eq!(outcome, PumpOutcome::Completed);
        let frames = data(&frames);
        assert_eq!(frames.len(), 4);
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
        assert_eq!(frames.iter().filter(|f| f.contains("[DONE]")).count(), 1);
        assert!(frames[2].contains("\"finish_reason\":\"stop\""));
    }

    #[test]
    fn test_source_without_terminal_step() {
        let (outcome, frames) = pump(vec![Ok(GenerationStep::partial("Hello there"))]);
        assert_eq!(outcome, PumpOutcome::Completed);
        let frames = data(&frames);
        assert!(frames[frames.len() - 2].contains("\"finish_reason\":\"stop\""));
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_failure_before_first_frame() {
        let (outcome, frames) = pump(vec![Err(BackendError::Generation("oom".into()))]);
        assert_eq!(outcome, PumpOutcome::Failed);
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], StreamFrame::Failed(GatewayError::Generation(_))));
    }

    #[test]
    fn test_failure_mid_stream() {
        let (outcome, frames) = pump(vec![
            Ok(GenerationStep::partial("Hello there")),
            Err(BackendError::Generation("oom".into())),
        ]);
        assert_eq!(outcome, PumpOutcome::Failed);
        let frames = data(&frames);
        assert!(frames[frames.len() - 2].starts_with("data: {\"error\":"));
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_integrity_violation_mid_stream() {
        let (outcome, frames) = pump(vec![
            Ok(GenerationStep::partial("Hello there")),
            Ok(GenerationStep::partial("Goodbye")),
        ]);
        assert_eq!(outcome, PumpOutcome::Failed);
        let frames = data(&frames);
        assert!(frames[frames.len() - 2].contains("Stream integrity error"));
        assert_eq!(frames.last().unwrap(), "data: [DONE]\n\n");
    }

    #[test]
    fn test_cancelled_stops_pulling_steps() {
        let cancel = CancellationToken::new();
        let mut assembler = StreamAssembler::new(Arc::default(), false);
        let encoder = ChunkEncoder::new("m", 1);
        let mut sink = Vec::new();
        let mut pulled = 0;
        let steps = (1..100).map(|n| {
            pulled += 1;
            if n == 3 {
                cancel.cancel();
            }
            Ok(GenerationStep::partial("x".repeat(n * 4)))
        });
        let outcome = run(steps, &mut assembler, &encoder, &cancel, &mut sink);
        assert_eq!(outcome, PumpOutcome::Cancelled);
        assert_eq!(pulled, 3);
        assert!(data(&sink).iter().all(|f| !f.contains("[DONE]")));
    }
}
