//! Streaming core: delta extraction, function-call sniffing, the per-request
//! assembler state machine and the pump that feeds it from a generation
//! thread.

pub mod assembler;
pub mod delta;
pub mod pump;
pub mod sniffer;
pub mod sse;

pub use assembler::{AssemblerState, StreamAssembler};
pub use delta::{extract, DeltaExtractor, StreamIntegrityError};
pub use pump::{FrameSink, PumpOutcome, StreamFrame};
pub use sniffer::{Classification, FunctionCallSniffer, SniffPolicy};
