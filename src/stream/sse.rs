//! SSE framing for OpenAI-style chat streams.

/// Sentinel frame closing every chat stream.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Format an OpenAI-style SSE frame (no event type, just data).
#[must_use]
pub fn openai_sse_frame(json: &str) -> String {
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}
