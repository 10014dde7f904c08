use bytes::Bytes;

use crate::error::{format_error, GatewayError};
use crate::protocol::canonical::{Delta, StreamChunk};
use crate::stream::sse::{openai_sse_frame, DONE_FRAME};
use crate::util::{push_json_string_escaped, push_u64_decimal};

/// Writes `chat.completion.chunk` SSE frames for one response.
///
/// `model` and `created` are fixed per request, so the envelope prefix is
/// rendered once and reused for every chunk.
#[derive(Debug, Clone)]
pub struct ChunkEncoder {
    prefix: String,
}

impl ChunkEncoder {
    #[must_use]
    pub fn new(model: &str, created: u64) -> Self {
        let mut prefix = String::with_capacity(96 + model.len());
        prefix.push_str("data: {\"model\":");
        push_json_string_escaped(&mut prefix, model);
        prefix.push_str(",\"id\":\"\",\"object\":\"chat.completion.chunk\",\"created\":");
        push_u64_decimal(&mut prefix, created);
        Self { prefix }
    }

    /// Append one chunk frame to `out`.
    pub fn encode_into(&self, chunk: &StreamChunk, out: &mut String) {
        out.push_str(&self.prefix);
        out.push_str(",\"choices\":[{\"index\":");
        push_u64_decimal(out, u64::from(chunk.index));
        out.push_str(",\"delta\":");
        push_delta(out, &chunk.delta);
        out.push_str(",\"finish_reason\":");
        match chunk.finish_reason {
            Some(reason) => push_json_string_escaped(out, reason.as_str()),
            None => out.push_str("null"),
        }
        out.push_str("}]}\n\n");
    }

    #[must_use]
    pub fn encode_chunk(&self, chunk: &StreamChunk) -> Bytes {
        let mut out = String::with_capacity(self.prefix.len() + 96 + content_len(&chunk.delta));
        self.encode_into(chunk, &mut out);
        Bytes::from(out)
    }
}

/// Error event sent in place of further chunks once streaming has begun.
#[must_use]
pub fn encode_error_event(err: &GatewayError) -> Bytes {
    let (_, body) = format_error(err);
    Bytes::from(openai_sse_frame(&body.to_string()))
}

#[must_use]
pub fn done_frame() -> Bytes {
    Bytes::from_static(DONE_FRAME.as_bytes())
}

fn content_len(delta: &Delta) -> usize {
    delta.content.as_ref().map_or(0, String::len)
        + delta
            .function_call
            .as_ref()
            .map_or(0, |call| call.name.len() + call.arguments.len() + 32)
}

fn push_delta(out: &mut String, delta: &Delta) {
    out.push('{');
    let mut first = true;
    let mut field = |out: &mut String, name: &str| {
        if !first {
            out.push(',');
        }
        first = false;
        out.push('"');
        out.push_str(name);
        out.push_str("\":");
    };
    if let Some(role) = delta.role {
        field(out, "role");
        push_json_string_escaped(out, role.as_str());
    }
    if let Some(content) = delta.content.as_deref() {
        field(out, "content");
        push_json_string_escaped(out, content);
    }
    if let Some(call) = delta.function_call.as_ref() {
        field(out, "function_call");
        out.push_str("{\"name\":");
        push_json_string_escaped(out, &call.name);
        out.push_str(",\"arguments\":");
        push_json_string_escaped(out, &call.arguments);
        out.push('}');
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{FinishReason, FunctionCallResponse, Role};
    use serde_json::{json, Value};

    fn decode(frame: &Bytes) -> Value {
        let text = std::str::from_utf8(frame).unwrap();
        let json = text
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap();
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_header_chunk() {
        let encoder = ChunkEncoder::new("chatglm3-6b", 1_700_000_000);
        let frame = encoder.encode_chunk(&StreamChunk::new(Delta::role(Role::Assistant), None));
        assert_eq!(
            decode(&frame),
            json!({
                "model": "chatglm3-6b",
                "id": "",
                "object": "chat.completion.chunk",
                "created": 1_700_000_000u64,
                "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]
            })
        );
    }

    #[test]
    fn test_content_is_escaped() {
        let encoder = ChunkEncoder::new("m\"x", 1);
        let frame = encoder.encode_chunk(&StreamChunk::new(
            Delta::content("line\n\"quoted\" \\ 你好"),
            Some(FinishReason::Length),
        ));
        let value = decode(&frame);
        assert_eq!(value["model"], "m\"x");
        assert_eq!(value["choices"][0]["delta"]["content"], "line\n\"quoted\" \\ 你好");
        assert_eq!(value["choices"][0]["finish_reason"], "length");
    }

    #[test]
    fn test_function_call_and_terminal_chunks() {
        let encoder = ChunkEncoder::new("m", 1);
        let call = encoder.encode_chunk(&StreamChunk::new(
            Delta::function_call(FunctionCallResponse {
                name: "get_weather".into(),
                arguments: "{\"city\":\"Paris\"}".into(),
            }),
            None,
        ));
        assert_eq!(
            decode(&call)["choices"][0]["delta"],
            json!({"function_call": {"name": "get_weather", "arguments": "{\"city\":\"Paris\"}"}})
        );

        let end = encoder.encode_chunk(&StreamChunk::new(
            Delta::default(),
            Some(FinishReason::FunctionCall),
        ));
        let end = decode(&end);
        assert_eq!(end["choices"][0]["delta"], json!({}));
        assert_eq!(end["choices"][0]["finish_reason"], "function_call");
    }

    #[test]
    fn test_error_event_and_done() {
        let frame = encode_error_event(&GatewayError::Internal("boom".into()));
        assert_eq!(decode(&frame)["error"]["type"], "server_error");
        assert_eq!(&done_frame()[..], b"data: [DONE]\n\n");
    }
}
