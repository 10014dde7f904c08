use serde::{Deserialize, Serialize};

/// Chat message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Function => "function",
        }
    }
}

/// Reason the model stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    FunctionCall,
}

impl FinishReason {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::FunctionCall => "function_call",
        }
    }

    /// The reason to report when no call was delivered: `function_call`
    /// becomes `stop`.
    #[must_use]
    pub const fn without_call(self) -> Self {
        match self {
            FinishReason::FunctionCall => FinishReason::Stop,
            other => other,
        }
    }
}

/// A parsed tool invocation. `arguments` is opaque JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

/// One tick of the generation source.
///
/// `cumulative_text` is the whole decode so far; every step of a request
/// extends the previous one. Only the last step carries a `finish_reason`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationStep {
    pub cumulative_text: String,
    pub finish_reason: Option<FinishReason>,
}

impl GenerationStep {
    #[must_use]
    pub fn partial(cumulative_text: impl Into<String>) -> Self {
        Self {
            cumulative_text: cumulative_text.into(),
            finish_reason: None,
        }
    }

    #[must_use]
    pub fn terminal(cumulative_text: impl Into<String>, reason: FinishReason) -> Self {
        Self {
            cumulative_text: cumulative_text.into(),
            finish_reason: Some(reason),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// Incremental contribution of one emitted chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub role: Option<Role>,
    pub content: Option<String>,
    pub function_call: Option<FunctionCallResponse>,
}

impl Delta {
    #[must_use]
    pub fn role(role: Role) -> Self {
        Self {
            role: Some(role),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn function_call(call: FunctionCallResponse) -> Self {
        Self {
            function_call: Some(call),
            ..Self::default()
        }
    }
}

/// One streamed protocol event, in emission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

impl StreamChunk {
    #[must_use]
    pub fn new(delta: Delta, finish_reason: Option<FinishReason>) -> Self {
        Self {
            index: 0,
            delta,
            finish_reason,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.finish_reason.is_some()
    }
}

/// A conversation message as exchanged on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCallResponse>,
}

impl ChatMessage {
    #[must_use]
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
            function_call: None,
        }
    }
}

/// A complete, non-streamed answer. `index` is the originating prompt position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionChoice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageInfo {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl UsageInfo {
    #[must_use]
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}
