use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::{echo, BackendError, Embedder, LanguageModel};
use crate::config::ModelConfig;
use crate::protocol::canonical::{ChatMessage, Role};

/// Closed set of model families the server knows how to front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ModelKind {
    #[serde(rename = "chatglm2")]
    ChatGlm2,
    #[serde(rename = "chatglm3")]
    ChatGlm3,
    #[serde(rename = "chatglm4")]
    ChatGlm4,
    #[serde(rename = "internlm-chat-20b")]
    InternLmChat20b,
    #[default]
    #[serde(rename = "echo")]
    Echo,
}

impl ModelKind {
    pub const ALL: [ModelKind; 5] = [
        ModelKind::ChatGlm2,
        ModelKind::ChatGlm3,
        ModelKind::ChatGlm4,
        ModelKind::InternLmChat20b,
        ModelKind::Echo,
    ];

    /// Model id reported when the config does not override it.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            ModelKind::ChatGlm2 => "ChatGLM2-6b-32k",
            ModelKind::ChatGlm3 => "chatglm3-6b",
            ModelKind::ChatGlm4 => "ChatGLM4-9b",
            ModelKind::InternLmChat20b => "internlm-chat-20b",
            ModelKind::Echo => "echo",
        }
    }

    #[must_use]
    pub const fn template(self) -> ChatTemplate {
        match self {
            ModelKind::ChatGlm3 | ModelKind::ChatGlm4 | ModelKind::Echo => ChatTemplate::GLM,
            ModelKind::ChatGlm2 => ChatTemplate {
                system: "",
                user: "问：",
                assistant: "答：",
                function: "",
            },
            ModelKind::InternLmChat20b => ChatTemplate {
                system: "<|System|>:",
                user: "<|User|>:",
                assistant: "<|Bot|>:",
                function: "",
            },
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let wire = match self {
            ModelKind::ChatGlm2 => "chatglm2",
            ModelKind::ChatGlm3 => "chatglm3",
            ModelKind::ChatGlm4 => "chatglm4",
            ModelKind::InternLmChat20b => "internlm-chat-20b",
            ModelKind::Echo => "echo",
        };
        f.write_str(wire)
    }
}

/// Role tags a model family uses to frame a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChatTemplate {
    pub system: &'static str,
    pub user: &'static str,
    pub assistant: &'static str,
    pub function: &'static str,
}

impl ChatTemplate {
    pub const GLM: ChatTemplate = ChatTemplate {
        system: "<|system|>",
        user: "<|user|>",
        assistant: "<|assistant|>",
        function: "<|observation|>",
    };

    fn tag(&self, role: Role) -> &'static str {
        match role {
            Role::System => self.system,
            Role::User => self.user,
            Role::Assistant => self.assistant,
            Role::Function => self.function,
        }
    }

    /// Single-turn prompt used by the padded batch path.
    #[must_use]
    pub fn batch_prompt(&self, content: &str) -> String {
        let mut out = String::with_capacity(self.user.len() + content.len() + self.assistant.len() + 2);
        out.push_str(self.user);
        out.push('\n');
        out.push_str(content);
        out.push('\n');
        out.push_str(self.assistant);
        out
    }

    /// Full conversation prompt ending with an open assistant turn.
    #[must_use]
    pub fn render(&self, messages: &[ChatMessage]) -> String {
        let mut out = String::new();
        for message in messages {
            out.push_str(self.tag(message.role));
            out.push('\n');
            out.push_str(&message.content);
        }
        out.push_str(self.assistant);
        out
    }

    /// Tags that end an assistant turn when generated.
    #[must_use]
    pub fn stop_tags(&self) -> [&'static str; 2] {
        [self.user, self.assistant]
    }
}

/// A model handle plus the embedder that accompanies it.
pub struct LoadedModel {
    pub model: Box<dyn LanguageModel>,
    pub embedder: Arc<dyn Embedder>,
}

pub type ModelConstructor = fn(&ModelConfig) -> Result<LoadedModel, BackendError>;

/// Explicit map from [`ModelKind`] to constructor.
#[derive(Default)]
pub struct ModelRegistry {
    constructors: FxHashMap<ModelKind, ModelConstructor>,
}

impl ModelRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the runtimes compiled into this crate.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(ModelKind::Echo, echo::load);
        registry
    }

    /// Register a constructor, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: ModelKind,
        constructor: ModelConstructor,
    ) -> Option<ModelConstructor> {
        self.constructors.insert(kind, constructor)
    }

    #[must_use]
    pub fn contains(&self, kind: ModelKind) -> bool {
        self.constructors.contains_key(&kind)
    }

    /// Kinds with a registered constructor, in declaration order.
    #[must_use]
    pub fn registered(&self) -> Vec<ModelKind> {
        ModelKind::ALL
            .into_iter()
            .filter(|kind| self.contains(*kind))
            .collect()
    }

    /// Construct the model named by `config.kind`.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Unavailable`] when no constructor is registered
    /// for the kind, or whatever the constructor itself reports.
    pub fn load(&self, config: &ModelConfig) -> Result<LoadedModel, BackendError> {
        let constructor = self.constructors.get(&config.kind).ok_or_else(|| {
            BackendError::Unavailable(format!(
                "no runtime registered for model kind '{}'",
                config.kind
            ))
        })?;
        constructor(config)
    }
}
