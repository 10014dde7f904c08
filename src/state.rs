use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::backend::{BackendError, Embedder, GenerationSlot, LoadedModel, ModelRegistry};
use crate::config::AppConfig;
use crate::protocol::openai_chat::{ModelCard, ModelList};
use crate::stream::SniffPolicy;
use crate::util::unix_now_secs;

/// Shared application state accessible to all handlers.
///
/// Built once at start-up and handed to every request as `Arc<AppState>`.
pub struct AppState {
    pub config: AppConfig,
    model_name: Arc<str>,
    slot: GenerationSlot,
    embedder: Arc<dyn Embedder>,
    sniff_policy: Arc<SniffPolicy>,
    models_body: Bytes,
    created: u64,
}

impl AppState {
    #[must_use]
    pub fn new(config: AppConfig, loaded: LoadedModel) -> Self {
        let created = unix_now_secs();
        let model_name: Arc<str> = Arc::from(config.model.display_name());
        let models_body = build_models_response_body(&model_name, created);
        let slot = GenerationSlot::new(
            loaded.model,
            config.server.admission,
            config.server.admission_timeout_ms.map(Duration::from_millis),
        );
        let sniff_policy = Arc::new(SniffPolicy::new(
            config.features.sniffer_threshold,
            &config.features.function_call_marker,
        ));

        Self {
            config,
            model_name,
            slot,
            embedder: loaded.embedder,
            sniff_policy,
            models_body,
            created,
        }
    }

    /// Load the configured model through `registry` and build the state.
    ///
    /// # Errors
    ///
    /// Returns the [`BackendError`] raised while constructing the model.
    pub fn from_registry(config: AppConfig, registry: &ModelRegistry) -> Result<Self, BackendError> {
        let loaded = registry.load(&config.model)?;
        Ok(Self::new(config, loaded))
    }

    #[must_use]
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    #[must_use]
    pub fn slot(&self) -> &GenerationSlot {
        &self.slot
    }

    #[must_use]
    pub fn embedder(&self) -> Arc<dyn Embedder> {
        Arc::clone(&self.embedder)
    }

    #[must_use]
    pub fn sniff_policy(&self) -> Arc<SniffPolicy> {
        Arc::clone(&self.sniff_policy)
    }

    /// Pre-rendered `GET /v1/models` body.
    #[must_use]
    pub fn models_response_body(&self) -> Bytes {
        self.models_body.clone()
    }

    /// Start-up timestamp, reported as the model's `created`.
    #[must_use]
    pub fn created(&self) -> u64 {
        self.created
    }
}

fn build_models_response_body(model_name: &str, created: u64) -> Bytes {
    let list = ModelList::single(ModelCard::new(model_name, created));
    serde_json::to_vec(&list).map_or_else(|_| Bytes::new(), Bytes::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_from_builtin_registry() {
        let state = AppState::from_registry(AppConfig::default(), &ModelRegistry::with_builtin())
            .unwrap();
        assert_eq!(state.model_name(), "echo");
        assert_eq!(state.sniff_policy().threshold(), 7);

        let body: serde_json::Value =
            serde_json::from_slice(&state.models_response_body()).unwrap();
        assert_eq!(body["data"][0]["id"], "echo");
        assert_eq!(body["data"][0]["created"], state.created());
    }

    #[test]
    fn test_unregistered_kind_fails() {
        let mut config = AppConfig::default();
        config.model.kind = crate::backend::ModelKind::ChatGlm3;
        assert!(matches!(
            AppState::from_registry(config, &ModelRegistry::with_builtin()),
            Err(BackendError::Unavailable(_))
        ));
    }
}
