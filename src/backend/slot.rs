use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use super::LanguageModel;
use crate::config::AdmissionPolicy;
use crate::error::GatewayError;

/// Exclusive access to the model for the duration of one generation.
///
/// The guard is owned so it can move into a blocking task.
pub type SlotGuard = OwnedMutexGuard<Box<dyn LanguageModel>>;

/// The single shared model handle and its admission policy.
pub struct GenerationSlot {
    model: Arc<Mutex<Box<dyn LanguageModel>>>,
    policy: AdmissionPolicy,
    queue_timeout: Option<Duration>,
}

impl GenerationSlot {
    #[must_use]
    pub fn new(
        model: Box<dyn LanguageModel>,
        policy: AdmissionPolicy,
        queue_timeout: Option<Duration>,
    ) -> Self {
        Self {
            model: Arc::new(Mutex::new(model)),
            policy,
            queue_timeout,
        }
    }

    /// Wait for (or, under `reject`, try once for) the model.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Busy`] when the model is in use and the policy
    /// rejects, or when the queue timeout elapses first.
    pub async fn acquire(&self) -> Result<SlotGuard, GatewayError> {
        match self.policy {
            AdmissionPolicy::Reject => Arc::clone(&self.model)
                .try_lock_owned()
                .map_err(|_| GatewayError::Busy("a generation is already in progress".into())),
            AdmissionPolicy::Queue => {
                let lock = Arc::clone(&self.model).lock_owned();
                match self.queue_timeout {
                    None => Ok(lock.await),
                    Some(timeout) => tokio::time::timeout(timeout, lock).await.map_err(|_| {
                        GatewayError::Busy(format!(
                            "timed out after {}ms waiting for the model",
                            timeout.as_millis()
                        ))
                    }),
                }
            }
        }
    }

    #[must_use]
    pub fn policy(&self) -> AdmissionPolicy {
        self.policy
    }
}
