//! Generation backends
//!
//! A backend performs exactly one call per `generate`; retry policy lives in
//! [`crate::forge`].

pub mod gemini;
pub mod stub;

use crate::config::{LlmConfig, LlmProviderType};
use crate::error::{GenerationFailure, VantageResult};
use crate::secrets::SecretStore;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

pub use gemini::GeminiBackend;
pub use stub::StubBackend;

/// Captures the payload and diagnostic details of one completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub model: String,
    pub prompt_hash: String,
    pub response_hash: String,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    pub latency_ms: u128,
}

impl Completion {
    /// Completion for text produced without a wire exchange.
    pub fn local(model: &str, prompt: &str, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            prompt_hash: sha256_hex(prompt.as_bytes()),
            response_hash: sha256_hex(text.as_bytes()),
            text,
            model: model.to_string(),
            prompt_tokens: None,
            completion_tokens: None,
            total_tokens: None,
            latency_ms: 0,
        }
    }
}

#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Send one prompt and wait at most `timeout` for the completion.
    async fn generate(
        &self,
        prompt: &str,
        timeout: Duration,
    ) -> Result<Completion, GenerationFailure>;

    /// Model identifier for logs.
    fn model(&self) -> &str;
}

/// Build the configured backend. The Gemini backend needs an API key; a
/// missing key is a configuration error.
pub fn create_backend(
    config: &LlmConfig,
    secrets: &SecretStore,
) -> VantageResult<Arc<dyn GenerationBackend>> {
    match config.provider {
        LlmProviderType::Gemini => {
            let api_key = secrets.resolve_api_key(&config.api_key_env)?;
            tracing::debug!(source = ?api_key.source(), model = %config.model, "Using Gemini backend");
            Ok(Arc::new(GeminiBackend::new(config.clone(), api_key)?))
        }
        LlmProviderType::Stub => Ok(Arc::new(StubBackend::offline())),
    }
}

pub(crate) fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
