//! LLM integration.
//!
//! The workshop talks to an OpenAI-compatible chat-completions endpoint
//! through `OpenAiProvider`. Everything else in the crate depends only on the
//! `LlmProvider` trait so tests can script the collaborator.

pub mod json;
pub mod openai;
pub mod provider;

pub use openai::{OpenAiConfig, OpenAiProvider};
pub use provider::*;

use std::sync::Arc;
use std::time::Duration;

use crate::error::LlmError;

/// Supported LLM backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmBackend {
    OpenAi,
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub backend: LlmBackend,
    pub api_key: secrecy::SecretString,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
}

/// Run a completion bounded by `limit`; an elapsed deadline becomes
/// `LlmError::Timeout`.
pub async fn complete_within(
    provider: &dyn LlmProvider,
    request: CompletionRequest,
    limit: Duration,
) -> Result<CompletionResponse, LlmError> {
    match tokio::time::timeout(limit, provider.complete(request)).await {
        Ok(result) => result,
        Err(_) => Err(LlmError::Timeout {
            provider: provider.model_name().to_string(),
            after: limit,
        }),
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    match config.backend {
        LlmBackend::OpenAi => {
            let provider = OpenAiProvider::new(
                OpenAiConfig::new(config.api_key.clone(), &config.model)
                    .with_base_url(&config.base_url)
                    .with_timeout(config.timeout),
            )?;
            tracing::info!("Using OpenAI-compatible endpoint (model: {})", config.model);
            Ok(Arc::new(provider))
        }
    }
}
