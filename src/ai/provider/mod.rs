//! LLM Provider Abstraction
//!
//! Defines the `LlmProvider` trait implemented by each backend. Providers
//! return raw completion text plus usage; JSON extraction, schema checks,
//! retries and fallback live in the gateway.
//!
//! ## Modules
//!
//! - `gateway`: ordered fallback over providers, per-run sessions
//! - `circuit_breaker`: process-wide provider health

mod circuit_breaker;
mod gateway;
mod ollama;
mod openai;
mod prompt_utils;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use gateway::{
    CompletionRequest, CompletionResult, GatewaySession, ProviderGateway, ProviderGatewayBuilder,
    ProviderSpec, RetryPolicy, select_provider,
};
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;
pub use prompt_utils::{build_clarification_prompt, build_schema_prompt};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ProviderConfig, ProviderKind};
use crate::types::Result;

/// Raw completion from one provider call
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Model output, expected to contain JSON
    pub text: String,
    pub usage: TokenUsage,
    /// Provider-reported cost; `None` means the gateway estimates it
    pub cost_usd: Option<f64>,
}

impl LlmResponse {
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            usage: TokenUsage::default(),
            cost_usd: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Shared LLM provider type for concurrent access across runs.
pub type SharedProvider = Arc<dyn LlmProvider>;

/// One LLM backend
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a completion. `schema`, when given, is passed to the model as
    /// response-format guidance; conformance is checked by the caller.
    async fn generate(
        &self,
        prompt: &str,
        schema: Option<&Value>,
        temperature: f32,
    ) -> Result<LlmResponse>;

    /// Backend family name for logging
    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

/// Create a shared provider from configuration
pub fn create_provider(config: &ProviderConfig, timeout: Duration) -> Result<SharedProvider> {
    match config.provider {
        ProviderKind::Openai => Ok(Arc::new(OpenAiProvider::new(config, timeout)?)),
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(config, timeout)?)),
    }
}
