//! Ollama Local LLM Provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, warn};

use super::{LlmProvider, LlmResponse, TokenUsage, prompt_utils};
use crate::config::ProviderConfig;
use crate::constants::network;
use crate::types::{ErrorCategory, ErrorClassifier, LlmError, Result, ThreatError};

pub struct OllamaProvider {
    api_base: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig, timeout: Duration) -> Result<Self> {
        let api_base = Self::validate_endpoint(
            config
                .api_base
                .as_deref()
                .unwrap_or(network::OLLAMA_API_BASE),
        )?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(network::CONNECTION_TIMEOUT_SECS))
            .build()
            .map_err(|e| ThreatError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_base,
            model: config.model.clone(),
            client,
        })
    }

    /// Only http/https endpoints are accepted; non-local hosts are logged.
    fn validate_endpoint(endpoint: &str) -> Result<String> {
        let url = url::Url::parse(endpoint).map_err(|e| {
            ThreatError::Config(format!("Invalid Ollama endpoint URL '{}': {}", endpoint, e))
        })?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(ThreatError::Config(format!(
                "Ollama endpoint must use http or https scheme, got: {}",
                url.scheme()
            )));
        }

        if let Some(host) = url.host_str()
            && !matches!(host, "localhost" | "127.0.0.1" | "[::1]")
        {
            warn!(host, "Ollama endpoint is not localhost");
        }

        Ok(url.as_str().trim_end_matches('/').to_string())
    }

    fn build_request(&self, prompt: &str, schema: Option<&Value>, temperature: f32) -> OllamaRequest {
        OllamaRequest {
            model: self.model.clone(),
            prompt: prompt_utils::build_schema_prompt(prompt, schema),
            stream: false,
            format: "json",
            options: OllamaOptions { temperature },
        }
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    async fn generate(
        &self,
        prompt: &str,
        schema: Option<&Value>,
        temperature: f32,
    ) -> Result<LlmResponse> {
        let request = self.build_request(prompt, schema, temperature);
        let url = format!("{}/api/generate", self.api_base);
        debug!(model = %self.model, "Sending generate request to Ollama");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() {
                    LlmError::with_provider(
                        ErrorCategory::Unavailable,
                        format!("Cannot connect to Ollama at {}: {}", self.api_base, e),
                        "ollama",
                    )
                } else if e.is_timeout() {
                    LlmError::with_provider(ErrorCategory::Network, e.to_string(), "ollama")
                } else {
                    LlmError::with_provider(ErrorCategory::Unknown, e.to_string(), "ollama")
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ErrorClassifier::classify_http_status(
                status.as_u16(),
                &format!("Ollama API error ({}): {}", status, body),
                "ollama",
            )
            .into());
        }

        let body: OllamaResponse = response.json().await.map_err(|e| {
            LlmError::with_provider(
                ErrorCategory::ParseError,
                format!("Failed to parse Ollama response: {}", e),
                "ollama",
            )
        })?;

        Ok(LlmResponse {
            text: body.response,
            usage: TokenUsage::new(
                body.prompt_eval_count.unwrap_or(0),
                body.eval_count.unwrap_or(0),
            ),
            // Local model
            cost_usd: Some(0.0),
        })
    }

    fn name(&self) -> &str {
        "ollama"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest {
    model: String,
    prompt: String,
    stream: bool,
    format: &'static str,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    prompt_eval_count: Option<u64>,
    eval_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_endpoint() {
        assert_eq!(
            OllamaProvider::validate_endpoint("http://localhost:11434/").unwrap(),
            "http://localhost:11434"
        );
        assert!(OllamaProvider::validate_endpoint("file:///etc/passwd").is_err());
        assert!(OllamaProvider::validate_endpoint("not a url").is_err());
    }

    #[test]
    fn test_request_shape() {
        let config = ProviderConfig {
            name: "local".to_string(),
            provider: crate::config::ProviderKind::Ollama,
            model: "llama3.1".to_string(),
            api_key: None,
            api_base: None,
            max_tokens: 4096,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        };
        let provider = OllamaProvider::new(&config, Duration::from_secs(5)).unwrap();
        let value = serde_json::to_value(provider.build_request("hi", None, 0.0)).unwrap();

        assert_eq!(value["model"], "llama3.1");
        assert_eq!(value["stream"], false);
        assert_eq!(value["format"], "json");
        assert!(value["prompt"].as_str().unwrap().starts_with("hi"));
    }
}
