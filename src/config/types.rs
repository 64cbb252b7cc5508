//! Configuration Types
//!
//! All configuration structures with sensible defaults.
//! Supports global (<config dir>/threatweave/) and project (.threatweave/) level configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::constants::{gateway, pipeline};
use crate::types::{Result, ThreatError};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Configuration version
    pub version: String,

    /// LLM provider settings (ordered preference list and retry policy)
    pub llm: LlmConfig,

    /// Run pipeline settings
    pub pipeline: PipelineConfig,

    /// Per-agent settings
    pub agents: AgentsConfig,

    /// Result persistence settings
    pub storage: StorageConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            llm: LlmConfig::default(),
            pipeline: PipelineConfig::default(),
            agents: AgentsConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration values are within acceptable ranges.
    /// Returns `ThreatError::Config` on validation failure.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(ThreatError::Config(format!(
                "LLM temperature must be between 0.0 and 1.0, got {}",
                self.llm.temperature
            )));
        }

        if self.llm.request_timeout_secs == 0 {
            return Err(ThreatError::Config(
                "LLM request_timeout_secs must be greater than 0".to_string(),
            ));
        }

        if self.llm.backoff_factor < 1.0 {
            return Err(ThreatError::Config(format!(
                "LLM backoff_factor must be at least 1.0, got {}",
                self.llm.backoff_factor
            )));
        }

        if self.llm.base_delay_ms > self.llm.max_delay_ms {
            return Err(ThreatError::Config(
                "LLM base_delay_ms must not exceed max_delay_ms".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.llm.providers {
            if provider.name.trim().is_empty() || provider.model.trim().is_empty() {
                return Err(ThreatError::Config(
                    "Every provider needs a non-empty name and model".to_string(),
                ));
            }
            if !seen.insert(provider.name.as_str()) {
                return Err(ThreatError::Config(format!(
                    "Duplicate provider name: {}",
                    provider.name
                )));
            }
        }

        if self.pipeline.agent_timeout_secs == 0 || self.pipeline.run_timeout_secs == 0 {
            return Err(ThreatError::Config(
                "Pipeline timeouts must be greater than 0".to_string(),
            ));
        }

        if self.pipeline.agent_timeout_secs > self.pipeline.run_timeout_secs {
            return Err(ThreatError::Config(
                "agent_timeout_secs must not exceed run_timeout_secs".to_string(),
            ));
        }

        let budget = self.llm.provider_budget_secs();
        if budget >= self.pipeline.agent_timeout_secs as f64 {
            return Err(ThreatError::Config(format!(
                "One provider can hold an agent step for {:.0}s ({} attempts of {}s plus backoff), \
                 leaving no time to fall back within agent_timeout_secs = {}. \
                 Lower llm.max_retries or llm.request_timeout_secs, or raise agent_timeout_secs",
                budget,
                u64::from(self.llm.max_retries) + 1,
                self.llm.request_timeout_secs,
                self.pipeline.agent_timeout_secs
            )));
        }

        if !(0.0..=1.0).contains(&self.pipeline.low_confidence_threshold) {
            return Err(ThreatError::Config(format!(
                "low_confidence_threshold must be between 0.0 and 1.0, got {}",
                self.pipeline.low_confidence_threshold
            )));
        }

        Ok(())
    }
}

// =============================================================================
// LLM Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Retries per provider for retryable errors before falling back
    pub max_retries: u32,

    /// Clarifying re-prompts after a schema violation
    pub max_schema_retries: u32,

    /// Base delay for exponential backoff
    pub base_delay_ms: u64,

    /// Ceiling on a single backoff delay
    pub max_delay_ms: u64,

    pub backoff_factor: f64,

    /// Per-call timeout in seconds
    pub request_timeout_secs: u64,

    /// Default sampling temperature (0.0 = deterministic)
    pub temperature: f32,

    /// Statically ordered provider preference list (first = primary)
    pub providers: Vec<ProviderConfig>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            max_retries: gateway::DEFAULT_MAX_RETRIES,
            max_schema_retries: gateway::DEFAULT_MAX_SCHEMA_RETRIES,
            base_delay_ms: gateway::BASE_DELAY_MS,
            max_delay_ms: gateway::MAX_DELAY_MS,
            backoff_factor: gateway::BACKOFF_FACTOR,
            request_timeout_secs: gateway::REQUEST_TIMEOUT_SECS,
            temperature: 0.0,
            providers: vec![
                ProviderConfig {
                    name: "primary".to_string(),
                    provider: ProviderKind::Openai,
                    model: "gpt-4o".to_string(),
                    api_key: None,
                    api_base: None,
                    max_tokens: 4096,
                    input_cost_per_1k: 0.0025,
                    output_cost_per_1k: 0.01,
                },
                ProviderConfig {
                    name: "secondary".to_string(),
                    provider: ProviderKind::Ollama,
                    model: "llama3.1".to_string(),
                    api_key: None,
                    api_base: None,
                    max_tokens: 4096,
                    input_cost_per_1k: 0.0,
                    output_cost_per_1k: 0.0,
                },
            ],
        }
    }
}

impl LlmConfig {
    /// Worst-case seconds one provider can hold a call: every attempt runs to
    /// the request timeout and each backoff draws its full jitter.
    pub fn provider_budget_secs(&self) -> f64 {
        let max_delay = self.max_delay_ms as f64 / 1000.0;
        let backoff: f64 = (1..=self.max_retries)
            .map(|retry| {
                let exp = self.backoff_factor.powi(retry.saturating_sub(1) as i32);
                let delay = (self.base_delay_ms as f64 / 1000.0 * exp).min(max_delay);
                (delay * (1.0 + gateway::JITTER_FRACTION)).min(max_delay)
            })
            .sum();
        (f64::from(self.max_retries) + 1.0) * self.request_timeout_secs as f64 + backoff
    }
}

/// Backend family of a configured provider
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// OpenAI-compatible chat completions API
    Openai,
    Ollama,
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderKind::Openai => write!(f, "openai"),
            ProviderKind::Ollama => write!(f, "ollama"),
        }
    }
}

/// One entry in the provider preference list
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique handle used in usage records and `preferred_model` matching
    pub name: String,

    pub provider: ProviderKind,

    pub model: String,

    /// Never written back out by `config show`; prefer the provider's env var
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Endpoint override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base: Option<String>,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// USD per 1k prompt tokens, used when the provider does not report cost
    #[serde(default)]
    pub input_cost_per_1k: f64,

    /// USD per 1k completion tokens
    #[serde(default)]
    pub output_cost_per_1k: f64,
}

fn default_max_tokens() -> u32 {
    4096
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("max_tokens", &self.max_tokens)
            .field("input_cost_per_1k", &self.input_cost_per_1k)
            .field("output_cost_per_1k", &self.output_cost_per_1k)
            .finish()
    }
}

impl ProviderConfig {
    /// Cost in USD for a call with the given token counts
    pub fn estimate_cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        (input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

// =============================================================================
// Pipeline Configuration
// =============================================================================

/// Analysis depth passed to every agent prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisDepth {
    /// Quick pass, fewer paths and recommendations
    Fast,
    /// Balanced analysis (default)
    #[default]
    Standard,
    /// Thorough analysis
    Deep,
}

impl AnalysisDepth {
    /// Upper bound on attack paths requested from the Mapper
    pub fn max_attack_paths(&self) -> usize {
        match self {
            AnalysisDepth::Fast => 3,
            AnalysisDepth::Standard => 6,
            AnalysisDepth::Deep => 12,
        }
    }
}

impl std::fmt::Display for AnalysisDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AnalysisDepth::Fast => write!(f, "fast"),
            AnalysisDepth::Standard => write!(f, "standard"),
            AnalysisDepth::Deep => write!(f, "deep"),
        }
    }
}

impl std::str::FromStr for AnalysisDepth {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "fast" => Ok(AnalysisDepth::Fast),
            "standard" => Ok(AnalysisDepth::Standard),
            "deep" => Ok(AnalysisDepth::Deep),
            _ => Err(format!(
                "Unknown analysis depth: {}. Valid values: fast, standard, deep",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Schedule the optional Threat Intelligence agent next to the Mapper
    pub enable_threat_intel: bool,

    pub depth: AnalysisDepth,

    /// Per-agent step timeout (covers gateway retries)
    pub agent_timeout_secs: u64,

    /// Whole-run timeout after which the run is force-failed
    pub run_timeout_secs: u64,

    /// Contributions scoring below this are flagged for human review
    pub low_confidence_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_threat_intel: true,
            depth: AnalysisDepth::Standard,
            agent_timeout_secs: pipeline::AGENT_TIMEOUT_SECS,
            run_timeout_secs: pipeline::RUN_TIMEOUT_SECS,
            low_confidence_threshold: pipeline::LOW_CONFIDENCE_THRESHOLD,
        }
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Settings for a single agent role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSettings {
    /// Provider name or model name tried first for this agent
    pub preferred_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    pub system_analyst: AgentSettings,
    pub attack_mapper: AgentSettings,
    pub threat_intel: AgentSettings,
    pub control_evaluator: AgentSettings,
    pub mitigation: AgentSettings,
}

// =============================================================================
// Storage Configuration
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file holding persisted run results
    pub database_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from(".threatweave/results.db"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
