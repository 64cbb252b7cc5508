//! Provider Gateway
//!
//! One completion interface over an ordered list of providers.
//!
//! ## Strategy
//!
//! 1. Pick a provider with [`select_provider`]: the preferred one if it is
//!    available, otherwise the first available in configured order
//! 2. Call it under the per-request timeout, recording a usage entry
//! 3. On a retryable failure, back off (exponential, jittered) and retry the
//!    same provider up to `max_retries`
//! 4. On a fallback-class failure (auth, unavailable, token limit), or once
//!    retries are exhausted, demote the provider for the rest of the run and
//!    select again
//! 5. A bad request fails immediately
//! 6. A response that is not JSON or violates the schema is re-prompted with
//!    the violations listed, up to `max_schema_retries`
//!
//! Circuit breakers and usage counters are process-wide and shared by every
//! run. Demotions and the usage ledger belong to a [`GatewaySession`], so a
//! provider that failed during a run is never re-selected in that run.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::{SharedProvider, TokenUsage, create_provider, prompt_utils};
use crate::ai::metrics::{MetricsCollector, ProviderUsage, UsageLedger, UsageOutcome, UsageRecord};
use crate::ai::validation::{Checked, check_against, extract_json};
use crate::config::{LlmConfig, ProviderConfig};
use crate::constants::gateway as gateway_constants;
use crate::types::{ErrorCategory, ErrorClassifier, LlmError, Result, RunId, ThreatError};

// =============================================================================
// Request / Result
// =============================================================================

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub prompt: String,
    /// JSON schema the response must satisfy
    pub schema: Option<Value>,
    /// Provider name or model name to try first
    pub preferred_model: Option<String>,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            schema: None,
            preferred_model: None,
            temperature: 0.0,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }

    pub fn prefer(mut self, model: Option<String>) -> Self {
        self.preferred_model = model;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(ThreatError::InvalidRequest("prompt must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(ThreatError::InvalidRequest(format!(
                "temperature must be within [0, 1], got {}",
                self.temperature
            )));
        }
        Ok(())
    }
}

/// A validated completion and the provider that actually served it
#[derive(Debug, Clone)]
pub struct CompletionResult {
    pub content: Value,
    pub provider: String,
    pub model: String,
    pub usage: TokenUsage,
    pub cost_usd: f64,
    pub latency_ms: u64,
    /// Attempts made across all providers for this request
    pub attempts: u32,
}

// =============================================================================
// Selection
// =============================================================================

/// Identity of one entry in the ordered preference list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderSpec {
    pub name: String,
    pub model: String,
}

/// Pure provider selection.
///
/// `available[i]` says whether `order[i]` may be used. A `preferred` value
/// matching an available entry's name or model wins; otherwise the first
/// available entry in order is chosen.
pub fn select_provider(
    order: &[ProviderSpec],
    preferred: Option<&str>,
    available: &[bool],
) -> Option<usize> {
    let is_available = |i: usize| available.get(i).copied().unwrap_or(false);

    if let Some(preferred) = preferred
        && let Some(idx) = order
            .iter()
            .enumerate()
            .position(|(i, spec)| is_available(i) && (spec.name == preferred || spec.model == preferred))
    {
        return Some(idx);
    }

    (0..order.len()).find(|&i| is_available(i))
}

// =============================================================================
// Retry policy
// =============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub max_schema_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: gateway_constants::DEFAULT_MAX_RETRIES,
            max_schema_retries: gateway_constants::DEFAULT_MAX_SCHEMA_RETRIES,
            base_delay: Duration::from_millis(gateway_constants::BASE_DELAY_MS),
            max_delay: Duration::from_millis(gateway_constants::MAX_DELAY_MS),
            backoff_factor: gateway_constants::BACKOFF_FACTOR,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &LlmConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            max_schema_retries: config.max_schema_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            backoff_factor: config.backoff_factor,
        }
    }

    /// Delay before retry number `retry` (1-based), capped and jittered
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = self.backoff_factor.powi(retry.saturating_sub(1) as i32);
        let base = Duration::from_secs_f64(self.base_delay.as_secs_f64() * exp).min(self.max_delay);
        (base + random_jitter(base)).min(self.max_delay)
    }
}

fn random_jitter(delay: Duration) -> Duration {
    let max_jitter_ms = (delay.as_millis() as f64 * gateway_constants::JITTER_FRACTION) as u64;
    if max_jitter_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..max_jitter_ms))
}

fn fingerprint(prompt: &str) -> String {
    let mut hex = format!("{:x}", Sha256::digest(prompt.as_bytes()));
    hex.truncate(gateway_constants::FINGERPRINT_LEN);
    hex
}

// =============================================================================
// Gateway
// =============================================================================

struct ProviderSlot {
    spec: ProviderSpec,
    provider: SharedProvider,
    input_cost_per_1k: f64,
    output_cost_per_1k: f64,
}

impl ProviderSlot {
    fn estimate_cost(&self, usage: &TokenUsage) -> f64 {
        (usage.input_tokens as f64 / 1000.0) * self.input_cost_per_1k
            + (usage.output_tokens as f64 / 1000.0) * self.output_cost_per_1k
    }
}

/// Process-wide gateway: provider list, circuit breakers, usage counters.
pub struct ProviderGateway {
    slots: Vec<ProviderSlot>,
    policy: RetryPolicy,
    request_timeout: Duration,
    breakers: DashMap<String, CircuitBreaker>,
    metrics: MetricsCollector,
}

impl ProviderGateway {
    /// Build providers from configuration, in preference order
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        if config.providers.is_empty() {
            return Err(ThreatError::Config("No LLM providers configured".into()));
        }
        let timeout = Duration::from_secs(config.request_timeout_secs);
        let mut builder = ProviderGatewayBuilder::new()
            .with_policy(RetryPolicy::from_config(config))
            .with_request_timeout(timeout);
        for provider_config in &config.providers {
            let provider = create_provider(provider_config, timeout)?;
            builder = builder.add_configured(provider_config, provider);
        }
        Ok(builder.build())
    }

    pub fn specs(&self) -> Vec<ProviderSpec> {
        self.slots.iter().map(|s| s.spec.clone()).collect()
    }

    /// Open a per-run session
    pub fn session(self: &Arc<Self>, run_id: RunId, cancel: CancellationToken) -> GatewaySession {
        GatewaySession {
            gateway: Arc::clone(self),
            run_id,
            cancel,
            demoted: Mutex::new(BTreeSet::new()),
            ledger: Arc::new(UsageLedger::new()),
        }
    }

    /// Process-wide per-provider totals
    pub fn usage_totals(&self) -> std::collections::BTreeMap<String, ProviderUsage> {
        self.metrics.snapshot()
    }

    fn breaker_available(&self, name: &str) -> bool {
        self.breakers
            .get(name)
            .map(|cb| cb.is_available())
            .unwrap_or(true)
    }
}

/// Builder for creating gateways
pub struct ProviderGatewayBuilder {
    slots: Vec<ProviderSlot>,
    policy: RetryPolicy,
    request_timeout: Duration,
    circuit_breaker: CircuitBreakerConfig,
}

impl ProviderGatewayBuilder {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            policy: RetryPolicy::default(),
            request_timeout: Duration::from_secs(gateway_constants::REQUEST_TIMEOUT_SECS),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }

    /// Append a provider under `name`; pricing defaults to zero
    pub fn add_provider(mut self, name: impl Into<String>, provider: SharedProvider) -> Self {
        self.slots.push(ProviderSlot {
            spec: ProviderSpec {
                name: name.into(),
                model: provider.model().to_string(),
            },
            provider,
            input_cost_per_1k: 0.0,
            output_cost_per_1k: 0.0,
        });
        self
    }

    fn add_configured(mut self, config: &ProviderConfig, provider: SharedProvider) -> Self {
        self.slots.push(ProviderSlot {
            spec: ProviderSpec {
                name: config.name.clone(),
                model: config.model.clone(),
            },
            provider,
            input_cost_per_1k: config.input_cost_per_1k,
            output_cost_per_1k: config.output_cost_per_1k,
        });
        self
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = config;
        self
    }

    pub fn build(self) -> ProviderGateway {
        let breakers = DashMap::new();
        for slot in &self.slots {
            breakers.insert(
                slot.spec.name.clone(),
                CircuitBreaker::new(slot.spec.name.clone(), self.circuit_breaker.clone()),
            );
        }
        ProviderGateway {
            slots: self.slots,
            policy: self.policy,
            request_timeout: self.request_timeout,
            breakers,
            metrics: MetricsCollector::new(),
        }
    }
}

impl Default for ProviderGatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Session
// =============================================================================

/// What to do after a failed attempt
enum Next {
    RetrySame,
    Fallback,
}

/// Per-run view of the gateway
pub struct GatewaySession {
    gateway: Arc<ProviderGateway>,
    run_id: RunId,
    cancel: CancellationToken,
    /// Slots this run will not use again
    demoted: Mutex<BTreeSet<usize>>,
    ledger: Arc<UsageLedger>,
}

impl GatewaySession {
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn ledger(&self) -> Arc<UsageLedger> {
        Arc::clone(&self.ledger)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Clarifying re-prompts allowed after a malformed answer
    pub fn max_schema_retries(&self) -> u32 {
        self.gateway.policy.max_schema_retries
    }

    fn demote(&self, idx: usize) {
        let newly = self
            .demoted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(idx);
        if newly {
            warn!(
                run_id = %self.run_id,
                provider = %self.gateway.slots[idx].spec.name,
                "Provider demoted for the rest of this run"
            );
        }
    }

    /// Availability for this run. Providers skipped because their circuit is
    /// open are demoted too, so a later half-open trial request cannot flip the run
    /// back to them.
    fn availability(&self) -> Vec<bool> {
        let mut demoted = self
            .demoted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.gateway
            .slots
            .iter()
            .enumerate()
            .map(|(i, slot)| {
                if demoted.contains(&i) {
                    return false;
                }
                if !self.gateway.breaker_available(&slot.spec.name) {
                    demoted.insert(i);
                    return false;
                }
                true
            })
            .collect()
    }

    fn record(&self, record: UsageRecord) {
        self.gateway.metrics.record(&record);
        self.ledger.push(record);
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ThreatError::Cancelled {
                run_id: self.run_id.to_string(),
            });
        }
        Ok(())
    }

    /// Issue a completion, retrying and falling back as needed.
    #[instrument(skip(self, request), fields(run_id = %self.run_id, preferred = ?request.preferred_model))]
    pub async fn complete(&self, request: CompletionRequest) -> Result<CompletionResult> {
        request.validate()?;

        let gateway = &self.gateway;
        let policy = &gateway.policy;
        let specs = gateway.specs();
        let schema = request.schema.as_ref();

        let mut attempts = 0u32;
        let mut schema_rejections = 0u32;
        let mut prompt = request.prompt.clone();
        let mut last_error: Option<LlmError> = None;

        loop {
            self.check_cancelled()?;

            let Some(idx) =
                select_provider(&specs, request.preferred_model.as_deref(), &self.availability())
            else {
                let err = last_error.unwrap_or_else(|| {
                    LlmError::new(
                        ErrorCategory::Unavailable,
                        "no provider is available for this run",
                    )
                });
                warn!(run_id = %self.run_id, error = %err, "All providers exhausted");
                return Err(err.into());
            };

            let slot = &gateway.slots[idx];
            let name = slot.spec.name.as_str();
            let mut failures = 0u32;

            loop {
                self.check_cancelled()?;

                let admitted = gateway
                    .breakers
                    .get(name)
                    .map(|cb| cb.try_acquire())
                    .unwrap_or(true);
                if !admitted {
                    debug!(provider = %name, "Circuit rejected attempt");
                    self.demote(idx);
                    break;
                }

                attempts += 1;
                let started = Instant::now();
                let outcome = crate::ai::timeout::with_timeout(
                    gateway.request_timeout,
                    slot.provider.generate(&prompt, schema, request.temperature),
                    &format!("{} completion", name),
                )
                .await;
                let latency_ms = started.elapsed().as_millis() as u64;

                let base_record = UsageRecord {
                    run_id: self.run_id.to_string(),
                    provider: name.to_string(),
                    model: slot.spec.model.clone(),
                    attempt: attempts,
                    outcome: UsageOutcome::Success,
                    input_tokens: 0,
                    output_tokens: 0,
                    cost_usd: 0.0,
                    latency_ms,
                    prompt_fingerprint: fingerprint(&prompt),
                };

                match outcome {
                    Ok(response) => {
                        if let Some(cb) = gateway.breakers.get(name) {
                            cb.record_success();
                        }
                        let cost = response
                            .cost_usd
                            .unwrap_or_else(|| slot.estimate_cost(&response.usage));
                        let record = UsageRecord {
                            input_tokens: response.usage.input_tokens,
                            output_tokens: response.usage.output_tokens,
                            cost_usd: cost,
                            ..base_record
                        };

                        let violations = match extract_json(&response.text) {
                            Ok((value, _)) => match check_against(value, schema) {
                                Checked::Valid(content) => {
                                    self.record(record);
                                    info!(provider = %name, attempts, "Completion served");
                                    return Ok(CompletionResult {
                                        content,
                                        provider: name.to_string(),
                                        model: slot.spec.model.clone(),
                                        usage: response.usage,
                                        cost_usd: cost,
                                        latency_ms,
                                        attempts,
                                    });
                                }
                                Checked::Invalid { violations, .. } => violations,
                            },
                            Err(e) => vec![format!("$: {}", e)],
                        };

                        self.record(UsageRecord {
                            outcome: UsageOutcome::SchemaRejected,
                            ..record
                        });
                        schema_rejections += 1;
                        if schema_rejections > policy.max_schema_retries {
                            warn!(provider = %name, "Schema retries exhausted");
                            return Err(ThreatError::SchemaValidation {
                                message: violations.join("; "),
                                attempts,
                            });
                        }
                        debug!(
                            provider = %name,
                            violations = violations.len(),
                            "Response rejected by schema, re-prompting"
                        );
                        prompt = prompt_utils::build_clarification_prompt(
                            &request.prompt,
                            &violations,
                        );
                    }
                    Err(err) => {
                        if matches!(err, ThreatError::InvalidRequest(_)) {
                            return Err(err);
                        }
                        // A hung provider would spend the agent step on its retries
                        let timed_out = matches!(err, ThreatError::Timeout { .. });
                        let classified = ErrorClassifier::classify_error(&err, name);
                        if let Some(cb) = gateway.breakers.get(name) {
                            cb.record_failure();
                        }
                        self.record(UsageRecord {
                            outcome: UsageOutcome::Failed(classified.category),
                            ..base_record
                        });
                        warn!(
                            provider = %name,
                            attempt = attempts,
                            category = %classified.category,
                            error = %classified.message,
                            "Provider attempt failed"
                        );

                        if classified.category == ErrorCategory::BadRequest {
                            return Err(classified.into());
                        }

                        failures += 1;
                        let next = if timed_out
                            || !classified.is_retryable()
                            || failures > policy.max_retries
                        {
                            Next::Fallback
                        } else {
                            Next::RetrySame
                        };
                        let wait = match classified.category {
                            ErrorCategory::RateLimit => classified
                                .retry_after
                                .unwrap_or_else(|| policy.backoff(failures))
                                .min(policy.max_delay),
                            _ => policy.backoff(failures),
                        };
                        last_error = Some(classified);

                        match next {
                            Next::Fallback => {
                                self.demote(idx);
                                break;
                            }
                            Next::RetrySame => {
                                debug!(provider = %name, wait_ms = wait.as_millis() as u64, "Backing off");
                                tokio::select! {
                                    _ = self.cancel.cancelled() => {
                                        return Err(ThreatError::Cancelled { run_id: self.run_id.to_string() });
                                    }
                                    _ = tokio::time::sleep(wait) => {}
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
