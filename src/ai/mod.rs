//! AI Integration Layer
//!
//! Provider backends, the fallback gateway, response validation and usage
//! accounting.

pub mod metrics;
pub mod provider;
pub mod timeout;
pub mod validation;

pub use metrics::{
    MetricsCollector, ProviderUsage, UsageLedger, UsageOutcome, UsageRecord, UsageSummary,
};
pub use provider::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, CompletionRequest,
    CompletionResult, GatewaySession, LlmProvider, LlmResponse, ProviderGateway,
    ProviderGatewayBuilder, ProviderSpec, RetryPolicy, SharedProvider, TokenUsage,
    create_provider, select_provider,
};
pub use timeout::{TimeoutConfig, with_timeout};
