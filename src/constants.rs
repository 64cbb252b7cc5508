//! Global Constants
//!
//! Centralized constants for configuration and tuning.
//! All magic numbers should be defined here with documentation.

/// Provider gateway constants
pub mod gateway {
    /// Default maximum retries per provider for retryable errors
    pub const DEFAULT_MAX_RETRIES: u32 = 3;

    /// Default re-prompts after a schema violation
    pub const DEFAULT_MAX_SCHEMA_RETRIES: u32 = 2;

    /// Base delay for exponential backoff (milliseconds)
    pub const BASE_DELAY_MS: u64 = 500;

    /// Maximum delay between retries (milliseconds)
    pub const MAX_DELAY_MS: u64 = 30_000;

    /// Backoff multiplier
    pub const BACKOFF_FACTOR: f64 = 2.0;

    /// Upper bound of random jitter added to each backoff (fraction of the delay)
    pub const JITTER_FRACTION: f64 = 0.25;

    /// Per-call timeout (seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;

    /// Hex characters kept from the SHA-256 prompt fingerprint
    pub const FINGERPRINT_LEN: usize = 16;
}

/// Circuit breaker constants
pub mod circuit_breaker {
    /// Number of consecutive failures before opening circuit
    pub const FAILURE_THRESHOLD: u32 = 5;

    /// Duration to wait before attempting recovery (seconds)
    pub const RECOVERY_TIMEOUT_SECS: u64 = 30;

    /// Maximum requests allowed in half-open state
    pub const HALF_OPEN_MAX_REQUESTS: u32 = 3;

    /// Success threshold to close circuit from half-open
    pub const SUCCESS_THRESHOLD: u32 = 2;
}

/// Run pipeline constants
pub mod pipeline {
    /// Per-agent step timeout, covering the gateway's internal retries (seconds).
    /// Must exceed one provider's full retry budget so a fallback still fits.
    pub const AGENT_TIMEOUT_SECS: u64 = 300;

    /// Coarse timeout for a whole run (seconds)
    pub const RUN_TIMEOUT_SECS: u64 = 900;

    /// Contributions below this confidence are flagged for review
    pub const LOW_CONFIDENCE_THRESHOLD: f64 = 0.5;

    /// Weight of the Mapper priority when intel enrichment is applied
    pub const INTEL_PRIORITY_WEIGHT: f64 = 0.7;

    /// Weight of the strongest technique relevance when enrichment is applied
    pub const INTEL_RELEVANCE_WEIGHT: f64 = 0.3;

    /// Status polling interval used by the CLI (milliseconds)
    pub const STATUS_POLL_INTERVAL_MS: u64 = 250;
}

/// Confidence scoring constants
pub mod confidence {
    pub const COMPLETENESS_WEIGHT: f64 = 0.5;
    pub const NOT_HEDGED_WEIGHT: f64 = 0.2;
    pub const SPECIFICITY_WEIGHT: f64 = 0.3;

    /// Free-text fields shorter than this count as non-specific (characters)
    pub const MIN_SPECIFIC_TEXT_LEN: usize = 20;
}

/// HTTP/Network constants
pub mod network {
    /// Connection timeout (seconds)
    pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

    /// Default OpenAI-compatible endpoint
    pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

    /// Default Ollama endpoint
    pub const OLLAMA_API_BASE: &str = "http://localhost:11434";
}
