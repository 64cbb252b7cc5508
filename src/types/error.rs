//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//! Provides error classification for retry, fallback and run-failure decisions.
//!
//! ## Error Categories
//!
//! - **Transient**: Temporary issues that may resolve (retry)
//! - **RateLimit**: API rate limiting (wait and retry)
//! - **TokenLimit**: Context too large (fallback)
//! - **Auth**: Authentication failures (reconfigure)
//! - **Network**: Connectivity issues (retry with backoff)
//! - **Unavailable**: Provider unavailable or out of quota (fallback to next)

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// Unified error categories for routing and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rate limited - wait then retry same provider
    RateLimit,
    /// Context/token limit exceeded - fallback
    TokenLimit,
    /// Authentication failed - provider needs reconfiguration
    Auth,
    /// Network/connectivity issues - retry with backoff
    Network,
    /// Provider unavailable or quota exhausted - fallback to next
    Unavailable,
    /// Invalid request - don't retry, fix request
    BadRequest,
    /// Provider returned text that is not JSON - retry
    ParseError,
    /// Temporary server issues (5xx) - retry same provider
    Transient,
    /// Unknown error - conservative retry
    Unknown,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::RateLimit => write!(f, "RATE_LIMIT"),
            Self::TokenLimit => write!(f, "TOKEN_LIMIT"),
            Self::Auth => write!(f, "AUTH"),
            Self::Network => write!(f, "NETWORK"),
            Self::Unavailable => write!(f, "UNAVAILABLE"),
            Self::BadRequest => write!(f, "BAD_REQUEST"),
            Self::ParseError => write!(f, "PARSE_ERROR"),
            Self::Transient => write!(f, "TRANSIENT"),
            Self::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

/// How an error can be fixed by the operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remedy {
    /// Trying again later may succeed
    Retry,
    /// Configuration (credentials, request shape, provider list) must change
    Reconfigure,
}

impl ErrorCategory {
    /// Check if this category is retryable on the same provider
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimit | Self::Network | Self::Transient | Self::ParseError | Self::Unknown
        )
    }

    /// Check if this category should move straight to the next provider
    pub fn should_fallback(&self) -> bool {
        matches!(self, Self::TokenLimit | Self::Unavailable | Self::Auth)
    }

    pub fn remedy(&self) -> Remedy {
        match self {
            Self::Auth | Self::BadRequest | Self::TokenLimit => Remedy::Reconfigure,
            _ => Remedy::Retry,
        }
    }
}

// =============================================================================
// LLM Error
// =============================================================================

/// LLM error with category, provider context and retry hints
#[derive(Debug, Clone)]
pub struct LlmError {
    /// Error category for routing decisions
    pub category: ErrorCategory,
    /// Detailed error message
    pub message: String,
    /// Provider that produced the error
    pub provider: Option<String>,
    /// Suggested wait time before retry (if applicable)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(provider) = &self.provider {
            write!(f, "[{}:{}] {}", provider, self.category, self.message)
        } else {
            write!(f, "[{}] {}", self.category, self.message)
        }
    }
}

impl std::error::Error for LlmError {}

impl LlmError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
            provider: None,
            retry_after: None,
        }
    }

    pub fn with_provider(
        category: ErrorCategory,
        message: impl Into<String>,
        provider: impl Into<String>,
    ) -> Self {
        Self {
            category,
            message: message.into(),
            provider: Some(provider.into()),
            retry_after: None,
        }
    }

    /// Add suggested retry delay
    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.category.is_retryable()
    }

    pub fn should_fallback(&self) -> bool {
        self.category.should_fallback()
    }

    pub fn remedy(&self) -> Remedy {
        self.category.remedy()
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Error classifier for provider error routing
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any provider
    pub fn classify(message: &str, provider: &str) -> LlmError {
        let lower = message.to_lowercase();

        // An exhausted quota does not refill within a run
        if is_quota_message(&lower) {
            return LlmError::with_provider(ErrorCategory::Unavailable, message, provider);
        }

        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
        {
            return LlmError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30));
        }

        if lower.contains("token")
            && (lower.contains("limit") || lower.contains("exceed") || lower.contains("maximum"))
            || lower.contains("context length")
            || lower.contains("too large")
        {
            return LlmError::with_provider(ErrorCategory::TokenLimit, message, provider);
        }

        if lower.contains("auth")
            || lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("unauthorized")
            || lower.contains("permission denied")
        {
            return LlmError::with_provider(ErrorCategory::Auth, message, provider);
        }

        if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("unreachable")
        {
            return LlmError::with_provider(ErrorCategory::Network, message, provider)
                .retry_after(Duration::from_secs(5));
        }

        // 5xx are transient: the same provider may answer on the next attempt
        if lower.contains("500")
            || lower.contains("502")
            || lower.contains("503")
            || lower.contains("504")
            || lower.contains("server error")
            || lower.contains("overloaded")
            || lower.contains("temporary")
        {
            return LlmError::with_provider(ErrorCategory::Transient, message, provider)
                .retry_after(Duration::from_secs(2));
        }

        if lower.contains("service unavailable")
            || lower.contains("not found")
            || lower.contains("not configured")
        {
            return LlmError::with_provider(ErrorCategory::Unavailable, message, provider);
        }

        if lower.contains("400") || lower.contains("bad request") || lower.contains("malformed") {
            return LlmError::with_provider(ErrorCategory::BadRequest, message, provider);
        }

        if lower.contains("parse") || lower.contains("json") || lower.contains("syntax") {
            return LlmError::with_provider(ErrorCategory::ParseError, message, provider)
                .retry_after(Duration::from_secs(1));
        }

        LlmError::with_provider(ErrorCategory::Unknown, message, provider)
    }

    /// Classify HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, provider: &str) -> LlmError {
        match status {
            429 if is_quota_message(&message.to_lowercase()) => {
                LlmError::with_provider(ErrorCategory::Unavailable, message, provider)
            }
            429 => LlmError::with_provider(ErrorCategory::RateLimit, message, provider)
                .retry_after(Duration::from_secs(30)),
            401 | 403 => LlmError::with_provider(ErrorCategory::Auth, message, provider),
            400 | 422 => LlmError::with_provider(ErrorCategory::BadRequest, message, provider),
            413 => LlmError::with_provider(ErrorCategory::TokenLimit, message, provider),
            500 | 502 | 503 | 504 => {
                LlmError::with_provider(ErrorCategory::Transient, message, provider)
                    .retry_after(Duration::from_secs(5))
            }
            404 => LlmError::with_provider(ErrorCategory::Unavailable, message, provider),
            _ => LlmError::with_provider(ErrorCategory::Unknown, message, provider),
        }
    }

    /// Classify a ThreatError with type-based routing
    pub fn classify_error(err: &ThreatError, provider: &str) -> LlmError {
        match err {
            ThreatError::Llm(llm_err) => {
                let mut classified = llm_err.clone();
                if classified.provider.is_none() {
                    classified.provider = Some(provider.to_string());
                }
                classified
            }
            ThreatError::LlmApi(msg) => Self::classify(msg, provider),
            ThreatError::Timeout { .. } => {
                LlmError::with_provider(ErrorCategory::Network, err.to_string(), provider)
                    .retry_after(Duration::from_secs(5))
            }
            ThreatError::Json(_) => {
                LlmError::with_provider(ErrorCategory::ParseError, err.to_string(), provider)
            }
            ThreatError::Config(_) => {
                LlmError::with_provider(ErrorCategory::Unavailable, err.to_string(), provider)
            }
            _ => LlmError::with_provider(ErrorCategory::Unknown, err.to_string(), provider),
        }
    }
}

/// Billing-quota exhaustion (`insufficient_quota`, "exceeded your current
/// quota"), as opposed to a per-minute rate limit
fn is_quota_message(lower: &str) -> bool {
    lower.contains("quota")
}

// =============================================================================
// Context write violations
// =============================================================================

/// Why an `apply` on the shared context was rejected
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteViolation {
    /// The agent does not own the field
    NotOwner { field: String, owner: String },
    /// The field was already written during this run
    AlreadyWritten { field: String },
    /// The run is terminal and its context is read-only
    Frozen,
}

impl std::fmt::Display for WriteViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotOwner { field, owner } => {
                write!(f, "field '{}' is owned by '{}'", field, owner)
            }
            Self::AlreadyWritten { field } => write!(f, "field '{}' was already written", field),
            Self::Frozen => write!(f, "context is frozen"),
        }
    }
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ThreatError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Gateway Errors
    // -------------------------------------------------------------------------
    /// Structured LLM error with category and retry hints
    #[error("LLM error: {0}")]
    Llm(LlmError),

    /// Unclassified provider error text (classified later by ErrorClassifier)
    #[error("LLM API error: {0}")]
    LlmApi(String),

    /// Response never matched the requested schema
    #[error("Schema validation failed after {attempts} attempts: {message}")]
    SchemaValidation { message: String, attempts: u32 },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // -------------------------------------------------------------------------
    // Pipeline Errors
    // -------------------------------------------------------------------------
    #[error("Agent '{agent}' failed: {message}")]
    AgentFailure { agent: String, message: String },

    #[error("Context write violation by '{agent}': {violation}")]
    ContextWriteViolation {
        agent: String,
        violation: WriteViolation,
    },

    #[error("Run {run_id} exceeded its timeout of {duration:?}")]
    RunTimeout { run_id: String, duration: Duration },

    #[error("Run {run_id} was cancelled")]
    Cancelled { run_id: String },

    /// Operation timeout with context
    #[error("Timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    // -------------------------------------------------------------------------
    // Lookup / Infrastructure Errors
    // -------------------------------------------------------------------------
    #[error("Run not found: {run_id}")]
    NotFound { run_id: String },

    #[error("Run {run_id} is still in progress")]
    RunInProgress { run_id: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<LlmError> for ThreatError {
    fn from(err: LlmError) -> Self {
        ThreatError::Llm(err)
    }
}

pub type Result<T> = std::result::Result<T, ThreatError>;

impl ThreatError {
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    pub fn agent_failure(agent: impl Into<String>, message: impl Into<String>) -> Self {
        Self::AgentFailure {
            agent: agent.into(),
            message: message.into(),
        }
    }

    pub fn not_found(run_id: impl Into<String>) -> Self {
        Self::NotFound {
            run_id: run_id.into(),
        }
    }

    /// Category for errors that came out of the gateway
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Llm(e) => Some(e.category),
            Self::SchemaValidation { .. } => Some(ErrorCategory::ParseError),
            Self::InvalidRequest(_) => Some(ErrorCategory::BadRequest),
            Self::Timeout { .. } => Some(ErrorCategory::Network),
            _ => None,
        }
    }

    /// Whether the failure is fixable by retrying or needs reconfiguration
    pub fn remedy(&self) -> Remedy {
        match self {
            Self::Config(_) | Self::InvalidRequest(_) | Self::ContextWriteViolation { .. } => {
                Remedy::Reconfigure
            }
            _ => self.category().map(|c| c.remedy()).unwrap_or(Remedy::Retry),
        }
    }
}

// =============================================================================
// Storage context helper
// =============================================================================

/// Attach context to infrastructure errors, folding them into `Storage`
pub trait ResultExt<T> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T>;

    /// Lazy variant for contexts that need formatting
    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>;
}

impl<T, E: std::error::Error + Send + Sync + 'static> ResultExt<T> for std::result::Result<T, E> {
    fn with_context<C: Into<String>>(self, context: C) -> Result<T> {
        self.map_err(|e| ThreatError::Storage(format!("{}: {}", context.into(), e)))
    }

    fn with_context_fn<F, C>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> C,
        C: Into<String>,
    {
        self.map_err(|e| ThreatError::Storage(format!("{}: {}", f().into(), e)))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_category_display() {
        assert_eq!(ErrorCategory::RateLimit.to_string(), "RATE_LIMIT");
        assert_eq!(ErrorCategory::TokenLimit.to_string(), "TOKEN_LIMIT");
        assert_eq!(ErrorCategory::Auth.to_string(), "AUTH");
    }

    #[test]
    fn test_error_category_retryable() {
        assert!(ErrorCategory::RateLimit.is_retryable());
        assert!(ErrorCategory::Network.is_retryable());
        assert!(ErrorCategory::Transient.is_retryable());
        assert!(!ErrorCategory::Auth.is_retryable());
        assert!(!ErrorCategory::BadRequest.is_retryable());
    }

    #[test]
    fn test_remedy_distinguishes_retry_from_reconfigure() {
        assert_eq!(ErrorCategory::Transient.remedy(), Remedy::Retry);
        assert_eq!(ErrorCategory::RateLimit.remedy(), Remedy::Retry);
        assert_eq!(ErrorCategory::Auth.remedy(), Remedy::Reconfigure);
        assert_eq!(ErrorCategory::BadRequest.remedy(), Remedy::Reconfigure);

        let err = ThreatError::InvalidRequest("empty prompt".into());
        assert_eq!(err.remedy(), Remedy::Reconfigure);
    }

    #[test]
    fn test_classify_rate_limit() {
        let err = ErrorClassifier::classify("Rate limit reached for requests per min", "openai");
        assert_eq!(err.category, ErrorCategory::RateLimit);
        assert!(err.is_retryable());
        assert!(!err.should_fallback());
    }

    #[test]
    fn test_classify_quota_falls_back() {
        let err = ErrorClassifier::classify(
            "OpenAI API error (429): You exceeded your current quota, please check your plan",
            "openai",
        );
        assert_eq!(err.category, ErrorCategory::Unavailable);
        assert!(err.should_fallback());

        let err = ErrorClassifier::classify("Quota exceeded for model", "openai");
        assert_eq!(err.category, ErrorCategory::Unavailable);

        let body = r#"{"error": {"type": "insufficient_quota", "message": "billing"}}"#;
        let err = ErrorClassifier::classify_http_status(429, body, "openai");
        assert_eq!(err.category, ErrorCategory::Unavailable);
        assert!(err.retry_after.is_none());
    }

    #[test]
    fn test_classify_server_error_is_transient() {
        let err = ErrorClassifier::classify("OpenAI API error (503): overloaded", "openai");
        assert_eq!(err.category, ErrorCategory::Transient);
    }

    #[test]
    fn test_classify_auth() {
        let err = ErrorClassifier::classify("Invalid API key provided", "openai");
        assert_eq!(err.category, ErrorCategory::Auth);
        assert!(err.should_fallback());
    }

    #[test]
    fn test_classify_http_status() {
        let rate_limit = ErrorClassifier::classify_http_status(429, "Rate limited", "test");
        assert_eq!(rate_limit.category, ErrorCategory::RateLimit);

        let auth = ErrorClassifier::classify_http_status(401, "Unauthorized", "test");
        assert_eq!(auth.category, ErrorCategory::Auth);

        let server_error = ErrorClassifier::classify_http_status(500, "Server error", "test");
        assert_eq!(server_error.category, ErrorCategory::Transient);
    }

    #[test]
    fn test_classify_structured_error_keeps_category() {
        let err = ThreatError::Llm(LlmError::new(ErrorCategory::Transient, "boom"));
        let classified = ErrorClassifier::classify_error(&err, "primary");
        assert_eq!(classified.category, ErrorCategory::Transient);
        assert_eq!(classified.provider.as_deref(), Some("primary"));
    }

    #[test]
    fn test_llm_error_display() {
        let err = LlmError::with_provider(ErrorCategory::RateLimit, "Too many requests", "openai");
        assert_eq!(err.to_string(), "[openai:RATE_LIMIT] Too many requests");
    }

    #[test]
    fn test_write_violation_display() {
        let v = WriteViolation::NotOwner {
            field: "assets".into(),
            owner: "system_analyst".into(),
        };
        assert_eq!(v.to_string(), "field 'assets' is owned by 'system_analyst'");
    }
}
