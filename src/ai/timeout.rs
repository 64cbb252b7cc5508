//! Timeout Budgets
//!
//! Three nested budgets bound a run:
//! - each gateway call (tens of seconds),
//! - each agent step, covering that agent's retries (low minutes),
//! - the whole run (order of fifteen minutes).

use std::future::Future;
use std::time::Duration;

use crate::config::Config;
use crate::types::{Result, ThreatError};

#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// One provider call
    pub llm_request: Duration,
    /// One agent invocation including gateway retries
    pub agent_step: Duration,
    /// Whole run, after which it is force-failed
    pub run: Duration,
}

impl TimeoutConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            llm_request: Duration::from_secs(config.llm.request_timeout_secs),
            agent_step: Duration::from_secs(config.pipeline.agent_timeout_secs),
            run: Duration::from_secs(config.pipeline.run_timeout_secs),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Execute an async operation with a timeout
///
/// Returns `ThreatError::Timeout` if the operation doesn't complete in time.
///
/// ```ignore
/// let response = with_timeout(
///     timeouts.llm_request,
///     provider.generate(prompt, &schema, 0.0),
///     "openai completion",
/// ).await?;
/// ```
pub async fn with_timeout<T, F>(timeout: Duration, future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(ThreatError::timeout(operation_name, timeout)),
    }
}
