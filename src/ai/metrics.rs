//! Usage Tracking
//!
//! Two levels of accounting:
//!
//! - [`MetricsCollector`]: process-wide per-provider counters shared by every
//!   run. Updated with atomics only, so concurrent runs never contend on a lock
//!   for a hot counter.
//! - [`UsageLedger`]: the per-run list of [`UsageRecord`]s, one per attempt
//!   (failed attempts included), folded into a [`UsageSummary`] for the
//!   persisted result document.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::types::ErrorCategory;

/// Cost is accumulated in micro-dollars so it fits an atomic integer
fn to_micros(usd: f64) -> u64 {
    (usd.max(0.0) * 1_000_000.0).round() as u64
}

fn from_micros(micros: u64) -> f64 {
    micros as f64 / 1_000_000.0
}

// =============================================================================
// Usage records
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "category", rename_all = "snake_case")]
pub enum UsageOutcome {
    Success,
    Failed(ErrorCategory),
    /// The provider answered but the answer did not match the schema
    SchemaRejected,
}

impl UsageOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UsageOutcome::Success)
    }
}

/// One gateway attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub run_id: String,
    pub provider: String,
    pub model: String,
    /// 1-based attempt number within the `complete` call
    pub attempt: u32,
    pub outcome: UsageOutcome,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub latency_ms: u64,
    /// SHA-256 prefix of the prompt text sent on this attempt
    pub prompt_fingerprint: String,
}

// =============================================================================
// Process-wide counters
// =============================================================================

#[derive(Debug, Default)]
struct ProviderCounters {
    calls: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    input_tokens: AtomicU64,
    output_tokens: AtomicU64,
    cost_micros: AtomicU64,
    latency_ms: AtomicU64,
}

/// Snapshot of one provider's counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderUsage {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Thread-safe per-provider metrics shared across all runs.
#[derive(Default)]
pub struct MetricsCollector {
    providers: DashMap<String, Arc<ProviderCounters>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, provider: &str) -> Arc<ProviderCounters> {
        if let Some(existing) = self.providers.get(provider) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.providers
                .entry(provider.to_string())
                .or_default()
                .value(),
        )
    }

    pub fn record(&self, record: &UsageRecord) {
        let counters = self.counters(&record.provider);
        counters.calls.fetch_add(1, Ordering::Relaxed);
        if record.outcome.is_success() {
            counters.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            counters.failures.fetch_add(1, Ordering::Relaxed);
        }
        counters
            .input_tokens
            .fetch_add(record.input_tokens, Ordering::Relaxed);
        counters
            .output_tokens
            .fetch_add(record.output_tokens, Ordering::Relaxed);
        counters
            .cost_micros
            .fetch_add(to_micros(record.cost_usd), Ordering::Relaxed);
        counters
            .latency_ms
            .fetch_add(record.latency_ms, Ordering::Relaxed);
    }

    /// Ordered snapshot of every provider seen so far
    pub fn snapshot(&self) -> BTreeMap<String, ProviderUsage> {
        self.providers
            .iter()
            .map(|entry| {
                let c = entry.value();
                (
                    entry.key().clone(),
                    ProviderUsage {
                        calls: c.calls.load(Ordering::Relaxed),
                        successes: c.successes.load(Ordering::Relaxed),
                        failures: c.failures.load(Ordering::Relaxed),
                        input_tokens: c.input_tokens.load(Ordering::Relaxed),
                        output_tokens: c.output_tokens.load(Ordering::Relaxed),
                        cost_usd: from_micros(c.cost_micros.load(Ordering::Relaxed)),
                    },
                )
            })
            .collect()
    }
}

// =============================================================================
// Per-run ledger
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
    pub total_latency_ms: u64,
    pub by_provider: BTreeMap<String, ProviderUsage>,
}

impl UsageSummary {
    pub fn successes_for(&self, provider: &str) -> u64 {
        self.by_provider
            .get(provider)
            .map(|p| p.successes)
            .unwrap_or(0)
    }

    pub fn display(&self) -> String {
        format!(
            "API Calls: {} ({} ok, {} failed)\n\
             Tokens: {} (input: {}, output: {})\n\
             Estimated Cost: ${:.4}",
            self.total_calls,
            self.successful_calls,
            self.failed_calls,
            self.input_tokens + self.output_tokens,
            self.input_tokens,
            self.output_tokens,
            self.total_cost_usd
        )
    }
}

/// Attempt log for a single run
#[derive(Debug, Default)]
pub struct UsageLedger {
    records: Mutex<Vec<UsageRecord>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: UsageRecord) {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(record);
    }

    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn summary(&self) -> UsageSummary {
        let records = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut summary = UsageSummary::default();
        let mut cost_micros = 0u64;
        let mut provider_cost: BTreeMap<String, u64> = BTreeMap::new();

        for record in records.iter() {
            summary.total_calls += 1;
            summary.input_tokens += record.input_tokens;
            summary.output_tokens += record.output_tokens;
            summary.total_latency_ms += record.latency_ms;
            cost_micros += to_micros(record.cost_usd);

            let entry = summary
                .by_provider
                .entry(record.provider.clone())
                .or_default();
            entry.calls += 1;
            entry.input_tokens += record.input_tokens;
            entry.output_tokens += record.output_tokens;
            *provider_cost.entry(record.provider.clone()).or_default() +=
                to_micros(record.cost_usd);

            if record.outcome.is_success() {
                summary.successful_calls += 1;
                entry.successes += 1;
            } else {
                summary.failed_calls += 1;
                entry.failures += 1;
            }
        }

        summary.total_cost_usd = from_micros(cost_micros);
        for (provider, micros) in provider_cost {
            if let Some(entry) = summary.by_provider.get_mut(&provider) {
                entry.cost_usd = from_micros(micros);
            }
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(provider: &str, outcome: UsageOutcome, cost: f64) -> UsageRecord {
        UsageRecord {
            run_id: "run".to_string(),
            provider: provider.to_string(),
            model: "m".to_string(),
            attempt: 1,
            outcome,
            input_tokens: 100,
            output_tokens: 50,
            cost_usd: cost,
            latency_ms: 10,
            prompt_fingerprint: "abc".to_string(),
        }
    }

    #[test]
    fn test_ledger_summary_counts_failed_attempts() {
        let ledger = UsageLedger::new();
        ledger.push(record(
            "a",
            UsageOutcome::Failed(ErrorCategory::Transient),
            0.0,
        ));
        ledger.push(record("a", UsageOutcome::SchemaRejected, 0.001));
        ledger.push(record("b", UsageOutcome::Success, 0.002));

        let summary = ledger.summary();
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.successful_calls, 1);
        assert_eq!(summary.failed_calls, 2);
        assert_eq!(summary.successes_for("a"), 0);
        assert_eq!(summary.successes_for("b"), 1);
        assert_eq!(summary.input_tokens, 300);
        assert!((summary.total_cost_usd - 0.003).abs() < 1e-9);
        assert!((summary.by_provider["a"].cost_usd - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_collector_is_shared_across_threads() {
        let collector = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        collector.record(&record("a", UsageOutcome::Success, 0.0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = collector.snapshot();
        assert_eq!(snapshot["a"].calls, 800);
        assert_eq!(snapshot["a"].successes, 800);
    }

    #[test]
    fn test_outcome_serialization() {
        let json = serde_json::to_value(UsageOutcome::Failed(ErrorCategory::RateLimit)).unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["category"], "rate_limit");
    }
}
