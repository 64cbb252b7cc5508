//! Orchestrator
//!
//! Drives each run through the agent pipeline on its own task and exposes
//! the polling API:
//!
//! - `start` validates input, creates the run's context and returns at once
//! - `status` reports state, completion percentage and per-agent status
//! - `cancel` fails the run; in-flight contributions are discarded
//! - `result` returns the persisted document once the run is terminal
//!
//! Runs share only the process-wide gateway; every run owns its context,
//! gateway session and cancellation token.

mod run;
mod state;

pub use state::{FailureReason, ReviewFlag, RunFailure, RunResult, RunState, RunStatus};

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::agents::AgentRegistry;
use crate::ai::{ProviderGateway, TimeoutConfig};
use crate::attack::SharedKnowledge;
use crate::config::{AnalysisDepth, Config};
use crate::constants::pipeline;
use crate::context::{AgentRole, ContextManager};
use crate::storage::SharedResultStore;
use crate::types::{Result, RunId, ThreatError};

use run::{RunDriver, RunHandle};

/// Per-run overrides of the pipeline configuration
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Plain-text description of existing controls
    pub control_documentation: Option<String>,
    pub enable_threat_intel: Option<bool>,
    pub depth: Option<AnalysisDepth>,
}

pub struct Orchestrator {
    gateway: Arc<ProviderGateway>,
    knowledge: SharedKnowledge,
    store: SharedResultStore,
    config: Arc<Config>,
    registry: AgentRegistry,
    timeouts: TimeoutConfig,
    active: Arc<DashMap<RunId, Arc<RunHandle>>>,
    finished: Arc<DashMap<RunId, RunStatus>>,
}

impl Orchestrator {
    pub fn new(
        gateway: Arc<ProviderGateway>,
        knowledge: SharedKnowledge,
        store: SharedResultStore,
        config: Config,
    ) -> Self {
        Self {
            gateway,
            knowledge,
            store,
            timeouts: TimeoutConfig::from_config(&config),
            config: Arc::new(config),
            registry: AgentRegistry::standard(),
            active: Arc::new(DashMap::new()),
            finished: Arc::new(DashMap::new()),
        }
    }

    /// Replace the agent implementations
    pub fn with_registry(mut self, registry: AgentRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Start a run and return its id without waiting on any LLM call.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self, raw_input: impl Into<String>, options: RunOptions) -> Result<RunId> {
        let raw_input = raw_input.into();
        if raw_input.trim().is_empty() {
            return Err(ThreatError::InvalidRequest(
                "raw_input must not be empty".into(),
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ThreatError::Config(format!("No async runtime available: {}", e)))?;

        let threat_intel = options
            .enable_threat_intel
            .unwrap_or(self.config.pipeline.enable_threat_intel);
        let depth = options.depth.unwrap_or(self.config.pipeline.depth);
        let scheduled: Vec<AgentRole> = AgentRole::ALL
            .into_iter()
            .filter(|role| threat_intel || *role != AgentRole::ThreatIntel)
            .collect();
        let control_documentation = options
            .control_documentation
            .filter(|doc| !doc.trim().is_empty());

        let run_id = RunId::generate();
        let cancel = CancellationToken::new();
        let context = ContextManager::new(
            run_id.clone(),
            raw_input,
            control_documentation,
            &scheduled,
        );
        let handle = Arc::new(RunHandle::new(run_id.clone(), context, cancel.clone()));

        let driver = RunDriver {
            handle: Arc::clone(&handle),
            session: Arc::new(self.gateway.session(run_id.clone(), cancel)),
            knowledge: Arc::clone(&self.knowledge),
            registry: self.registry.clone(),
            config: Arc::clone(&self.config),
            depth,
            threat_intel,
            timeouts: self.timeouts.clone(),
            store: Arc::clone(&self.store),
            active: Arc::clone(&self.active),
            finished: Arc::clone(&self.finished),
        };

        self.active.insert(run_id.clone(), handle);
        info!(run_id = %run_id, agents = scheduled.len(), %depth, threat_intel, "Run started");
        runtime.spawn(driver.drive());
        Ok(run_id)
    }

    /// Current status. Unknown runs are `NotFound`; failures are reported in
    /// the status, never as errors.
    pub fn status(&self, run_id: &RunId) -> Result<RunStatus> {
        if let Some(handle) = self.active.get(run_id) {
            return Ok(handle.status());
        }
        if let Some(status) = self.finished.get(run_id) {
            return Ok(status.clone());
        }
        self.store
            .load(run_id)?
            .map(|result| result.status())
            .ok_or_else(|| ThreatError::not_found(run_id.as_str()))
    }

    /// Fail the run with reason `cancelled`. Cancelling a finished run is a
    /// no-op.
    pub fn cancel(&self, run_id: &RunId) -> Result<()> {
        let handle = self.active.get(run_id).map(|h| Arc::clone(h.value()));
        let Some(handle) = handle else {
            if self.finished.contains_key(run_id) || self.store.load(run_id)?.is_some() {
                return Ok(());
            }
            return Err(ThreatError::not_found(run_id.as_str()));
        };

        if handle.fail(RunFailure::cancelled()) {
            info!(run_id = %run_id, "Run cancelled");
        }
        handle.cancel.cancel();
        Ok(())
    }

    /// The persisted document of a terminal run
    pub fn result(&self, run_id: &RunId) -> Result<RunResult> {
        if let Some(result) = self.store.load(run_id)? {
            return Ok(result);
        }
        if self.active.contains_key(run_id) {
            return Err(ThreatError::RunInProgress {
                run_id: run_id.to_string(),
            });
        }
        if self.finished.contains_key(run_id) {
            return Err(ThreatError::Storage(format!(
                "Result for run {} was not persisted",
                run_id
            )));
        }
        Err(ThreatError::not_found(run_id.as_str()))
    }

    /// Wait until the run is terminal and its result persisted
    pub async fn wait(&self, run_id: &RunId) -> Result<RunStatus> {
        let handle = self.active.get(run_id).map(|h| Arc::clone(h.value()));
        if let Some(handle) = handle {
            handle.finished().await;
        }
        self.status(run_id)
    }

    /// Poll `status` until terminal, calling `on_change` whenever it differs
    /// from the previous poll
    pub async fn watch<F>(&self, run_id: &RunId, mut on_change: F) -> Result<RunStatus>
    where
        F: FnMut(&RunStatus),
    {
        let interval = Duration::from_millis(pipeline::STATUS_POLL_INTERVAL_MS);
        let mut last: Option<RunStatus> = None;
        loop {
            let status = self.status(run_id)?;
            if last.as_ref() != Some(&status) {
                on_change(&status);
            }
            if status.state.is_terminal() && !self.active.contains_key(run_id) {
                return Ok(status);
            }
            last = Some(status);
            tokio::time::sleep(interval).await;
        }
    }

    /// Runs currently in progress
    pub fn active_runs(&self) -> usize {
        self.active.len()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::{Agent, AgentContribution, AgentEnv, AgentFailure, AttackMapperAgent};
    use crate::ai::{ProviderGatewayBuilder, RetryPolicy};
    use crate::attack::{AttackKnowledge, StaticKnowledgeBase, Tactic};
    use crate::context::{AgentState, SharedContext};
    use crate::storage::Database;
    use crate::testing::{ScriptedProvider, canned_response, gateway};
    use crate::types::{ErrorCategory, LlmError};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const WEB_APP: &str = "Web app: React frontend, Node backend, Postgres DB, public login endpoint.";

    fn orchestrator_with(gateway: Arc<ProviderGateway>, config: Config) -> Orchestrator {
        let store: SharedResultStore = Arc::new(Database::open_in_memory().unwrap());
        Orchestrator::new(
            gateway,
            Arc::new(StaticKnowledgeBase::bundled()),
            store,
            config,
        )
    }

    fn orchestrator(gateway: Arc<ProviderGateway>) -> Orchestrator {
        orchestrator_with(gateway, Config::default())
    }

    fn canned() -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::canned("gpt-4o-mini"))
    }

    /// Canned answers except for `role`, which fails with `category`
    fn failing_for(role: AgentRole, category: ErrorCategory) -> Arc<ScriptedProvider> {
        Arc::new(ScriptedProvider::new("gpt-4o-mini", move |r, prompt| {
            if r == role {
                Err(LlmError::new(category, "scripted role failure").into())
            } else {
                Ok(canned_response(r, prompt))
            }
        }))
    }

    async fn run_to_end(orch: &Orchestrator, input: &str, options: RunOptions) -> RunResult {
        let run_id = orch.start(input, options).unwrap();
        let status = orch.wait(&run_id).await.unwrap();
        assert!(status.state.is_terminal());
        orch.result(&run_id).unwrap()
    }

    struct FailingAgent(AgentRole);

    #[async_trait]
    impl Agent for FailingAgent {
        fn role(&self) -> AgentRole {
            self.0
        }

        async fn run(
            &self,
            _snapshot: &SharedContext,
            _env: &AgentEnv,
        ) -> std::result::Result<AgentContribution, AgentFailure> {
            Err(AgentFailure::new(
                self.0,
                ThreatError::LlmApi("backend exhausted its retries".into()),
            ))
        }
    }

    /// Mapper that records what it saw of the analyst before delegating
    struct ObservingMapper {
        analyst_done: Arc<AtomicBool>,
        invocations: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Agent for ObservingMapper {
        fn role(&self) -> AgentRole {
            AgentRole::AttackMapper
        }

        async fn run(
            &self,
            snapshot: &SharedContext,
            env: &AgentEnv,
        ) -> std::result::Result<AgentContribution, AgentFailure> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            let analyst = snapshot.agent_status.get(&AgentRole::SystemAnalyst);
            self.analyst_done.store(
                analyst.is_some_and(|s| s.state == AgentState::Succeeded)
                    && !snapshot.assets.is_empty(),
                Ordering::SeqCst,
            );
            AttackMapperAgent.run(snapshot, env).await
        }
    }

    /// Mapper whose update also claims the analyst's assets
    struct OverreachingMapper;

    #[async_trait]
    impl Agent for OverreachingMapper {
        fn role(&self) -> AgentRole {
            AgentRole::AttackMapper
        }

        async fn run(
            &self,
            snapshot: &SharedContext,
            env: &AgentEnv,
        ) -> std::result::Result<AgentContribution, AgentFailure> {
            let mut contribution = AttackMapperAgent.run(snapshot, env).await?;
            contribution.update.assets = Some(snapshot.assets.clone());
            Ok(contribution)
        }
    }

    #[tokio::test]
    async fn test_web_app_run_completes() {
        let orch = orchestrator(gateway(vec![("primary", canned())]));
        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.final_state, RunState::Completed);
        assert!(result.failure.is_none());
        let ctx = &result.shared_context_snapshot;
        assert!(ctx.assets.len() >= 3);
        assert!(ctx.entry_points.iter().any(|e| e.name.contains("login")));

        let kb = StaticKnowledgeBase::bundled();
        assert!(ctx.attack_paths.iter().any(|path| {
            path.technique_sequence
                .first()
                .and_then(|id| kb.get_technique(id))
                .is_some_and(|t| t.tactic == Tactic::InitialAccess)
        }));
        assert!(!ctx.control_gaps.is_empty());
        assert!(!ctx.recommendations.is_empty());
        assert!(ctx.frozen);
        assert_eq!(result.usage_summary.successful_calls, 5);
        assert!(
            result
                .agent_status
                .values()
                .all(|s| s.state == AgentState::Succeeded)
        );
    }

    #[tokio::test]
    async fn test_fallback_serves_every_call_from_secondary() {
        let a = Arc::new(ScriptedProvider::failing("model-a", ErrorCategory::Transient));
        let b = canned();
        let orch = orchestrator(gateway(vec![("a", a.clone()), ("b", b.clone())]));

        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.final_state, RunState::Completed);
        assert_eq!(result.usage_summary.successes_for("a"), 0);
        assert_eq!(result.usage_summary.successes_for("b"), 5);
        assert_eq!(b.calls().len(), 5);
        // Demoted on the first step, never tried again in this run
        assert!(a.calls().iter().all(|r| *r == AgentRole::SystemAnalyst));
    }

    #[tokio::test]
    async fn test_hung_primary_falls_back_within_agent_step() {
        let a = Arc::new(ScriptedProvider::canned("model-a").delayed(Duration::from_secs(3600)));
        let b = canned();
        let gateway = ProviderGatewayBuilder::new()
            .with_policy(RetryPolicy {
                max_retries: 3,
                max_schema_retries: 1,
                base_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(20),
                backoff_factor: 2.0,
            })
            .with_request_timeout(Duration::from_millis(300))
            .add_provider("a", a.clone())
            .add_provider("b", b.clone())
            .build();
        // Four 300 ms attempts on A would not fit the one-second step
        let orch = orchestrator(Arc::new(gateway)).with_timeouts(TimeoutConfig {
            llm_request: Duration::from_millis(300),
            agent_step: Duration::from_secs(1),
            run: Duration::from_secs(30),
        });

        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.final_state, RunState::Completed);
        assert_eq!(result.usage_summary.successes_for("a"), 0);
        assert_eq!(result.usage_summary.successes_for("b"), 5);
        assert_eq!(a.calls(), vec![AgentRole::SystemAnalyst]);
    }

    #[tokio::test]
    async fn test_write_outside_owned_fields_fails_the_run() {
        let orch = orchestrator(gateway(vec![("primary", canned())]))
            .with_registry(AgentRegistry::standard().with_agent(Arc::new(OverreachingMapper)));
        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.final_state, RunState::Failed);
        let failure = result.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::ContextWriteViolation);
        assert!(failure.message.contains("assets"));

        let ctx = &result.shared_context_snapshot;
        assert!(!ctx.assets.is_empty());
        assert!(ctx.attack_paths.is_empty());
        assert_eq!(
            result.agent_status[&AgentRole::AttackMapper].state,
            AgentState::Failed
        );
        for role in [AgentRole::ControlEvaluator, AgentRole::Mitigation] {
            assert_eq!(result.agent_status[&role].state, AgentState::Skipped);
        }
    }

    #[tokio::test]
    async fn test_evaluator_failure_is_fatal() {
        let orch = orchestrator(gateway(vec![("primary", canned())])).with_registry(
            AgentRegistry::standard().with_agent(Arc::new(FailingAgent(AgentRole::ControlEvaluator))),
        );
        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.final_state, RunState::Failed);
        let failure = result.failure.unwrap();
        assert_eq!(failure.reason, FailureReason::AgentFailed);
        assert!(failure.message.contains("Control Evaluator"));

        let ctx = &result.shared_context_snapshot;
        assert!(ctx.recommendations.is_empty());
        assert!(ctx.control_gaps.is_empty());
        assert!(!ctx.attack_paths.is_empty());
        assert_eq!(
            result.agent_status[&AgentRole::ControlEvaluator].state,
            AgentState::Failed
        );
        assert_eq!(
            result.agent_status[&AgentRole::Mitigation].state,
            AgentState::Skipped
        );
    }

    #[tokio::test]
    async fn test_concurrent_runs_do_not_interfere() {
        let orch = orchestrator(gateway(vec![("primary", canned())]));
        let first = orch
            .start("Shop: Storefront SPA, Orders API, Redis cache.", RunOptions::default())
            .unwrap();
        let second = orch
            .start("Payroll: HR portal, Payroll batch job, Oracle ledger.", RunOptions::default())
            .unwrap();
        assert_ne!(first, second);

        orch.wait(&first).await.unwrap();
        orch.wait(&second).await.unwrap();
        let first = orch.result(&first).unwrap().shared_context_snapshot;
        let second = orch.result(&second).unwrap().shared_context_snapshot;

        let first_assets = first.asset_names();
        let second_assets = second.asset_names();
        assert!(first_assets.contains(&"Orders API"));
        assert!(second_assets.contains(&"Oracle ledger"));
        assert!(first_assets.iter().all(|a| !second_assets.contains(a)));
    }

    #[tokio::test]
    async fn test_equal_priority_paths_prefer_more_assets() {
        let provider = Arc::new(ScriptedProvider::new("gpt-4o-mini", |role, prompt| {
            if role != AgentRole::AttackMapper {
                return Ok(canned_response(role, prompt));
            }
            Ok(json!({"attack_paths": [
                {"id": "narrow", "technique_sequence": ["T1190"], "priority_score": 0.7,
                 "targeted_assets": ["Node backend"]},
                {"id": "wide", "technique_sequence": ["T1190", "T1005"], "priority_score": 0.7,
                 "targeted_assets": ["React frontend", "Node backend", "Postgres DB"]}
            ]}))
        }));
        let orch = orchestrator(gateway(vec![("primary", provider)]));
        let options = RunOptions {
            enable_threat_intel: Some(false),
            ..Default::default()
        };
        let result = run_to_end(&orch, WEB_APP, options).await;

        let ids: Vec<_> = result
            .shared_context_snapshot
            .attack_paths
            .iter()
            .map(|p| p.id.as_str())
            .collect();
        assert_eq!(ids, vec!["wide", "narrow"]);
        assert!(!result.agent_status.contains_key(&AgentRole::ThreatIntel));
    }

    #[tokio::test]
    async fn test_intel_failure_degrades_gracefully() {
        let provider = failing_for(AgentRole::ThreatIntel, ErrorCategory::BadRequest);
        let orch = orchestrator(gateway(vec![("primary", provider)]));
        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.final_state, RunState::Completed);
        assert_eq!(
            result.agent_status[&AgentRole::ThreatIntel].state,
            AgentState::Failed
        );
        let ctx = &result.shared_context_snapshot;
        assert!(ctx.threat_intel.is_empty());
        assert!(!ctx.attack_paths.is_empty());
        assert!(ctx.attack_paths.iter().all(|p| p.intel_priority.is_none()));
    }

    #[tokio::test]
    async fn test_intel_enriches_priorities() {
        let orch = orchestrator(gateway(vec![("primary", canned())]));
        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        let ctx = &result.shared_context_snapshot;
        let credential_path = ctx.attack_path("AP-002").unwrap();
        let enriched = credential_path.intel_priority.unwrap();
        assert!((enriched - (0.7 * 0.6 + 0.3 * 1.0)).abs() < 1e-9);
        assert!(ctx.attack_path("AP-001").unwrap().control_coverage.is_some());
    }

    #[tokio::test]
    async fn test_mapper_waits_for_analyst() {
        let analyst_done = Arc::new(AtomicBool::new(false));
        let invocations = Arc::new(AtomicUsize::new(0));
        let observer = ObservingMapper {
            analyst_done: analyst_done.clone(),
            invocations: invocations.clone(),
        };
        let orch = orchestrator(gateway(vec![("primary", canned())]))
            .with_registry(AgentRegistry::standard().with_agent(Arc::new(observer)));

        run_to_end(&orch, WEB_APP, RunOptions::default()).await;
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert!(analyst_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_mapper_never_runs_after_analyst_failure() {
        let provider = failing_for(AgentRole::SystemAnalyst, ErrorCategory::Auth);
        let orch = orchestrator(gateway(vec![("primary", provider.clone())]));
        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.final_state, RunState::Failed);
        assert!(provider.calls().iter().all(|r| *r == AgentRole::SystemAnalyst));
        assert_eq!(
            result.agent_status[&AgentRole::AttackMapper].state,
            AgentState::Skipped
        );
    }

    #[tokio::test]
    async fn test_cancel_discards_in_flight_contribution() {
        let provider = Arc::new(ScriptedProvider::canned("slow").delayed(Duration::from_millis(300)));
        let orch = orchestrator(gateway(vec![("primary", provider)]));
        let run_id = orch.start(WEB_APP, RunOptions::default()).unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        orch.cancel(&run_id).unwrap();
        let status = orch.status(&run_id).unwrap();
        assert_eq!(status.state, RunState::Failed);
        assert_eq!(status.failure.unwrap().reason, FailureReason::Cancelled);

        orch.wait(&run_id).await.unwrap();
        let result = orch.result(&run_id).unwrap();
        assert_eq!(result.final_state, RunState::Failed);
        assert!(result.shared_context_snapshot.assets.is_empty());
        let analyst = &result.agent_status[&AgentRole::SystemAnalyst];
        assert_eq!(analyst.state, AgentState::Skipped);
        assert!(analyst.message.as_deref().unwrap().contains("discarded"));
        assert!(result.agent_status.values().all(|s| s.state.is_terminal()));

        // Cancelling again is a no-op
        orch.cancel(&run_id).unwrap();
    }

    #[tokio::test]
    async fn test_status_polling_is_idempotent() {
        let orch = orchestrator(gateway(vec![("primary", canned())]));
        let run_id = orch.start(WEB_APP, RunOptions::default()).unwrap();
        orch.wait(&run_id).await.unwrap();

        let first = orch.status(&run_id).unwrap();
        let second = orch.status(&run_id).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(first.percentage, 100.0);
    }

    #[tokio::test]
    async fn test_status_polling_is_idempotent_mid_run() {
        let provider = Arc::new(ScriptedProvider::canned("slow").delayed(Duration::from_millis(400)));
        let orch = orchestrator(gateway(vec![("primary", provider)]));
        let run_id = orch.start(WEB_APP, RunOptions::default()).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let first = orch.status(&run_id).unwrap();
        let second = orch.status(&run_id).unwrap();
        assert_eq!(first.state, RunState::AnalyzingSystem);
        assert_eq!(
            first.agents[&AgentRole::SystemAnalyst].state,
            AgentState::Running
        );
        assert_eq!(first.percentage, 0.0);
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );

        orch.cancel(&run_id).unwrap();
        orch.wait(&run_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_result_and_status_errors() {
        let provider = Arc::new(ScriptedProvider::canned("slow").delayed(Duration::from_millis(200)));
        let orch = orchestrator(gateway(vec![("primary", provider)]));

        assert!(matches!(
            orch.start("   ", RunOptions::default()),
            Err(ThreatError::InvalidRequest(_))
        ));
        let unknown = RunId::new("nope");
        assert!(matches!(orch.status(&unknown), Err(ThreatError::NotFound { .. })));
        assert!(matches!(orch.result(&unknown), Err(ThreatError::NotFound { .. })));
        assert!(matches!(orch.cancel(&unknown), Err(ThreatError::NotFound { .. })));

        let run_id = orch.start(WEB_APP, RunOptions::default()).unwrap();
        assert!(matches!(
            orch.result(&run_id),
            Err(ThreatError::RunInProgress { .. })
        ));
        assert!(!orch.status(&run_id).unwrap().state.is_terminal());
        orch.cancel(&run_id).unwrap();
        orch.wait(&run_id).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_timeout_force_fails() {
        let provider = Arc::new(ScriptedProvider::canned("slow").delayed(Duration::from_secs(5)));
        let orch = orchestrator(gateway(vec![("primary", provider)])).with_timeouts(TimeoutConfig {
            llm_request: Duration::from_secs(10),
            agent_step: Duration::from_secs(10),
            run: Duration::from_millis(50),
        });
        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.final_state, RunState::Failed);
        assert_eq!(result.failure.unwrap().reason, FailureReason::Timeout);
        assert!(result.agent_status.values().all(|s| s.state == AgentState::Skipped));
    }

    #[tokio::test]
    async fn test_agent_step_timeout_fails_agent() {
        let provider = Arc::new(ScriptedProvider::canned("slow").delayed(Duration::from_secs(5)));
        let orch = orchestrator(gateway(vec![("primary", provider)])).with_timeouts(TimeoutConfig {
            llm_request: Duration::from_secs(10),
            agent_step: Duration::from_millis(30),
            run: Duration::from_secs(60),
        });
        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.failure.unwrap().reason, FailureReason::AgentFailed);
        let analyst = &result.agent_status[&AgentRole::SystemAnalyst];
        assert_eq!(analyst.state, AgentState::Failed);
        assert!(analyst.message.as_deref().unwrap().contains("Timeout"));
    }

    #[tokio::test]
    async fn test_low_confidence_is_flagged_not_blocked() {
        let mut config = Config::default();
        config.pipeline.low_confidence_threshold = 1.01;
        let orch = orchestrator_with(gateway(vec![("primary", canned())]), config);
        let result = run_to_end(&orch, WEB_APP, RunOptions::default()).await;

        assert_eq!(result.final_state, RunState::Completed);
        assert_eq!(result.flagged_for_review.len(), 5);
        assert!(
            result.agent_status[&AgentRole::Mitigation]
                .message
                .as_deref()
                .unwrap()
                .contains("flagged")
        );
    }

    #[tokio::test]
    async fn test_finished_runs_are_served_from_the_store() {
        let store: SharedResultStore = Arc::new(Database::open_in_memory().unwrap());
        let knowledge: SharedKnowledge = Arc::new(StaticKnowledgeBase::bundled());
        let first = Orchestrator::new(
            gateway(vec![("primary", canned())]),
            Arc::clone(&knowledge),
            Arc::clone(&store),
            Config::default(),
        );
        let run_id = first.start(WEB_APP, RunOptions::default()).unwrap();
        first.wait(&run_id).await.unwrap();
        assert_eq!(first.active_runs(), 0);

        let second = Orchestrator::new(
            gateway(vec![("primary", canned())]),
            knowledge,
            store,
            Config::default(),
        );
        assert_eq!(second.status(&run_id).unwrap().state, RunState::Completed);
        assert_eq!(second.result(&run_id).unwrap().run_id, run_id);
        second.cancel(&run_id).unwrap();
    }

    #[tokio::test]
    async fn test_watch_reports_changes_until_terminal() {
        let orch = orchestrator(gateway(vec![("primary", canned())]));
        let run_id = orch.start(WEB_APP, RunOptions::default()).unwrap();

        let mut seen = Vec::new();
        let status = orch
            .watch(&run_id, |s| seen.push(s.state))
            .await
            .unwrap();
        assert_eq!(status.state, RunState::Completed);
        assert_eq!(seen.last(), Some(&RunState::Completed));
    }
}
