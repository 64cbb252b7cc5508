//! Per-run driver
//!
//! One spawned task per run walks the state machine, invokes agents with a
//! step timeout, merges contributions through the context manager and
//! persists the final document exactly once.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use super::state::{FailureReason, ReviewFlag, RunFailure, RunResult, RunState, RunStatus};
use crate::agents::{AgentContribution, AgentEnv, AgentRegistry, settings_for};
use crate::ai::{GatewaySession, TimeoutConfig};
use crate::attack::{SharedKnowledge, intel_priorities, rank_paths};
use crate::config::{AnalysisDepth, Config};
use crate::context::{AgentRole, AgentStatus, ContextManager};
use crate::storage::SharedResultStore;
use crate::types::{RunId, ThreatError};

const DISCARDED: &str = "contribution discarded after cancellation";

// =============================================================================
// Handle
// =============================================================================

struct Progress {
    state: RunState,
    failure: Option<RunFailure>,
}

/// Live state of an active run, shared by the driver and the API
pub(crate) struct RunHandle {
    pub run_id: RunId,
    pub context: ContextManager,
    pub cancel: CancellationToken,
    progress: Mutex<Progress>,
    flagged: Mutex<Vec<ReviewFlag>>,
    done: watch::Sender<bool>,
}

impl RunHandle {
    pub fn new(run_id: RunId, context: ContextManager, cancel: CancellationToken) -> Self {
        let (done, _) = watch::channel(false);
        Self {
            run_id,
            context,
            cancel,
            progress: Mutex::new(Progress {
                state: RunState::Initializing,
                failure: None,
            }),
            flagged: Mutex::new(Vec::new()),
            done,
        }
    }

    pub fn status(&self) -> RunStatus {
        let (state, failure) = self.state();
        RunStatus::new(
            self.run_id.clone(),
            state,
            self.context.agent_statuses(),
            failure,
        )
    }

    pub fn state(&self) -> (RunState, Option<RunFailure>) {
        let progress = self
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        (progress.state, progress.failure.clone())
    }

    /// Move to `state` unless the run already failed
    fn transition(&self, state: RunState) -> bool {
        let mut progress = self
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if progress.state.is_terminal() {
            return false;
        }
        info!(run_id = %self.run_id, from = %progress.state, to = %state, "Run state changed");
        progress.state = state;
        true
    }

    /// Mark the run failed. The first recorded failure wins.
    pub fn fail(&self, failure: RunFailure) -> bool {
        let mut progress = self
            .progress
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if progress.state.is_terminal() {
            return false;
        }
        warn!(
            run_id = %self.run_id,
            reason = %failure.reason,
            message = %failure.message,
            "Run failed"
        );
        progress.state = RunState::Failed;
        progress.failure = Some(failure);
        true
    }

    fn flag(&self, flag: ReviewFlag) {
        self.flagged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(flag);
    }

    fn flagged(&self) -> Vec<ReviewFlag> {
        self.flagged
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Resolves once the result is persisted and the final status cached
    pub async fn finished(&self) {
        let mut rx = self.done.subscribe();
        let _ = rx.wait_for(|done| *done).await;
    }
}

// =============================================================================
// Driver
// =============================================================================

/// Why an agent step produced no contribution
enum StepError {
    Cancelled,
    Failed(String),
}

impl StepError {
    fn into_failure(self, role: AgentRole) -> RunFailure {
        match self {
            StepError::Cancelled => RunFailure::cancelled(),
            StepError::Failed(message) => RunFailure::new(
                FailureReason::AgentFailed,
                format!("{} failed: {}", role.display_name(), message),
            ),
        }
    }
}

pub(crate) struct RunDriver {
    pub handle: Arc<RunHandle>,
    pub session: Arc<GatewaySession>,
    pub knowledge: SharedKnowledge,
    pub registry: AgentRegistry,
    pub config: Arc<Config>,
    pub depth: AnalysisDepth,
    pub threat_intel: bool,
    pub timeouts: TimeoutConfig,
    pub store: SharedResultStore,
    pub active: Arc<DashMap<RunId, Arc<RunHandle>>>,
    pub finished: Arc<DashMap<RunId, RunStatus>>,
}

impl RunDriver {
    #[instrument(name = "run", skip(self), fields(run_id = %self.handle.run_id))]
    pub async fn drive(self) {
        let outcome = match tokio::time::timeout(self.timeouts.run, self.pipeline()).await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.handle.cancel.cancel();
                let err = ThreatError::RunTimeout {
                    run_id: self.handle.run_id.to_string(),
                    duration: self.timeouts.run,
                };
                Err(RunFailure::new(FailureReason::Timeout, err.to_string()))
            }
        };
        self.finalize(outcome);
    }

    async fn pipeline(&self) -> Result<(), RunFailure> {
        self.advance(RunState::AnalyzingSystem)?;
        let analysis = self.critical(AgentRole::SystemAnalyst).await?;
        self.commit(AgentRole::SystemAnalyst, analysis)?;

        self.advance(RunState::MappingAttacks)?;
        self.map_attacks().await?;

        self.advance(RunState::EvaluatingControls)?;
        let evaluation = self.critical(AgentRole::ControlEvaluator).await?;
        self.commit(AgentRole::ControlEvaluator, evaluation)?;

        self.advance(RunState::GeneratingRecommendations)?;
        let mitigation = self.critical(AgentRole::Mitigation).await?;
        self.commit(AgentRole::Mitigation, mitigation)?;

        self.advance(RunState::Finalizing)
    }

    /// Mapper and, when scheduled, Threat Intelligence side by side. Intel
    /// failure only costs the enrichment.
    async fn map_attacks(&self) -> Result<(), RunFailure> {
        let (mapper, intel) = if self.threat_intel {
            let (mapper, intel) = tokio::join!(
                self.invoke(AgentRole::AttackMapper),
                self.invoke(AgentRole::ThreatIntel)
            );
            (mapper, Some(intel))
        } else {
            (self.invoke(AgentRole::AttackMapper).await, None)
        };

        let mut mapper = mapper.map_err(|e| e.into_failure(AgentRole::AttackMapper))?;
        let intel = match intel {
            Some(Ok(contribution)) => Some(contribution),
            Some(Err(StepError::Cancelled)) => return Err(RunFailure::cancelled()),
            Some(Err(StepError::Failed(message))) => {
                warn!(
                    run_id = %self.handle.run_id,
                    %message,
                    "Threat intelligence unavailable, keeping unenriched priorities"
                );
                None
            }
            None => None,
        };

        let mut paths = mapper.update.attack_paths.take().unwrap_or_default();
        let priorities = intel.as_ref().map(|c| {
            intel_priorities(&paths, c.update.threat_intel.as_deref().unwrap_or_default())
        });
        if let Some(priorities) = &priorities {
            for path in &mut paths {
                path.intel_priority = priorities.get(&path.id).copied();
            }
        }
        rank_paths(&mut paths);
        // intel_priority belongs to the intel role's write
        for path in &mut paths {
            path.intel_priority = None;
        }
        mapper.update.attack_paths = Some(paths);
        self.commit(AgentRole::AttackMapper, mapper)?;

        if let Some(mut intel) = intel {
            intel.update.intel_priority = priorities;
            self.commit(AgentRole::ThreatIntel, intel)?;
        }
        Ok(())
    }

    fn advance(&self, state: RunState) -> Result<(), RunFailure> {
        if self.handle.cancel.is_cancelled() || !self.handle.transition(state) {
            return Err(RunFailure::cancelled());
        }
        Ok(())
    }

    async fn critical(&self, role: AgentRole) -> Result<AgentContribution, RunFailure> {
        self.invoke(role).await.map_err(|e| e.into_failure(role))
    }

    fn env_for(&self, role: AgentRole) -> AgentEnv {
        AgentEnv {
            gateway: Arc::clone(&self.session),
            knowledge: Arc::clone(&self.knowledge),
            depth: self.depth,
            preferred_model: settings_for(&self.config, role).preferred_model.clone(),
            temperature: self.config.llm.temperature,
        }
    }

    /// Run one agent under the step timeout. Failures are recorded in the
    /// agent's status; nothing is written to the context here.
    async fn invoke(&self, role: AgentRole) -> Result<AgentContribution, StepError> {
        if self.handle.cancel.is_cancelled() {
            return Err(StepError::Cancelled);
        }
        let Some(agent) = self.registry.get(role) else {
            let message = format!("no agent registered for {}", role);
            self.handle
                .context
                .set_agent_status(role, AgentStatus::failed(&message));
            return Err(StepError::Failed(message));
        };

        self.handle
            .context
            .set_agent_status(role, AgentStatus::running());
        let snapshot = self.handle.context.snapshot();
        let env = self.env_for(role);

        let message = match tokio::time::timeout(
            self.timeouts.agent_step,
            agent.run(&snapshot, &env),
        )
        .await
        {
            Ok(Ok(contribution)) => {
                if self.handle.cancel.is_cancelled() {
                    self.discard(role);
                    return Err(StepError::Cancelled);
                }
                return Ok(contribution);
            }
            Ok(Err(failure)) if failure.is_cancelled() || self.handle.cancel.is_cancelled() => {
                self.discard(role);
                return Err(StepError::Cancelled);
            }
            Ok(Err(failure)) => failure.source.to_string(),
            Err(_) => {
                ThreatError::timeout(format!("{} step", role), self.timeouts.agent_step)
                    .to_string()
            }
        };

        if role.is_critical() {
            error!(run_id = %self.handle.run_id, agent = %role, %message, "Agent failed");
        } else {
            warn!(run_id = %self.handle.run_id, agent = %role, %message, "Optional agent failed");
        }
        self.handle
            .context
            .set_agent_status(role, AgentStatus::failed(&message));
        Err(StepError::Failed(message))
    }

    /// Merge a contribution unless the run was cancelled meanwhile
    fn commit(&self, role: AgentRole, contribution: AgentContribution) -> Result<(), RunFailure> {
        if self.handle.cancel.is_cancelled() {
            self.discard(role);
            return Err(RunFailure::cancelled());
        }

        let version = match self.handle.context.apply(role, contribution.update) {
            Ok(version) => version,
            Err(err) => {
                self.handle
                    .context
                    .set_agent_status(role, AgentStatus::failed(err.to_string()));
                let reason = match err {
                    ThreatError::ContextWriteViolation { .. } => {
                        FailureReason::ContextWriteViolation
                    }
                    _ => FailureReason::Internal,
                };
                return Err(RunFailure::new(reason, err.to_string()));
            }
        };

        let confidence = contribution.confidence_score;
        let mut status = AgentStatus::succeeded(confidence);
        if confidence < self.config.pipeline.low_confidence_threshold {
            warn!(
                run_id = %self.handle.run_id,
                agent = %role,
                confidence,
                "Low-confidence contribution flagged for review"
            );
            status = status.with_message("low confidence; flagged for review");
            self.handle.flag(ReviewFlag {
                agent: role,
                confidence,
                source_model: contribution.source_model.clone(),
            });
        }
        self.handle.context.set_agent_status(role, status);

        info!(
            run_id = %self.handle.run_id,
            agent = %role,
            version,
            confidence,
            provider = %contribution.source_provider,
            model = %contribution.source_model,
            "Contribution applied"
        );
        Ok(())
    }

    fn discard(&self, role: AgentRole) {
        info!(run_id = %self.handle.run_id, agent = %role, "Discarding contribution after cancellation");
        self.handle
            .context
            .set_agent_status(role, AgentStatus::skipped(DISCARDED));
    }

    /// Freeze, persist once, cache the final status, release the context
    fn finalize(self, outcome: Result<(), RunFailure>) {
        let handle = &self.handle;
        match outcome {
            Ok(()) if !handle.cancel.is_cancelled() => {
                handle.transition(RunState::Completed);
            }
            Ok(()) => {
                handle.fail(RunFailure::cancelled());
            }
            Err(failure) => {
                handle.fail(failure);
            }
        }

        let (final_state, failure) = handle.state();
        if let Some(failure) = &failure {
            let note = format!("not run: {}", failure.reason);
            for (role, status) in handle.context.agent_statuses() {
                if !status.state.is_terminal() {
                    handle
                        .context
                        .set_agent_status(role, AgentStatus::skipped(&note));
                }
            }
        }

        let snapshot = Arc::unwrap_or_clone(handle.context.freeze());
        let agent_status: BTreeMap<AgentRole, AgentStatus> = snapshot.agent_status.clone();
        let result = RunResult {
            run_id: handle.run_id.clone(),
            final_state,
            failure,
            shared_context_snapshot: snapshot,
            agent_status,
            usage_summary: self.session.ledger().summary(),
            flagged_for_review: handle.flagged(),
            completed_at: Utc::now(),
        };

        if let Err(e) = self.store.save(&result) {
            error!(run_id = %handle.run_id, error = %e, "Failed to persist run result");
        }

        self.finished.insert(handle.run_id.clone(), result.status());
        self.active.remove(&handle.run_id);
        handle.done.send_replace(true);

        info!(
            run_id = %handle.run_id,
            state = %final_state,
            calls = result.usage_summary.total_calls,
            flagged = result.flagged_for_review.len(),
            "Run finished"
        );
    }
}
