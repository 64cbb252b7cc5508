//! Run state machine and the documents a run exposes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::ai::UsageSummary;
use crate::context::{AgentRole, AgentStatus, SharedContext};
use crate::types::RunId;

/// Pipeline position of a run
///
/// `initializing → analyzing_system → mapping_attacks → evaluating_controls
/// → generating_recommendations → finalizing → completed | failed`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Initializing,
    AnalyzingSystem,
    /// Mapper, with Threat Intelligence alongside when enabled
    MappingAttacks,
    EvaluatingControls,
    GeneratingRecommendations,
    Finalizing,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Completed | RunState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Initializing => "initializing",
            RunState::AnalyzingSystem => "analyzing_system",
            RunState::MappingAttacks => "mapping_attacks",
            RunState::EvaluatingControls => "evaluating_controls",
            RunState::GeneratingRecommendations => "generating_recommendations",
            RunState::Finalizing => "finalizing",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reason code recorded on a failed run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    AgentFailed,
    ContextWriteViolation,
    Timeout,
    Cancelled,
    Internal,
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::AgentFailed => "agent_failed",
            FailureReason::ContextWriteViolation => "context_write_violation",
            FailureReason::Timeout => "timeout",
            FailureReason::Cancelled => "cancelled",
            FailureReason::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFailure {
    pub reason: FailureReason,
    pub message: String,
}

impl RunFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureReason::Cancelled, "run was cancelled")
    }
}

/// A contribution that advanced the pipeline below the confidence threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewFlag {
    pub agent: AgentRole,
    pub confidence: f64,
    pub source_model: String,
}

/// Polling view of a run. Contains no wall-clock fields, so polling without
/// an intervening change yields identical output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunStatus {
    pub run_id: RunId,
    pub state: RunState,
    /// Terminal agents over scheduled agents, 0–100
    pub percentage: f64,
    pub agents: BTreeMap<AgentRole, AgentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
}

impl RunStatus {
    pub fn new(
        run_id: RunId,
        state: RunState,
        agents: BTreeMap<AgentRole, AgentStatus>,
        failure: Option<RunFailure>,
    ) -> Self {
        let percentage = completion_percentage(&agents);
        Self {
            run_id,
            state,
            percentage,
            agents,
            failure,
        }
    }
}

fn completion_percentage(agents: &BTreeMap<AgentRole, AgentStatus>) -> f64 {
    if agents.is_empty() {
        return 0.0;
    }
    let terminal = agents.values().filter(|s| s.state.is_terminal()).count();
    (terminal as f64 / agents.len() as f64 * 100.0).round()
}

/// Immutable document persisted once per run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: RunId,
    pub final_state: RunState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,
    pub shared_context_snapshot: SharedContext,
    pub agent_status: BTreeMap<AgentRole, AgentStatus>,
    pub usage_summary: UsageSummary,
    #[serde(default)]
    pub flagged_for_review: Vec<ReviewFlag>,
    pub completed_at: DateTime<Utc>,
}

impl RunResult {
    pub fn status(&self) -> RunStatus {
        RunStatus::new(
            self.run_id.clone(),
            self.final_state,
            self.agent_status.clone(),
            self.failure.clone(),
        )
    }
}
