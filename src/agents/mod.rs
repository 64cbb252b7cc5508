//! Specialized Agents
//!
//! Five roles share one shape: build a role-specific prompt from a context
//! snapshot, ask the gateway for a schema-constrained JSON document, then
//! normalise it into a [`ContextUpdate`] touching only the role's own fields.
//!
//! ```text
//! System Analyst ──▶ ATT&CK Mapper ──┬──▶ Control Evaluator ──▶ Mitigation
//!                    Threat Intel  ──┘        (optional, parallel)
//! ```

mod attack_mapper;
mod confidence;
mod control_evaluator;
mod helpers;
mod mitigation;
mod schemas;
mod system_analyst;
mod threat_intel;

pub use attack_mapper::AttackMapperAgent;
pub use confidence::{ConfidenceInput, is_hedged, score_confidence};
pub use control_evaluator::ControlEvaluatorAgent;
pub use helpers::role_header;
pub use mitigation::MitigationAgent;
pub use system_analyst::SystemAnalystAgent;
pub use threat_intel::ThreatIntelAgent;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

use crate::ai::GatewaySession;
use crate::attack::SharedKnowledge;
use crate::config::{AgentSettings, AnalysisDepth, Config};
use crate::context::{AgentRole, ContextUpdate, SharedContext};
use crate::types::ThreatError;

/// Everything an agent may use besides the snapshot
#[derive(Clone)]
pub struct AgentEnv {
    pub gateway: Arc<GatewaySession>,
    pub knowledge: SharedKnowledge,
    pub depth: AnalysisDepth,
    /// Provider or model tried first for this agent
    pub preferred_model: Option<String>,
    pub temperature: f32,
}

/// A schema-validated agent output, not yet merged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentContribution {
    pub role: AgentRole,
    pub update: ContextUpdate,
    /// Advisory self-assessment in [0, 1]
    pub confidence_score: f64,
    pub source_model: String,
    pub source_provider: String,
}

/// An agent that could not produce a contribution
#[derive(Debug, Error)]
#[error("{role} failed: {source}")]
pub struct AgentFailure {
    pub role: AgentRole,
    #[source]
    pub source: ThreatError,
}

impl AgentFailure {
    pub fn new(role: AgentRole, source: ThreatError) -> Self {
        Self { role, source }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.source, ThreatError::Cancelled { .. })
    }
}

impl From<AgentFailure> for ThreatError {
    fn from(failure: AgentFailure) -> Self {
        ThreatError::agent_failure(failure.role.as_str(), failure.source.to_string())
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn role(&self) -> AgentRole;

    async fn run(
        &self,
        snapshot: &SharedContext,
        env: &AgentEnv,
    ) -> Result<AgentContribution, AgentFailure>;
}

pub type SharedAgent = Arc<dyn Agent>;

/// Agent implementations keyed by role
#[derive(Clone)]
pub struct AgentRegistry {
    agents: BTreeMap<AgentRole, SharedAgent>,
}

impl AgentRegistry {
    /// The five built-in agents
    pub fn standard() -> Self {
        let agents: [SharedAgent; 5] = [
            Arc::new(SystemAnalystAgent),
            Arc::new(AttackMapperAgent),
            Arc::new(ThreatIntelAgent),
            Arc::new(ControlEvaluatorAgent),
            Arc::new(MitigationAgent),
        ];
        Self {
            agents: agents.into_iter().map(|a| (a.role(), a)).collect(),
        }
    }

    /// Replace the implementation for one role
    pub fn with_agent(mut self, agent: SharedAgent) -> Self {
        self.agents.insert(agent.role(), agent);
        self
    }

    pub fn get(&self, role: AgentRole) -> Option<SharedAgent> {
        self.agents.get(&role).cloned()
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

/// Per-role settings from configuration
pub fn settings_for(config: &Config, role: AgentRole) -> &AgentSettings {
    match role {
        AgentRole::SystemAnalyst => &config.agents.system_analyst,
        AgentRole::AttackMapper => &config.agents.attack_mapper,
        AgentRole::ThreatIntel => &config.agents.threat_intel,
        AgentRole::ControlEvaluator => &config.agents.control_evaluator,
        AgentRole::Mitigation => &config.agents.mitigation,
    }
}
