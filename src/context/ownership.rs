//! Agent roles and the static field ownership table.

use serde::{Deserialize, Serialize};

/// The five agent roles, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    SystemAnalyst,
    AttackMapper,
    ThreatIntel,
    ControlEvaluator,
    Mitigation,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::SystemAnalyst,
        AgentRole::AttackMapper,
        AgentRole::ThreatIntel,
        AgentRole::ControlEvaluator,
        AgentRole::Mitigation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SystemAnalyst => "system_analyst",
            Self::AttackMapper => "attack_mapper",
            Self::ThreatIntel => "threat_intel",
            Self::ControlEvaluator => "control_evaluator",
            Self::Mitigation => "mitigation",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::SystemAnalyst => "System Analyst",
            Self::AttackMapper => "ATT&CK Mapper",
            Self::ThreatIntel => "Threat Intelligence",
            Self::ControlEvaluator => "Control Evaluator",
            Self::Mitigation => "Mitigation",
        }
    }

    /// A critical agent's failure fails the whole run
    pub fn is_critical(&self) -> bool {
        !matches!(self, Self::ThreatIntel)
    }

    /// Fields this role may write
    pub fn owned_fields(&self) -> &'static [ContextField] {
        match self {
            Self::SystemAnalyst => &[
                ContextField::Assets,
                ContextField::EntryPoints,
                ContextField::TrustBoundaries,
                ContextField::DataFlows,
            ],
            Self::AttackMapper => &[ContextField::AttackPaths],
            Self::ThreatIntel => &[ContextField::ThreatIntel, ContextField::IntelPriority],
            Self::ControlEvaluator => &[ContextField::ControlGaps, ContextField::ControlCoverage],
            Self::Mitigation => &[ContextField::Recommendations],
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentRole::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| format!("unknown agent role: {}", s))
    }
}

/// Agent-writable fields of the shared context
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextField {
    Assets,
    EntryPoints,
    TrustBoundaries,
    DataFlows,
    AttackPaths,
    ThreatIntel,
    /// `attack_paths[*].intel_priority`
    IntelPriority,
    ControlGaps,
    /// `attack_paths[*].control_coverage`
    ControlCoverage,
    Recommendations,
}

impl ContextField {
    pub const ALL: [ContextField; 10] = [
        ContextField::Assets,
        ContextField::EntryPoints,
        ContextField::TrustBoundaries,
        ContextField::DataFlows,
        ContextField::AttackPaths,
        ContextField::ThreatIntel,
        ContextField::IntelPriority,
        ContextField::ControlGaps,
        ContextField::ControlCoverage,
        ContextField::Recommendations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assets => "assets",
            Self::EntryPoints => "entry_points",
            Self::TrustBoundaries => "trust_boundaries",
            Self::DataFlows => "data_flows",
            Self::AttackPaths => "attack_paths",
            Self::ThreatIntel => "threat_intel",
            Self::IntelPriority => "intel_priority",
            Self::ControlGaps => "control_gaps",
            Self::ControlCoverage => "control_coverage",
            Self::Recommendations => "recommendations",
        }
    }

    /// The single role allowed to write this field
    pub fn owner(&self) -> AgentRole {
        match self {
            Self::Assets | Self::EntryPoints | Self::TrustBoundaries | Self::DataFlows => {
                AgentRole::SystemAnalyst
            }
            Self::AttackPaths => AgentRole::AttackMapper,
            Self::ThreatIntel | Self::IntelPriority => AgentRole::ThreatIntel,
            Self::ControlGaps | Self::ControlCoverage => AgentRole::ControlEvaluator,
            Self::Recommendations => AgentRole::Mitigation,
        }
    }
}

impl std::fmt::Display for ContextField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
