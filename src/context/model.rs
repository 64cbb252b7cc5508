//! Threat model data carried in the shared context.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::ownership::{AgentRole, ContextField};
use crate::types::RunId;

// =============================================================================
// Severity
// =============================================================================

/// Shared scale for asset criticality, gap severity and recommendation priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Higher is more urgent
    pub fn rank(&self) -> u8 {
        match self {
            Self::Low => 0,
            Self::Medium => 1,
            Self::High => 2,
            Self::Critical => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

// =============================================================================
// System Analyst output
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: String,
    #[serde(default)]
    pub criticality: Severity,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Asset the entry point exposes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrustBoundary {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub assets: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFlow {
    pub source: String,
    pub destination: String,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

// =============================================================================
// Attack paths and enrichment
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackPath {
    pub id: String,
    /// ATT&CK technique ids in kill-chain order
    pub technique_sequence: Vec<String>,
    /// Mapper-assigned priority in [0, 1]
    pub priority_score: f64,
    #[serde(default)]
    pub rationale: String,
    /// Asset names this path threatens
    #[serde(default)]
    pub targeted_assets: Vec<String>,
    /// Fraction of the path's techniques covered by a control, in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_coverage: Option<f64>,
    /// Priority after threat intelligence enrichment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intel_priority: Option<f64>,
}

impl AttackPath {
    pub fn effective_priority(&self) -> f64 {
        self.intel_priority.unwrap_or(self.priority_score)
    }

    pub fn distinct_asset_count(&self) -> usize {
        self.targeted_assets.iter().collect::<BTreeSet<_>>().len()
    }
}

/// Relevance of a technique to currently active threat actors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatIntel {
    pub technique_id: String,
    pub relevance: f64,
    #[serde(default)]
    pub actors: Vec<String>,
    #[serde(default)]
    pub note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlGap {
    pub attack_path_id: String,
    pub technique_id: String,
    pub severity: Severity,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationStatus {
    #[default]
    Proposed,
    Accepted,
    Implemented,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub description: String,
    pub mapped_technique_id: String,
    pub priority: Severity,
    #[serde(default)]
    pub status: RecommendationStatus,
}

// =============================================================================
// Agent status
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl AgentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Skipped)
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub state: AgentState,
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl AgentStatus {
    pub fn pending() -> Self {
        Self {
            state: AgentState::Pending,
            progress: 0.0,
            message: None,
            confidence: None,
        }
    }

    pub fn running() -> Self {
        Self {
            state: AgentState::Running,
            progress: 0.5,
            message: None,
            confidence: None,
        }
    }

    pub fn succeeded(confidence: f64) -> Self {
        Self {
            state: AgentState::Succeeded,
            progress: 1.0,
            message: None,
            confidence: Some(confidence),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            state: AgentState::Failed,
            progress: 1.0,
            message: Some(message.into()),
            confidence: None,
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            state: AgentState::Skipped,
            progress: 1.0,
            message: Some(message.into()),
            confidence: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// =============================================================================
// Shared context
// =============================================================================

/// The in-progress threat model of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SharedContext {
    pub run_id: RunId,
    pub raw_input: String,
    /// Control documentation supplied at run start, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_documentation: Option<String>,
    pub assets: Vec<Asset>,
    pub entry_points: Vec<EntryPoint>,
    pub trust_boundaries: Vec<TrustBoundary>,
    pub data_flows: Vec<DataFlow>,
    pub attack_paths: Vec<AttackPath>,
    pub threat_intel: Vec<ThreatIntel>,
    pub control_gaps: Vec<ControlGap>,
    pub recommendations: Vec<Recommendation>,
    pub agent_status: BTreeMap<AgentRole, AgentStatus>,
    pub version: u64,
    /// Fields already written this run
    pub written: BTreeSet<ContextField>,
    pub frozen: bool,
}

impl SharedContext {
    pub fn new(run_id: RunId, raw_input: String, control_documentation: Option<String>) -> Self {
        Self {
            run_id,
            raw_input,
            control_documentation,
            assets: Vec::new(),
            entry_points: Vec::new(),
            trust_boundaries: Vec::new(),
            data_flows: Vec::new(),
            attack_paths: Vec::new(),
            threat_intel: Vec::new(),
            control_gaps: Vec::new(),
            recommendations: Vec::new(),
            agent_status: BTreeMap::new(),
            version: 0,
            written: BTreeSet::new(),
            frozen: false,
        }
    }

    pub fn attack_path(&self, id: &str) -> Option<&AttackPath> {
        self.attack_paths.iter().find(|p| p.id == id)
    }

    pub fn asset_names(&self) -> Vec<&str> {
        self.assets.iter().map(|a| a.name.as_str()).collect()
    }
}

// =============================================================================
// Partial update
// =============================================================================

/// A typed partial update: one optional slot per agent-writable field.
///
/// `intel_priority` and `control_coverage` are keyed by attack path id and
/// land on the matching `attack_paths` entries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<Asset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_points: Option<Vec<EntryPoint>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trust_boundaries: Option<Vec<TrustBoundary>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_flows: Option<Vec<DataFlow>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attack_paths: Option<Vec<AttackPath>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threat_intel: Option<Vec<ThreatIntel>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intel_priority: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_gaps: Option<Vec<ControlGap>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub control_coverage: Option<BTreeMap<String, f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendations: Option<Vec<Recommendation>>,
}

impl ContextUpdate {
    /// Fields present in this update
    pub fn fields(&self) -> Vec<ContextField> {
        let present = [
            (ContextField::Assets, self.assets.is_some()),
            (ContextField::EntryPoints, self.entry_points.is_some()),
            (ContextField::TrustBoundaries, self.trust_boundaries.is_some()),
            (ContextField::DataFlows, self.data_flows.is_some()),
            (ContextField::AttackPaths, self.attack_paths.is_some()),
            (ContextField::ThreatIntel, self.threat_intel.is_some()),
            (ContextField::IntelPriority, self.intel_priority.is_some()),
            (ContextField::ControlGaps, self.control_gaps.is_some()),
            (ContextField::ControlCoverage, self.control_coverage.is_some()),
            (ContextField::Recommendations, self.recommendations.is_some()),
        ];
        present
            .into_iter()
            .filter_map(|(field, set)| set.then_some(field))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// Move every present slot into `ctx`
    pub(crate) fn merge_into(self, ctx: &mut SharedContext) {
        if let Some(v) = self.assets {
            ctx.assets = v;
        }
        if let Some(v) = self.entry_points {
            ctx.entry_points = v;
        }
        if let Some(v) = self.trust_boundaries {
            ctx.trust_boundaries = v;
        }
        if let Some(v) = self.data_flows {
            ctx.data_flows = v;
        }
        if let Some(v) = self.attack_paths {
            ctx.attack_paths = v;
        }
        if let Some(v) = self.threat_intel {
            ctx.threat_intel = v;
        }
        if let Some(priorities) = self.intel_priority {
            for path in ctx.attack_paths.iter_mut() {
                if let Some(p) = priorities.get(&path.id) {
                    path.intel_priority = Some(p.clamp(0.0, 1.0));
                }
            }
        }
        if let Some(v) = self.control_gaps {
            ctx.control_gaps = v;
        }
        if let Some(coverage) = self.control_coverage {
            for path in ctx.attack_paths.iter_mut() {
                if let Some(c) = coverage.get(&path.id) {
                    path.control_coverage = Some(c.clamp(0.0, 1.0));
                }
            }
        }
        if let Some(v) = self.recommendations {
            ctx.recommendations = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(id: &str, priority: f64, assets: &[&str]) -> AttackPath {
        AttackPath {
            id: id.to_string(),
            technique_sequence: vec!["T1190".to_string()],
            priority_score: priority,
            rationale: String::new(),
            targeted_assets: assets.iter().map(|s| s.to_string()).collect(),
            control_coverage: None,
            intel_priority: None,
        }
    }

    #[test]
    fn test_update_fields() {
        let update = ContextUpdate {
            assets: Some(vec![]),
            control_coverage: Some(BTreeMap::new()),
            ..Default::default()
        };
        assert_eq!(
            update.fields(),
            vec![ContextField::Assets, ContextField::ControlCoverage]
        );
        assert!(ContextUpdate::default().is_empty());
    }

    #[test]
    fn test_per_path_slots_merge_by_id() {
        let mut ctx = SharedContext::new(RunId::new("r"), "x".into(), None);
        ctx.attack_paths = vec![path("AP-001", 0.4, &[]), path("AP-002", 0.6, &[])];

        let update = ContextUpdate {
            intel_priority: Some(BTreeMap::from([
                ("AP-002".to_string(), 0.9),
                ("AP-404".to_string(), 1.0),
            ])),
            ..Default::default()
        };
        update.merge_into(&mut ctx);

        assert_eq!(ctx.attack_paths[0].intel_priority, None);
        assert_eq!(ctx.attack_paths[1].intel_priority, Some(0.9));
        assert_eq!(ctx.attack_paths[1].effective_priority(), 0.9);
    }

    #[test]
    fn test_distinct_asset_count() {
        let p = path("AP-001", 0.5, &["db", "api", "db"]);
        assert_eq!(p.distinct_asset_count(), 2);
    }

    #[test]
    fn test_asset_wire_shape() {
        let asset: Asset = serde_json::from_value(json!({
            "name": "Postgres DB",
            "type": "datastore",
            "criticality": "critical"
        }))
        .unwrap();
        assert_eq!(asset.criticality, Severity::Critical);
        assert_eq!(asset.description, "");
        assert_eq!(serde_json::to_value(&asset).unwrap()["type"], "datastore");
    }

    #[test]
    fn test_terminal_states() {
        assert!(!AgentState::Pending.is_terminal());
        assert!(!AgentState::Running.is_terminal());
        assert!(AgentState::Skipped.is_terminal());
        assert!(AgentState::Failed.is_terminal());
    }
}
