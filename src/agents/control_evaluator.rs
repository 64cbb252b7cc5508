//! Control Evaluator Agent
//!
//! Compares attack paths with the supplied control documentation and emits
//! gaps plus per-path coverage. Without documentation every technique is
//! treated as uncovered.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

use super::confidence::{ConfidenceInput, score_confidence};
use super::helpers::{Completed, contribution, json_section, request};
use super::schemas::AgentSchemas;
use super::{Agent, AgentContribution, AgentEnv, AgentFailure};
use crate::attack::normalize_technique_id;
use crate::context::{AgentRole, ContextUpdate, ControlGap, SharedContext};

pub struct ControlEvaluatorAgent;

#[derive(Debug, Deserialize)]
struct EvaluationOutput {
    control_gaps: Vec<ControlGap>,
    #[serde(default)]
    coverage: Vec<PathCoverage>,
}

#[derive(Debug, Deserialize)]
struct PathCoverage {
    attack_path_id: String,
    coverage: f64,
}

impl ControlEvaluatorAgent {
    fn build_prompt(snapshot: &SharedContext) -> String {
        let controls = match snapshot.control_documentation.as_deref().map(str::trim) {
            Some(doc) if !doc.is_empty() => format!("## Control Documentation\n{}\n", doc),
            _ => "## Control Documentation\nNone supplied. Treat every technique as uncovered.\n"
                .to_string(),
        };
        format!(
            "For each attack path, decide which techniques the existing controls mitigate. \
             Report every uncovered technique as a control gap with a severity, and give each \
             path a coverage fraction between 0 and 1.\n\n{}\n{}",
            json_section("Attack Paths", &snapshot.attack_paths),
            controls
        )
    }

    /// Keep gaps on known paths; coverage defaults to the share of a path's
    /// techniques without a gap.
    fn normalize(
        output: EvaluationOutput,
        snapshot: &SharedContext,
    ) -> (Vec<ControlGap>, BTreeMap<String, f64>) {
        let known: BTreeSet<&str> = snapshot.attack_paths.iter().map(|p| p.id.as_str()).collect();

        let gaps: Vec<ControlGap> = output
            .control_gaps
            .into_iter()
            .filter(|g| known.contains(g.attack_path_id.as_str()))
            .filter_map(|mut g| {
                g.technique_id = normalize_technique_id(&g.technique_id)?;
                Some(g)
            })
            .collect();

        let reported: BTreeMap<&str, f64> = output
            .coverage
            .iter()
            .filter(|c| c.coverage.is_finite())
            .map(|c| (c.attack_path_id.as_str(), c.coverage.clamp(0.0, 1.0)))
            .collect();

        let coverage = snapshot
            .attack_paths
            .iter()
            .map(|path| {
                let value = reported.get(path.id.as_str()).copied().unwrap_or_else(|| {
                    let gapped: BTreeSet<&str> = gaps
                        .iter()
                        .filter(|g| g.attack_path_id == path.id)
                        .map(|g| g.technique_id.as_str())
                        .collect();
                    let total = path.technique_sequence.len().max(1);
                    1.0 - gapped.len().min(total) as f64 / total as f64
                });
                (path.id.clone(), value)
            })
            .collect();

        (gaps, coverage)
    }
}

#[async_trait]
impl Agent for ControlEvaluatorAgent {
    fn role(&self) -> AgentRole {
        AgentRole::ControlEvaluator
    }

    async fn run(
        &self,
        snapshot: &SharedContext,
        env: &AgentEnv,
    ) -> Result<AgentContribution, AgentFailure> {
        let role = self.role();
        let Completed { output, source } = request::<EvaluationOutput>(
            role,
            env,
            &Self::build_prompt(snapshot),
            AgentSchemas::control_evaluation(),
        )
        .await?;

        let had_coverage = !output.coverage.is_empty();
        let (gaps, coverage) = Self::normalize(output, snapshot);
        let confidence = score_confidence(&ConfidenceInput {
            sections_present: usize::from(!gaps.is_empty() || snapshot.attack_paths.is_empty())
                + usize::from(had_coverage),
            sections_expected: 2,
            texts: gaps.iter().map(|g| g.description.as_str()).collect(),
        });

        let update = ContextUpdate {
            control_gaps: Some(gaps),
            control_coverage: Some(coverage),
            ..Default::default()
        };
        Ok(contribution(role, update, confidence, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{AttackPath, Severity};
    use crate::types::RunId;

    fn snapshot() -> SharedContext {
        let mut ctx = SharedContext::new(RunId::new("r"), "x".into(), None);
        ctx.attack_paths = vec![AttackPath {
            id: "AP-001".into(),
            technique_sequence: vec!["T1190".into(), "T1059".into(), "T1048".into(), "T1486".into()],
            priority_score: 0.8,
            rationale: String::new(),
            targeted_assets: vec![],
            control_coverage: None,
            intel_priority: None,
        }];
        ctx
    }

    fn gap(path: &str, technique: &str) -> ControlGap {
        ControlGap {
            attack_path_id: path.into(),
            technique_id: technique.into(),
            severity: Severity::High,
            description: "No WAF in front of the login endpoint".into(),
        }
    }

    #[test]
    fn test_unknown_paths_are_dropped_and_coverage_derived() {
        let output = EvaluationOutput {
            control_gaps: vec![gap("AP-001", "t1190"), gap("AP-404", "T1190"), gap("AP-001", "x")],
            coverage: vec![],
        };
        let (gaps, coverage) = ControlEvaluatorAgent::normalize(output, &snapshot());
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].technique_id, "T1190");
        assert!((coverage["AP-001"] - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_reported_coverage_wins() {
        let output = EvaluationOutput {
            control_gaps: vec![],
            coverage: vec![PathCoverage {
                attack_path_id: "AP-001".into(),
                coverage: 0.3,
            }],
        };
        let (_, coverage) = ControlEvaluatorAgent::normalize(output, &snapshot());
        assert_eq!(coverage["AP-001"], 0.3);
    }

    #[test]
    fn test_prompt_without_documentation() {
        let prompt = ControlEvaluatorAgent::build_prompt(&snapshot());
        assert!(prompt.contains("Treat every technique as uncovered"));
        assert!(prompt.contains("AP-001"));

        let mut ctx = snapshot();
        ctx.control_documentation = Some("WAF on all public endpoints".into());
        assert!(ControlEvaluatorAgent::build_prompt(&ctx).contains("WAF on all public endpoints"));
    }
}
