//! Mitigation Agent
//!
//! Turns control gaps into prioritised recommendations, hinting the model
//! with the knowledge store's mitigations for each gap's technique.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;

use super::confidence::{ConfidenceInput, score_confidence};
use super::helpers::{Completed, contribution, json_section, request};
use super::schemas::AgentSchemas;
use super::{Agent, AgentContribution, AgentEnv, AgentFailure};
use crate::attack::{AttackKnowledge, normalize_technique_id};
use crate::context::{AgentRole, ContextUpdate, Recommendation, SharedContext};

pub struct MitigationAgent;

#[derive(Debug, Deserialize)]
struct MitigationOutput {
    recommendations: Vec<Recommendation>,
}

impl MitigationAgent {
    fn build_prompt(snapshot: &SharedContext, knowledge: &dyn AttackKnowledge) -> String {
        let techniques: BTreeSet<&str> = snapshot
            .control_gaps
            .iter()
            .map(|g| g.technique_id.as_str())
            .collect();

        let mut hints = String::from("## Known Mitigations\n");
        for id in &techniques {
            match knowledge.get_technique(id) {
                Some(t) if !t.mitigations.is_empty() => {
                    let names: Vec<String> = t
                        .mitigations
                        .iter()
                        .map(|m| format!("{} {}", m.id, m.name))
                        .collect();
                    hints.push_str(&format!("- {} {}: {}\n", id, t.name, names.join(", ")));
                }
                Some(t) => hints.push_str(&format!("- {} {}: no standard mitigation\n", id, t.name)),
                None => hints.push_str(&format!("- {}: not in knowledge base\n", id)),
            }
        }

        format!(
            "Recommend concrete mitigations for the control gaps below. Map each recommendation \
             to the technique it addresses and assign a priority (low, medium, high, critical).\n\n{}\n{}",
            json_section("Control Gaps", &snapshot.control_gaps),
            hints
        )
    }

    /// Valid technique ids only, most urgent first, stable within a priority
    fn normalize(recommendations: Vec<Recommendation>) -> Vec<Recommendation> {
        let mut recs: Vec<Recommendation> = recommendations
            .into_iter()
            .filter(|r| !r.description.trim().is_empty())
            .filter_map(|mut r| {
                r.mapped_technique_id = normalize_technique_id(&r.mapped_technique_id)?;
                r.description = r.description.trim().to_string();
                Some(r)
            })
            .collect();
        recs.sort_by(|a, b| b.priority.rank().cmp(&a.priority.rank()));
        recs
    }
}

#[async_trait]
impl Agent for MitigationAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Mitigation
    }

    async fn run(
        &self,
        snapshot: &SharedContext,
        env: &AgentEnv,
    ) -> Result<AgentContribution, AgentFailure> {
        let role = self.role();
        let Completed { output, source } = request::<MitigationOutput>(
            role,
            env,
            &Self::build_prompt(snapshot, env.knowledge.as_ref()),
            AgentSchemas::recommendations(),
        )
        .await?;

        let recommendations = Self::normalize(output.recommendations);

        let gap_techniques: BTreeSet<&str> = snapshot
            .control_gaps
            .iter()
            .map(|g| g.technique_id.as_str())
            .collect();
        let addressed = recommendations
            .iter()
            .filter(|r| gap_techniques.contains(r.mapped_technique_id.as_str()))
            .map(|r| r.mapped_technique_id.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        let confidence = score_confidence(&ConfidenceInput {
            sections_present: if gap_techniques.is_empty() {
                1
            } else {
                usize::from(addressed == gap_techniques.len())
            },
            sections_expected: 1,
            texts: recommendations.iter().map(|r| r.description.as_str()).collect(),
        });

        let update = ContextUpdate {
            recommendations: Some(recommendations),
            ..Default::default()
        };
        Ok(contribution(role, update, confidence, source))
    }
}
