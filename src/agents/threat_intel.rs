//! Threat Intelligence Agent
//!
//! Optional; runs next to the Mapper. Scores how relevant techniques are to
//! actors known to target systems like this one. The orchestrator turns the
//! scores into per-path `intel_priority` once the Mapper's paths exist.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;

use super::confidence::{ConfidenceInput, score_confidence};
use super::helpers::{Completed, contribution, json_section, request};
use super::schemas::AgentSchemas;
use super::{Agent, AgentContribution, AgentEnv, AgentFailure};
use crate::attack::normalize_technique_id;
use crate::context::{AgentRole, ContextUpdate, SharedContext, ThreatIntel};

pub struct ThreatIntelAgent;

#[derive(Debug, Deserialize)]
struct IntelOutput {
    techniques: Vec<ThreatIntel>,
}

impl ThreatIntelAgent {
    fn build_prompt(snapshot: &SharedContext) -> String {
        format!(
            "Using known threat actor TTPs, list the ATT&CK techniques most relevant to \
             attacks on this system. Score relevance between 0 and 1 and name the actors \
             known to use each technique against similar targets.\n\n{}\n{}",
            json_section("Assets", &snapshot.assets),
            json_section("Entry Points", &snapshot.entry_points),
        )
    }

    /// Canonical ids, relevance clamped, one entry per technique (highest wins)
    fn normalize(entries: Vec<ThreatIntel>) -> Vec<ThreatIntel> {
        let mut by_id: BTreeMap<String, ThreatIntel> = BTreeMap::new();
        for mut entry in entries {
            let Some(id) = normalize_technique_id(&entry.technique_id) else {
                continue;
            };
            entry.technique_id = id.clone();
            entry.relevance = if entry.relevance.is_finite() {
                entry.relevance.clamp(0.0, 1.0)
            } else {
                0.0
            };
            let weaker = by_id
                .get(&id)
                .is_some_and(|existing| existing.relevance >= entry.relevance);
            if !weaker {
                by_id.insert(id, entry);
            }
        }
        let mut intel: Vec<ThreatIntel> = by_id.into_values().collect();
        intel.sort_by(|a, b| {
            b.relevance
                .total_cmp(&a.relevance)
                .then_with(|| a.technique_id.cmp(&b.technique_id))
        });
        intel
    }
}

#[async_trait]
impl Agent for ThreatIntelAgent {
    fn role(&self) -> AgentRole {
        AgentRole::ThreatIntel
    }

    async fn run(
        &self,
        snapshot: &SharedContext,
        env: &AgentEnv,
    ) -> Result<AgentContribution, AgentFailure> {
        let role = self.role();
        let Completed { output, source } = request::<IntelOutput>(
            role,
            env,
            &Self::build_prompt(snapshot),
            AgentSchemas::threat_intel(),
        )
        .await?;

        let intel = Self::normalize(output.techniques);
        let confidence = score_confidence(&ConfidenceInput {
            sections_present: usize::from(!intel.is_empty())
                + usize::from(intel.iter().any(|i| !i.actors.is_empty())),
            sections_expected: 2,
            texts: intel.iter().map(|i| i.note.as_str()).collect(),
        });

        let update = ContextUpdate {
            threat_intel: Some(intel),
            ..Default::default()
        };
        Ok(contribution(role, update, confidence, source))
    }
}
