//! System Analyst Agent
//!
//! Decomposes the raw system description into assets, entry points, trust
//! boundaries and data flows. Reads `raw_input` only.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;

use super::confidence::{ConfidenceInput, score_confidence};
use super::helpers::{Completed, contribution, request};
use super::schemas::AgentSchemas;
use super::{Agent, AgentContribution, AgentEnv, AgentFailure};
use crate::context::{
    AgentRole, Asset, ContextUpdate, DataFlow, EntryPoint, SharedContext, TrustBoundary,
};

pub struct SystemAnalystAgent;

#[derive(Debug, Deserialize)]
struct SystemAnalysis {
    assets: Vec<Asset>,
    #[serde(default)]
    entry_points: Vec<EntryPoint>,
    #[serde(default)]
    trust_boundaries: Vec<TrustBoundary>,
    #[serde(default)]
    data_flows: Vec<DataFlow>,
}

impl SystemAnalystAgent {
    fn build_prompt(snapshot: &SharedContext) -> String {
        format!(
            "Decompose the system below for threat modeling. List every asset \
             (services, datastores, clients, identities), every externally reachable \
             entry point, the trust boundaries between them and the data flows.\n\n\
             ## System Description\n{}\n",
            snapshot.raw_input.trim()
        )
    }

    /// Drop unnamed and duplicate assets (case-insensitive, first wins)
    fn dedupe_assets(assets: Vec<Asset>) -> Vec<Asset> {
        let mut seen = BTreeSet::new();
        assets
            .into_iter()
            .filter_map(|mut asset| {
                asset.name = asset.name.trim().to_string();
                let key = asset.name.to_lowercase();
                (!key.is_empty() && seen.insert(key)).then_some(asset)
            })
            .collect()
    }

    fn confidence(analysis: &SystemAnalysis) -> f64 {
        let sections = [
            !analysis.assets.is_empty(),
            !analysis.entry_points.is_empty(),
            !analysis.trust_boundaries.is_empty(),
            !analysis.data_flows.is_empty(),
        ];
        let texts = analysis
            .assets
            .iter()
            .map(|a| a.description.as_str())
            .chain(analysis.entry_points.iter().map(|e| e.description.as_str()))
            .collect();
        score_confidence(&ConfidenceInput {
            sections_present: sections.iter().filter(|s| **s).count(),
            sections_expected: sections.len(),
            texts,
        })
    }
}

#[async_trait]
impl Agent for SystemAnalystAgent {
    fn role(&self) -> AgentRole {
        AgentRole::SystemAnalyst
    }

    async fn run(
        &self,
        snapshot: &SharedContext,
        env: &AgentEnv,
    ) -> Result<AgentContribution, AgentFailure> {
        let role = self.role();
        let completed = request::<SystemAnalysis>(
            role,
            env,
            &Self::build_prompt(snapshot),
            AgentSchemas::system_analysis(),
        )
        .await?;

        let Completed { output, source } = completed;
        let analysis = SystemAnalysis {
            assets: Self::dedupe_assets(output.assets),
            ..output
        };
        let confidence = Self::confidence(&analysis);

        let update = ContextUpdate {
            assets: Some(analysis.assets),
            entry_points: Some(analysis.entry_points),
            trust_boundaries: Some(analysis.trust_boundaries),
            data_flows: Some(analysis.data_flows),
            ..Default::default()
        };
        Ok(contribution(role, update, confidence, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Severity;
    use crate::types::RunId;

    fn asset(name: &str) -> Asset {
        Asset {
            name: name.to_string(),
            asset_type: "service".to_string(),
            criticality: Severity::Medium,
            description: String::new(),
        }
    }

    #[test]
    fn test_prompt_reads_raw_input_only() {
        let mut ctx = SharedContext::new(RunId::new("r"), "  React frontend, Postgres DB ".into(), None);
        ctx.assets.push(asset("leaked-from-elsewhere"));
        let prompt = SystemAnalystAgent::build_prompt(&ctx);
        assert!(prompt.contains("React frontend, Postgres DB\n"));
        assert!(!prompt.contains("leaked-from-elsewhere"));
    }

    #[test]
    fn test_dedupe_assets() {
        let assets = SystemAnalystAgent::dedupe_assets(vec![
            asset("API"),
            asset(" api "),
            asset(""),
            asset("Postgres"),
        ]);
        let names: Vec<_> = assets.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["API", "Postgres"]);
    }
}
