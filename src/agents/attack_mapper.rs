//! ATT&CK Mapper Agent
//!
//! Builds attack paths from assets and entry points. Model output is
//! normalised before it leaves the agent:
//! - technique ids canonicalised, invalid ones dropped
//! - each sequence re-ordered by kill-chain tactic rank
//! - empty paths dropped, missing or duplicate ids re-assigned
//! - priority clamped to [0, 1], targeted assets resolved against known assets
//!
//! The prompt lists knowledge-base search hits for each entry point as
//! candidate initial techniques.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;

use super::confidence::{ConfidenceInput, score_confidence};
use super::helpers::{Completed, contribution, json_section, request};
use super::schemas::AgentSchemas;
use super::{Agent, AgentContribution, AgentEnv, AgentFailure};
use crate::attack::{AttackKnowledge, order_by_kill_chain, rank_paths};
use crate::context::{AgentRole, AttackPath, ContextUpdate, SharedContext};

/// Search hits kept per entry point
const HINTS_PER_ENTRY_POINT: usize = 3;

/// Words shorter than this match too many technique names to be useful
const MIN_QUERY_TERM_LEN: usize = 4;

pub struct AttackMapperAgent;

#[derive(Debug, Deserialize)]
struct MapperOutput {
    attack_paths: Vec<RawPath>,
}

#[derive(Debug, Deserialize)]
struct RawPath {
    #[serde(default)]
    id: Option<String>,
    technique_sequence: Vec<String>,
    priority_score: f64,
    #[serde(default)]
    rationale: String,
    #[serde(default)]
    targeted_assets: Vec<String>,
}

impl AttackMapperAgent {
    fn build_prompt(snapshot: &SharedContext, max_paths: usize, hints: &[String]) -> String {
        let mut prompt = format!(
            "Identify up to {} plausible attack paths against this system. Each path is an \
             ordered sequence of MITRE ATT&CK technique ids starting from initial access. \
             Give each path a priority_score between 0 and 1 and list the assets it threatens \
             by name.\n\n{}\n{}",
            max_paths,
            json_section("Assets", &snapshot.assets),
            json_section("Entry Points", &snapshot.entry_points),
        );
        if !hints.is_empty() {
            prompt.push_str("\n## Candidate Techniques\n");
            prompt.push_str("Knowledge-base matches for the entry points; use them where they fit.\n");
            for hint in hints {
                prompt.push_str(hint);
                prompt.push('\n');
            }
        }
        prompt
    }

    /// One line per distinct technique the knowledge base associates with
    /// an entry point, in entry-point order
    fn technique_hints(snapshot: &SharedContext, knowledge: &dyn AttackKnowledge) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut hints = Vec::new();
        for entry in &snapshot.entry_points {
            let query = search_query(&format!("{} {}", entry.name, entry.description));
            let ids = knowledge.search(&query);
            for id in ids.into_iter().take(HINTS_PER_ENTRY_POINT) {
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Some(technique) = knowledge.get_technique(&id) {
                    hints.push(format!(
                        "- {} {} ({})",
                        technique.id,
                        technique.name,
                        technique.tactic.short_name()
                    ));
                }
            }
        }
        hints
    }

    fn normalize(
        raw: Vec<RawPath>,
        snapshot: &SharedContext,
        knowledge: &dyn AttackKnowledge,
        max_paths: usize,
    ) -> Vec<AttackPath> {
        let known_assets: Vec<&str> = snapshot.asset_names();
        let mut used_ids = BTreeSet::new();
        let mut pending_ids = Vec::new();
        let mut paths = Vec::new();

        for raw_path in raw {
            let technique_sequence = order_by_kill_chain(&raw_path.technique_sequence, knowledge);
            if technique_sequence.is_empty() {
                continue;
            }

            let id = raw_path
                .id
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty() && used_ids.insert(id.clone()));
            if id.is_none() {
                pending_ids.push(paths.len());
            }

            let targeted_assets =
                resolve_assets(&raw_path.targeted_assets, &raw_path.rationale, &known_assets);

            paths.push(AttackPath {
                id: id.unwrap_or_default(),
                technique_sequence,
                priority_score: if raw_path.priority_score.is_finite() {
                    raw_path.priority_score.clamp(0.0, 1.0)
                } else {
                    0.0
                },
                rationale: raw_path.rationale.trim().to_string(),
                targeted_assets,
                control_coverage: None,
                intel_priority: None,
            });
        }

        let mut next = 1usize;
        for idx in pending_ids {
            let id = loop {
                let candidate = format!("AP-{:03}", next);
                next += 1;
                if used_ids.insert(candidate.clone()) {
                    break candidate;
                }
            };
            paths[idx].id = id;
        }

        rank_paths(&mut paths);
        paths.truncate(max_paths);
        paths
    }

    fn confidence(paths: &[AttackPath]) -> f64 {
        score_confidence(&ConfidenceInput {
            sections_present: usize::from(!paths.is_empty())
                + usize::from(paths.iter().any(|p| !p.targeted_assets.is_empty())),
            sections_expected: 2,
            texts: paths.iter().map(|p| p.rationale.as_str()).collect(),
        })
    }
}

/// Lower-cased distinctive words of `text`, space separated
fn search_query(text: &str) -> String {
    let mut seen = BTreeSet::new();
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.chars().count() >= MIN_QUERY_TERM_LEN)
        .map(str::to_lowercase)
        .filter(|word| seen.insert(word.clone()))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Known asset names a path threatens: the declared ones that exist, or
/// failing that, the ones its rationale mentions.
fn resolve_assets(declared: &[String], rationale: &str, known: &[&str]) -> Vec<String> {
    let matches = |candidate: &str| {
        known
            .iter()
            .find(|k| k.eq_ignore_ascii_case(candidate.trim()))
            .map(|k| k.to_string())
    };

    let mut resolved: Vec<String> = declared.iter().filter_map(|d| matches(d)).collect();
    if resolved.is_empty() {
        let lower = rationale.to_lowercase();
        resolved = known
            .iter()
            .filter(|k| !k.is_empty() && lower.contains(&k.to_lowercase()))
            .map(|k| k.to_string())
            .collect();
    }
    let mut seen = BTreeSet::new();
    resolved.retain(|a| seen.insert(a.clone()));
    resolved
}

#[async_trait]
impl Agent for AttackMapperAgent {
    fn role(&self) -> AgentRole {
        AgentRole::AttackMapper
    }

    async fn run(
        &self,
        snapshot: &SharedContext,
        env: &AgentEnv,
    ) -> Result<AgentContribution, AgentFailure> {
        let role = self.role();
        let max_paths = env.depth.max_attack_paths();
        let hints = Self::technique_hints(snapshot, env.knowledge.as_ref());
        let Completed { output, source } = request::<MapperOutput>(
            role,
            env,
            &Self::build_prompt(snapshot, max_paths, &hints),
            AgentSchemas::attack_paths(),
        )
        .await?;

        let paths = Self::normalize(
            output.attack_paths,
            snapshot,
            env.knowledge.as_ref(),
            max_paths,
        );
        let confidence = Self::confidence(&paths);

        let update = ContextUpdate {
            attack_paths: Some(paths),
            ..Default::default()
        };
        Ok(contribution(role, update, confidence, source))
    }
}
