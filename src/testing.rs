//! Scripted LLM backends for pipeline tests.
//!
//! Responses are chosen by the `ROLE:` header every agent prompt starts
//! with, so one provider can serve a whole run.

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock, Mutex};
use std::time::Duration;

use crate::ai::{
    LlmProvider, LlmResponse, ProviderGateway, ProviderGatewayBuilder, RetryPolicy, TokenUsage,
};
use crate::context::AgentRole;
use crate::types::{ErrorCategory, LlmError, Result};

type Responder = Box<dyn Fn(AgentRole, &str) -> Result<Value> + Send + Sync>;

static NAME_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""name":\s*"([^"]+)""#).expect("valid name pattern"));

pub(crate) struct ScriptedProvider {
    model: String,
    responder: Responder,
    delay: Option<Duration>,
    calls: Mutex<Vec<AgentRole>>,
}

impl ScriptedProvider {
    pub fn new(
        model: &str,
        responder: impl Fn(AgentRole, &str) -> Result<Value> + Send + Sync + 'static,
    ) -> Self {
        Self {
            model: model.to_string(),
            responder: Box::new(responder),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Plausible answers for every role
    pub fn canned(model: &str) -> Self {
        Self::new(model, |role, prompt| Ok(canned_response(role, prompt)))
    }

    /// Every call fails with `category`
    pub fn failing(model: &str, category: ErrorCategory) -> Self {
        Self::new(model, move |_, _| {
            Err(LlmError::new(category, "scripted provider failure").into())
        })
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Roles served so far, in call order
    pub fn calls(&self) -> Vec<AgentRole> {
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(
        &self,
        prompt: &str,
        _schema: Option<&Value>,
        _temperature: f32,
    ) -> Result<LlmResponse> {
        let role = role_of(prompt).ok_or_else(|| {
            LlmError::new(ErrorCategory::BadRequest, "prompt has no role header")
        })?;
        self.calls
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(role);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let value = (self.responder)(role, prompt)?;
        Ok(LlmResponse {
            text: value.to_string(),
            usage: TokenUsage::new(prompt.len() as u64 / 4, 120),
            cost_usd: None,
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

pub(crate) fn role_of(prompt: &str) -> Option<AgentRole> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("ROLE: "))
        .and_then(|id| id.trim().parse().ok())
}

/// Gateway over `providers` in order, with millisecond backoff
pub(crate) fn gateway(providers: Vec<(&str, Arc<ScriptedProvider>)>) -> Arc<ProviderGateway> {
    let mut builder = ProviderGatewayBuilder::new().with_policy(RetryPolicy {
        max_retries: 2,
        max_schema_retries: 1,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        backoff_factor: 2.0,
    });
    for (name, provider) in providers {
        builder = builder.add_provider(name, provider);
    }
    Arc::new(builder.build())
}

/// The first line of the system description, split into components.
/// "Web app: React frontend, Postgres DB." yields ["React frontend", "Postgres DB"].
fn described_components(prompt: &str) -> Vec<String> {
    let Some((_, rest)) = prompt.split_once("## System Description\n") else {
        return Vec::new();
    };
    let line = rest.lines().next().unwrap_or_default();
    let body = line.split_once(':').map(|(_, b)| b).unwrap_or(line);
    body.split([',', '.'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

pub(crate) fn canned_response(role: AgentRole, prompt: &str) -> Value {
    match role {
        AgentRole::SystemAnalyst => {
            let (entry, assets): (Vec<String>, Vec<String>) = described_components(prompt)
                .into_iter()
                .partition(|c| c.to_lowercase().contains("endpoint"));
            json!({
                "assets": assets.iter().map(|name| json!({
                    "name": name,
                    "type": "component",
                    "criticality": "high",
                    "description": format!("{} within the system under review", name),
                })).collect::<Vec<_>>(),
                "entry_points": entry.iter().map(|name| json!({
                    "name": name,
                    "description": format!("{} reachable from the internet", name),
                })).collect::<Vec<_>>(),
                "trust_boundaries": [{"name": "internet edge", "description": "Public traffic enters here"}],
                "data_flows": [],
            })
        }
        AgentRole::AttackMapper => {
            let names: Vec<&str> = NAME_FIELD
                .captures_iter(prompt)
                .filter_map(|c| c.get(1).map(|m| m.as_str()))
                .collect();
            json!({
                "attack_paths": [
                    {
                        "id": "AP-001",
                        "technique_sequence": ["T1059", "T1190", "T1005"],
                        "priority_score": 0.8,
                        "rationale": "Exploiting the public endpoint yields code execution on the backend",
                        "targeted_assets": names,
                    },
                    {
                        "id": "AP-002",
                        "technique_sequence": ["T1110", "T1078"],
                        "priority_score": 0.6,
                        "rationale": "Credential stuffing against the login endpoint",
                        "targeted_assets": [],
                    }
                ]
            })
        }
        AgentRole::ThreatIntel => json!({
            "techniques": [
                {
                    "technique_id": "T1110",
                    "relevance": 1.0,
                    "actors": ["APT28"],
                    "note": "Password spraying against public login portals",
                }
            ]
        }),
        AgentRole::ControlEvaluator => json!({
            "control_gaps": [
                {
                    "attack_path_id": "AP-001",
                    "technique_id": "T1190",
                    "severity": "high",
                    "description": "No web application firewall in front of the public endpoint",
                }
            ],
            "coverage": [{"attack_path_id": "AP-001", "coverage": 0.33}],
        }),
        AgentRole::Mitigation => json!({
            "recommendations": [
                {
                    "description": "Place a web application firewall in front of every public endpoint",
                    "mapped_technique_id": "T1190",
                    "priority": "critical",
                }
            ]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_header_is_detected() {
        let prompt = "ROLE: attack_mapper\nDEPTH: standard\n\nbody";
        assert_eq!(role_of(prompt), Some(AgentRole::AttackMapper));
        assert_eq!(role_of("no header"), None);
    }

    #[test]
    fn test_components_from_description() {
        let prompt = "## System Description\nWeb app: React frontend, Node backend, Postgres DB, public login endpoint.\n";
        assert_eq!(
            described_components(prompt),
            vec![
                "React frontend",
                "Node backend",
                "Postgres DB",
                "public login endpoint"
            ]
        );
    }
}
