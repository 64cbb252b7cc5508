//! Agent Helper Functions
//!
//! Shared plumbing so each agent only supplies its prompt, schema and
//! normalisation:
//! 1. Prefix the role header → 2. Call the gateway → 3. Deserialize → 4. Wrap
//!
//! An answer that passes the schema but still does not deserialize is sent
//! back with the same clarification the gateway uses for schema violations.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{AgentContribution, AgentEnv, AgentFailure};
use crate::ai::CompletionRequest;
use crate::ai::provider::build_clarification_prompt;
use crate::config::AnalysisDepth;
use crate::context::{AgentRole, ContextUpdate};
use crate::types::ThreatError;

/// First lines of every agent prompt
pub fn role_header(role: AgentRole, depth: AnalysisDepth) -> String {
    format!(
        "ROLE: {}\nDEPTH: {}\n\nYou are the {} in a threat modeling team.",
        role.as_str(),
        depth,
        role.display_name()
    )
}

/// Provider and model that served a contribution
#[derive(Debug, Clone)]
pub(crate) struct ModelSource {
    pub provider: String,
    pub model: String,
}

/// A typed agent output plus who produced it
pub(crate) struct Completed<T> {
    pub output: T,
    pub source: ModelSource,
}

/// Send `body` under the role header and deserialize the validated JSON.
pub(crate) async fn request<T: DeserializeOwned>(
    role: AgentRole,
    env: &AgentEnv,
    body: &str,
    schema: Value,
) -> Result<Completed<T>, AgentFailure> {
    let original = format!("{}\n\n{}", role_header(role, env.depth), body);
    tracing::debug!(agent = %role, prompt_len = original.len(), "Requesting contribution");

    let mut prompt = original.clone();
    let mut attempts = 0u32;
    let mut rejections = 0u32;
    loop {
        let result = env
            .gateway
            .complete(
                CompletionRequest::new(prompt)
                    .with_schema(schema.clone())
                    .prefer(env.preferred_model.clone())
                    .with_temperature(env.temperature),
            )
            .await
            .map_err(|e| AgentFailure::new(role, e))?;
        attempts += result.attempts;

        let error = match serde_json::from_value::<T>(result.content) {
            Ok(output) => {
                return Ok(Completed {
                    output,
                    source: ModelSource {
                        provider: result.provider,
                        model: result.model,
                    },
                });
            }
            Err(e) => e,
        };

        rejections += 1;
        if rejections > env.gateway.max_schema_retries() {
            return Err(AgentFailure::new(
                role,
                ThreatError::SchemaValidation {
                    message: format!("{} output did not deserialize: {}", role, error),
                    attempts,
                },
            ));
        }
        tracing::debug!(agent = %role, error = %error, "Output did not deserialize, re-prompting");
        prompt = build_clarification_prompt(&original, &[format!("$: {}", error)]);
    }
}

pub(crate) fn contribution(
    role: AgentRole,
    update: ContextUpdate,
    confidence_score: f64,
    source: ModelSource,
) -> AgentContribution {
    tracing::debug!(
        agent = %role,
        fields = ?update.fields(),
        confidence = confidence_score,
        model = %source.model,
        "Contribution ready"
    );
    AgentContribution {
        role,
        update,
        confidence_score,
        source_model: source.model,
        source_provider: source.provider,
    }
}

/// Titled, pretty-printed JSON block for prompts
pub(crate) fn json_section<T: Serialize + ?Sized>(title: &str, value: &T) -> String {
    let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| "[]".to_string());
    format!("## {}\n```json\n{}\n```\n", title, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::StaticKnowledgeBase;
    use crate::testing::{ScriptedProvider, gateway};
    use crate::types::RunId;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::{Arc, Mutex};
    use tokio_util::sync::CancellationToken;

    #[derive(Debug, Deserialize)]
    struct Counted {
        count: u32,
    }

    fn env(provider: Arc<ScriptedProvider>) -> AgentEnv {
        let gateway = gateway(vec![("primary", provider)]);
        AgentEnv {
            gateway: Arc::new(gateway.session(RunId::new("run-helpers"), CancellationToken::new())),
            knowledge: Arc::new(StaticKnowledgeBase::bundled()),
            depth: AnalysisDepth::Standard,
            preferred_model: None,
            temperature: 0.0,
        }
    }

    /// Answers `replies` in order, repeating the last one
    fn replying(replies: Vec<Value>) -> (Arc<ScriptedProvider>, Arc<Mutex<Vec<String>>>) {
        let prompts = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&prompts);
        let provider = ScriptedProvider::new("m", move |_, prompt| {
            let mut seen = seen.lock().unwrap();
            seen.push(prompt.to_string());
            Ok(replies[(seen.len() - 1).min(replies.len() - 1)].clone())
        });
        (Arc::new(provider), prompts)
    }

    fn count_schema() -> Value {
        json!({"type": "object", "required": ["count"]})
    }

    #[tokio::test]
    async fn test_undeserializable_output_is_reprompted() {
        let (provider, prompts) = replying(vec![json!({"count": -1}), json!({"count": 3})]);
        let env = env(provider);

        let completed =
            request::<Counted>(AgentRole::SystemAnalyst, &env, "Count the assets", count_schema())
                .await
                .unwrap();
        assert_eq!(completed.output.count, 3);
        assert_eq!(completed.source.provider, "primary");

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[1].starts_with("ROLE: system_analyst\n"));
        assert!(prompts[1].contains("did not match the required JSON structure"));
        assert!(prompts[1].contains("expected u32"));
    }

    #[tokio::test]
    async fn test_persistently_undeserializable_output_fails() {
        let (provider, prompts) = replying(vec![json!({"count": "many"})]);
        let env = env(provider);

        let failure =
            request::<Counted>(AgentRole::SystemAnalyst, &env, "Count the assets", count_schema())
                .await
                .err()
                .unwrap();
        match failure.source {
            ThreatError::SchemaValidation { message, attempts } => {
                assert!(message.contains("did not deserialize"));
                assert_eq!(attempts, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
        // One clarifying re-prompt with the test gateway's policy
        assert_eq!(prompts.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_role_header() {
        let header = role_header(AgentRole::AttackMapper, AnalysisDepth::Deep);
        assert!(header.starts_with("ROLE: attack_mapper\nDEPTH: deep\n"));
        assert!(header.contains("ATT&CK Mapper"));
    }

    #[test]
    fn test_json_section() {
        let section = json_section("Assets", &vec!["api", "db"]);
        assert!(section.starts_with("## Assets\n```json\n"));
        assert!(section.contains("\"db\""));
    }
}
