//! Prompt building utilities for LLM providers.

use serde_json::Value;

/// Append JSON schema instructions to a prompt.
///
/// Used by providers without a native schema channel (Ollama).
pub fn build_schema_prompt(user_prompt: &str, schema: Option<&Value>) -> String {
    let Some(schema) = schema else {
        return format!("{}\n\nRespond ONLY with valid JSON.", user_prompt);
    };

    let schema_str = serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "{}\n\n---\n\nRespond with valid JSON matching this schema:\n```json\n{}\n```\n\nRespond ONLY with valid JSON, no explanation.",
        user_prompt, schema_str
    )
}

/// Re-prompt after a schema violation: the original prompt plus the list of
/// problems found in the previous answer.
pub fn build_clarification_prompt(original: &str, violations: &[String]) -> String {
    let mut prompt = String::with_capacity(original.len() + 256);
    prompt.push_str(original);
    prompt.push_str(
        "\n\n---\n\nYour previous answer did not match the required JSON structure:\n",
    );
    for violation in violations {
        prompt.push_str("- ");
        prompt.push_str(violation);
        prompt.push('\n');
    }
    prompt.push_str("\nReturn the complete corrected JSON document only.");
    prompt
}
