//! Response Validation
//!
//! - JSON extraction and repair for model text
//! - JSON Schema subset checks that drive clarifying re-prompts

mod json_repair;
pub mod schema;

pub use json_repair::extract_json;

use serde_json::Value;

/// Outcome of turning raw model text into a schema-conforming document
#[derive(Debug)]
pub enum Checked {
    Valid(Value),
    /// Parsed, but violates the schema
    Invalid {
        value: Value,
        violations: Vec<String>,
    },
}

/// Validate an already-parsed document against an optional schema
pub fn check_against(value: Value, schema: Option<&Value>) -> Checked {
    let violations = schema
        .map(|schema| schema::validate(&value, schema))
        .unwrap_or_default();
    if violations.is_empty() {
        Checked::Valid(value)
    } else {
        Checked::Invalid { value, violations }
    }
}
