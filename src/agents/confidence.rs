//! Self-assessed contribution confidence.
//!
//! Advisory only: the orchestrator flags low scores for review but never
//! drops a contribution because of them.

use regex::Regex;
use std::sync::LazyLock;

use crate::constants::confidence::{
    COMPLETENESS_WEIGHT, MIN_SPECIFIC_TEXT_LEN, NOT_HEDGED_WEIGHT, SPECIFICITY_WEIGHT,
};

static HEDGING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(cannot determine|can't determine|unable to (determine|assess|identify)|insufficient (information|detail)|not enough (information|detail)|no information (provided|available)|as an ai|i('m| am) not (sure|able)|i don't know)\b",
    )
    .expect("hedging pattern")
});

/// A field whose whole value is a placeholder. The same words inside a
/// sentence ("requests from unknown hosts") are ordinary prose.
static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(unknown|n/a|tbd)\s*\.?\s*$").expect("placeholder pattern")
});

/// Shape summary of one contribution
#[derive(Debug, Clone, Default)]
pub struct ConfidenceInput<'a> {
    /// Required sections that came back non-empty
    pub sections_present: usize,
    pub sections_expected: usize,
    /// Free-text fields (descriptions, rationales)
    pub texts: Vec<&'a str>,
}

/// `0.5·completeness + 0.2·(not hedged) + 0.3·specificity`, in [0, 1]
pub fn score_confidence(input: &ConfidenceInput<'_>) -> f64 {
    let completeness = if input.sections_expected == 0 {
        1.0
    } else {
        input.sections_present.min(input.sections_expected) as f64
            / input.sections_expected as f64
    };

    let hedged = input.texts.iter().any(|t| is_hedged(t));

    let specificity = if input.texts.is_empty() {
        0.0
    } else {
        input
            .texts
            .iter()
            .filter(|t| t.trim().chars().count() >= MIN_SPECIFIC_TEXT_LEN)
            .count() as f64
            / input.texts.len() as f64
    };

    let score = COMPLETENESS_WEIGHT * completeness
        + NOT_HEDGED_WEIGHT * if hedged { 0.0 } else { 1.0 }
        + SPECIFICITY_WEIGHT * specificity;
    score.clamp(0.0, 1.0)
}

/// Whether the model declined or hedged in `text`
pub fn is_hedged(text: &str) -> bool {
    HEDGING.is_match(text) || PLACEHOLDER.is_match(text)
}
