//! Techniques Command
//!
//! Searches the ATT&CK knowledge base by id, name or tactic.

use console::style;
use std::path::Path;

use crate::attack::{AttackKnowledge, StaticKnowledgeBase, Technique};
use crate::cli::OutputFormat;
use crate::cli::ui::Output;
use crate::types::Result;

pub fn run(query: &str, knowledge: Option<&Path>, format: OutputFormat) -> Result<()> {
    let kb = match knowledge {
        Some(path) => StaticKnowledgeBase::from_json_file(path)?,
        None => StaticKnowledgeBase::bundled(),
    };
    let matches = search(&kb, query);

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&matches)?),
        OutputFormat::Text => {
            let output = Output::new();
            if matches.is_empty() {
                output.info(&format!(
                    "No techniques match '{}' ({} known)",
                    query,
                    kb.len()
                ));
                return Ok(());
            }
            for technique in &matches {
                println!(
                    "{:<10} {:<22} {}",
                    style(&technique.id).cyan(),
                    technique.tactic.name(),
                    technique.name
                );
                for mitigation in &technique.mitigations {
                    println!(
                        "{:<10} {} {} {}",
                        "",
                        style("↳").dim(),
                        mitigation.id,
                        mitigation.name
                    );
                }
            }
        }
    }
    Ok(())
}

fn search(kb: &StaticKnowledgeBase, query: &str) -> Vec<Technique> {
    kb.search(query)
        .iter()
        .filter_map(|id| kb.get_technique(id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_id_ranks_first() {
        let kb = StaticKnowledgeBase::bundled();
        let found = search(&kb, "T1190");
        assert_eq!(found.first().map(|t| t.id.as_str()), Some("T1190"));
    }

    #[test]
    fn test_unmatched_query_is_empty() {
        let kb = StaticKnowledgeBase::bundled();
        assert!(search(&kb, "zzzz-not-a-technique").is_empty());
    }
}
