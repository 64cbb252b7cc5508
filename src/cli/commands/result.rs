//! Result Command
//!
//! Prints a persisted run result.

use crate::cli::OutputFormat;
use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::orchestrator::{RunResult, RunState};
use crate::storage::ResultStore;
use crate::types::{Result, RunId, ThreatError};

pub fn run(ctx: &CommandContext, run_id: &str, format: OutputFormat) -> Result<()> {
    let run_id = RunId::new(run_id);
    let result = ctx
        .db
        .load(&run_id)?
        .ok_or_else(|| ThreatError::not_found(run_id.as_str()))?;
    print_result(&result, format)
}

/// Render a result as the JSON document or the text report
pub fn print_result(result: &RunResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(result)?),
        OutputFormat::Text => {
            let output = Output::new();
            output.report(result);
            println!();
            match result.final_state {
                RunState::Completed => output.success("Threat model completed"),
                _ => output.error(&format!("Run ended in state {}", result.final_state)),
            }
        }
    }
    Ok(())
}
