//! Runs Command
//!
//! Lists persisted runs, newest first.

use crate::cli::OutputFormat;
use crate::cli::ui::Output;
use crate::cli::util::CommandContext;
use crate::storage::ResultStore;
use crate::types::Result;

pub fn run(ctx: &CommandContext, limit: usize, format: OutputFormat) -> Result<()> {
    let runs = ctx.db.list(limit)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Text => Output::new().runs(&runs),
    }
    Ok(())
}
