//! Analyze Command
//!
//! Starts a threat-modeling run, prints per-agent progress while it runs and
//! the final report once it is persisted. Ctrl-C cancels the run.
//!
//! Usage:
//!   threatweave analyze --input system.md [--controls controls.md] [--no-intel]

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use super::result::print_result;
use crate::ai::ProviderGateway;
use crate::cli::OutputFormat;
use crate::cli::ui::Output;
use crate::cli::util::{CommandContext, load_knowledge, read_text};
use crate::config::AnalysisDepth;
use crate::orchestrator::{Orchestrator, RunOptions};
use crate::storage::SharedResultStore;
use crate::types::Result;

#[derive(Debug, Clone)]
pub struct AnalyzeOptions {
    /// System description, `-` for stdin
    pub input: PathBuf,
    pub controls: Option<PathBuf>,
    pub no_intel: bool,
    pub depth: Option<AnalysisDepth>,
    /// Technique export replacing the bundled knowledge base
    pub knowledge: Option<PathBuf>,
    pub format: OutputFormat,
}

pub async fn run(ctx: CommandContext, options: AnalyzeOptions) -> Result<()> {
    let raw_input = read_text(&options.input)?;
    let control_documentation = options
        .controls
        .as_deref()
        .map(read_text)
        .transpose()?;

    let gateway = Arc::new(ProviderGateway::from_config(&ctx.config.llm)?);
    let knowledge = load_knowledge(options.knowledge.as_deref())?;
    let store: SharedResultStore = ctx.db.clone();
    let orchestrator = Orchestrator::new(gateway, knowledge, store, ctx.config);

    let run_options = RunOptions {
        control_documentation,
        enable_threat_intel: options.no_intel.then_some(false),
        depth: options.depth,
    };
    let run_id = orchestrator.start(raw_input, run_options)?;
    info!(run_id = %run_id, "Analysis started");

    let output = Output::new();
    let quiet = options.format == OutputFormat::Json;
    if !quiet {
        output.info(&format!("Run {} started (Ctrl-C to cancel)", run_id));
    }

    let progress = orchestrator.watch(&run_id, |status| {
        if !quiet {
            output.run_status(status);
        }
    });

    tokio::select! {
        status = progress => {
            status?;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!(run_id = %run_id, "Interrupted, cancelling run");
            if !quiet {
                output.warning("Interrupted, cancelling run");
            }
            orchestrator.cancel(&run_id)?;
            orchestrator.wait(&run_id).await?;
        }
    }

    let result = orchestrator.result(&run_id)?;
    print_result(&result, options.format)
}
