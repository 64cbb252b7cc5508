use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use threatweave::cli::OutputFormat;
use threatweave::cli::commands::{analyze, config, result, runs, techniques};
use threatweave::cli::util::CommandContext;
use threatweave::config::{AnalysisDepth, ConfigFormat};

#[derive(Parser)]
#[command(name = "threatweave")]
#[command(
    version,
    about = "Multi-agent LLM threat modeling mapped to MITRE ATT&CK"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this file instead of the global/project/env resolution chain
    #[arg(long, short, global = true, env = "THREATWEAVE_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a threat-modeling analysis of a system description
    Analyze {
        #[arg(long, short, help = "System description file ('-' for stdin)")]
        input: PathBuf,
        #[arg(long, help = "Existing controls documentation")]
        controls: Option<PathBuf>,
        #[arg(long = "no-intel", help = "Skip the threat intelligence agent")]
        no_intel: bool,
        #[arg(long, help = "Analysis depth: fast, standard, deep")]
        depth: Option<AnalysisDepth>,
        #[arg(long, help = "ATT&CK technique export (JSON) replacing the bundled set")]
        knowledge: Option<PathBuf>,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the persisted result of a run
    Result {
        run_id: String,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// List persisted runs, newest first
    Runs {
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Search the ATT&CK knowledge base
    Techniques {
        query: String,
        #[arg(long, help = "ATT&CK technique export (JSON) replacing the bundled set")]
        knowledge: Option<PathBuf>,
        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration (merged from all sources)
    Show {
        #[arg(short = 'f', long, value_enum, default_value_t = ConfigFormat::Toml)]
        format: ConfigFormat,
    },
    /// Show configuration file paths
    Path,
    /// Write a starter project configuration
    Init {
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mThreatWeave encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Analyze {
            input,
            controls,
            no_intel,
            depth,
            knowledge,
            format,
        } => {
            let ctx = CommandContext::load(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(analyze::run(
                ctx,
                analyze::AnalyzeOptions {
                    input,
                    controls,
                    no_intel,
                    depth,
                    knowledge,
                    format,
                },
            ))?;
        }
        Commands::Result { run_id, format } => {
            let ctx = CommandContext::load(config_path)?;
            result::run(&ctx, &run_id, format)?;
        }
        Commands::Runs { limit, format } => {
            let ctx = CommandContext::load(config_path)?;
            runs::run(&ctx, limit, format)?;
        }
        Commands::Techniques {
            query,
            knowledge,
            format,
        } => {
            techniques::run(&query, knowledge.as_deref(), format)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => config::show(config_path, format)?,
            ConfigAction::Path => config::path()?,
            ConfigAction::Init { force } => config::init(force)?,
        },
    }

    Ok(())
}
