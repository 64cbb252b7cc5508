pub mod commands;
pub mod ui;
pub mod util;

pub use util::{CommandContext, load_config, load_knowledge, read_text};

/// Output encoding for run documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}
