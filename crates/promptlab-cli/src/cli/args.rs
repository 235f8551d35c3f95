use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "promptlab",
    version,
    about = "Run prompt versions against a matrix of test inputs and models"
)]
pub struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "PROMPTLAB_LOG_JSON")]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Execute a matrix file
    Run(RunArgs),
    /// Check one response against a JSON Schema
    Validate(ValidateArgs),
    /// List the model catalog
    Models(ModelsArgs),
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderMode {
    /// Real provider APIs, keys from the environment
    Live,
    /// Offline echo client
    Fake,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    #[arg(long)]
    pub matrix: PathBuf,

    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum, default_value = "live")]
    pub provider: ProviderMode,

    /// Only this input row (1-based)
    #[arg(long)]
    pub row: Option<usize>,

    /// Only this model
    #[arg(long)]
    pub model: Option<String>,

    /// SQLite snapshot database; overrides the config
    #[arg(long)]
    pub snapshot: Option<PathBuf>,

    /// Reject unknown keys in config and matrix files
    #[arg(long)]
    pub strict: bool,

    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ValidateArgs {
    #[arg(long)]
    pub schema: PathBuf,

    /// File holding the model answer
    #[arg(long)]
    pub response: PathBuf,
}

#[derive(clap::Args, Debug, Clone)]
pub struct ModelsArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
}
