use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "Tony Kan, Ted Yu, William A. Goddard III, Victor Wai Tak Kam",
    version,
    about = "SHARK++ CLI - Provable partition function bounds and top-K binding sequence design over discrete conformation spaces.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search for the sequences with the best binding score between a protein and a ligand.
    Design(DesignArgs),
}

/// Arguments for the `design` subcommand.
#[derive(Args, Debug, Clone)]
pub struct DesignArgs {
    // --- Core Arguments ---
    /// Path to the design problem definition (TOML with CSV energy tables).
    #[arg(short, long, required = true, value_name = "PATH")]
    pub input: PathBuf,

    /// Path to the configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Write the scored sequences to this file as tab-separated values.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    // --- Bound Overrides ---
    /// Override the target relative gap of every partition function bound.
    #[arg(short = 'e', long, value_name = "FLOAT")]
    pub epsilon: Option<f64>,

    // --- Search Overrides ---
    /// Override the number of sequences to report.
    #[arg(short = 'k', long = "num-sequences", value_name = "INT")]
    pub num_sequences: Option<usize>,

    /// Override the number of conformations minimized per refinement of a sequence.
    #[arg(long = "batch", value_name = "INT")]
    pub confs_per_batch: Option<usize>,

    /// Override the maximum number of simultaneous mutations from the wild type.
    #[arg(long = "max-mutations", value_name = "INT")]
    pub max_mutations: Option<usize>,

    /// Override the stability threshold (kcal/mol) relative to the wild type.
    #[arg(long, value_name = "FLOAT")]
    pub stability_threshold: Option<f64>,

    /// Solve the immutable sites of every state once before the search starts.
    #[arg(long)]
    pub precompute_flexible: bool,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S search.num-sequences=5
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}
