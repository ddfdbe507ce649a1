//! CLI command definitions and subcommands

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// projgen - generate a project from a one-line idea
#[derive(Debug, Parser)]
#[command(
    name = "projgen",
    about = "Plan and generate a whole project from an idea, one rate-limited LLM call at a time",
    version = env!("GIT_DESCRIBE"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute (defaults to an interactive `generate`)
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Plan and write a project
    Generate {
        /// Project idea (prompted for when omitted)
        idea: Option<String>,

        /// Parent directory for the generated project
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,

        /// Skip the confirmation after the plan is shown
        #[arg(short, long)]
        yes: bool,
    },

    /// Print the file plan for an idea without generating anything
    Plan {
        /// Project idea (prompted for when omitted)
        idea: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

/// Output format for commands that print data
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Path of the log file written by `setup_logging`
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("projgen")
        .join("logs")
        .join("projgen.log")
}
