//! CLI argument parsing for exposure

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for recorded call trees
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Indented call tree (default)
    Text,
    /// JSON format for machine parsing
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "exposure")]
#[command(version)]
#[command(about = "Call-stack tracer replaying recorded runtime event logs", long_about = None)]
pub struct Cli {
    /// Replay log to trace (JSON)
    #[arg(value_name = "LOG")]
    pub log: PathBuf,

    /// Only record calls whose source path matches this regex (e.g., -i '^app/')
    #[arg(short = 'i', long = "include", value_name = "REGEX")]
    pub include: Option<String>,

    /// Tracer configuration file (JSON); command-line flags take precedence
    #[arg(long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Show the locals captured for each call
    #[arg(short = 'l', long = "locals")]
    pub locals: bool,

    /// Skip the locals snapshot taken when a call returns
    #[arg(long = "no-exit-locals")]
    pub no_exit_locals: bool,

    /// Replay only the first N events of the log
    #[arg(short = 'n', long = "limit", value_name = "N")]
    pub limit: Option<usize>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
