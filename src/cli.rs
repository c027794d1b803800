//! CLI argument parsing for the chokepoint demo binary

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Output format for completed windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table (default)
    Text,
    /// One pretty-printed JSON report per window
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "chokepoint")]
#[command(version)]
#[command(
    about = "Run a synthetic contended workload and survey bottleneck utilization per time window",
    long_about = None
)]
pub struct Cli {
    /// Number of worker threads competing for the bottlenecks
    #[arg(short = 't', long = "threads", value_name = "N", default_value = "4")]
    pub threads: usize,

    /// How long the workload runs, in milliseconds
    #[arg(short = 'd', long = "duration-ms", value_name = "MS", default_value = "2000")]
    pub duration_ms: u64,

    /// Window size in milliseconds (overrides the config file)
    #[arg(short = 'w', long = "window-ms", value_name = "MS")]
    pub window_ms: Option<u64>,

    /// Only survey bottlenecks whose id matches this regex
    #[arg(long = "allow", value_name = "REGEX")]
    pub allow: Option<String>,

    /// Never survey bottlenecks whose id matches this regex
    #[arg(long = "deny", value_name = "REGEX")]
    pub deny: Option<String>,

    /// Output format (text or json)
    #[arg(long = "format", value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// TOML survey configuration file
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable debug tracing output to stderr
    #[arg(long = "debug")]
    pub debug: bool,
}
