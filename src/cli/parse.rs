//! CLI parse: clap types for Ambit. No behavior; definitions only.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Ambit CLI - Diagnostics for managed executors and propagated context
#[derive(Parser)]
#[command(name = "ambit")]
#[command(about = "Inspect wire captures and check managed resource configuration")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Workspace root directory
    #[arg(long, global = true, default_value = ".")]
    pub workspace: PathBuf,

    /// Configuration file path (overrides default config loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging (default: off)
    #[arg(long, global = true, default_value = "false")]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error, off)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Log format (json, text)
    #[arg(long, global = true)]
    pub log_format: Option<String>,

    /// Log output (stdout, stderr, file)
    #[arg(long, global = true)]
    pub log_output: Option<String>,

    /// Log file path (if output is "file")
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Decode a captured context stream and list its records
    Inspect {
        /// File holding the raw propagated bytes
        capture: PathBuf,
        /// Output format (text or json)
        #[arg(long, default_value = "text")]
        format: String,
        /// Payload bytes shown per record
        #[arg(long, default_value = "16")]
        preview_bytes: usize,
    },
    /// Load and validate configuration, then show each resource's context policies
    CheckConfig {
        /// Output format (text, json, or toml for the merged configuration)
        #[arg(long, default_value = "text")]
        format: String,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Inspect { .. } => "inspect",
            Commands::CheckConfig { .. } => "check-config",
        }
    }
}
