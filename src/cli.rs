//! CLI argument definitions and command dispatch.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// StableCam - Persistent stable IDs for USB cameras across re-enumeration.
///
/// JSON Mode: Use --json or --format=json for machine-parseable output.
#[derive(Parser, Debug)]
#[command(name = "stablecam", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output format (text for humans, json for agents/scripts)
    #[arg(
        long,
        short = 'f',
        default_value = "text",
        global = true,
        env = "STABLECAM_FORMAT"
    )]
    pub format: OutputFormat,

    /// JSON mode: equivalent to --format=json
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output (-v for debug, -vv for trace)
    #[arg(long, short = 'v', global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (suppress non-essential output)
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Registry file path (defaults to ~/.stablecam/registry.json)
    #[arg(long, short = 'r', global = true, env = "STABLECAM_REGISTRY")]
    pub registry: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format selection.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text with optional color
    #[default]
    Text,
    /// JSON output for scripts and agents
    Json,
    /// Compact JSON (single line)
    JsonCompact,
}

impl Cli {
    /// Returns true if output should be JSON (--json or explicit --format=json).
    pub const fn use_json(&self) -> bool {
        self.json || matches!(self.format, OutputFormat::Json | OutputFormat::JsonCompact)
    }

    /// Returns true if output should be compact JSON.
    pub const fn use_compact_json(&self) -> bool {
        matches!(self.format, OutputFormat::JsonCompact)
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    // === Discovery & Registration ===
    /// Detect currently connected USB cameras
    Detect(DetectArgs),

    /// Register a detected camera and print its stable ID
    Register(RegisterArgs),

    // === Registry Queries ===
    /// List all registered cameras and their status
    List(ListArgs),

    /// Show details for one registered camera
    Show(ShowArgs),

    // === Monitoring ===
    /// Monitor connect/disconnect events until interrupted
    Monitor(MonitorArgs),

    // === Utilities ===
    /// Generate shell completions
    Completions(CompletionsArgs),
}

// === Argument Structs ===

#[derive(Parser, Debug)]
pub struct DetectArgs {}

#[derive(Parser, Debug)]
pub struct RegisterArgs {
    /// System index of the detected camera to register
    /// (as printed by `stablecam detect`)
    #[arg(long, short = 'i')]
    pub index: Option<u32>,

    /// Register every currently detected camera
    #[arg(long, short = 'a', conflicts_with = "index")]
    pub all: bool,
}

#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show extended device information
    #[arg(long, short = 'l')]
    pub long: bool,
}

#[derive(Parser, Debug)]
pub struct ShowArgs {
    /// Stable ID to look up (e.g., "stable-cam-001")
    pub stable_id: String,
}

#[derive(Parser, Debug)]
pub struct MonitorArgs {
    /// Poll interval in seconds
    #[arg(long, short = 'i', default_value = "2")]
    pub interval: u64,

    /// Register every detected camera before monitoring starts
    #[arg(long)]
    pub register_all: bool,

    /// Stop after this many seconds (runs until interrupted by default)
    #[arg(long, short = 'd')]
    pub duration: Option<u64>,
}

#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
