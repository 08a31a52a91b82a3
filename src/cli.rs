//! CLI - Command Line Interface for reelseed
//!
//! Every operation is scriptable. All output is JSON-parseable.
//!
//! # Examples
//!
//! ```bash
//! # List torrents for a movie and the one that would be picked
//! reelseed sources tt0111161
//!
//! # Run the whole acquisition against the simulated swarm
//! reelseed prepare tt0111161 --simulate --lang fin
//!
//! # Show the effective configuration
//! reelseed config --json
//! ```

use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::io::IsTerminal;
use std::path::PathBuf;

use crate::models::{PreparedMovie, TaskEvent, TorrentCandidate};
use crate::stream::SetupError;

// =============================================================================
// Exit Codes
// =============================================================================

/// Exit codes for CLI operations (semantic for scripting)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// General error
    Error = 1,
    /// Invalid arguments
    InvalidArgs = 2,
    /// No torrent index could be reached
    NetworkError = 3,
    /// No torrent with seeders
    NoSeeds = 4,
    /// Engine at capacity or disabled
    Unavailable = 5,
    /// Acquisition failed after a torrent was chosen
    AcquireFailed = 6,
}

impl ExitCode {
    /// Exit code for a failed acquisition
    pub fn for_setup_error(err: &SetupError) -> Self {
        match err.code() {
            "torrent_no_seed" => ExitCode::NoSeeds,
            "torrent_max_instances" | "torrent_engine_disabled" => ExitCode::Unavailable,
            _ => ExitCode::AcquireFailed,
        }
    }
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> i32 {
        code as i32
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> std::process::ExitCode {
        std::process::ExitCode::from(code as u8)
    }
}

// =============================================================================
// Main CLI Structure
// =============================================================================

/// reelseed - stream-first movie acquisition over BitTorrent
#[derive(Parser, Debug)]
#[command(
    name = "reelseed",
    version,
    author = "Gorka & Hermes",
    about = "Stream-first movie acquisition over BitTorrent",
    long_about = "Picks a torrent for a movie, downloads the start of the movie file \
                  first and fetches subtitles matching the exact release.",
    after_help = "EXAMPLES:\n\
                  reelseed sources tt0111161              List torrents for a movie\n\
                  reelseed prepare tt0111161 --simulate   Acquire against the simulated swarm\n\
                  reelseed config --json                  Show the effective configuration"
)]
pub struct Cli {
    /// Output format as JSON (default for non-TTY)
    #[arg(long, short = 'j', global = true)]
    pub json: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging (debug level unless RUST_LOG is set)
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Check if JSON output should be used
    pub fn should_json(&self) -> bool {
        self.json || !std::io::stdout().is_terminal()
    }
}

// =============================================================================
// Subcommands
// =============================================================================

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List torrent candidates for a movie and the selected one
    #[command(visible_alias = "src")]
    Sources(SourcesCmd),

    /// Acquire a movie until it can be streamed
    #[command(visible_alias = "p")]
    Prepare(PrepareCmd),

    /// Show the effective configuration
    Config(ConfigCmd),
}

/// List torrent candidates for a movie
#[derive(Args, Debug)]
pub struct SourcesCmd {
    /// IMDB ID (e.g., tt0111161)
    #[arg(required = true)]
    pub imdb_id: String,
}

/// Acquire a movie
#[derive(Args, Debug)]
pub struct PrepareCmd {
    /// IMDB ID (e.g., tt0111161)
    #[arg(required = true)]
    pub imdb_id: String,

    /// Use the built-in simulated swarm
    #[arg(long)]
    pub simulate: bool,

    /// Preferred subtitle languages, comma-separated 3-letter codes (English is always added)
    #[arg(long, short = 'l')]
    pub lang: Option<String>,
}

impl PrepareCmd {
    /// Parse language codes into a vector
    pub fn languages(&self) -> Option<Vec<String>> {
        self.lang.as_ref().map(|l| {
            l.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
    }
}

/// Show the effective configuration
#[derive(Args, Debug)]
pub struct ConfigCmd {
    /// Print only the config file path
    #[arg(long)]
    pub path: bool,

    /// Write the effective configuration to the default config path
    #[arg(long, conflicts_with = "path")]
    pub init: bool,
}

// =============================================================================
// JSON Output Types
// =============================================================================

/// Generic JSON output wrapper with status
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonOutput<T: Serialize> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub exit_code: i32,
}

fn is_zero(n: &i32) -> bool {
    *n == 0
}

impl<T: Serialize> JsonOutput<T> {
    /// Create success output with data
    pub fn success(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            code: None,
            exit_code: 0,
        }
    }

    /// Create error output (no data)
    pub fn error_msg(msg: impl Into<String>, code: ExitCode) -> JsonOutput<()> {
        JsonOutput::<()> {
            data: None,
            error: Some(msg.into()),
            code: None,
            exit_code: code.into(),
        }
    }
}

/// `sources` response
#[derive(Debug, Serialize, Deserialize)]
pub struct SourcesResponse {
    pub imdb_id: String,
    pub candidates: Vec<TorrentCandidate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected: Option<TorrentCandidate>,
}

/// One line of `prepare --json` progress output
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressLine {
    Task(TaskEvent),
    MovieHash { hash: String },
    Subtitles { subtitles: Vec<String> },
}

/// `prepare` response
#[derive(Debug, Serialize)]
pub struct PrepareResponse {
    pub status: &'static str,
    #[serde(flatten)]
    pub movie: PreparedMovie,
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Output handler for consistent formatting
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

impl Output {
    pub fn new(cli: &Cli) -> Self {
        Self {
            json: cli.should_json(),
            quiet: cli.quiet,
        }
    }

    /// Print success data
    pub fn print<T: Serialize>(&self, data: T) -> anyhow::Result<()> {
        if self.json {
            let output = JsonOutput::success(data);
            println!("{}", serde_json::to_string_pretty(&output)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&data)?);
        }
        Ok(())
    }

    /// Print one compact JSON line (progress streams)
    pub fn print_line<T: Serialize>(&self, data: &T) -> anyhow::Result<()> {
        println!("{}", serde_json::to_string(data)?);
        Ok(())
    }

    /// Print error and return exit code
    pub fn error(&self, msg: impl Into<String>, code: ExitCode) -> ExitCode {
        let msg = msg.into();
        if self.json {
            let output = JsonOutput::<()>::error_msg(&msg, code);
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error: {}", msg);
        }
        code
    }

    /// Print an acquisition failure with its stable code
    pub fn setup_error(&self, err: &SetupError) -> ExitCode {
        let code = ExitCode::for_setup_error(err);
        if self.json {
            let mut output = JsonOutput::<()>::error_msg(err.to_string(), code);
            output.code = Some(err.code().to_string());
            if let Ok(json) = serde_json::to_string_pretty(&output) {
                eprintln!("{}", json);
            }
        } else if !self.quiet {
            eprintln!("Error [{}]: {}", err.code(), err);
        }
        code
    }

    /// Print info message (suppressed in quiet mode)
    pub fn info(&self, msg: impl std::fmt::Display) {
        if !self.quiet && !self.json {
            eprintln!("{}", msg);
        }
    }
}

// =============================================================================
// IMDB ID Validation
// =============================================================================

/// Validate IMDB ID format (tt followed by digits)
pub fn validate_imdb_id(id: &str) -> Result<&str, &'static str> {
    if id.starts_with("tt") && id.len() >= 9 && id[2..].chars().all(|c| c.is_ascii_digit()) {
        Ok(id)
    } else {
        Err("Invalid IMDB ID format (expected tt followed by 7+ digits)")
    }
}

// =============================================================================
// Tests
// =============================================================================
