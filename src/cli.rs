//! Command-line argument parsing.
//!
//! Defines the CLI structure using clap derive macros.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Chronicle-RS: narrative question answering over a historical banking corpus.
///
/// Serves the async job API, or validates the corpus artifacts offline.
#[derive(Parser, Debug)]
#[command(name = "chronicle-rs")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Directory containing the index artifacts.
    ///
    /// Defaults to `CORPUS_DATA_DIR` or `./data`.
    #[arg(short, long, env = "CORPUS_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP query API.
    ///
    /// Loads the artifacts, initializes the LLM client (fatal without an
    /// API key), and serves until ctrl-c.
    #[command(after_help = r"Examples:
  chronicle-rs serve                         # Serve on 127.0.0.1:8080
  chronicle-rs serve --port 9090             # Custom port
  chronicle-rs --data-dir ./corpus serve     # Custom artifact directory
")]
    Serve {
        /// Host to bind.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind.
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },

    /// Load and validate the artifacts, then print corpus statistics.
    Check,

    /// Write the default prompt templates to a directory for editing.
    Prompts {
        /// Target directory; defaults to `~/.config/chronicle-rs/prompts`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}
