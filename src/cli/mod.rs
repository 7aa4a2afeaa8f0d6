//! CLI module for Klipp.

pub mod commands;
mod output;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Klipp - Semantic Video Clip Search
///
/// Searches a video library by meaning and extracts the exact clips that
/// answer a query. The name "Klipp" comes from the Norwegian word for "clip."
#[derive(Parser, Debug)]
#[command(name = "klipp")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the video library and extract matching clips
    Search {
        /// Search query
        query: String,

        /// Maximum number of videos to return
        #[arg(short, long)]
        top: Option<usize>,
    },

    /// Start the HTTP API server for integration with other systems
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Port to bind to
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,
}
