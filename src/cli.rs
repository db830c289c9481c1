use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "plexscan")]
#[command(author, version, about = "Partial Plex library scans driven by directory snapshots")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run cycles on an interval until interrupted
    Run,

    /// Run a single cycle for every root (or one root) and exit
    ///
    /// Exits with status 2 when any root's cycle was aborted.
    Once {
        /// Only run this root id
        #[arg(long)]
        root: Option<String>,

        /// Print cycle results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check the connection to the media server and list its sections
    Check,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Show how a local path maps to the server and which sections own it
    Map {
        /// Local path to translate
        #[arg(required = true)]
        path: String,
    },

    /// List retained snapshots for a root
    Snapshots {
        /// Root id (defaults to the normalized root path)
        #[arg(required = true)]
        root: String,
    },

    /// Display version information
    Version,
}
