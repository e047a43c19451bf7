//! CLI argument definitions using clap
//!
//! Commands:
//! - lix init <path> [--config <path>]
//! - lix query <path> <sql> [--params <json>]
//! - lix versions <path>
//! - lix serve [--config <path>] [--port <port>]

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// lix - change control for structured data
#[derive(Parser, Debug)]
#[command(name = "lix")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create a new lix file
    Init {
        /// Where to write the lix file
        path: PathBuf,

        /// Engine configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Execute SQL against a lix file
    Query {
        /// Lix file
        path: PathBuf,

        /// SQL; several statements may be separated by `;`
        sql: String,

        /// Positional parameters as a JSON array
        #[arg(long, default_value = "[]")]
        params: String,
    },

    /// List the versions of a lix file
    Versions {
        /// Lix file
        path: PathBuf,
    },

    /// Start the sync server
    Serve {
        /// Server configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Port, overriding the configuration
        #[arg(long)]
        port: Option<u16>,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
