//! CLI module for lix
//!
//! Provides command-line interface for:
//! - init: Create a lix file
//! - query: Run SQL against a lix file, saving it back after writes
//! - versions: List versions
//! - serve: Run the sync server

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command};
pub use commands::{init, query, run, run_command, serve, versions};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};
