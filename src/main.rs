//! lix CLI entry point
//!
//! Parses arguments and dispatches to the CLI module; exits non-zero on
//! failure after printing the error to stderr.

use lix::cli;

fn main() {
    if let Err(e) = cli::run() {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
