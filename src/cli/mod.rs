//! CLI module for jasmine-bridge
//!
//! ## Commands
//!
//! - `test <suite>` - Load and run the jasmine specs of a suite
//! - `tree <suite>` - Print the test tree without running it
//! - `install [dir]` - Install JavaScript dependencies
//!
//! A suite is a test directory optionally followed by options, for example
//! `spec|spec_regex=.*?_spec\.js;helpers=["helpers/*.js"]`.
//!
//! Commands return `CliResult<ExitCode>`; [`run`] prints errors and exits.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod commands;

use std::fmt;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};

// ============================================================================
// Exit codes and errors
// ============================================================================

/// Process exit status of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub i32);

impl ExitCode {
    pub const SUCCESS: ExitCode = ExitCode(0);
    /// Tests failed, or the suite could not be loaded or run
    pub const FAILURE: ExitCode = ExitCode(1);
}

/// A command failure, rendered once by [`run`].
#[derive(Debug)]
pub struct CliError {
    /// Printed to stderr unless empty
    pub message: String,
    pub exit_code: ExitCode,
}

impl CliError {
    pub fn new(message: impl Into<String>, exit_code: ExitCode) -> Self {
        Self {
            message: message.into(),
            exit_code,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self::new(message, ExitCode::FAILURE)
    }

    /// Exit with `exit_code` without printing anything more.
    pub fn silent(exit_code: ExitCode) -> Self {
        Self::new(String::new(), exit_code)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for CliError {}

pub type CliResult<T> = Result<T, CliError>;

const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Arguments
// ============================================================================

/// Run jasmine specs under node.js and report them as native tests
#[derive(Parser, Debug)]
#[command(name = "jasmine-bridge")]
#[command(version = VERSION)]
#[command(about = "Run jasmine specs under node.js and report them as native tests", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the specs of a suite
    Test {
        /// Test directory, optionally followed by |key=value;... options
        #[arg(value_name = "SUITE")]
        suite: String,
        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print the test tree of a suite without running it
    Tree {
        #[arg(value_name = "SUITE")]
        suite: String,
    },

    /// Install JavaScript dependencies
    Install {
        /// Package directory
        #[arg(value_name = "DIR", default_value = ".")]
        dir: PathBuf,
    },
}

// ============================================================================
// Entry point
// ============================================================================

/// Parse the command line, run the command and exit with its status.
///
/// Nothing else in the crate calls `process::exit`.
pub fn run() {
    let code = match execute(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            if !e.message.is_empty() {
                eprintln!("{}", e.message);
            }
            e.exit_code
        }
    };
    if code != ExitCode::SUCCESS {
        process::exit(code.0);
    }
}

fn execute(cli: Cli) -> CliResult<ExitCode> {
    match cli.command {
        Command::Test { suite, verbose } => commands::run_suite(&suite, verbose),
        Command::Tree { suite } => commands::print_tree(&suite),
        Command::Install { dir } => commands::install(&dir),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_test() {
        let cli = Cli::try_parse_from(["jasmine-bridge", "test", "spec|random=false", "-v"]).unwrap();
        if let Command::Test { suite, verbose } = cli.command {
            assert_eq!(suite, "spec|random=false");
            assert!(verbose);
        } else {
            panic!("Expected Test command");
        }
    }

    #[test]
    fn test_cli_parse_tree() {
        let cli = Cli::try_parse_from(["jasmine-bridge", "tree", "spec"]).unwrap();
        assert!(matches!(cli.command, Command::Tree { suite } if suite == "spec"));
    }

    #[test]
    fn test_cli_parse_install_default_dir() {
        let cli = Cli::try_parse_from(["jasmine-bridge", "install"]).unwrap();
        assert!(matches!(cli.command, Command::Install { dir } if dir == PathBuf::from(".")));
    }

    #[test]
    fn test_cli_requires_command() {
        assert!(Cli::try_parse_from(["jasmine-bridge"]).is_err());
        assert!(Cli::try_parse_from(["jasmine-bridge", "test"]).is_err());
    }

    #[test]
    fn test_silent_error() {
        let err = CliError::silent(ExitCode::FAILURE);
        assert_eq!(err.to_string(), "");
        assert_eq!(err.exit_code, ExitCode(1));
        assert_eq!(CliError::failure("boom").to_string(), "boom");
    }
}
