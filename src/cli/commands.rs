//! CLI command implementations
//!
//! Failures come back as [`CliError`]s carrying the rendered message.

use std::path::Path;

use miette::{Diagnostic, Report};

use crate::loader::Loader;
use crate::package_manager::PackageManagerRegistry;
use crate::reporter::ConsoleReporter;

use super::{CliError, CliResult, ExitCode};

/// Render a diagnostic the way miette does for fatal errors.
fn diagnostic_error<E>(error: E) -> CliError
where
    E: Diagnostic + Send + Sync + 'static,
{
    CliError::failure(format!("{:?}", Report::new(error)))
}

/// Load and run a suite; fails when any test failed or errored.
pub fn run_suite(suite: &str, verbose: bool) -> CliResult<ExitCode> {
    let mut tree = Loader::from_suite_name(suite)
        .and_then(|loader| loader.load())
        .map_err(diagnostic_error)?;

    let mut reporter = ConsoleReporter::new(verbose);
    let summary = tree.run(&mut reporter).map_err(diagnostic_error)?;

    if summary.was_successful() {
        Ok(ExitCode::SUCCESS)
    } else {
        // Summary already printed
        Err(CliError::silent(ExitCode::FAILURE))
    }
}

/// Print the test tree of a suite.
pub fn print_tree(suite: &str) -> CliResult<ExitCode> {
    let tree = Loader::from_suite_name(suite)
        .and_then(|loader| loader.read_tree())
        .map_err(diagnostic_error)?;
    print!("{}", tree.outline());
    Ok(ExitCode::SUCCESS)
}

/// Install the dependencies of the package in `dir`.
pub fn install(dir: &Path) -> CliResult<ExitCode> {
    let registry = PackageManagerRegistry::with_defaults(dir);
    let manager = registry
        .install_dependencies()
        .map_err(|e| CliError::failure(format!("Error: {}", e)))?;
    println!("dependencies installed with {}", manager);
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::loader::LoadError;

    #[test]
    fn test_diagnostic_error_includes_message() {
        let err = diagnostic_error(LoadError::InvalidOption("novalue".to_string()));
        assert_eq!(err.exit_code, ExitCode::FAILURE);
        assert!(err.message.contains("invalid option"));
        assert!(err.message.contains("novalue"));
    }

    #[test]
    fn test_run_suite_rejects_bad_options() {
        let err = run_suite("spec|novalue", false).unwrap_err();
        assert!(err.message.contains("novalue"));
    }

    #[test]
    fn test_install_outside_package() {
        let dir = tempfile::tempdir().unwrap();
        let err = install(dir.path()).unwrap_err();
        assert_eq!(err.message, "Error: no package manager available");
    }
}
