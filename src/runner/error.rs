//! Error types for the runner module.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised during command execution.
#[derive(Debug, Error, Diagnostic)]
pub enum RunnerError {
    /// The manifest file does not exist at the expected path.
    #[error("manifest '{}' not found", path.display())]
    #[diagnostic(
        code(cnobi::runner::manifest_not_found),
        help("pass the manifest with -f/--file or change directory with -C")
    )]
    ManifestNotFound {
        /// The path that was attempted.
        path: PathBuf,
    },

    /// A path given on the command line is not valid UTF-8.
    #[error("path '{}' is not valid UTF-8", path.display())]
    #[diagnostic(code(cnobi::runner::non_utf8_path))]
    NonUtf8Path {
        /// Offending path.
        path: PathBuf,
    },
}
