//! Manifest compatibility version.
//!
//! A manifest may bind `ninja_required_version`. Only the major and minor
//! components are compared; anything after them is ignored, as is text that
//! does not start with digits.

use miette::Diagnostic;
use semver::Version;
use thiserror::Error;
use tracing::warn;

/// Version of the manifest semantics this tool implements.
pub const COMPAT_VERSION: Version = Version::new(1, 13, 0);

/// Reserved global binding that triggers the check.
pub const REQUIRED_VERSION_KEY: &str = "ninja_required_version";

/// The manifest needs a newer tool.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
#[error("cnobi version ({ours}) incompatible with build file ninja_required_version version ({required})")]
#[diagnostic(code(cnobi::version::incompatible), help("upgrade cnobi"))]
pub struct VersionError {
    /// Value bound in the manifest.
    pub required: String,
    /// This tool's compatibility version.
    pub ours: Version,
}

fn leading_number(text: &str) -> (u64, &str) {
    let end = text
        .char_indices()
        .find(|(_, ch)| !ch.is_ascii_digit())
        .map_or(text.len(), |(idx, _)| idx);
    let (digits, rest) = text.split_at(end);
    (digits.parse().unwrap_or(0), rest)
}

/// Parse `major[.minor[.patch]]` leniently; missing or garbled parts are 0.
///
/// ```
/// use cnobi::version::parse_lenient;
///
/// assert_eq!(parse_lenient("1.10.2.git").to_string(), "1.10.2");
/// assert_eq!(parse_lenient("1.7").to_string(), "1.7.0");
/// assert_eq!(parse_lenient("junk").to_string(), "0.0.0");
/// ```
#[must_use]
pub fn parse_lenient(text: &str) -> Version {
    let (major, rest) = leading_number(text);
    let (minor, rest) = rest
        .strip_prefix('.')
        .map_or((0, rest), leading_number);
    let (patch, _) = rest.strip_prefix('.').map_or((0, rest), leading_number);
    Version::new(major, minor, patch)
}

/// Compare a manifest's required version with [`COMPAT_VERSION`].
///
/// An older major version only logs a warning.
///
/// # Errors
///
/// Returns [`VersionError`] when the manifest needs a newer major, or the
/// same major with a newer minor.
pub fn check_required_version(required: &str) -> Result<(), VersionError> {
    let wanted = parse_lenient(required);
    let ours = COMPAT_VERSION;
    if wanted.major > ours.major || (wanted.major == ours.major && wanted.minor > ours.minor) {
        return Err(VersionError {
            required: required.to_owned(),
            ours,
        });
    }
    if wanted.major < ours.major {
        warn!(
            "cnobi version ({ours}) greater than build file ninja_required_version ({required}); \
             versions may be incompatible"
        );
    }
    Ok(())
}
