#![forbid(unsafe_code)]

//! Shared environment constants used across cnobi crates (library, tests, and
//! helpers).

/// Environment variable override for the C compiler used to build manifest
/// modules. The value is split with shell rules, so flags may be included.
///
/// # Examples
///
/// ```
/// use cnobi_env::COMPILER_ENV;
/// assert_eq!(COMPILER_ENV, "CNOBI_CC");
/// ```
pub const COMPILER_ENV: &str = "CNOBI_CC";

/// Compiler invoked when [`COMPILER_ENV`] is unset.
pub const DEFAULT_COMPILER: &str = "cc";

/// Variable through which a parent `make` (or compatible coordinator)
/// advertises its jobserver.
pub const MAKEFLAGS_ENV: &str = "MAKEFLAGS";
