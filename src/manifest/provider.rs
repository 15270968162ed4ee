//! Sources of [`ManifestInfo`] values.
//!
//! The loader never cares how a manifest was produced. The native provider
//! compiles and loads a C module; the providers here serve manifests from
//! memory or from serialised JSON, which keeps loader tests hermetic.

use std::collections::HashMap;
use std::fs;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use miette::Diagnostic;
use thiserror::Error;

use super::ManifestInfo;

/// Failures while producing a [`ManifestInfo`].
#[derive(Debug, Error, Diagnostic)]
pub enum ProviderError {
    /// The compiler ran but reported failure.
    #[error("couldn't compile {manifest}: compiler exited with {status}")]
    #[diagnostic(
        code(cnobi::provider::compile),
        help("run the compiler by hand to see its diagnostics")
    )]
    Compile {
        /// Manifest source that failed to build.
        manifest: Utf8PathBuf,
        /// Exit status as reported by the OS.
        status: String,
    },

    /// The compiler could not be started.
    #[error("failed to run compiler '{program}'")]
    #[diagnostic(
        code(cnobi::provider::compiler_spawn),
        help("set CNOBI_CC to a working C compiler")
    )]
    CompilerSpawn {
        /// Program that was invoked.
        program: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The compiler command was empty or could not be split.
    #[error("invalid compiler command '{command}'")]
    #[diagnostic(code(cnobi::provider::compiler_command))]
    CompilerCommand {
        /// Raw command text.
        command: String,
    },

    /// The compiled artifact could not be loaded.
    #[error("dlopen failed for {artifact}")]
    #[diagnostic(code(cnobi::provider::load))]
    Load {
        /// Path of the shared library.
        artifact: Utf8PathBuf,
        /// Loader error.
        #[source]
        source: libloading::Error,
    },

    /// The artifact does not export the manifest symbol.
    #[error("symbol '{symbol}' not found in {artifact}")]
    #[diagnostic(
        code(cnobi::provider::missing_symbol),
        help("define the manifest with the MANIFEST macro")
    )]
    MissingSymbol {
        /// Path of the shared library.
        artifact: Utf8PathBuf,
        /// Symbol that was looked up.
        symbol: String,
        /// Loader error.
        #[source]
        source: libloading::Error,
    },

    /// The exported data violates the manifest ABI.
    #[error("malformed manifest in {artifact}: {reason}")]
    #[diagnostic(code(cnobi::provider::malformed))]
    Malformed {
        /// Path of the shared library.
        artifact: Utf8PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// A file could not be read or inspected.
    #[error("failed to read {path}")]
    #[diagnostic(code(cnobi::provider::read))]
    Read {
        /// Offending path.
        path: Utf8PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A JSON manifest did not deserialise.
    #[error("invalid JSON manifest {path}")]
    #[diagnostic(code(cnobi::provider::json))]
    Json {
        /// Offending path.
        path: Utf8PathBuf,
        /// Parser error.
        #[source]
        source: serde_json::Error,
    },

    /// No manifest is registered for the path.
    #[error("no manifest registered for {path}")]
    #[diagnostic(code(cnobi::provider::not_found))]
    NotFound {
        /// Requested path.
        path: Utf8PathBuf,
    },

    /// This platform cannot load native manifests.
    #[error("native manifests are not supported on this platform")]
    #[diagnostic(code(cnobi::provider::unsupported))]
    Unsupported,
}

/// Produces the declarative description of a manifest source.
pub trait ManifestProvider {
    /// Build the [`ManifestInfo`] for `source`.
    ///
    /// # Errors
    ///
    /// Returns a [`ProviderError`] describing the build, linkage or read
    /// failure.
    fn provide(&self, source: &Utf8Path) -> Result<ManifestInfo, ProviderError>;
}

impl<P: ManifestProvider + ?Sized> ManifestProvider for &P {
    fn provide(&self, source: &Utf8Path) -> Result<ManifestInfo, ProviderError> {
        (**self).provide(source)
    }
}

impl<P: ManifestProvider + ?Sized> ManifestProvider for Box<P> {
    fn provide(&self, source: &Utf8Path) -> Result<ManifestInfo, ProviderError> {
        (**self).provide(source)
    }
}

/// Serves manifests constructed in memory, keyed by source path.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use cnobi::manifest::{ManifestInfo, ManifestProvider, StaticProvider};
///
/// let provider = StaticProvider::new().with_manifest("build.c", ManifestInfo::new());
/// assert!(provider.provide(Utf8Path::new("build.c")).is_ok());
/// assert!(provider.provide(Utf8Path::new("other.c")).is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct StaticProvider {
    manifests: HashMap<Utf8PathBuf, ManifestInfo>,
}

impl StaticProvider {
    /// An empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `manifest` under `path`, replacing any earlier entry.
    pub fn insert(&mut self, path: impl Into<Utf8PathBuf>, manifest: ManifestInfo) {
        self.manifests.insert(path.into(), manifest);
    }

    /// Builder form of [`StaticProvider::insert`].
    #[must_use]
    pub fn with_manifest(mut self, path: impl Into<Utf8PathBuf>, manifest: ManifestInfo) -> Self {
        self.insert(path, manifest);
        self
    }
}

impl ManifestProvider for StaticProvider {
    fn provide(&self, source: &Utf8Path) -> Result<ManifestInfo, ProviderError> {
        self.manifests
            .get(source)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound {
                path: source.to_path_buf(),
            })
    }
}

/// Reads manifests serialised as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonProvider;

impl ManifestProvider for JsonProvider {
    fn provide(&self, source: &Utf8Path) -> Result<ManifestInfo, ProviderError> {
        let text = fs::read_to_string(source).map_err(|err| ProviderError::Read {
            path: source.to_path_buf(),
            source: err,
        })?;
        serde_json::from_str(&text).map_err(|err| ProviderError::Json {
            path: source.to_path_buf(),
            source: err,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::EdgeInfo;
    use rstest::rstest;
    use tempfile::tempdir;

    #[rstest]
    fn json_provider_reads_file() {
        let dir = tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("build.json")).expect("utf8");
        let manifest = ManifestInfo::new().with_edge(EdgeInfo::new("phony").with_output("all"));
        fs::write(&path, serde_json::to_string(&manifest).expect("serialise")).expect("write");
        assert_eq!(JsonProvider.provide(&path).expect("provide"), manifest);
    }

    #[rstest]
    fn json_provider_reports_missing_file() {
        let err = JsonProvider
            .provide(Utf8Path::new("/nonexistent/build.json"))
            .expect_err("missing");
        assert!(matches!(err, ProviderError::Read { .. }));
    }

    #[rstest]
    fn json_provider_reports_bad_json() {
        let dir = tempdir().expect("tempdir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("build.json")).expect("utf8");
        fs::write(&path, "{\"edges\": 3}").expect("write");
        let err = JsonProvider.provide(&path).expect_err("bad json");
        assert!(matches!(err, ProviderError::Json { .. }));
    }
}
