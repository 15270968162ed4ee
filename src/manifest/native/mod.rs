//! Compile-then-load manifest provider.
//!
//! A manifest source such as `build.c` is compiled into a shared library next
//! to it (`build.so`, `build.dylib` or `build.dll`), loaded, and its exported
//! `manifest` object decoded into owned data. The artifact is rebuilt when it
//! is missing or older than the source.

use std::env;
use std::ffi::OsString;
use std::fs;
use std::process::Command;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use cnobi_env::{COMPILER_ENV, DEFAULT_COMPILER};
use libloading::Library;
use tracing::{debug, info, warn};

use super::{ManifestInfo, ManifestProvider, ProviderError};

pub mod ffi;

use ffi::{MANIFEST_SYMBOL, RawManifest, decode_manifest};

/// Flags appended after the source to produce a loadable module.
const SHARED_FLAGS: [&str; 3] = ["-fPIC", "-shared", "-o"];

/// Loads manifests by compiling C sources into shared libraries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeModuleProvider {
    compiler: Vec<String>,
}

impl Default for NativeModuleProvider {
    fn default() -> Self {
        Self {
            compiler: vec![DEFAULT_COMPILER.to_owned()],
        }
    }
}

fn compiler_from_env_with<F>(mut read_env: F) -> Result<Vec<String>, ProviderError>
where
    F: FnMut(&str) -> Option<OsString>,
{
    let Some(raw) = read_env(COMPILER_ENV) else {
        return Ok(vec![DEFAULT_COMPILER.to_owned()]);
    };
    let command = raw.to_string_lossy().into_owned();
    match shlex::split(&command) {
        Some(words) if !words.is_empty() => Ok(words),
        _ => Err(ProviderError::CompilerCommand { command }),
    }
}

fn modified(path: &Utf8Path) -> Result<SystemTime, ProviderError> {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .map_err(|err| ProviderError::Read {
            path: path.to_path_buf(),
            source: err,
        })
}

impl NativeModuleProvider {
    /// Use `compiler` (program followed by extra arguments).
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::CompilerCommand`] when `compiler` is empty.
    pub fn new(compiler: Vec<String>) -> Result<Self, ProviderError> {
        if compiler.is_empty() {
            return Err(ProviderError::CompilerCommand {
                command: String::new(),
            });
        }
        Ok(Self { compiler })
    }

    /// Take the compiler from `CNOBI_CC`, falling back to `cc`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::CompilerCommand`] when the variable is empty
    /// or has unbalanced quotes.
    pub fn from_env() -> Result<Self, ProviderError> {
        compiler_from_env_with(|key| env::var_os(key)).map(|compiler| Self { compiler })
    }

    /// Compiler program and leading arguments.
    #[must_use]
    pub fn compiler(&self) -> &[String] {
        &self.compiler
    }

    /// Shared library path derived from `source`.
    ///
    /// ```
    /// use camino::Utf8Path;
    /// use cnobi::manifest::native::NativeModuleProvider;
    ///
    /// let artifact = NativeModuleProvider::artifact_path(Utf8Path::new("sub/build.c"));
    /// assert_eq!(artifact.parent(), Some(Utf8Path::new("sub")));
    /// assert_eq!(artifact.file_stem(), Some("build"));
    /// ```
    #[must_use]
    pub fn artifact_path(source: &Utf8Path) -> Utf8PathBuf {
        source.with_extension(env::consts::DLL_EXTENSION)
    }

    fn needs_compile(source: &Utf8Path, artifact: &Utf8Path) -> Result<bool, ProviderError> {
        if !artifact.exists() {
            return Ok(true);
        }
        Ok(modified(source)? > modified(artifact)?)
    }

    fn compile(&self, source: &Utf8Path, artifact: &Utf8Path) -> Result<(), ProviderError> {
        let Some((program, leading)) = self.compiler.split_first() else {
            return Err(ProviderError::CompilerCommand {
                command: String::new(),
            });
        };
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .arg(source.as_std_path())
            .args(SHARED_FLAGS)
            .arg(artifact.as_std_path());
        info!(compiler = %program, %source, %artifact, "compiling manifest");
        let status = cmd.status().map_err(|err| ProviderError::CompilerSpawn {
            program: program.clone(),
            source: err,
        })?;
        if status.success() {
            Ok(())
        } else {
            Err(ProviderError::Compile {
                manifest: source.to_path_buf(),
                status: status.to_string(),
            })
        }
    }

    fn load(artifact: &Utf8Path) -> Result<ManifestInfo, ProviderError> {
        // SAFETY: loading runs the module's initialisers. Manifest modules are
        // plain data produced from the project's own sources.
        let library = unsafe { Library::new(artifact.as_std_path()) }.map_err(|err| {
            ProviderError::Load {
                artifact: artifact.to_path_buf(),
                source: err,
            }
        })?;
        let manifest = {
            // SAFETY: the symbol is a data object of type
            // `struct cnobi_manifest`, read through a pointer of that layout.
            let symbol = unsafe { library.get::<*const RawManifest>(MANIFEST_SYMBOL.as_bytes()) }
                .map_err(|err| ProviderError::MissingSymbol {
                    artifact: artifact.to_path_buf(),
                    symbol: MANIFEST_SYMBOL.to_owned(),
                    source: err,
                })?;
            let raw: *const RawManifest = *symbol;
            if raw.is_null() {
                return Err(ProviderError::Malformed {
                    artifact: artifact.to_path_buf(),
                    reason: format!("symbol '{MANIFEST_SYMBOL}' is null"),
                });
            }
            // SAFETY: `raw` points into the loaded library, which stays open
            // until decoding has copied everything out.
            unsafe { decode_manifest(&*raw, artifact) }?
        };
        if let Err(err) = library.close() {
            warn!(%artifact, "failed to unload manifest module: {err}");
        }
        Ok(manifest)
    }
}

impl ManifestProvider for NativeModuleProvider {
    fn provide(&self, source: &Utf8Path) -> Result<ManifestInfo, ProviderError> {
        let artifact = Self::artifact_path(source);
        if Self::needs_compile(source, &artifact)? {
            self.compile(source, &artifact)?;
        } else {
            debug!(%artifact, "manifest module is up to date");
        }
        Self::load(&artifact)
    }
}
