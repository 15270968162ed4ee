//! Errors aborting a [`Loader`](super::Loader) pass.

use miette::Diagnostic;
use thiserror::Error;

use crate::graph::GraphError;
use crate::manifest::ProviderError;
use crate::version::VersionError;

/// Why a manifest failed to load.
///
/// The graph store may hold partial results after any of these; callers
/// should discard it.
#[derive(Debug, Error, Diagnostic)]
pub enum LoadError {
    /// The manifest could not be built, loaded or read.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Provider(#[from] ProviderError),

    /// A graph invariant rejected the manifest.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    /// The manifest needs a newer tool.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Version(#[from] VersionError),

    /// A pool was declared with a negative depth.
    #[error("pool {name} has invalid depth {depth}")]
    #[diagnostic(code(cnobi::loader::invalid_pool_depth))]
    InvalidPoolDepth {
        /// Pool name.
        name: String,
        /// Declared depth.
        depth: i32,
    },

    /// An edge names a pool that was never declared.
    #[error("unknown pool name '{name}'")]
    #[diagnostic(code(cnobi::loader::unknown_pool))]
    UnknownPool {
        /// Requested pool.
        name: String,
    },

    /// An edge names a rule that is neither declared nor inherited.
    #[error("unknown build rule '{name}'")]
    #[diagnostic(code(cnobi::loader::unknown_rule))]
    UnknownRule {
        /// Requested rule.
        name: String,
    },

    /// The edge's dyndep file is not among its inputs.
    #[error("dyndep '{path}' is not an input")]
    #[diagnostic(
        code(cnobi::loader::dyndep_not_input),
        help("list the dyndep file as an explicit, implicit or order-only input")
    )]
    DyndepNotInput {
        /// Canonical dyndep path.
        path: String,
    },

    /// An include or subninja evaluated to an empty path.
    #[error("empty {kind} path in {manifest}")]
    #[diagnostic(code(cnobi::loader::empty_nested_path))]
    EmptyNestedPath {
        /// `include` or `subninja`.
        kind: &'static str,
        /// Manifest declaring it.
        manifest: String,
    },

    /// Nested manifests include each other.
    #[error("manifest include cycle: {cycle}")]
    #[diagnostic(code(cnobi::loader::include_cycle))]
    IncludeCycle {
        /// Chain of manifests, first repeated at the end.
        cycle: String,
    },
}
