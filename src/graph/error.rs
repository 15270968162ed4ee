//! Errors raised when a graph mutation would break a store invariant.

use miette::Diagnostic;
use thiserror::Error;

/// Invariant violations reported by [`State`](super::State) mutators.
#[derive(Debug, Error, Diagnostic, PartialEq, Eq)]
pub enum GraphError {
    /// A second edge tried to claim an output that already has a generator.
    #[error("multiple rules generate {path}")]
    #[diagnostic(
        code(cnobi::graph::multiple_rules_generate),
        help("each output may be produced by exactly one build statement")
    )]
    MultipleRulesGenerate {
        /// Canonical path of the contested output.
        path: String,
    },

    /// A default target names a path no edge or input mentions.
    #[error("unknown target '{path}'")]
    #[diagnostic(code(cnobi::graph::unknown_target))]
    UnknownTarget {
        /// Canonical path of the requested target.
        path: String,
    },

    /// A default target evaluated to the empty string.
    #[error("empty path given as default target")]
    #[diagnostic(code(cnobi::graph::empty_default))]
    EmptyDefault,

    /// A pool of this name already exists.
    #[error("duplicate pool '{name}'")]
    #[diagnostic(code(cnobi::graph::duplicate_pool))]
    DuplicatePool {
        /// Pool name.
        name: String,
    },

    /// Only the most recently added edge may be discarded.
    #[error("edge {index} is not the most recently added edge")]
    #[diagnostic(code(cnobi::graph::edge_not_last))]
    EdgeNotLast {
        /// Index of the edge the caller tried to discard.
        index: usize,
    },

    /// The id does not name an edge of this store.
    #[error("no edge with index {index}")]
    #[diagnostic(code(cnobi::graph::unknown_edge))]
    UnknownEdge {
        /// Offending index.
        index: usize,
    },
}
