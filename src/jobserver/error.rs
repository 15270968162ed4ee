//! Jobserver protocol failures.

use std::io;

use miette::Diagnostic;
use thiserror::Error;

use super::Mode;

/// Why a jobserver configuration or client could not be used.
#[derive(Debug, Error, Diagnostic)]
pub enum JobserverError {
    /// `--jobserver-fds=` did not carry an `R,W` pair.
    #[error("Invalid file descriptor pair [{pair}]")]
    #[diagnostic(code(cnobi::jobserver::invalid_fd_pair))]
    InvalidFdPair {
        /// Offending option value.
        pair: String,
    },

    /// A mode name that is not in the mode table.
    #[error("unknown jobserver mode '{name}'")]
    #[diagnostic(
        code(cnobi::jobserver::unknown_mode),
        help("valid modes are: none, pipe, fifo, sem, 0, 1")
    )]
    UnknownMode {
        /// Requested name.
        name: String,
    },

    /// Semaphores were requested on a POSIX host.
    #[error("Semaphore mode is only available on Windows!")]
    #[diagnostic(code(cnobi::jobserver::semaphore_unsupported))]
    SemaphoreUnsupported,

    /// A FIFO was requested on Windows.
    #[error("FIFO mode is not available on Windows!")]
    #[diagnostic(code(cnobi::jobserver::fifo_unsupported))]
    FifoUnsupported,

    /// Inherited descriptors were requested on Windows.
    #[error("File-descriptor based authentication is not available on Windows!")]
    #[diagnostic(code(cnobi::jobserver::pipe_unsupported))]
    PipeUnsupported,

    /// The inherited descriptors are not both pipes.
    #[error("Invalid file descriptors")]
    #[diagnostic(
        code(cnobi::jobserver::invalid_descriptors),
        help("the parent make may not have marked this command as recursive (+)")
    )]
    InvalidDescriptors,

    /// `dup` of the read end failed.
    #[error("Could not duplicate read descriptor")]
    #[diagnostic(code(cnobi::jobserver::dup_read))]
    DupRead {
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// `dup` of the write end failed.
    #[error("Could not duplicate write descriptor")]
    #[diagnostic(code(cnobi::jobserver::dup_write))]
    DupWrite {
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// `--jobserver-auth=fifo:` with nothing after the colon.
    #[error("Empty fifo path")]
    #[diagnostic(code(cnobi::jobserver::empty_fifo_path))]
    EmptyFifoPath,

    /// The FIFO could not be opened for reading.
    #[error("Error opening fifo for reading: {source}")]
    #[diagnostic(code(cnobi::jobserver::fifo_read))]
    FifoOpenRead {
        /// FIFO path.
        path: String,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// The FIFO could not be opened for writing.
    #[error("Error opening fifo for writing: {source}")]
    #[diagnostic(code(cnobi::jobserver::fifo_write))]
    FifoOpenWrite {
        /// FIFO path.
        path: String,
        /// OS error.
        #[source]
        source: io::Error,
    },

    /// The path exists but is not a named pipe.
    #[error("Not a fifo path: {path}")]
    #[diagnostic(code(cnobi::jobserver::not_a_fifo))]
    NotAFifo {
        /// Offending path.
        path: String,
    },

    /// No client exists for this mode on this host.
    #[error("Unsupported jobserver mode")]
    #[diagnostic(code(cnobi::jobserver::unsupported_mode))]
    UnsupportedMode {
        /// Requested mode.
        mode: Mode,
    },

    /// The implicit slot was returned while already free.
    #[error("implicit jobserver slot released twice")]
    #[diagnostic(code(cnobi::jobserver::implicit_double_release))]
    ImplicitDoubleRelease,
}
