//! Client side of the GNU make jobserver protocol.
//!
//! A coordinating parent advertises a shared pool of job tokens through
//! `MAKEFLAGS`. Each token is one byte held in a pipe or named FIFO. Every
//! client also owns one implicit slot that never touches the channel.
//!
//! [`Config::parse`] decodes the `MAKEFLAGS` value and [`create`] builds a
//! [`Client`] for it. Clients never block: a scheduler polls
//! [`Client::try_acquire`] from its event loop and hands slots back with
//! [`Client::release`] when a job finishes.

use std::ffi::OsString;
use std::fmt;
use std::str::FromStr;

use itertools::Itertools;
use tracing::debug;

mod error;
#[cfg(unix)]
pub mod posix;

pub use error::JobserverError;

/// One job token.
///
/// Slots are deliberately not `Clone`: each one must be released at most
/// once.
#[derive(Debug, PartialEq, Eq, Default)]
#[must_use]
pub enum Slot {
    /// No token was available.
    #[default]
    Invalid,
    /// The token every client owns without asking the coordinator.
    Implicit,
    /// A token read from the shared channel, carrying the byte that was read.
    Explicit(u8),
}

impl Slot {
    /// Whether this slot grants permission to run a job.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !matches!(self, Self::Invalid)
    }

    /// Whether this is the client's own implicit slot.
    #[must_use]
    pub const fn is_implicit(&self) -> bool {
        matches!(self, Self::Implicit)
    }

    /// Whether this slot came from the shared channel.
    #[must_use]
    pub const fn is_explicit(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }

    /// Byte to write back when releasing an explicit slot.
    #[must_use]
    pub const fn explicit_value(&self) -> Option<u8> {
        match self {
            Self::Explicit(value) => Some(*value),
            Self::Invalid | Self::Implicit => None,
        }
    }
}

/// How the coordinator shares its tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// No jobserver.
    #[default]
    None,
    /// An inherited pipe, `--jobserver-auth=R,W`.
    Pipe,
    /// A named FIFO, `--jobserver-auth=fifo:PATH`.
    PosixFifo,
    /// A named Win32 semaphore, `--jobserver-auth=NAME`.
    Semaphore,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum System {
    All,
    Posix,
    Windows,
}

impl System {
    const fn is_native(self) -> bool {
        match self {
            Self::All => true,
            Self::Posix => cfg!(not(windows)),
            Self::Windows => cfg!(windows),
        }
    }
}

const MODE_TABLE: [(&str, Mode, System); 6] = [
    ("none", Mode::None, System::All),
    ("pipe", Mode::Pipe, System::Posix),
    ("fifo", Mode::PosixFifo, System::Posix),
    ("sem", Mode::Semaphore, System::Windows),
    ("0", Mode::None, System::All),
    ("1", Mode::DEFAULT, System::All),
];

impl Mode {
    /// Mode selected by the `1` alias on this host.
    pub const DEFAULT: Self = if cfg!(windows) {
        Self::Semaphore
    } else {
        Self::Pipe
    };

    /// Every accepted mode name, joined by `separator`.
    ///
    /// ```
    /// use cnobi::jobserver::Mode;
    ///
    /// assert_eq!(Mode::valid_modes(" "), "none pipe fifo sem 0 1");
    /// ```
    #[must_use]
    pub fn valid_modes(separator: &str) -> String {
        MODE_TABLE.iter().map(|(name, _, _)| name).join(separator)
    }

    /// Mode names usable on this host, joined by `separator`.
    #[must_use]
    pub fn valid_native_modes(separator: &str) -> String {
        MODE_TABLE
            .iter()
            .filter(|(_, _, system)| system.is_native())
            .map(|(name, _, _)| name)
            .join(separator)
    }

    /// Whether a client can be built for this mode on this host.
    #[must_use]
    pub fn is_native(self) -> bool {
        MODE_TABLE
            .iter()
            .any(|(_, mode, system)| *mode == self && system.is_native())
    }

    const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pipe => "pipe",
            Self::PosixFifo => "fifo",
            Self::Semaphore => "sem",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = JobserverError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        MODE_TABLE
            .iter()
            .find(|(candidate, _, _)| *candidate == name)
            .map(|(_, mode, _)| *mode)
            .ok_or_else(|| JobserverError::UnknownMode {
                name: name.to_owned(),
            })
    }
}

/// Jobserver settings decoded from `MAKEFLAGS`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Channel kind.
    pub mode: Mode,
    /// FIFO path or semaphore name.
    pub path: String,
    /// Inherited read descriptor for [`Mode::Pipe`].
    pub read_fd: i32,
    /// Inherited write descriptor for [`Mode::Pipe`].
    pub write_fd: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::None,
            path: String::new(),
            read_fd: -1,
            write_fd: -1,
        }
    }
}

const AUTH_PREFIX: &str = "--jobserver-auth=";
const LEGACY_FDS_PREFIX: &str = "--jobserver-fds=";
const FIFO_PREFIX: &str = "fifo:";

/// Scan an optionally signed decimal integer, skipping leading whitespace.
fn scan_int(text: &str) -> Option<(i32, &str)> {
    let text = text.trim_start();
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let digits = unsigned
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(unsigned.len());
    if digits == 0 {
        return None;
    }
    let end = text.len() - unsigned.len() + digits;
    let (number, rest) = text.split_at(end);
    Some((number.parse().ok()?, rest))
}

/// Parse an `R,W` descriptor pair. Trailing text after `W` is ignored.
fn fd_pair(value: &str) -> Option<(i32, i32)> {
    let (read_fd, rest) = scan_int(value)?;
    let (write_fd, _) = scan_int(rest.strip_prefix(',')?)?;
    Some((read_fd, write_fd))
}

impl Config {
    /// Whether a jobserver was advertised.
    #[must_use]
    pub fn has_mode(&self) -> bool {
        self.mode != Mode::None
    }

    /// Decode a `MAKEFLAGS` value.
    ///
    /// Arguments are split on spaces and tabs. When the first argument is a
    /// bundle of single-letter flags containing `n` (a dry run), no
    /// jobserver is used. Otherwise the last `--jobserver-auth=` or
    /// `--jobserver-fds=` argument wins.
    ///
    /// ```
    /// use cnobi::jobserver::{Config, Mode};
    ///
    /// let config = Config::parse(" -j4 --jobserver-auth=fifo:/tmp/jobs").unwrap();
    /// assert_eq!(config.mode, Mode::PosixFifo);
    /// assert_eq!(config.path, "/tmp/jobs");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`JobserverError::InvalidFdPair`] when `--jobserver-fds=`
    /// does not carry an `R,W` pair.
    pub fn parse(makeflags: &str) -> Result<Self, JobserverError> {
        let mut config = Self::default();
        let mut args = makeflags
            .split([' ', '\t'])
            .filter(|arg| !arg.is_empty())
            .peekable();

        if args
            .peek()
            .is_some_and(|first| !first.starts_with('-') && first.contains('n'))
        {
            debug!("MAKEFLAGS requests a dry run; ignoring jobserver");
            return Ok(config);
        }

        for arg in args {
            if let Some(value) = arg.strip_prefix(AUTH_PREFIX) {
                config.apply_auth(value);
            } else if let Some(value) = arg.strip_prefix(LEGACY_FDS_PREFIX) {
                let (read_fd, write_fd) =
                    fd_pair(value).ok_or_else(|| JobserverError::InvalidFdPair {
                        pair: value.to_owned(),
                    })?;
                config.mode = Mode::Pipe;
                config.read_fd = read_fd;
                config.write_fd = write_fd;
            }
        }
        Ok(config)
    }

    fn apply_auth(&mut self, value: &str) {
        if let Some((read_fd, write_fd)) = fd_pair(value) {
            self.read_fd = read_fd;
            self.write_fd = write_fd;
            self.mode = if read_fd < 0 || write_fd < 0 {
                Mode::None
            } else {
                Mode::Pipe
            };
        } else if let Some(path) = value.strip_prefix(FIFO_PREFIX) {
            self.mode = Mode::PosixFifo;
            path.clone_into(&mut self.path);
        } else {
            self.mode = Mode::Semaphore;
            value.clone_into(&mut self.path);
        }
    }

    /// Like [`Config::parse`], but also reject modes this host cannot use.
    ///
    /// # Errors
    ///
    /// Returns the [`Config::parse`] errors, or the platform error for a
    /// mode with no native client.
    pub fn parse_native(makeflags: &str) -> Result<Self, JobserverError> {
        let config = Self::parse(makeflags)?;
        if cfg!(windows) {
            match config.mode {
                Mode::PosixFifo => return Err(JobserverError::FifoUnsupported),
                Mode::Pipe => return Err(JobserverError::PipeUnsupported),
                Mode::None | Mode::Semaphore => {}
            }
        } else if config.mode == Mode::Semaphore {
            return Err(JobserverError::SemaphoreUnsupported);
        }
        Ok(config)
    }

    /// Read `MAKEFLAGS` from the process environment.
    ///
    /// # Errors
    ///
    /// See [`Config::parse_native`].
    pub fn from_env() -> Result<Self, JobserverError> {
        Self::from_env_with(|key| std::env::var_os(key))
    }

    /// Read `MAKEFLAGS` through `read_env`.
    ///
    /// An unset variable yields the default configuration.
    ///
    /// # Errors
    ///
    /// See [`Config::parse_native`].
    pub fn from_env_with<F>(mut read_env: F) -> Result<Self, JobserverError>
    where
        F: FnMut(&str) -> Option<OsString>,
    {
        read_env(cnobi_env::MAKEFLAGS_ENV).map_or_else(
            || Ok(Self::default()),
            |value| Self::parse_native(&value.to_string_lossy()),
        )
    }
}

/// A jobserver client owned by a single scheduling thread.
pub trait Client {
    /// Take a slot without blocking.
    ///
    /// The implicit slot is handed out first, whenever it is free. After
    /// that each call makes one non-blocking read from the channel and
    /// returns [`Slot::Invalid`] when no token is waiting.
    fn try_acquire(&mut self) -> Slot;

    /// Give a slot back.
    ///
    /// Invalid slots are ignored. Explicit slots are written back to the
    /// channel on a best-effort basis.
    ///
    /// # Errors
    ///
    /// Returns [`JobserverError::ImplicitDoubleRelease`] when the implicit
    /// slot is already free.
    fn release(&mut self, slot: Slot) -> Result<(), JobserverError>;
}

impl<C: Client + ?Sized> Client for Box<C> {
    fn try_acquire(&mut self) -> Slot {
        (**self).try_acquire()
    }

    fn release(&mut self, slot: Slot) -> Result<(), JobserverError> {
        (**self).release(slot)
    }
}

/// Build the native client for `config`.
///
/// # Errors
///
/// Returns [`JobserverError::UnsupportedMode`] for [`Mode::None`] or a mode
/// with no client on this host, or the client's own construction error.
pub fn create(config: &Config) -> Result<Box<dyn Client>, JobserverError> {
    #[cfg(unix)]
    {
        let client = posix::PosixClient::new(config)?;
        debug!(mode = %config.mode, "connected to jobserver");
        Ok(Box::new(client))
    }
    #[cfg(not(unix))]
    {
        Err(JobserverError::UnsupportedMode { mode: config.mode })
    }
}

#[cfg(test)]
mod tests;
