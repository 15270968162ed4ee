//! POSIX jobserver client over an inherited pipe or a named FIFO.

use std::os::fd::{AsFd, BorrowedFd, OwnedFd, RawFd};

use rustix::fs::{self, FileType, OFlags};
use rustix::io::{self, Errno};
use tracing::debug;

use super::{Client, Config, JobserverError, Mode, Slot};

/// Client holding private, non-blocking copies of the channel descriptors.
///
/// Both descriptors close when the client drops; the inherited originals
/// are never used after construction.
#[derive(Debug)]
pub struct PosixClient {
    has_implicit_slot: bool,
    read_fd: OwnedFd,
    write_fd: OwnedFd,
}

fn is_fifo(fd: BorrowedFd<'_>) -> bool {
    fs::fstat(fd).is_ok_and(|stat| FileType::from_raw_mode(stat.st_mode) == FileType::Fifo)
}

fn duplicate(fd: BorrowedFd<'_>) -> std::io::Result<OwnedFd> {
    let dup = io::fcntl_dupfd_cloexec(fd, 0)?;
    let flags = fs::fcntl_getfl(&dup)?;
    fs::fcntl_setfl(&dup, flags | OFlags::NONBLOCK)?;
    Ok(dup)
}

impl PosixClient {
    /// Connect to the channel described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`JobserverError::UnsupportedMode`] for anything but
    /// [`Mode::Pipe`] and [`Mode::PosixFifo`], or the error raised while
    /// validating and opening the channel.
    pub fn new(config: &Config) -> Result<Self, JobserverError> {
        match config.mode {
            Mode::Pipe => Self::from_pipe(config.read_fd, config.write_fd),
            Mode::PosixFifo => Self::from_fifo(&config.path),
            mode @ (Mode::None | Mode::Semaphore) => {
                Err(JobserverError::UnsupportedMode { mode })
            }
        }
    }

    fn from_pipe(read_fd: RawFd, write_fd: RawFd) -> Result<Self, JobserverError> {
        if read_fd < 0 || write_fd < 0 {
            return Err(JobserverError::InvalidDescriptors);
        }
        // SAFETY: the descriptors were advertised by the parent process and
        // are only borrowed for the duration of this call.
        let (read, write) =
            unsafe { (BorrowedFd::borrow_raw(read_fd), BorrowedFd::borrow_raw(write_fd)) };
        if !is_fifo(read) || !is_fifo(write) {
            return Err(JobserverError::InvalidDescriptors);
        }
        let read_fd = duplicate(read).map_err(|source| JobserverError::DupRead { source })?;
        let write_fd = duplicate(write).map_err(|source| JobserverError::DupWrite { source })?;
        Ok(Self::with_channel(read_fd, write_fd))
    }

    fn from_fifo(path: &str) -> Result<Self, JobserverError> {
        if path.is_empty() {
            return Err(JobserverError::EmptyFifoPath);
        }
        let read_fd = fs::open(
            path,
            OFlags::RDONLY | OFlags::NONBLOCK | OFlags::CLOEXEC,
            fs::Mode::empty(),
        )
        .map_err(|err| JobserverError::FifoOpenRead {
            path: path.to_owned(),
            source: err.into(),
        })?;
        if !is_fifo(read_fd.as_fd()) {
            return Err(JobserverError::NotAFifo {
                path: path.to_owned(),
            });
        }
        let write_fd = fs::open(
            path,
            OFlags::WRONLY | OFlags::NONBLOCK | OFlags::CLOEXEC,
            fs::Mode::empty(),
        )
        .map_err(|err| JobserverError::FifoOpenWrite {
            path: path.to_owned(),
            source: err.into(),
        })?;
        Ok(Self::with_channel(read_fd, write_fd))
    }

    const fn with_channel(read_fd: OwnedFd, write_fd: OwnedFd) -> Self {
        Self {
            has_implicit_slot: true,
            read_fd,
            write_fd,
        }
    }
}

impl Client for PosixClient {
    fn try_acquire(&mut self) -> Slot {
        if self.has_implicit_slot {
            self.has_implicit_slot = false;
            return Slot::Implicit;
        }
        let mut byte = [0_u8; 1];
        loop {
            match io::read(&self.read_fd, byte.as_mut_slice()) {
                Ok(1) => {
                    let [value] = byte;
                    return Slot::Explicit(value);
                }
                Err(Errno::INTR) => {}
                Ok(_) | Err(_) => return Slot::Invalid,
            }
        }
    }

    fn release(&mut self, slot: Slot) -> Result<(), JobserverError> {
        match slot {
            Slot::Invalid => {}
            Slot::Implicit => {
                if self.has_implicit_slot {
                    return Err(JobserverError::ImplicitDoubleRelease);
                }
                self.has_implicit_slot = true;
            }
            Slot::Explicit(value) => loop {
                match io::write(&self.write_fd, &[value]) {
                    Err(Errno::INTR) => {}
                    Err(err) => {
                        debug!(%err, "dropping jobserver token");
                        break;
                    }
                    Ok(_) => break,
                }
            },
        }
        Ok(())
    }
}
