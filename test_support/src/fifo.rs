//! Named pipes for jobserver tests.

use rustix::fs::{CWD, FileType, Mode, mknodat};
use std::path::{Path, PathBuf};

/// Create a FIFO called `name` inside `dir`.
pub fn make_fifo(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    mknodat(CWD, &path, FileType::Fifo, Mode::from_raw_mode(0o600), 0).expect("mkfifo");
    path
}
