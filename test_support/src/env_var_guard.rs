//! Scoped environment variable overrides.
//!
//! `std::env::set_var` and `remove_var` are `unsafe` in Rust 2024. Take an
//! [`EnvLock`](crate::EnvLock) first; the guard restores the previous value
//! when dropped.
//!
//! ```rust,ignore
//! let _lock = EnvLock::acquire();
//! let _cc = EnvVarGuard::set(cnobi_env::COMPILER_ENV, "clang -O0");
//! ```

use std::ffi::{OsStr, OsString};

/// Restores one variable to its prior value on drop.
#[derive(Debug)]
pub struct EnvVarGuard {
    name: &'static str,
    prev: Option<OsString>,
}

impl EnvVarGuard {
    /// Set `name` to `value`.
    #[must_use]
    pub fn set(name: &'static str, value: impl AsRef<OsStr>) -> Self {
        let prev = std::env::var_os(name);
        // SAFETY: callers hold `EnvLock`.
        unsafe { std::env::set_var(name, value) };
        Self { name, prev }
    }

    /// Remove `name`.
    #[must_use]
    pub fn remove(name: &'static str) -> Self {
        let prev = std::env::var_os(name);
        // SAFETY: callers hold `EnvLock`.
        unsafe { std::env::remove_var(name) };
        Self { name, prev }
    }
}

impl Drop for EnvVarGuard {
    fn drop(&mut self) {
        // SAFETY: the lock is still held while the guard drops.
        unsafe {
            match &self.prev {
                Some(value) => std::env::set_var(self.name, value),
                None => std::env::remove_var(self.name),
            }
        }
    }
}
