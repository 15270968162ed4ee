//! Test utilities shared by the cnobi test suites.
//!
//! This crate provides fake compiler scripts, manifest fixtures, named
//! pipes and guards for tests that mutate the process environment.

pub mod env_lock;
pub mod env_var_guard;
#[cfg(target_os = "linux")]
pub mod fifo;

pub use env_lock::EnvLock;
pub use env_var_guard::EnvVarGuard;

use camino::Utf8PathBuf;
use cnobi::manifest::ManifestInfo;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Create a fake compiler that appends its arguments to `args.log` next to
/// itself and exits with `exit_code`.
///
/// Returns the temporary directory and the path to the executable.
pub fn fake_compiler(exit_code: i32) -> (TempDir, PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("cc");
    let log = dir.path().join("args.log");
    let mut file = File::create(&path).expect("script");
    writeln!(
        file,
        "#!/bin/sh\necho \"$@\" >> '{}'\nexit {exit_code}",
        log.display()
    )
    .expect("write script");
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&path).expect("meta").permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&path, perms).expect("perms");
    }
    (dir, path)
}

/// Arguments recorded by a [`fake_compiler`], one invocation per line.
pub fn compiler_invocations(compiler: &Path) -> Vec<String> {
    let log = compiler.with_file_name("args.log");
    fs::read_to_string(log)
        .map(|text| text.lines().map(str::to_owned).collect())
        .unwrap_or_default()
}

/// Serialise `manifest` as JSON to `dir/name`.
pub fn write_manifest(dir: &Path, name: &str, manifest: &ManifestInfo) -> Utf8PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("manifest dir");
    }
    fs::write(
        &path,
        serde_json::to_string_pretty(manifest).expect("serialise manifest"),
    )
    .expect("write manifest");
    Utf8PathBuf::from_path_buf(path).expect("utf8 manifest path")
}
