//! Integration tests for the `cnobi` binary using `assert_cmd`.
//!
//! These run the compiled binary against the JSON fixtures under
//! `tests/data` and check what each subcommand prints.

use anyhow::{Context, Result};
use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;

fn cnobi() -> Result<Command> {
    let mut cmd = Command::cargo_bin("cnobi").context("locate cnobi binary")?;
    cmd.env_remove("MAKEFLAGS").env_remove("CNOBI_CC");
    Ok(cmd)
}

fn project_dir() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/project"))
}

#[test]
fn check_is_the_default_command() -> Result<()> {
    cnobi()?
        .arg("-C")
        .arg(project_dir())
        .args(["-f", "build.json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("4 edges, 7 nodes, 3 pools"))
        .stdout(predicate::str::contains("default targets: all"));
    Ok(())
}

#[test]
fn targets_lists_rules() -> Result<()> {
    cnobi()?
        .arg("-C")
        .arg(project_dir())
        .args(["-f", "build.json", "targets"])
        .assert()
        .success()
        .stdout(predicate::str::contains("out/app: link\n"))
        .stdout(predicate::str::contains("out/lib.o: cc\n"));
    Ok(())
}

#[test]
fn commands_for_one_target() -> Result<()> {
    cnobi()?
        .arg("-C")
        .arg(project_dir())
        .args(["-f", "build.json", "commands", "out/app"])
        .assert()
        .success()
        .stdout(
            "cc -O2 -c src/main.c -o out/main.o\n\
             cc -O0 -c lib/lib.c -o out/lib.o\n\
             cc out/main.o out/lib.o -o out/app -lm\n",
        );
    Ok(())
}

#[test]
fn unknown_target_fails() -> Result<()> {
    cnobi()?
        .arg("-C")
        .arg(project_dir())
        .args(["-f", "build.json", "commands", "nope"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown target 'nope'"));
    Ok(())
}

#[test]
fn missing_manifest_fails() -> Result<()> {
    let temp = tempfile::tempdir().context("create temp dir")?;
    cnobi()?
        .current_dir(temp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("manifest 'build.c' not found"));
    Ok(())
}

#[test]
fn include_cycles_are_reported() -> Result<()> {
    cnobi()?
        .arg("-C")
        .arg(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data/cycle"))
        .args(["-f", "a.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("manifest include cycle"));
    Ok(())
}

#[test]
fn jobserver_without_makeflags() -> Result<()> {
    cnobi()?
        .arg("jobserver")
        .assert()
        .success()
        .stdout("mode: none\n");
    Ok(())
}

#[test]
fn jobserver_reports_fifo_path() -> Result<()> {
    cnobi()?
        .env("MAKEFLAGS", " -j8 --jobserver-auth=fifo:/tmp/cnobi-jobs")
        .arg("jobserver")
        .assert()
        .success()
        .stdout("mode: fifo\npath: /tmp/cnobi-jobs\n");
    Ok(())
}

#[test]
fn malformed_makeflags_fail() -> Result<()> {
    cnobi()?
        .env("MAKEFLAGS", "--jobserver-fds=10,")
        .arg("jobserver")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid file descriptor pair [10,]"));
    Ok(())
}

#[cfg(target_os = "linux")]
#[test]
fn jobserver_probe_counts_fifo_tokens() -> Result<()> {
    use rustix::fs::{Mode, OFlags, open};

    let temp = tempfile::tempdir().context("create temp dir")?;
    let fifo = test_support::fifo::make_fifo(temp.path(), "jobs");
    // Hold both ends open so the tokens stay buffered.
    let _reader = open(&fifo, OFlags::RDONLY | OFlags::NONBLOCK, Mode::empty())?;
    let writer = open(&fifo, OFlags::WRONLY | OFlags::NONBLOCK, Mode::empty())?;
    rustix::io::write(&writer, b"++")?;

    cnobi()?
        .env("MAKEFLAGS", format!("-j3 --jobserver-auth=fifo:{}", fifo.display()))
        .args(["jobserver", "--probe"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with("slots: 3\n"));
    Ok(())
}
