//! Compiling and loading C manifests.
#![cfg(unix)]

use camino::{Utf8Path, Utf8PathBuf};
use cnobi::graph::State;
use cnobi::loader::Loader;
use cnobi::manifest::{ManifestProvider, NativeModuleProvider, ProviderError};
use rstest::{fixture, rstest};
use std::fs;
use tempfile::TempDir;
use test_support::{compiler_invocations, fake_compiler};

struct Workspace {
    _dir: TempDir,
    source: Utf8PathBuf,
}

#[fixture]
fn hello() -> Workspace {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf8 tempdir");
    let source = root.join("build.c");
    fs::copy(
        Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("demos/hello/build.c"),
        &source,
    )
    .expect("copy manifest");
    Workspace { _dir: dir, source }
}

fn system_compiler() -> NativeModuleProvider {
    let include = Utf8Path::new(env!("CARGO_MANIFEST_DIR")).join("include");
    NativeModuleProvider::new(vec!["cc".to_owned(), format!("-I{include}")]).expect("compiler")
}

fn faked(exit_code: i32) -> (TempDir, NativeModuleProvider, std::path::PathBuf) {
    let (dir, path) = fake_compiler(exit_code);
    let provider = NativeModuleProvider::new(vec![path.to_string_lossy().into_owned()])
        .expect("fake compiler");
    (dir, provider, path)
}

#[rstest]
fn compiles_and_loads_the_demo(hello: Workspace) {
    let mut state = State::new();
    Loader::new(&mut state, system_compiler())
        .load(&hello.source)
        .expect("load demo");

    let command = |output: &str| {
        let node = state.lookup_node(output).expect("node");
        let edge = state
            .node(node)
            .and_then(|node| node.in_edge())
            .expect("edge");
        state.evaluate_command(edge, false)
    };
    assert_eq!(
        command("out/hello.o"),
        "cc -O2 -Wall -c src/hello.c -o out/hello.o"
    );
    assert_eq!(command("out/hello"), "cc out/hello.o -o out/hello");
    assert_eq!(state.lookup_pool("link").map(|pool| pool.depth()), Some(1));
    assert!(NativeModuleProvider::artifact_path(&hello.source).exists());
}

#[rstest]
fn up_to_date_artifact_is_not_rebuilt(hello: Workspace) {
    let first = system_compiler().provide(&hello.source).expect("first load");

    let (_dir, broken, path) = faked(1);
    let second = broken.provide(&hello.source).expect("cached artifact");
    assert_eq!(first, second);
    assert!(compiler_invocations(&path).is_empty());
}

#[rstest]
fn compiler_failure_names_the_manifest(hello: Workspace) {
    let (_dir, provider, path) = faked(1);
    let err = provider.provide(&hello.source).expect_err("compile failure");
    let ProviderError::Compile { manifest, .. } = &err else {
        panic!("expected compile failure, got {err:?}");
    };
    assert_eq!(manifest, &hello.source);

    let artifact = NativeModuleProvider::artifact_path(&hello.source);
    assert_eq!(
        compiler_invocations(&path),
        [format!("{} -fPIC -shared -o {artifact}", hello.source)]
    );
}

#[rstest]
fn missing_artifact_is_a_load_failure(hello: Workspace) {
    let (_dir, provider, _path) = faked(0);
    let err = provider.provide(&hello.source).expect_err("nothing to load");
    assert!(matches!(err, ProviderError::Load { .. }), "{err:?}");
}

#[rstest]
fn unknown_compiler_cannot_spawn(hello: Workspace) {
    let provider =
        NativeModuleProvider::new(vec!["/nonexistent/cnobi-cc".to_owned()]).expect("provider");
    let err = provider.provide(&hello.source).expect_err("spawn failure");
    assert!(matches!(err, ProviderError::CompilerSpawn { .. }), "{err:?}");
}

#[rstest]
#[serial_test::serial]
fn compiler_override_comes_from_the_environment(hello: Workspace) {
    let (_dir, path) = fake_compiler(1);
    let provider = {
        let _lock = test_support::EnvLock::acquire();
        let _cc = test_support::EnvVarGuard::set(
            cnobi_env::COMPILER_ENV,
            format!("'{}' -DCNOBI_TEST", path.display()),
        );
        NativeModuleProvider::from_env().expect("compiler override")
    };
    assert!(provider.provide(&hello.source).is_err());
    let invocations = compiler_invocations(&path);
    assert_eq!(invocations.len(), 1);
    assert!(
        invocations
            .first()
            .is_some_and(|args| args.starts_with("-DCNOBI_TEST ")),
        "{invocations:?}"
    );
}
