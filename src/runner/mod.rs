//! CLI execution and command dispatch logic.
//!
//! This module keeps `main` minimal by providing a single entry point that
//! loads the manifest named on the command line and reports on the graph or
//! on the advertised jobserver.

mod error;

pub use error::RunnerError;

use crate::cli::{Cli, Commands};
use crate::graph::{EdgeId, GraphError, Node, NodeId, State, canonicalize_path};
use crate::jobserver::{self, Client, Mode};
use crate::loader::Loader;
use crate::manifest::{JsonProvider, ManifestInfo, ManifestProvider, NativeModuleProvider, ProviderError};
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use itertools::Itertools;
use std::collections::HashSet;
use std::io::{self, Write};
use tracing::debug;

/// Serves `.json` manifests with [`JsonProvider`] and everything else with
/// [`NativeModuleProvider`].
#[derive(Debug, Clone, Default)]
pub struct AutoProvider {
    native: NativeModuleProvider,
}

impl AutoProvider {
    /// Wrap a configured native provider.
    #[must_use]
    pub const fn new(native: NativeModuleProvider) -> Self {
        Self { native }
    }

    /// Use the compiler named by the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::CompilerCommand`] when the compiler override
    /// cannot be split into words.
    pub fn from_env() -> Result<Self, ProviderError> {
        NativeModuleProvider::from_env().map(Self::new)
    }
}

impl ManifestProvider for AutoProvider {
    fn provide(&self, source: &Utf8Path) -> Result<ManifestInfo, ProviderError> {
        if source.extension() == Some("json") {
            debug!(manifest = %source, "reading JSON manifest");
            JsonProvider.provide(source)
        } else {
            self.native.provide(source)
        }
    }
}

/// Execute the parsed [`Cli`] command, writing reports to stdout.
///
/// # Errors
///
/// Returns an error if the manifest cannot be loaded, a target is unknown,
/// the jobserver cannot be reached or stdout cannot be written.
pub fn run(cli: &Cli) -> Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_with(cli, &mut out)
}

/// Execute the parsed [`Cli`] command, writing reports to `out`.
///
/// # Errors
///
/// See [`run`].
pub fn run_with<W: Write>(cli: &Cli, out: &mut W) -> Result<()> {
    match cli.command.clone().unwrap_or(Commands::Check) {
        Commands::Check => {
            let manifest = resolve_manifest_path(cli)?;
            let state = load_state(cli, &manifest)?;
            write_summary(&state, &manifest, out)
        }
        Commands::Targets => {
            let manifest = resolve_manifest_path(cli)?;
            write_targets(&load_state(cli, &manifest)?, out)
        }
        Commands::Commands { targets } => {
            let manifest = resolve_manifest_path(cli)?;
            write_commands(&load_state(cli, &manifest)?, &targets, out)
        }
        Commands::Jobserver { probe } => {
            let config = jobserver::Config::from_env().context("parsing MAKEFLAGS")?;
            report_jobserver(&config, probe, out)
        }
    }
}

/// Determine the manifest path respecting the CLI's directory option.
///
/// # Errors
///
/// Returns [`RunnerError::NonUtf8Path`] when the file or directory is not
/// valid UTF-8.
pub fn resolve_manifest_path(cli: &Cli) -> Result<Utf8PathBuf, RunnerError> {
    let file = Utf8PathBuf::from_path_buf(cli.file.clone())
        .map_err(|path| RunnerError::NonUtf8Path { path })?;
    let Some(dir) = &cli.directory else {
        return Ok(file);
    };
    let base = Utf8PathBuf::from_path_buf(dir.clone())
        .map_err(|path| RunnerError::NonUtf8Path { path })?;
    Ok(base.join(file))
}

/// Load `manifest` into a fresh graph using the CLI's loader options.
///
/// # Errors
///
/// Returns [`RunnerError::ManifestNotFound`] when the file is missing, or
/// the load failure with the manifest path as context.
pub fn load_state(cli: &Cli, manifest: &Utf8Path) -> Result<State> {
    if !manifest.as_std_path().exists() {
        return Err(RunnerError::ManifestNotFound {
            path: manifest.as_std_path().to_path_buf(),
        }
        .into());
    }
    let provider = AutoProvider::from_env().context("configuring the manifest compiler")?;
    let mut state = State::new();
    Loader::new(&mut state, provider)
        .with_options(cli.loader_options())
        .load(manifest)
        .with_context(|| format!("loading {manifest}"))?;
    Ok(state)
}

fn joined_paths(state: &State, nodes: impl IntoIterator<Item = NodeId>) -> String {
    nodes.into_iter().map(|id| state.path_of(id)).join(" ")
}

fn write_summary<W: Write>(state: &State, manifest: &Utf8Path, out: &mut W) -> Result<()> {
    writeln!(
        out,
        "{manifest}: {} edges, {} nodes, {} pools",
        state.edges().len(),
        state.nodes().len(),
        state.pools().count()
    )?;
    writeln!(
        out,
        "default targets: {}",
        joined_paths(state, state.default_nodes())
    )?;
    Ok(())
}

fn write_targets<W: Write>(state: &State, out: &mut W) -> Result<()> {
    for edge in state.edges() {
        for output in edge.outputs() {
            writeln!(out, "{}: {}", state.path_of(*output), edge.rule().name())?;
        }
    }
    Ok(())
}

fn collect_edges(state: &State, node: NodeId, seen: &mut HashSet<EdgeId>, order: &mut Vec<EdgeId>) {
    let Some(id) = state.node(node).and_then(Node::in_edge) else {
        return;
    };
    if !seen.insert(id) {
        return;
    }
    let Some(edge) = state.edge(id) else {
        return;
    };
    for input in edge.inputs() {
        collect_edges(state, *input, seen, order);
    }
    if !edge.is_phony() {
        order.push(id);
    }
}

/// Non-phony edges needed for `targets`, dependencies first.
///
/// With no targets, every non-phony edge in declaration order.
///
/// # Errors
///
/// Returns [`GraphError::UnknownTarget`] for a target no node matches.
pub fn command_edges(state: &State, targets: &[String]) -> Result<Vec<EdgeId>, GraphError> {
    if targets.is_empty() {
        return Ok(state
            .edge_ids()
            .filter(|id| state.edge(*id).is_some_and(|edge| !edge.is_phony()))
            .collect());
    }
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for target in targets {
        let (path, _) = canonicalize_path(target);
        let node = state
            .lookup_node(&path)
            .ok_or(GraphError::UnknownTarget { path })?;
        collect_edges(state, node, &mut seen, &mut order);
    }
    Ok(order)
}

fn write_commands<W: Write>(state: &State, targets: &[String], out: &mut W) -> Result<()> {
    for edge in command_edges(state, targets)? {
        writeln!(out, "{}", state.evaluate_command(edge, false))?;
    }
    Ok(())
}

/// Describe `config` and, when `probe` is set, count the slots that can be
/// acquired without blocking. Every acquired slot is released again.
///
/// # Errors
///
/// Returns an error when the client cannot be created, a slot cannot be
/// released or `out` cannot be written.
pub fn report_jobserver<W: Write>(
    config: &jobserver::Config,
    probe: bool,
    out: &mut W,
) -> Result<()> {
    writeln!(out, "mode: {}", config.mode)?;
    match config.mode {
        Mode::Pipe => writeln!(out, "descriptors: {},{}", config.read_fd, config.write_fd)?,
        Mode::PosixFifo | Mode::Semaphore => writeln!(out, "path: {}", config.path)?,
        Mode::None => {}
    }
    if !probe || !config.has_mode() {
        return Ok(());
    }
    let mut client = jobserver::create(config).context("connecting to the jobserver")?;
    let mut slots = Vec::new();
    loop {
        let slot = client.try_acquire();
        if !slot.is_valid() {
            break;
        }
        slots.push(slot);
    }
    writeln!(out, "slots: {}", slots.len())?;
    for slot in slots {
        client.release(slot)?;
    }
    Ok(())
}
