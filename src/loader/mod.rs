//! Turns declarative manifests into graph store entries.
//!
//! The [`Loader`] asks a [`ManifestProvider`] for each manifest, evaluates its
//! strings through the scope arena and populates the [`State`]. Per manifest
//! the order is fixed: global bindings, declared pools, rules, includes,
//! edges, subninjas, then defaults.
//!
//! Each edge goes through rule resolution, optional child scope creation,
//! pool resolution, outputs, inputs, validations, phony self-cycle handling
//! and the dyndep check. An edge whose outputs all evaluate to nothing is
//! dropped without error. Any failure removes the in-flight edge before the
//! error is returned.

use std::iter;
use std::sync::Arc;

use camino::{Utf8Path, Utf8PathBuf};
use clap::ValueEnum;
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::eval::{EvalString, ScopeId, Scopes};
use crate::graph::{
    EdgeId, InputKind, OutputKind, PHONY_RULE, Pool, Rule, State, canonicalize_path,
};
use crate::manifest::{EdgeInfo, ManifestInfo, ManifestProvider, PoolInfo};
use crate::version::{REQUIRED_VERSION_KEY, check_required_version};

mod error;

pub use error::LoadError;

/// What to do with a phony edge that lists its own output as an input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PhonyCycleAction {
    /// Drop the self reference and log a warning.
    #[default]
    Warn,
    /// Keep the edge as written so cycle detection reports it.
    #[value(name = "err")]
    Error,
}

/// How edge-local bindings are evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ScopingMode {
    /// Against the enclosing scope: edge-local bindings cannot see each
    /// other.
    #[default]
    Compat,
    /// Against the edge's own scope as it fills up, so later bindings see
    /// earlier ones.
    Strict,
}

/// Loader configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderOptions {
    /// Phony self-cycle policy.
    pub phony_cycle_action: PhonyCycleAction,
    /// Edge-local binding evaluation.
    pub scoping: ScopingMode,
}

/// Populates a [`State`] from manifests served by `P`.
///
/// # Examples
///
/// ```
/// use camino::Utf8Path;
/// use cnobi::graph::State;
/// use cnobi::loader::Loader;
/// use cnobi::manifest::{EdgeInfo, ManifestInfo, RuleInfo, StaticProvider};
///
/// let manifest = ManifestInfo::new()
///     .with_rule(RuleInfo::new("cc").with_binding("command", "cc"))
///     .with_edge(EdgeInfo::new("cc").with_input("a.c").with_output("a.o"));
/// let provider = StaticProvider::new().with_manifest("build.c", manifest);
/// let mut state = State::new();
/// Loader::new(&mut state, provider).load(Utf8Path::new("build.c"))?;
/// assert_eq!(state.edges().len(), 1);
/// # Ok::<(), cnobi::loader::LoadError>(())
/// ```
#[derive(Debug)]
pub struct Loader<'s, P> {
    state: &'s mut State,
    provider: P,
    options: LoaderOptions,
    stack: Vec<String>,
}

impl<'s, P: ManifestProvider> Loader<'s, P> {
    /// Create a loader with default options.
    pub fn new(state: &'s mut State, provider: P) -> Self {
        Self {
            state,
            provider,
            options: LoaderOptions::default(),
            stack: Vec::new(),
        }
    }

    /// Replace the options.
    #[must_use]
    pub const fn with_options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Load `source` and everything it nests into the root scope.
    ///
    /// # Errors
    ///
    /// Returns a [`LoadError`] for provider failures, graph invariant
    /// violations, incompatible versions, invalid pools, unknown rules,
    /// dyndep files missing from inputs and include cycles.
    pub fn load(&mut self, source: &Utf8Path) -> Result<(), LoadError> {
        self.load_into(source, Scopes::ROOT)?;
        info!(
            manifest = %source,
            edges = self.state.edges().len(),
            nodes = self.state.nodes().len(),
            "manifest loaded"
        );
        Ok(())
    }

    fn load_into(&mut self, source: &Utf8Path, scope: ScopeId) -> Result<(), LoadError> {
        let (key, _) = canonicalize_path(source.as_str());
        if let Some(start) = self.stack.iter().position(|open| *open == key) {
            let cycle = self
                .stack
                .get(start..)
                .unwrap_or_default()
                .iter()
                .chain(iter::once(&key))
                .join(" -> ");
            return Err(LoadError::IncludeCycle { cycle });
        }
        debug!(manifest = %source, "reading manifest");
        let manifest = self.provider.provide(source)?;
        self.stack.push(key);
        let result = self.apply(&manifest, source, scope);
        self.stack.pop();
        result
    }

    fn apply(
        &mut self,
        manifest: &ManifestInfo,
        source: &Utf8Path,
        scope: ScopeId,
    ) -> Result<(), LoadError> {
        for binding in &manifest.bindings {
            let value = binding.value.evaluate(&self.state.scopes().view(scope));
            if binding.key == REQUIRED_VERSION_KEY {
                check_required_version(&value)?;
            }
            self.state
                .scopes_mut()
                .add_binding(scope, binding.key.clone(), value);
        }

        for pool in &manifest.pools {
            self.declare_pool(pool)?;
        }

        self.register_rules(manifest, scope)?;

        for include in &manifest.includes {
            let path = self.nested_path(include, source, scope, "include")?;
            self.load_into(&path, scope)?;
        }

        for edge in &manifest.edges {
            self.add_edge(edge, scope)?;
        }

        for subninja in &manifest.subninjas {
            let path = self.nested_path(subninja, source, scope, "subninja")?;
            let child = self.state.scopes_mut().new_child(scope);
            self.load_into(&path, child)?;
        }

        for default in &manifest.defaults {
            let text = default.evaluate(&self.state.scopes().view(scope));
            let (path, _) = canonicalize_path(&text);
            self.state.add_default(&path)?;
        }
        Ok(())
    }

    fn nested_path(
        &self,
        value: &EvalString,
        source: &Utf8Path,
        scope: ScopeId,
        kind: &'static str,
    ) -> Result<Utf8PathBuf, LoadError> {
        let text = value.evaluate(&self.state.scopes().view(scope));
        if text.is_empty() {
            return Err(LoadError::EmptyNestedPath {
                kind,
                manifest: source.to_string(),
            });
        }
        let path = Utf8Path::new(&text);
        Ok(match source.parent() {
            Some(dir) if path.is_relative() && !dir.as_str().is_empty() => dir.join(path),
            _ => path.to_path_buf(),
        })
    }

    /// Existing pool of that name, or a new one. The empty name is the
    /// default pool and yields `None`.
    fn declare_pool(&mut self, info: &PoolInfo) -> Result<Option<Arc<Pool>>, LoadError> {
        if info.name.is_empty() {
            return Ok(None);
        }
        if let Some(existing) = self.state.lookup_pool(&info.name) {
            return Ok(Some(Arc::clone(existing)));
        }
        let depth = u32::try_from(info.depth).map_err(|_| LoadError::InvalidPoolDepth {
            name: info.name.clone(),
            depth: info.depth,
        })?;
        debug!(pool = %info.name, depth, "declared pool");
        Ok(Some(self.state.add_pool(Pool::new(&info.name, depth))?))
    }

    /// Materialise the manifest's rules in `scope`. A name already present
    /// in that scope keeps its first definition.
    fn register_rules(
        &mut self,
        manifest: &ManifestInfo,
        scope: ScopeId,
    ) -> Result<(), LoadError> {
        for info in &manifest.rules {
            if info.name == PHONY_RULE
                || self
                    .state
                    .scopes()
                    .lookup_rule_current_scope(scope, &info.name)
                    .is_some()
            {
                debug!(rule = %info.name, "rule already defined in scope");
                continue;
            }
            let mut rule = Rule::new(info.name.as_str());
            for binding in &info.bindings {
                rule.add_binding(binding.key.clone(), binding.value.clone());
            }
            if let Some(pool) = info.pool.as_ref()
                && let Some(pool) = self.declare_pool(pool)?
            {
                rule.add_binding("pool", EvalString::literal(pool.name()));
            }
            self.state.scopes_mut().add_rule(scope, Arc::new(rule));
        }
        Ok(())
    }

    fn resolve_rule(&self, name: &str, scope: ScopeId) -> Result<Arc<Rule>, LoadError> {
        if name == PHONY_RULE {
            return Ok(Arc::clone(self.state.phony_rule()));
        }
        self.state
            .scopes()
            .lookup_rule(scope, name)
            .cloned()
            .ok_or_else(|| LoadError::UnknownRule {
                name: name.to_owned(),
            })
    }

    fn edge_scope(&mut self, info: &EdgeInfo, scope: ScopeId) -> ScopeId {
        if info.bindings.is_empty() {
            return scope;
        }
        let child = self.state.scopes_mut().new_child(scope);
        let source = match self.options.scoping {
            ScopingMode::Compat => scope,
            ScopingMode::Strict => child,
        };
        for binding in &info.bindings {
            let value = binding.value.evaluate(&self.state.scopes().view(source));
            self.state
                .scopes_mut()
                .add_binding(child, binding.key.clone(), value);
        }
        child
    }

    fn add_edge(&mut self, info: &EdgeInfo, scope: ScopeId) -> Result<(), LoadError> {
        let rule = self.resolve_rule(&info.rule, scope)?;
        let explicit_pool = match info.pool.as_ref() {
            Some(pool) => self.declare_pool(pool)?,
            None => None,
        };
        let edge_scope = self.edge_scope(info, scope);
        let edge = self.state.add_edge(rule, edge_scope);

        match self.populate(edge, info, edge_scope, explicit_pool) {
            Ok(true) => {
                debug!(rule = %info.rule, edge = edge.index(), "added edge");
                Ok(())
            }
            Ok(false) => {
                debug!(rule = %info.rule, "dropping edge without outputs");
                self.state.discard_edge(edge)?;
                Ok(())
            }
            Err(err) => {
                self.state.discard_edge(edge)?;
                Err(err)
            }
        }
    }

    fn evaluate_path(&self, value: &EvalString, scope: ScopeId) -> Option<(String, u64)> {
        let text = value.evaluate(&self.state.scopes().view(scope));
        if text.is_empty() {
            debug!(value = %value, "skipping empty path");
            return None;
        }
        Some(canonicalize_path(&text))
    }

    /// Fill in a freshly added edge. Returns `false` when it has no outputs.
    fn populate(
        &mut self,
        edge: EdgeId,
        info: &EdgeInfo,
        scope: ScopeId,
        explicit_pool: Option<Arc<Pool>>,
    ) -> Result<bool, LoadError> {
        if let Some(pool) = explicit_pool {
            self.state.set_edge_pool(edge, pool);
        } else {
            let name = self.state.edge_unescaped_binding(edge, "pool");
            if !name.is_empty() {
                let pool = self
                    .state
                    .lookup_pool(&name)
                    .cloned()
                    .ok_or(LoadError::UnknownPool { name })?;
                self.state.set_edge_pool(edge, pool);
            }
        }

        let outputs = [
            (&info.outputs, OutputKind::Explicit),
            (&info.implicit_outputs, OutputKind::Implicit),
        ];
        for (values, kind) in outputs {
            for value in values {
                if let Some((path, bits)) = self.evaluate_path(value, scope) {
                    self.state.add_out(edge, &path, bits, kind)?;
                }
            }
        }
        if self
            .state
            .edge(edge)
            .is_none_or(|edge| edge.outputs().is_empty())
        {
            return Ok(false);
        }

        let inputs = [
            (&info.inputs, InputKind::Explicit),
            (&info.implicit_inputs, InputKind::Implicit),
            (&info.order_only_inputs, InputKind::OrderOnly),
        ];
        for (values, kind) in inputs {
            for value in values {
                if let Some((path, bits)) = self.evaluate_path(value, scope) {
                    self.state.add_in(edge, &path, bits, kind);
                }
            }
        }

        for value in &info.validations {
            if let Some((path, bits)) = self.evaluate_path(value, scope) {
                self.state.add_validation(edge, &path, bits);
            }
        }

        if self.options.phony_cycle_action == PhonyCycleAction::Warn {
            self.strip_phony_self_cycle(edge);
        }

        self.check_dyndep(edge)?;
        Ok(true)
    }

    fn strip_phony_self_cycle(&mut self, edge: EdgeId) {
        let Some(output) = self
            .state
            .edge(edge)
            .filter(|edge| edge.maybe_phony_cycle())
            .and_then(|edge| edge.outputs().first().copied())
        else {
            return;
        };
        if self.state.remove_input(edge, output) {
            warn!(
                target_path = self.state.path_of(output),
                "phony target names itself as an input; ignoring [-w phonycycle=warn]"
            );
        }
    }

    fn check_dyndep(&mut self, edge: EdgeId) -> Result<(), LoadError> {
        let dyndep = self.state.edge_unescaped_binding(edge, "dyndep");
        if dyndep.is_empty() {
            return Ok(());
        }
        let (path, bits) = canonicalize_path(&dyndep);
        let node = self.state.get_node(&path, bits);
        self.state.set_dyndep(edge, node);
        let listed = self
            .state
            .edge(edge)
            .is_some_and(|edge| edge.inputs().contains(&node));
        if listed {
            Ok(())
        } else {
            Err(LoadError::DyndepNotInput { path })
        }
    }
}
