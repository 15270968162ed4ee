//! The dependency graph store.
//!
//! [`State`] owns every [`Node`] and [`Edge`] together with the pool table and
//! the scope arena. Nodes are identified by their canonical path, so distinct
//! spellings of one location share a node. Edges record their inputs in three
//! partitions (explicit, implicit, order-only) and their outputs in two
//! (explicit, implicit) using running counts over a single vector.
//!
//! Cross references use [`NodeId`] and [`EdgeId`] indices rather than
//! pointers: a node knows its generating edge and its consumers, and an edge
//! knows its nodes.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::eval::{EvalString, ScopeId, Scopes};

pub mod canon;
mod edge_env;
mod error;

pub use canon::{MAX_SLASH_BITS, canonicalize_path, decanonicalize_path};
pub use error::GraphError;

/// Name of the built-in rule whose edges have no command.
pub const PHONY_RULE: &str = "phony";
/// Name of the built-in pool that serialises interactive edges.
pub const CONSOLE_POOL: &str = "console";

/// Index of a [`Node`] inside its [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Id of the entry at `index` in [`State::nodes`].
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position in [`State::nodes`].
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Index of an [`Edge`] inside its [`State`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(usize);

impl EdgeId {
    /// Id of the entry at `index` in [`State::edges`].
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position in [`State::edges`].
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Named concurrency limiter. A depth of zero means unlimited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pool {
    name: String,
    depth: u32,
}

impl Pool {
    /// Create a pool.
    #[must_use]
    pub fn new(name: impl Into<String>, depth: u32) -> Self {
        Self {
            name: name.into(),
            depth,
        }
    }

    /// Pool name; the default pool is unnamed.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum concurrent edges, or zero for no limit.
    #[must_use]
    pub const fn depth(&self) -> u32 {
        self.depth
    }
}

/// A named bag of unevaluated bindings shared by edges.
///
/// Bindings stay unevaluated so that `$in`, `$out` and edge-local variables
/// resolve per edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    name: String,
    bindings: IndexMap<String, EvalString>,
}

impl Rule {
    /// Create a rule with no bindings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bindings: IndexMap::new(),
        }
    }

    /// Rule name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add or replace a binding.
    pub fn add_binding(&mut self, key: impl Into<String>, value: EvalString) {
        self.bindings.insert(key.into(), value);
    }

    /// Unevaluated value of `key`.
    #[must_use]
    pub fn binding(&self, key: &str) -> Option<&EvalString> {
        self.bindings.get(key)
    }

    /// All bindings in declaration order.
    pub fn bindings(&self) -> impl Iterator<Item = (&str, &EvalString)> {
        self.bindings.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether this is the built-in `phony` rule.
    #[must_use]
    pub fn is_phony(&self) -> bool {
        self.name == PHONY_RULE
    }
}

/// A file path in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    path: String,
    slash_bits: u64,
    in_edge: Option<EdgeId>,
    out_edges: Vec<EdgeId>,
    validation_out_edges: Vec<EdgeId>,
    dyndep_pending: bool,
}

impl Node {
    fn new(path: String, slash_bits: u64) -> Self {
        Self {
            path,
            slash_bits,
            in_edge: None,
            out_edges: Vec::new(),
            validation_out_edges: Vec::new(),
            dyndep_pending: false,
        }
    }

    /// Canonical path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Separator bits recorded when the node was first seen.
    #[must_use]
    pub const fn slash_bits(&self) -> u64 {
        self.slash_bits
    }

    /// Path with its original separators restored.
    #[must_use]
    pub fn path_decanonicalized(&self) -> String {
        decanonicalize_path(&self.path, self.slash_bits)
    }

    /// The edge producing this node, if any.
    #[must_use]
    pub const fn in_edge(&self) -> Option<EdgeId> {
        self.in_edge
    }

    /// Edges consuming this node as an input.
    #[must_use]
    pub fn out_edges(&self) -> &[EdgeId] {
        &self.out_edges
    }

    /// Edges that list this node as a validation.
    #[must_use]
    pub fn validation_out_edges(&self) -> &[EdgeId] {
        &self.validation_out_edges
    }

    /// Whether some edge names this node as its dyndep file.
    #[must_use]
    pub const fn dyndep_pending(&self) -> bool {
        self.dyndep_pending
    }
}

/// Which input partition a dependency joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    /// Appears in `$in`.
    Explicit,
    /// Rebuilds the edge when changed but is absent from `$in`.
    Implicit,
    /// Must exist first; changes do not trigger a rebuild.
    OrderOnly,
}

/// Which output partition a product joins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Appears in `$out`.
    Explicit,
    /// Produced but absent from `$out`.
    Implicit,
}

/// A build step applying a rule to inputs to produce outputs.
#[derive(Debug, Clone)]
pub struct Edge {
    rule: Arc<Rule>,
    pool: Arc<Pool>,
    scope: ScopeId,
    inputs: Vec<NodeId>,
    outputs: Vec<NodeId>,
    validations: Vec<NodeId>,
    implicit_deps: usize,
    order_only_deps: usize,
    implicit_outs: usize,
    dyndep: Option<NodeId>,
}

fn partition(items: &[NodeId], start: usize, len: usize) -> &[NodeId] {
    items.get(start..start.saturating_add(len)).unwrap_or(&[])
}

impl Edge {
    /// The rule this edge applies.
    #[must_use]
    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }

    /// The pool this edge runs in.
    #[must_use]
    pub fn pool(&self) -> &Arc<Pool> {
        &self.pool
    }

    /// Scope used to resolve this edge's variables.
    #[must_use]
    pub const fn scope(&self) -> ScopeId {
        self.scope
    }

    /// All inputs: explicit, then implicit, then order-only.
    #[must_use]
    pub fn inputs(&self) -> &[NodeId] {
        &self.inputs
    }

    /// Inputs that appear in `$in`.
    #[must_use]
    pub fn explicit_inputs(&self) -> &[NodeId] {
        let len = self
            .inputs
            .len()
            .saturating_sub(self.implicit_deps + self.order_only_deps);
        partition(&self.inputs, 0, len)
    }

    /// Implicit inputs.
    #[must_use]
    pub fn implicit_inputs(&self) -> &[NodeId] {
        let start = self
            .inputs
            .len()
            .saturating_sub(self.implicit_deps + self.order_only_deps);
        partition(&self.inputs, start, self.implicit_deps)
    }

    /// Order-only inputs.
    #[must_use]
    pub fn order_only_inputs(&self) -> &[NodeId] {
        let start = self.inputs.len().saturating_sub(self.order_only_deps);
        partition(&self.inputs, start, self.order_only_deps)
    }

    /// All outputs: explicit, then implicit.
    #[must_use]
    pub fn outputs(&self) -> &[NodeId] {
        &self.outputs
    }

    /// Outputs that appear in `$out`.
    #[must_use]
    pub fn explicit_outputs(&self) -> &[NodeId] {
        let len = self.outputs.len().saturating_sub(self.implicit_outs);
        partition(&self.outputs, 0, len)
    }

    /// Implicit outputs.
    #[must_use]
    pub fn implicit_outputs(&self) -> &[NodeId] {
        let start = self.outputs.len().saturating_sub(self.implicit_outs);
        partition(&self.outputs, start, self.implicit_outs)
    }

    /// Validation targets.
    #[must_use]
    pub fn validations(&self) -> &[NodeId] {
        &self.validations
    }

    /// Number of implicit inputs.
    #[must_use]
    pub const fn implicit_deps(&self) -> usize {
        self.implicit_deps
    }

    /// Number of order-only inputs.
    #[must_use]
    pub const fn order_only_deps(&self) -> usize {
        self.order_only_deps
    }

    /// Number of implicit outputs.
    #[must_use]
    pub const fn implicit_outs(&self) -> usize {
        self.implicit_outs
    }

    /// Dynamic dependency file, if declared.
    #[must_use]
    pub const fn dyndep(&self) -> Option<NodeId> {
        self.dyndep
    }

    /// Whether the edge applies the built-in `phony` rule.
    #[must_use]
    pub fn is_phony(&self) -> bool {
        self.rule.is_phony()
    }

    /// Whether the edge runs in the console pool.
    #[must_use]
    pub fn use_console(&self) -> bool {
        self.pool.name() == CONSOLE_POOL
    }

    /// Whether a self-referencing input on this edge should be treated as
    /// the legacy phony cycle pattern: a phony edge with one output and no
    /// implicit partitions.
    #[must_use]
    pub fn maybe_phony_cycle(&self) -> bool {
        self.is_phony()
            && self.outputs.len() == 1
            && self.implicit_outs == 0
            && self.implicit_deps == 0
    }
}

/// The build graph: nodes, edges, pools, scopes and defaults.
#[derive(Debug)]
pub struct State {
    paths: IndexMap<String, NodeId>,
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    pools: IndexMap<String, Arc<Pool>>,
    scopes: Scopes,
    defaults: Vec<NodeId>,
    default_pool: Arc<Pool>,
    console_pool: Arc<Pool>,
    phony_rule: Arc<Rule>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    /// Create an empty store holding the built-in pools and the phony rule.
    #[must_use]
    pub fn new() -> Self {
        let default_pool = Arc::new(Pool::new("", 0));
        let console_pool = Arc::new(Pool::new(CONSOLE_POOL, 1));
        let phony_rule = Arc::new(Rule::new(PHONY_RULE));
        let mut pools = IndexMap::new();
        pools.insert(String::new(), Arc::clone(&default_pool));
        pools.insert(CONSOLE_POOL.to_owned(), Arc::clone(&console_pool));
        let mut scopes = Scopes::new();
        scopes.add_rule(Scopes::ROOT, Arc::clone(&phony_rule));
        Self {
            paths: IndexMap::new(),
            nodes: Vec::new(),
            edges: Vec::new(),
            pools,
            scopes,
            defaults: Vec::new(),
            default_pool,
            console_pool,
            phony_rule,
        }
    }

    /// Scope arena.
    #[must_use]
    pub const fn scopes(&self) -> &Scopes {
        &self.scopes
    }

    /// Mutable scope arena.
    pub const fn scopes_mut(&mut self) -> &mut Scopes {
        &mut self.scopes
    }

    /// The unnamed, unlimited pool.
    #[must_use]
    pub const fn default_pool(&self) -> &Arc<Pool> {
        &self.default_pool
    }

    /// The built-in `console` pool of depth one.
    #[must_use]
    pub const fn console_pool(&self) -> &Arc<Pool> {
        &self.console_pool
    }

    /// The built-in `phony` rule.
    #[must_use]
    pub const fn phony_rule(&self) -> &Arc<Rule> {
        &self.phony_rule
    }

    /// Register a pool.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::DuplicatePool`] when the name is taken.
    pub fn add_pool(&mut self, pool: Pool) -> Result<Arc<Pool>, GraphError> {
        if self.pools.contains_key(pool.name()) {
            return Err(GraphError::DuplicatePool {
                name: pool.name().to_owned(),
            });
        }
        let pool = Arc::new(pool);
        self.pools.insert(pool.name().to_owned(), Arc::clone(&pool));
        Ok(pool)
    }

    /// Pool registered under `name`.
    #[must_use]
    pub fn lookup_pool(&self, name: &str) -> Option<&Arc<Pool>> {
        self.pools.get(name)
    }

    /// All pools in registration order.
    pub fn pools(&self) -> impl Iterator<Item = &Arc<Pool>> {
        self.pools.values()
    }

    /// Append an edge applying `rule`, resolved in `scope`, in the default
    /// pool.
    pub fn add_edge(&mut self, rule: Arc<Rule>, scope: ScopeId) -> EdgeId {
        let id = EdgeId(self.edges.len());
        self.edges.push(Edge {
            rule,
            pool: Arc::clone(&self.default_pool),
            scope,
            inputs: Vec::new(),
            outputs: Vec::new(),
            validations: Vec::new(),
            implicit_deps: 0,
            order_only_deps: 0,
            implicit_outs: 0,
            dyndep: None,
        });
        id
    }

    /// Assign `pool` to `edge`.
    pub fn set_edge_pool(&mut self, edge: EdgeId, pool: Arc<Pool>) {
        if let Some(edge) = self.edges.get_mut(edge.0) {
            edge.pool = pool;
        } else {
            debug_assert!(false, "unknown edge {edge:?}");
        }
    }

    /// Node for the canonical `path`, created on first use.
    ///
    /// The separator bits of the first spelling are kept.
    pub fn get_node(&mut self, path: &str, slash_bits: u64) -> NodeId {
        if let Some(id) = self.paths.get(path) {
            return *id;
        }
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node::new(path.to_owned(), slash_bits));
        self.paths.insert(path.to_owned(), id);
        id
    }

    /// Node for the canonical `path`, if it exists.
    #[must_use]
    pub fn lookup_node(&self, path: &str) -> Option<NodeId> {
        self.paths.get(path).copied()
    }

    /// Node by id.
    #[must_use]
    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.0)
    }

    /// Edge by id.
    #[must_use]
    pub fn edge(&self, id: EdgeId) -> Option<&Edge> {
        self.edges.get(id.0)
    }

    /// All nodes in creation order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// All edges in creation order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Ids of all edges in creation order.
    pub fn edge_ids(&self) -> impl Iterator<Item = EdgeId> + use<> {
        (0..self.edges.len()).map(EdgeId)
    }

    /// Canonical path of `id`, or the empty string for a foreign id.
    #[must_use]
    pub fn path_of(&self, id: NodeId) -> &str {
        self.node(id).map_or("", Node::path)
    }

    /// Register `path` as an input of `edge` in the given partition.
    pub fn add_in(&mut self, edge: EdgeId, path: &str, slash_bits: u64, kind: InputKind) {
        let node = self.get_node(path, slash_bits);
        let Some(target) = self.edges.get_mut(edge.0) else {
            debug_assert!(false, "unknown edge {edge:?}");
            return;
        };
        match kind {
            InputKind::Explicit => {
                let at = target.inputs.len() - target.implicit_deps - target.order_only_deps;
                target.inputs.insert(at, node);
            }
            InputKind::Implicit => {
                let at = target.inputs.len() - target.order_only_deps;
                target.inputs.insert(at, node);
                target.implicit_deps += 1;
            }
            InputKind::OrderOnly => {
                target.inputs.push(node);
                target.order_only_deps += 1;
            }
        }
        if let Some(node) = self.nodes.get_mut(node.0) {
            node.out_edges.push(edge);
        }
    }

    /// Register `path` as an output of `edge` in the given partition.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::MultipleRulesGenerate`] when another edge
    /// already produces the path. The edge is left unchanged.
    pub fn add_out(
        &mut self,
        edge: EdgeId,
        path: &str,
        slash_bits: u64,
        kind: OutputKind,
    ) -> Result<(), GraphError> {
        let node = self.get_node(path, slash_bits);
        let Some(target) = self.edges.get_mut(edge.0) else {
            return Err(GraphError::UnknownEdge { index: edge.0 });
        };
        let Some(product) = self.nodes.get_mut(node.0) else {
            return Err(GraphError::UnknownEdge { index: edge.0 });
        };
        if product.in_edge.is_some() {
            return Err(GraphError::MultipleRulesGenerate {
                path: path.to_owned(),
            });
        }
        product.in_edge = Some(edge);
        match kind {
            OutputKind::Explicit => {
                let at = target.outputs.len() - target.implicit_outs;
                target.outputs.insert(at, node);
            }
            OutputKind::Implicit => {
                target.outputs.push(node);
                target.implicit_outs += 1;
            }
        }
        Ok(())
    }

    /// Register `path` as a validation target of `edge`.
    pub fn add_validation(&mut self, edge: EdgeId, path: &str, slash_bits: u64) {
        let node = self.get_node(path, slash_bits);
        let Some(target) = self.edges.get_mut(edge.0) else {
            debug_assert!(false, "unknown edge {edge:?}");
            return;
        };
        target.validations.push(node);
        if let Some(node) = self.nodes.get_mut(node.0) {
            node.validation_out_edges.push(edge);
        }
    }

    /// Record `node` as the dyndep file of `edge` and mark it pending.
    pub fn set_dyndep(&mut self, edge: EdgeId, node: NodeId) {
        if let Some(target) = self.edges.get_mut(edge.0) {
            target.dyndep = Some(node);
        }
        if let Some(node) = self.nodes.get_mut(node.0) {
            node.dyndep_pending = true;
        }
    }

    /// Remove every occurrence of `node` from the inputs of `edge`, keeping
    /// the partition counts and the node's back references consistent.
    /// Returns whether anything was removed.
    pub fn remove_input(&mut self, edge: EdgeId, node: NodeId) -> bool {
        let Some(target) = self.edges.get_mut(edge.0) else {
            return false;
        };
        let implicit_start = target
            .inputs
            .len()
            .saturating_sub(target.implicit_deps + target.order_only_deps);
        let order_only_start = target.inputs.len().saturating_sub(target.order_only_deps);
        let mut removed = false;
        let mut kept = Vec::with_capacity(target.inputs.len());
        for (position, input) in target.inputs.iter().copied().enumerate() {
            if input != node {
                kept.push(input);
                continue;
            }
            removed = true;
            if position >= order_only_start {
                target.order_only_deps -= 1;
            } else if position >= implicit_start {
                target.implicit_deps -= 1;
            }
        }
        target.inputs = kept;
        if removed && let Some(node) = self.nodes.get_mut(node.0) {
            node.out_edges.retain(|consumer| *consumer != edge);
        }
        removed
    }

    /// Remove `edge`, detaching it from every node it touches.
    ///
    /// Only the most recently added edge may be discarded, so no other id is
    /// invalidated.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::EdgeNotLast`] for any other edge.
    pub fn discard_edge(&mut self, edge: EdgeId) -> Result<(), GraphError> {
        if edge.0 + 1 != self.edges.len() {
            return Err(GraphError::EdgeNotLast { index: edge.0 });
        }
        let Some(removed) = self.edges.pop() else {
            return Err(GraphError::UnknownEdge { index: edge.0 });
        };
        for id in &removed.outputs {
            if let Some(node) = self.nodes.get_mut(id.0)
                && node.in_edge == Some(edge)
            {
                node.in_edge = None;
            }
        }
        for id in &removed.inputs {
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.out_edges.retain(|consumer| *consumer != edge);
            }
        }
        for id in &removed.validations {
            if let Some(node) = self.nodes.get_mut(id.0) {
                node.validation_out_edges.retain(|consumer| *consumer != edge);
            }
        }
        if let Some(id) = removed.dyndep
            && let Some(node) = self.nodes.get_mut(id.0)
        {
            node.dyndep_pending = self
                .edges
                .iter()
                .any(|other| other.dyndep == Some(id));
        }
        Ok(())
    }

    /// Mark the existing node at canonical `path` as a default target.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::EmptyDefault`] for an empty path and
    /// [`GraphError::UnknownTarget`] when no node has that path.
    pub fn add_default(&mut self, path: &str) -> Result<(), GraphError> {
        if path.is_empty() {
            return Err(GraphError::EmptyDefault);
        }
        let node = self
            .lookup_node(path)
            .ok_or_else(|| GraphError::UnknownTarget {
                path: path.to_owned(),
            })?;
        self.defaults.push(node);
        Ok(())
    }

    /// Default targets in declaration order.
    #[must_use]
    pub fn defaults(&self) -> &[NodeId] {
        &self.defaults
    }

    /// Outputs that no edge consumes.
    #[must_use]
    pub fn root_nodes(&self) -> Vec<NodeId> {
        self.edges
            .iter()
            .flat_map(|edge| edge.outputs.iter().copied())
            .filter(|id| self.node(*id).is_some_and(|node| node.out_edges.is_empty()))
            .collect()
    }

    /// The declared defaults, or the root nodes when none were declared.
    #[must_use]
    pub fn default_nodes(&self) -> Vec<NodeId> {
        if self.defaults.is_empty() {
            self.root_nodes()
        } else {
            self.defaults.clone()
        }
    }
}
