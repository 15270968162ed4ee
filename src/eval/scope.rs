//! Chained binding environments.
//!
//! Scopes live in an arena owned by the graph store and refer to their parent
//! by [`ScopeId`]. The root scope holds the manifest's global bindings; a
//! child is allocated only for an edge that declares bindings of its own, or
//! for a `subninja`. Lookups walk outward and yield the empty string when the
//! name is never bound.
//!
//! Each scope also owns a rule table. Rules are looked up in the current
//! scope only when deduplicating, so rule names are not merged across
//! nested manifests.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Env, EvalString};
use crate::graph::Rule;

/// Index of a scope inside [`Scopes`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(usize);

#[derive(Debug, Default)]
struct BindingEnv {
    bindings: HashMap<String, String>,
    rules: HashMap<String, Arc<Rule>>,
    parent: Option<ScopeId>,
}

/// Arena of binding environments.
#[derive(Debug)]
pub struct Scopes {
    scopes: Vec<BindingEnv>,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    /// The scope every arena starts with.
    pub const ROOT: ScopeId = ScopeId(0);

    /// Create an arena holding only the root scope.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![BindingEnv::default()],
        }
    }

    /// Allocate a scope whose lookups fall back to `parent`.
    pub fn new_child(&mut self, parent: ScopeId) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes.push(BindingEnv {
            parent: Some(parent),
            ..BindingEnv::default()
        });
        id
    }

    /// Number of allocated scopes, the root included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    /// Always `false`: the root scope cannot be removed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }

    /// Parent of `id`, if any.
    #[must_use]
    pub fn parent(&self, id: ScopeId) -> Option<ScopeId> {
        self.get(id).and_then(|scope| scope.parent)
    }

    /// Store or overwrite `key` in `id` itself.
    pub fn add_binding(&mut self, id: ScopeId, key: impl Into<String>, value: impl Into<String>) {
        if let Some(scope) = self.scopes.get_mut(id.0) {
            scope.bindings.insert(key.into(), value.into());
        } else {
            debug_assert!(false, "scope {id:?} does not belong to this arena");
        }
    }

    /// Value bound to `key` in `id` without consulting parents.
    #[must_use]
    pub fn lookup_local(&self, id: ScopeId, key: &str) -> Option<&str> {
        self.get(id)
            .and_then(|scope| scope.bindings.get(key))
            .map(String::as_str)
    }

    /// Resolve `key` starting at `id` and walking outward.
    #[must_use]
    pub fn lookup(&self, id: ScopeId, key: &str) -> String {
        let mut current = Some(id);
        while let Some(scope_id) = current {
            let Some(scope) = self.get(scope_id) else {
                break;
            };
            if let Some(value) = scope.bindings.get(key) {
                return value.clone();
            }
            current = scope.parent;
        }
        String::new()
    }

    /// Resolve `var` for an edge: the scope's own binding wins, then the
    /// rule-supplied `fallback` evaluated in `env`, then the parent chain.
    #[must_use]
    pub fn lookup_with_fallback(
        &self,
        id: ScopeId,
        var: &str,
        fallback: Option<&EvalString>,
        env: &dyn Env,
    ) -> String {
        if let Some(value) = self.lookup_local(id, var) {
            return value.to_owned();
        }
        if let Some(eval) = fallback {
            return eval.evaluate(env);
        }
        self.parent(id)
            .map(|parent| self.lookup(parent, var))
            .unwrap_or_default()
    }

    /// Rule registered under `name` in `id` itself.
    #[must_use]
    pub fn lookup_rule_current_scope(&self, id: ScopeId, name: &str) -> Option<&Arc<Rule>> {
        self.get(id).and_then(|scope| scope.rules.get(name))
    }

    /// Rule registered under `name` in `id` or any enclosing scope.
    #[must_use]
    pub fn lookup_rule(&self, id: ScopeId, name: &str) -> Option<&Arc<Rule>> {
        let mut current = Some(id);
        while let Some(scope_id) = current {
            let scope = self.get(scope_id)?;
            if let Some(rule) = scope.rules.get(name) {
                return Some(rule);
            }
            current = scope.parent;
        }
        None
    }

    /// Register `rule` in `id`, replacing any rule of the same name there.
    pub fn add_rule(&mut self, id: ScopeId, rule: Arc<Rule>) {
        if let Some(scope) = self.scopes.get_mut(id.0) {
            scope.rules.insert(rule.name().to_owned(), rule);
        } else {
            debug_assert!(false, "scope {id:?} does not belong to this arena");
        }
    }

    /// Borrow `id` as an [`Env`].
    #[must_use]
    pub const fn view(&self, id: ScopeId) -> ScopeView<'_> {
        ScopeView { scopes: self, id }
    }

    fn get(&self, id: ScopeId) -> Option<&BindingEnv> {
        self.scopes.get(id.0)
    }
}

/// A single scope of a [`Scopes`] arena seen as an [`Env`].
#[derive(Debug, Clone, Copy)]
pub struct ScopeView<'a> {
    scopes: &'a Scopes,
    id: ScopeId,
}

impl ScopeView<'_> {
    /// The scope being viewed.
    #[must_use]
    pub const fn id(&self) -> ScopeId {
        self.id
    }
}

impl Env for ScopeView<'_> {
    fn lookup_variable(&self, var: &str) -> String {
        self.scopes.lookup(self.id, var)
    }
}
