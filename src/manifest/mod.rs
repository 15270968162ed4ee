//! Declarative manifest data.
//!
//! A [`ManifestInfo`] is the owned, read-only description of one manifest:
//! global bindings, rule and pool declarations, build edges, default targets
//! and nested manifests. It is produced by a [`ManifestProvider`] and consumed
//! once by the [`Loader`](crate::loader::Loader). Lists keep their declared
//! order; the loader relies on it when partitioning inputs and outputs.
//!
//! The builder methods make in-memory manifests terse:
//!
//! ```
//! use cnobi::manifest::{EdgeInfo, ManifestInfo, RuleInfo};
//!
//! let manifest = ManifestInfo::new()
//!     .with_binding("cflags", "-O2")
//!     .with_rule(RuleInfo::new("cc").with_binding("command", "cc -c"))
//!     .with_edge(EdgeInfo::new("cc").with_input("a.c").with_output("a.o"));
//! assert_eq!(manifest.edges.len(), 1);
//! ```

use serde::{Deserialize, Serialize};

use crate::eval::{Binding, EvalString};

pub mod native;
pub mod provider;

pub use native::NativeModuleProvider;
pub use provider::{JsonProvider, ManifestProvider, ProviderError, StaticProvider};

/// Declared concurrency pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolInfo {
    /// Pool name; empty selects the default pool.
    pub name: String,
    /// Maximum concurrent edges. Negative values are rejected on load.
    pub depth: i32,
}

impl PoolInfo {
    /// Declare a pool.
    #[must_use]
    pub fn new(name: impl Into<String>, depth: i32) -> Self {
        Self {
            name: name.into(),
            depth,
        }
    }
}

/// Declared rule: a name, an optional pool and an open bag of bindings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleInfo {
    /// Rule name referenced by edges.
    pub name: String,
    /// Pool used by edges that do not pick their own.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolInfo>,
    /// Bindings such as `command`, `description` or `depfile`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
}

impl RuleInfo {
    /// Declare a rule with no bindings.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            pool: None,
            bindings: Vec::new(),
        }
    }

    /// Append a binding.
    #[must_use]
    pub fn with_binding(mut self, key: impl Into<String>, value: impl Into<EvalString>) -> Self {
        self.bindings.push(Binding::new(key, value));
        self
    }

    /// Set the rule's pool.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolInfo) -> Self {
        self.pool = Some(pool);
        self
    }
}

/// One declarative build statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInfo {
    /// Name of the rule to apply.
    pub rule: String,
    /// Pool overriding the rule's.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolInfo>,
    /// Explicit inputs (`$in`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub inputs: Vec<EvalString>,
    /// Implicit inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub implicit_inputs: Vec<EvalString>,
    /// Order-only inputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_only_inputs: Vec<EvalString>,
    /// Explicit outputs (`$out`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<EvalString>,
    /// Implicit outputs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub implicit_outputs: Vec<EvalString>,
    /// Validation targets.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub validations: Vec<EvalString>,
    /// Edge-local bindings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bindings: Vec<Binding>,
}

impl EdgeInfo {
    /// Start an edge applying `rule`.
    #[must_use]
    pub fn new(rule: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            pool: None,
            inputs: Vec::new(),
            implicit_inputs: Vec::new(),
            order_only_inputs: Vec::new(),
            outputs: Vec::new(),
            implicit_outputs: Vec::new(),
            validations: Vec::new(),
            bindings: Vec::new(),
        }
    }

    /// Append an explicit input.
    #[must_use]
    pub fn with_input(mut self, path: impl Into<EvalString>) -> Self {
        self.inputs.push(path.into());
        self
    }

    /// Append an implicit input.
    #[must_use]
    pub fn with_implicit_input(mut self, path: impl Into<EvalString>) -> Self {
        self.implicit_inputs.push(path.into());
        self
    }

    /// Append an order-only input.
    #[must_use]
    pub fn with_order_only_input(mut self, path: impl Into<EvalString>) -> Self {
        self.order_only_inputs.push(path.into());
        self
    }

    /// Append an explicit output.
    #[must_use]
    pub fn with_output(mut self, path: impl Into<EvalString>) -> Self {
        self.outputs.push(path.into());
        self
    }

    /// Append an implicit output.
    #[must_use]
    pub fn with_implicit_output(mut self, path: impl Into<EvalString>) -> Self {
        self.implicit_outputs.push(path.into());
        self
    }

    /// Append a validation target.
    #[must_use]
    pub fn with_validation(mut self, path: impl Into<EvalString>) -> Self {
        self.validations.push(path.into());
        self
    }

    /// Append an edge-local binding.
    #[must_use]
    pub fn with_binding(mut self, key: impl Into<String>, value: impl Into<EvalString>) -> Self {
        self.bindings.push(Binding::new(key, value));
        self
    }

    /// Set the edge's pool.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolInfo) -> Self {
        self.pool = Some(pool);
        self
    }
}

/// Everything one manifest declares.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestInfo {
    /// Global bindings, evaluated in order.
    #[serde(default)]
    pub bindings: Vec<Binding>,
    /// Rules available to this manifest's edges.
    #[serde(default)]
    pub rules: Vec<RuleInfo>,
    /// Build statements.
    #[serde(default)]
    pub edges: Vec<EdgeInfo>,
    /// Default targets.
    #[serde(default)]
    pub defaults: Vec<EvalString>,
    /// Manifests loaded into the same scope.
    #[serde(default)]
    pub includes: Vec<EvalString>,
    /// Manifests loaded into a child scope.
    #[serde(default)]
    pub subninjas: Vec<EvalString>,
    /// Pools declared up front.
    #[serde(default)]
    pub pools: Vec<PoolInfo>,
}

impl ManifestInfo {
    /// An empty manifest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First declared rule called `name`.
    #[must_use]
    pub fn rule(&self, name: &str) -> Option<&RuleInfo> {
        self.rules.iter().find(|rule| rule.name == name)
    }

    /// Append a global binding.
    #[must_use]
    pub fn with_binding(mut self, key: impl Into<String>, value: impl Into<EvalString>) -> Self {
        self.bindings.push(Binding::new(key, value));
        self
    }

    /// Declare a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RuleInfo) -> Self {
        self.rules.push(rule);
        self
    }

    /// Append an edge.
    #[must_use]
    pub fn with_edge(mut self, edge: EdgeInfo) -> Self {
        self.edges.push(edge);
        self
    }

    /// Append a default target.
    #[must_use]
    pub fn with_default(mut self, path: impl Into<EvalString>) -> Self {
        self.defaults.push(path.into());
        self
    }

    /// Append an include.
    #[must_use]
    pub fn with_include(mut self, path: impl Into<EvalString>) -> Self {
        self.includes.push(path.into());
        self
    }

    /// Append a subninja.
    #[must_use]
    pub fn with_subninja(mut self, path: impl Into<EvalString>) -> Self {
        self.subninjas.push(path.into());
        self
    }

    /// Declare a pool.
    #[must_use]
    pub fn with_pool(mut self, pool: PoolInfo) -> Self {
        self.pools.push(pool);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Token;
    use rstest::rstest;

    #[rstest]
    fn deserialises_sparse_json() {
        let json = r#"{
            "rules": [{"name": "cc", "bindings": [
                {"key": "command", "value": [{"lit": "cc"}, {"var": "in"}]}
            ]}],
            "edges": [{"rule": "cc", "inputs": [[{"lit": "a.c"}]], "outputs": [[{"lit": "a.o"}]]}]
        }"#;
        let manifest: ManifestInfo = serde_json::from_str(json).expect("parse");
        let edge = manifest.edges.first().expect("edge");
        assert_eq!(edge.rule, "cc");
        assert!(edge.implicit_inputs.is_empty());
        assert_eq!(edge.outputs, vec![EvalString::literal("a.o")]);
        let rule = manifest.rule("cc").expect("rule");
        assert_eq!(
            rule.bindings.first().map(|b| b.value.tokens().to_vec()),
            Some(vec![Token::literal("cc"), Token::variable("in")])
        );
    }

    #[rstest]
    fn rule_lookup_returns_first_declaration() {
        let manifest = ManifestInfo::new()
            .with_rule(RuleInfo::new("cc").with_binding("command", "first"))
            .with_rule(RuleInfo::new("cc").with_binding("command", "second"));
        let rule = manifest.rule("cc").expect("rule");
        assert_eq!(
            rule.bindings.first().map(|b| b.value.to_string()),
            Some("first".to_owned())
        );
        assert!(manifest.rule("ld").is_none());
    }
}
