//! Per-edge variable evaluation.
//!
//! An edge resolves `$in`, `$in_newline` and `$out` from its own nodes. Any
//! other name is looked up in the edge's scope first, then in the rule's
//! bindings evaluated against this same environment, then in enclosing
//! scopes.

use std::cell::RefCell;

use shell_quote::{QuoteRefExt, Sh};
use tracing::warn;

use super::{Edge, EdgeId, NodeId, State};
use crate::eval::Env;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Escape {
    Shell,
    None,
}

struct EdgeEnv<'a> {
    state: &'a State,
    edge: &'a Edge,
    escape: Escape,
    lookups: RefCell<Vec<String>>,
}

fn is_shell_safe(ch: char) -> bool {
    ch.is_ascii_alphanumeric()
        || matches!(ch, '_' | '+' | '-' | '.' | '/' | '\\' | ':' | ',' | '=' | '@')
}

fn shell_quoted(path: &str) -> String {
    let bytes: Vec<u8> = path.quoted(Sh);
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            debug_assert!(false, "quoted paths must be valid UTF-8: {err}");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

impl EdgeEnv<'_> {
    fn path_list(&self, nodes: &[NodeId], separator: char) -> String {
        let mut result = String::new();
        for id in nodes {
            let Some(node) = self.state.node(*id) else {
                continue;
            };
            if !result.is_empty() {
                result.push(separator);
            }
            let path = node.path_decanonicalized();
            if self.escape == Escape::Shell && !path.chars().all(is_shell_safe) {
                result.push_str(&shell_quoted(&path));
            } else {
                result.push_str(&path);
            }
        }
        result
    }
}

impl Env for EdgeEnv<'_> {
    fn lookup_variable(&self, var: &str) -> String {
        match var {
            "in" => return self.path_list(self.edge.explicit_inputs(), ' '),
            "in_newline" => return self.path_list(self.edge.explicit_inputs(), '\n'),
            "out" => return self.path_list(self.edge.explicit_outputs(), ' '),
            _ => {}
        }

        if self.lookups.borrow().iter().any(|seen| seen == var) {
            let chain = self.lookups.borrow().join(" -> ");
            warn!(
                rule = self.edge.rule().name(),
                "cycle in rule variables: {chain} -> {var}"
            );
            return String::new();
        }

        self.lookups.borrow_mut().push(var.to_owned());
        let value = self.state.scopes().lookup_with_fallback(
            self.edge.scope(),
            var,
            self.edge.rule().binding(var),
            self,
        );
        self.lookups.borrow_mut().pop();
        value
    }
}

impl State {
    fn evaluate_edge_binding(&self, edge: EdgeId, key: &str, escape: Escape) -> String {
        let Some(edge) = self.edge(edge) else {
            return String::new();
        };
        let env = EdgeEnv {
            state: self,
            edge,
            escape,
            lookups: RefCell::new(Vec::new()),
        };
        env.lookup_variable(key)
    }

    /// Value of `key` as the edge sees it, with paths in `$in` and `$out`
    /// shell-quoted where needed.
    #[must_use]
    pub fn edge_binding(&self, edge: EdgeId, key: &str) -> String {
        self.evaluate_edge_binding(edge, key, Escape::Shell)
    }

    /// Value of `key` as the edge sees it, with paths left unquoted.
    #[must_use]
    pub fn edge_unescaped_binding(&self, edge: EdgeId, key: &str) -> String {
        self.evaluate_edge_binding(edge, key, Escape::None)
    }

    /// Whether the edge sees a non-empty value for `key`.
    #[must_use]
    pub fn edge_binding_bool(&self, edge: EdgeId, key: &str) -> bool {
        !self.edge_binding(edge, key).is_empty()
    }

    /// The command line of `edge`.
    ///
    /// With `include_rsp_file`, a non-empty `rspfile_content` is appended as
    /// `;rspfile=<content>` so that content changes alter the command.
    #[must_use]
    pub fn evaluate_command(&self, edge: EdgeId, include_rsp_file: bool) -> String {
        let mut command = self.edge_binding(edge, "command");
        if include_rsp_file {
            let content = self.edge_binding(edge, "rspfile_content");
            if !content.is_empty() {
                command.push_str(";rspfile=");
                command.push_str(&content);
            }
        }
        command
    }
}
