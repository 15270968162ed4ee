//! Unevaluated text values and their evaluation.
//!
//! Command lines, paths and flags arrive from a manifest as an [`EvalString`]:
//! an ordered run of literal text and variable references. Evaluating one
//! against an [`Env`] resolves each reference and joins the pieces with a
//! single space, so `[a, $x, b]` with `x = Y` yields `"a Y b"`.
//!
//! # Examples
//!
//! ```
//! use std::collections::HashMap;
//! use cnobi::eval::{EvalString, Token};
//!
//! let value = EvalString::from(vec![
//!     Token::literal("cc"),
//!     Token::variable("flags"),
//!     Token::literal("-c"),
//! ]);
//! let env = HashMap::from([("flags".to_owned(), "-O2".to_owned())]);
//! assert_eq!(value.evaluate(&env), "cc -O2 -c");
//! ```

use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};

pub mod scope;

pub use scope::{ScopeId, Scopes};

/// Variable lookup used by [`EvalString::evaluate`].
///
/// Unknown names resolve to the empty string; lookups never fail.
pub trait Env {
    /// Resolve `var` to its value, or the empty string when unbound.
    fn lookup_variable(&self, var: &str) -> String;
}

impl<S: BuildHasher> Env for HashMap<String, String, S> {
    fn lookup_variable(&self, var: &str) -> String {
        self.get(var).cloned().unwrap_or_default()
    }
}

/// One piece of an [`EvalString`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    /// Text copied verbatim.
    #[serde(rename = "lit")]
    Literal(String),
    /// Name resolved through an [`Env`].
    #[serde(rename = "var")]
    Variable(String),
}

impl Token {
    /// Build a literal token.
    #[must_use]
    pub fn literal(text: impl Into<String>) -> Self {
        Self::Literal(text.into())
    }

    /// Build a variable reference.
    #[must_use]
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }
}

/// An ordered sequence of [`Token`]s awaiting evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EvalString {
    tokens: Vec<Token>,
}

impl EvalString {
    /// Create an empty value.
    #[must_use]
    pub const fn new() -> Self {
        Self { tokens: Vec::new() }
    }

    /// Shorthand for a value holding a single literal.
    #[must_use]
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            tokens: vec![Token::literal(text)],
        }
    }

    /// Append a literal token.
    pub fn add_text(&mut self, text: impl Into<String>) {
        self.tokens.push(Token::literal(text));
    }

    /// Append a variable reference.
    pub fn add_variable(&mut self, name: impl Into<String>) {
        self.tokens.push(Token::variable(name));
    }

    /// Tokens in declaration order.
    #[must_use]
    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// Whether the value holds no tokens at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Resolve every token against `env` and join the results with single
    /// spaces.
    ///
    /// Evaluation is pure: the same value and environment always produce the
    /// same string, so one value may be re-resolved in several scopes.
    #[must_use]
    pub fn evaluate(&self, env: &dyn Env) -> String {
        let mut result = String::new();
        for (idx, token) in self.tokens.iter().enumerate() {
            if idx > 0 {
                result.push(' ');
            }
            match token {
                Token::Literal(text) => result.push_str(text),
                Token::Variable(name) => result.push_str(&env.lookup_variable(name)),
            }
        }
        result
    }
}

impl From<Vec<Token>> for EvalString {
    fn from(tokens: Vec<Token>) -> Self {
        Self { tokens }
    }
}

impl FromIterator<Token> for EvalString {
    fn from_iter<I: IntoIterator<Item = Token>>(iter: I) -> Self {
        Self {
            tokens: iter.into_iter().collect(),
        }
    }
}

/// Renders the value in manifest syntax, e.g. `cc ${flags} -c`.
impl Display for EvalString {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for (idx, token) in self.tokens.iter().enumerate() {
            if idx > 0 {
                f.write_str(" ")?;
            }
            match token {
                Token::Literal(text) => f.write_str(text)?,
                Token::Variable(name) => write!(f, "${{{name}}}")?,
            }
        }
        Ok(())
    }
}

/// A named, unevaluated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    /// Variable name.
    pub key: String,
    /// Value to evaluate in the appropriate scope.
    pub value: EvalString,
}

impl Binding {
    /// Pair `key` with `value`.
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<EvalString>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl From<&str> for EvalString {
    fn from(text: &str) -> Self {
        Self::literal(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect()
    }

    #[rstest]
    #[case(vec![], "")]
    #[case(vec![Token::literal("a")], "a")]
    #[case(
        vec![Token::literal("a"), Token::variable("x"), Token::literal("b")],
        "a Y b"
    )]
    #[case(vec![Token::variable("x"), Token::variable("x")], "Y Y")]
    #[case(vec![Token::literal("a"), Token::variable("missing")], "a ")]
    fn evaluate_joins_tokens_with_single_spaces(
        #[case] tokens: Vec<Token>,
        #[case] expected: &str,
    ) {
        let value = EvalString::from(tokens);
        assert_eq!(value.evaluate(&env(&[("x", "Y")])), expected);
    }

    #[rstest]
    fn evaluate_is_repeatable_across_environments() {
        let value: EvalString = [Token::literal("-I"), Token::variable("dir")]
            .into_iter()
            .collect();
        let first = env(&[("dir", "include")]);
        let second = env(&[("dir", "vendor")]);
        assert_eq!(value.evaluate(&first), value.evaluate(&first));
        assert_eq!(value.evaluate(&second), "-I vendor");
    }

    #[rstest]
    fn display_uses_braced_variables() {
        let mut value = EvalString::literal("cc");
        value.add_variable("in");
        assert_eq!(value.to_string(), "cc ${in}");
    }

    #[rstest]
    fn tokens_deserialise_from_tagged_json() {
        let value: EvalString =
            serde_json::from_str(r#"[{"lit": "cc"}, {"var": "flags"}]"#).expect("parse");
        assert_eq!(
            value.tokens(),
            &[Token::literal("cc"), Token::variable("flags")]
        );
    }
}
