//! C layout of a compiled manifest and its decoder.
//!
//! The structs mirror `include/cnobi_manifest.h` field for field. Lists are
//! terminated by zeroed entries; [`decode_manifest`] walks them and copies
//! everything into an owned [`ManifestInfo`] so the library can be unloaded
//! straight afterwards.

use std::collections::HashSet;
use std::ffi::{CStr, c_char, c_int};

use camino::Utf8Path;

use crate::eval::{Binding, EvalString, Token};
use crate::manifest::{EdgeInfo, ManifestInfo, PoolInfo, ProviderError, RuleInfo};

/// Name of the exported manifest object.
pub const MANIFEST_SYMBOL: &str = "manifest";

/// `CNOBI_LIT`.
pub const TOKEN_LITERAL: c_int = 0;
/// `CNOBI_VAR`.
pub const TOKEN_VARIABLE: c_int = 1;

/// Upper bound on any single list, so a missing terminator surfaces as an
/// error rather than a runaway read.
const MAX_ENTRIES: usize = 1 << 24;

/// `struct cnobi_token`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawToken {
    /// NUL-terminated text; NULL ends the list.
    pub text: *const c_char,
    /// [`TOKEN_LITERAL`] or [`TOKEN_VARIABLE`].
    pub kind: c_int,
}

/// `struct cnobi_binding`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawBinding {
    /// Variable name; NULL ends the list.
    pub key: *const c_char,
    /// Token list.
    pub value: *const RawToken,
}

/// `struct cnobi_pool`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawPool {
    /// Pool name; NULL ends a pool list.
    pub name: *const c_char,
    /// Declared depth.
    pub depth: c_int,
}

/// `struct cnobi_rule`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawRule {
    /// Rule name.
    pub name: *const c_char,
    /// Optional pool.
    pub pool: *const RawPool,
    /// Optional binding list.
    pub bindings: *const RawBinding,
}

/// `struct cnobi_edge`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEdge {
    /// Applied rule; NULL ends the list.
    pub rule: *const RawRule,
    /// Optional pool.
    pub pool: *const RawPool,
    /// Explicit inputs.
    pub inputs: *const *const RawToken,
    /// Implicit inputs.
    pub implicit_inputs: *const *const RawToken,
    /// Order-only inputs.
    pub order_only_inputs: *const *const RawToken,
    /// Explicit outputs.
    pub outputs: *const *const RawToken,
    /// Implicit outputs.
    pub implicit_outputs: *const *const RawToken,
    /// Validations.
    pub validations: *const *const RawToken,
    /// Edge-local bindings.
    pub bindings: *const RawBinding,
}

/// `struct cnobi_manifest`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawManifest {
    /// Global bindings.
    pub bindings: *const RawBinding,
    /// Build edges.
    pub edges: *const RawEdge,
    /// Default targets.
    pub defaults: *const *const RawToken,
    /// Included manifests.
    pub includes: *const *const RawToken,
    /// Subninja manifests.
    pub subninjas: *const *const RawToken,
    /// Declared pools.
    pub pools: *const RawPool,
}

struct Decoder<'a> {
    artifact: &'a Utf8Path,
    seen_rules: HashSet<*const RawRule>,
    rules: Vec<RuleInfo>,
}

impl Decoder<'_> {
    fn malformed(&self, reason: impl Into<String>) -> ProviderError {
        ProviderError::Malformed {
            artifact: self.artifact.to_path_buf(),
            reason: reason.into(),
        }
    }

    /// Collect entries of a zero-terminated array up to the terminator.
    ///
    /// # Safety
    ///
    /// `ptr` must be NULL or point to an array whose entries are readable up
    /// to and including one for which `is_end` holds.
    unsafe fn walk<T: Copy>(
        &self,
        ptr: *const T,
        what: &str,
        is_end: impl Fn(&T) -> bool,
    ) -> Result<Vec<T>, ProviderError> {
        let mut items = Vec::new();
        if ptr.is_null() {
            return Ok(items);
        }
        for offset in 0..MAX_ENTRIES {
            // SAFETY: the caller guarantees entries up to the terminator are
            // readable and we stop at the first terminator.
            let item = unsafe { *ptr.add(offset) };
            if is_end(&item) {
                return Ok(items);
            }
            items.push(item);
        }
        Err(self.malformed(format!("unterminated {what} list")))
    }

    /// # Safety
    ///
    /// `ptr` must be a valid NUL-terminated string.
    unsafe fn string(&self, ptr: *const c_char, what: &str) -> Result<String, ProviderError> {
        if ptr.is_null() {
            return Err(self.malformed(format!("missing {what}")));
        }
        // SAFETY: non-null and NUL-terminated per the caller's contract.
        let text = unsafe { CStr::from_ptr(ptr) };
        text.to_str()
            .map(str::to_owned)
            .map_err(|_| self.malformed(format!("{what} is not valid UTF-8")))
    }

    unsafe fn eval(&self, ptr: *const RawToken) -> Result<EvalString, ProviderError> {
        // SAFETY: token lists come from the manifest and end at text == NULL.
        let raw = unsafe { self.walk(ptr, "token", |token| token.text.is_null()) }?;
        raw.into_iter()
            .map(|token| {
                // SAFETY: the walk stopped before the NULL terminator.
                let text = unsafe { self.string(token.text, "token text") }?;
                match token.kind {
                    TOKEN_LITERAL => Ok(Token::Literal(text)),
                    TOKEN_VARIABLE => Ok(Token::Variable(text)),
                    other => Err(self.malformed(format!("unknown token kind {other}"))),
                }
            })
            .collect()
    }

    unsafe fn paths(&self, ptr: *const *const RawToken) -> Result<Vec<EvalString>, ProviderError> {
        // SAFETY: path lists end at a NULL pointer.
        let raw = unsafe { self.walk(ptr, "path", |path| path.is_null()) }?;
        raw.into_iter()
            // SAFETY: each entry is a non-null token list.
            .map(|path| unsafe { self.eval(path) })
            .collect()
    }

    unsafe fn bindings(&self, ptr: *const RawBinding) -> Result<Vec<Binding>, ProviderError> {
        // SAFETY: binding lists end at key == NULL.
        let raw = unsafe { self.walk(ptr, "binding", |binding| binding.key.is_null()) }?;
        raw.into_iter()
            .map(|binding| {
                // SAFETY: key is non-null past the walk; value is a token list.
                let key = unsafe { self.string(binding.key, "binding key") }?;
                let value = unsafe { self.eval(binding.value) }?;
                Ok(Binding { key, value })
            })
            .collect()
    }

    unsafe fn pool(&self, ptr: *const RawPool) -> Result<Option<PoolInfo>, ProviderError> {
        if ptr.is_null() {
            return Ok(None);
        }
        // SAFETY: non-null pool pointers reference a `struct cnobi_pool`.
        let raw = unsafe { *ptr };
        if raw.name.is_null() {
            return Ok(None);
        }
        // SAFETY: name checked above.
        let name = unsafe { self.string(raw.name, "pool name") }?;
        Ok(Some(PoolInfo::new(name, raw.depth)))
    }

    unsafe fn rule(&mut self, ptr: *const RawRule) -> Result<String, ProviderError> {
        // SAFETY: edges only reach here with a non-null rule pointer.
        let raw = unsafe { *ptr };
        let name = unsafe { self.string(raw.name, "rule name") }?;
        if self.seen_rules.insert(ptr) {
            let rule = RuleInfo {
                name: name.clone(),
                // SAFETY: optional pointers into the same manifest.
                pool: unsafe { self.pool(raw.pool) }?,
                bindings: unsafe { self.bindings(raw.bindings) }?,
            };
            self.rules.push(rule);
        }
        Ok(name)
    }

    unsafe fn edge(&mut self, raw: &RawEdge) -> Result<EdgeInfo, ProviderError> {
        // SAFETY: every pointer below is NULL or a list laid out per the header.
        unsafe {
            Ok(EdgeInfo {
                rule: self.rule(raw.rule)?,
                pool: self.pool(raw.pool)?,
                inputs: self.paths(raw.inputs)?,
                implicit_inputs: self.paths(raw.implicit_inputs)?,
                order_only_inputs: self.paths(raw.order_only_inputs)?,
                outputs: self.paths(raw.outputs)?,
                implicit_outputs: self.paths(raw.implicit_outputs)?,
                validations: self.paths(raw.validations)?,
                bindings: self.bindings(raw.bindings)?,
            })
        }
    }
}

/// Copy a raw manifest into owned data.
///
/// Rules are collected in first-use order; a rule object referenced by
/// several edges is decoded once.
///
/// # Safety
///
/// `raw` must follow the layout of `include/cnobi_manifest.h`: every
/// non-null pointer must reference readable, correctly terminated data that
/// stays valid for the duration of the call.
///
/// # Errors
///
/// Returns [`ProviderError::Malformed`] for non-UTF-8 text, unknown token
/// kinds, missing names or unterminated lists.
pub unsafe fn decode_manifest(
    raw: &RawManifest,
    artifact: &Utf8Path,
) -> Result<ManifestInfo, ProviderError> {
    let mut decoder = Decoder {
        artifact,
        seen_rules: HashSet::new(),
        rules: Vec::new(),
    };
    // SAFETY: forwarded from this function's contract.
    unsafe {
        let bindings = decoder.bindings(raw.bindings)?;
        let raw_edges = decoder.walk(raw.edges, "edge", |edge| edge.rule.is_null())?;
        let mut edges = Vec::with_capacity(raw_edges.len());
        for raw_edge in &raw_edges {
            edges.push(decoder.edge(raw_edge)?);
        }
        let raw_pools = decoder.walk(raw.pools, "pool", |pool| pool.name.is_null())?;
        let mut pools = Vec::with_capacity(raw_pools.len());
        for raw_pool in raw_pools {
            let name = decoder.string(raw_pool.name, "pool name")?;
            pools.push(PoolInfo::new(name, raw_pool.depth));
        }
        let defaults = decoder.paths(raw.defaults)?;
        let includes = decoder.paths(raw.includes)?;
        let subninjas = decoder.paths(raw.subninjas)?;
        Ok(ManifestInfo {
            bindings,
            rules: decoder.rules,
            edges,
            defaults,
            includes,
            subninjas,
            pools,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::ptr;

    use super::*;
    use rstest::rstest;

    const END_TOKEN: RawToken = RawToken {
        text: ptr::null(),
        kind: 0,
    };
    const END_BINDING: RawBinding = RawBinding {
        key: ptr::null(),
        value: ptr::null(),
    };

    fn empty_edge() -> RawEdge {
        RawEdge {
            rule: ptr::null(),
            pool: ptr::null(),
            inputs: ptr::null(),
            implicit_inputs: ptr::null(),
            order_only_inputs: ptr::null(),
            outputs: ptr::null(),
            implicit_outputs: ptr::null(),
            validations: ptr::null(),
            bindings: ptr::null(),
        }
    }

    fn empty_manifest() -> RawManifest {
        RawManifest {
            bindings: ptr::null(),
            edges: ptr::null(),
            defaults: ptr::null(),
            includes: ptr::null(),
            subninjas: ptr::null(),
            pools: ptr::null(),
        }
    }

    #[rstest]
    fn decodes_edges_rules_and_defaults() {
        let command = [
            RawToken {
                text: c"cc".as_ptr(),
                kind: TOKEN_LITERAL,
            },
            RawToken {
                text: c"in".as_ptr(),
                kind: TOKEN_VARIABLE,
            },
            END_TOKEN,
        ];
        let rule_bindings = [
            RawBinding {
                key: c"command".as_ptr(),
                value: command.as_ptr(),
            },
            END_BINDING,
        ];
        let link_pool = RawPool {
            name: c"link".as_ptr(),
            depth: 2,
        };
        let rule = RawRule {
            name: c"cc".as_ptr(),
            pool: &raw const link_pool,
            bindings: rule_bindings.as_ptr(),
        };
        let a_c = [
            RawToken {
                text: c"a.c".as_ptr(),
                kind: TOKEN_LITERAL,
            },
            END_TOKEN,
        ];
        let a_o = [
            RawToken {
                text: c"a.o".as_ptr(),
                kind: TOKEN_LITERAL,
            },
            END_TOKEN,
        ];
        let b_c = [
            RawToken {
                text: c"b.c".as_ptr(),
                kind: TOKEN_LITERAL,
            },
            END_TOKEN,
        ];
        let b_o = [
            RawToken {
                text: c"b.o".as_ptr(),
                kind: TOKEN_LITERAL,
            },
            END_TOKEN,
        ];
        let first_in = [a_c.as_ptr(), ptr::null()];
        let first_out = [a_o.as_ptr(), ptr::null()];
        let second_in = [b_c.as_ptr(), ptr::null()];
        let second_out = [b_o.as_ptr(), ptr::null()];
        let edges = [
            RawEdge {
                rule: &raw const rule,
                inputs: first_in.as_ptr(),
                outputs: first_out.as_ptr(),
                ..empty_edge()
            },
            RawEdge {
                rule: &raw const rule,
                inputs: second_in.as_ptr(),
                outputs: second_out.as_ptr(),
                ..empty_edge()
            },
            empty_edge(),
        ];
        let defaults = [a_o.as_ptr(), ptr::null()];
        let raw = RawManifest {
            edges: edges.as_ptr(),
            defaults: defaults.as_ptr(),
            ..empty_manifest()
        };

        // SAFETY: every list above is terminated and outlives the call.
        let manifest =
            unsafe { decode_manifest(&raw, Utf8Path::new("build.so")) }.expect("decode");

        assert_eq!(manifest.rules.len(), 1);
        let rule = manifest.rule("cc").expect("rule");
        assert_eq!(rule.pool, Some(PoolInfo::new("link", 2)));
        assert_eq!(
            rule.bindings.first().map(|b| b.value.tokens().to_vec()),
            Some(vec![Token::literal("cc"), Token::variable("in")])
        );
        assert_eq!(manifest.edges.len(), 2);
        assert_eq!(
            manifest.edges.get(1).map(|edge| edge.outputs.clone()),
            Some(vec![EvalString::literal("b.o")])
        );
        assert_eq!(manifest.defaults, vec![EvalString::literal("a.o")]);
        assert!(manifest.includes.is_empty());
    }

    #[rstest]
    fn unknown_token_kind_is_malformed() {
        let value = [
            RawToken {
                text: c"x".as_ptr(),
                kind: 7,
            },
            END_TOKEN,
        ];
        let bindings = [
            RawBinding {
                key: c"flags".as_ptr(),
                value: value.as_ptr(),
            },
            END_BINDING,
        ];
        let raw = RawManifest {
            bindings: bindings.as_ptr(),
            ..empty_manifest()
        };
        // SAFETY: terminated lists that outlive the call.
        let err = unsafe { decode_manifest(&raw, Utf8Path::new("build.so")) }
            .expect_err("bad token kind");
        assert!(matches!(err, ProviderError::Malformed { .. }));
    }

    #[rstest]
    fn null_lists_decode_as_empty() {
        // SAFETY: all pointers are NULL.
        let manifest = unsafe { decode_manifest(&empty_manifest(), Utf8Path::new("build.so")) }
            .expect("decode");
        assert_eq!(manifest, ManifestInfo::default());
    }
}
