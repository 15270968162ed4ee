//! Path canonicalisation.
//!
//! Every path entering the graph is normalised so that all spellings of a
//! location map to one node: `.` components and repeated separators vanish,
//! `name/..` pairs collapse, and both `/` and `\` count as separators. The
//! canonical text always uses `/`; the positions that were `\` are kept in a
//! bit mask so the original convention can be restored for display.

/// Number of separators whose convention can be recorded.
pub const MAX_SLASH_BITS: usize = 64;

fn is_separator(ch: char) -> bool {
    ch == '/' || ch == '\\'
}

/// Normalise `path`, returning the canonical text and the separator bits.
///
/// Bit `n` of the mask is set when the `n`-th separator of the canonical
/// path was a backslash in the input.
///
/// # Examples
///
/// ```
/// use cnobi::graph::canonicalize_path;
///
/// assert_eq!(canonicalize_path("src//./a.c"), ("src/a.c".to_owned(), 0));
/// assert_eq!(canonicalize_path("out\\obj/a.o"), ("out/obj/a.o".to_owned(), 0b01));
/// ```
#[must_use]
pub fn canonicalize_path(path: &str) -> (String, u64) {
    if path.is_empty() {
        return (String::new(), 0);
    }

    let leading = path.chars().next().filter(|ch| is_separator(*ch));
    let body = leading.map_or(path, |ch| path.get(ch.len_utf8()..).unwrap_or_default());

    let mut kept: Vec<(&str, Option<char>)> = Vec::new();
    for piece in body.split_inclusive(is_separator) {
        let (component, separator) = match piece.chars().last() {
            Some(ch) if is_separator(ch) => (
                piece.get(..piece.len() - ch.len_utf8()).unwrap_or_default(),
                Some(ch),
            ),
            _ => (piece, None),
        };
        match component {
            "" | "." => {}
            ".." => match kept.last() {
                Some((prev, _)) if *prev != ".." => {
                    kept.pop();
                }
                _ => kept.push((component, separator)),
            },
            _ => kept.push((component, separator)),
        }
    }

    let mut canonical = String::with_capacity(path.len());
    let mut bits = 0_u64;
    let mut index = 0_usize;
    let mut record = |separator: Option<char>, bits: &mut u64| {
        if separator == Some('\\') && index < MAX_SLASH_BITS {
            *bits |= 1 << index;
        }
        index += 1;
    };

    if let Some(sep) = leading {
        canonical.push('/');
        record(Some(sep), &mut bits);
    }
    let count = kept.len();
    for (position, (component, separator)) in kept.into_iter().enumerate() {
        canonical.push_str(component);
        if position + 1 < count {
            canonical.push('/');
            record(separator, &mut bits);
        }
    }
    if canonical.is_empty() {
        canonical.push('.');
    }
    (canonical, bits)
}

/// Rebuild the input spelling of a canonical path from its separator bits.
///
/// # Examples
///
/// ```
/// use cnobi::graph::decanonicalize_path;
///
/// assert_eq!(decanonicalize_path("out/obj/a.o", 0b01), "out\\obj/a.o");
/// ```
#[must_use]
pub fn decanonicalize_path(path: &str, slash_bits: u64) -> String {
    let mut index = 0_usize;
    path.chars()
        .map(|ch| {
            if ch != '/' {
                return ch;
            }
            let backslash = index < MAX_SLASH_BITS && slash_bits & (1 << index) != 0;
            index += 1;
            if backslash { '\\' } else { '/' }
        })
        .collect()
}
