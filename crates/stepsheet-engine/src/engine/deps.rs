//! Dependency extraction from formula strings.
//!
//! Formulas name the columns they read by header. A header reference is an
//! occurrence of a header in the formula text that:
//! - is not inside a string literal,
//! - is not glued to neighbouring identifier characters,
//! - is not immediately called like a function (`LEN(...)` never names a
//!   column called `LEN`).
//!
//! Longer headers win over shorter ones, so `Total Price` is never read as
//! `Total` followed by junk.

/// One header occurrence inside a formula body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderReference {
    /// Byte offset where the reference starts.
    pub start: usize,
    /// Byte offset one past the end of the reference.
    pub end: usize,
    /// The header that was matched.
    pub header: String,
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Blank out string literal contents so header scanning ignores them.
/// Byte offsets are preserved.
pub(crate) fn strip_string_literals(script: &str) -> String {
    let mut out = String::with_capacity(script.len());
    let mut in_string: Option<char> = None;
    let mut escaped = false;

    for c in script.chars() {
        match in_string {
            Some(quote) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == quote {
                    in_string = None;
                    out.push(c);
                    continue;
                }
                out.extend(std::iter::repeat_n(' ', c.len_utf8()));
            }
            None => {
                if c == '"' || c == '\'' || c == '`' {
                    in_string = Some(c);
                }
                out.push(c);
            }
        }
    }

    out
}

/// Find every header reference in `body`, in order of appearance.
pub fn find_header_references<S: AsRef<str>>(body: &str, headers: &[S]) -> Vec<HeaderReference> {
    let masked = strip_string_literals(body);

    let mut candidates: Vec<&str> = headers
        .iter()
        .map(AsRef::as_ref)
        .filter(|h| !h.trim().is_empty())
        .collect();
    candidates.sort_by_key(|h| std::cmp::Reverse(h.len()));

    let mut refs = Vec::new();
    let mut pos = 0;
    while pos < masked.len() {
        let rest = &masked[pos..];
        let prev = masked[..pos].chars().next_back();
        let matched = candidates.iter().find(|header| {
            if !rest.starts_with(**header) {
                return false;
            }
            let first = header.chars().next();
            let last = header.chars().next_back();
            if first.is_some_and(is_ident_char) && prev.is_some_and(is_ident_char) {
                return false;
            }
            let after = &rest[header.len()..];
            if last.is_some_and(is_ident_char) && after.chars().next().is_some_and(is_ident_char) {
                return false;
            }
            !after.trim_start().starts_with('(')
        });

        match matched {
            Some(header) => {
                refs.push(HeaderReference {
                    start: pos,
                    end: pos + header.len(),
                    header: header.to_string(),
                });
                pos += header.len();
            }
            None => {
                pos += rest.chars().next().map_or(1, char::len_utf8);
            }
        }
    }

    refs
}

/// Headers a formula body reads, deduplicated, in order of first use.
pub fn extract_dependencies<S: AsRef<str>>(body: &str, headers: &[S]) -> Vec<String> {
    let mut deps: Vec<String> = Vec::new();
    for reference in find_header_references(body, headers) {
        if !deps.contains(&reference.header) {
            deps.push(reference.header);
        }
    }
    deps
}
