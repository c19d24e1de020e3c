//! Stable column identifiers.
//!
//! A [`ColumnId`] names a column independently of its header, so renames
//! do not break formulas, formats or graphs that point at the column.
//! Two schemes exist: an opaque counter (`col-0`, `col-1`, ...) handed out
//! by the owning id map, and the legacy scheme that derives the id from
//! the header itself (see [`legacy_header`]).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnId(String);

impl ColumnId {
    pub fn new(id: impl Into<String>) -> ColumnId {
        ColumnId(id.into())
    }

    /// Counter-scheme id.
    pub fn sequential(n: u64) -> ColumnId {
        ColumnId(format!("col-{}", n))
    }

    /// Legacy-scheme id, derived from the header.
    pub fn legacy(header: &str) -> ColumnId {
        ColumnId(legacy_header(header))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ColumnId {
    fn from(s: &str) -> Self {
        ColumnId(s.to_string())
    }
}

impl AsRef<str> for ColumnId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn invalid_char_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_]").expect("invalid char regex must compile"))
}

/// Normalise a header to the legacy valid-identifier form.
///
/// Whitespace and characters outside `[A-Za-z0-9_]` become `_`; a header
/// with no letters at all is prefixed with `c` so it cannot read as a
/// number.
pub fn legacy_header(header: &str) -> String {
    let replaced = invalid_char_re().replace_all(header, "_").into_owned();
    if replaced.chars().any(|c| c.is_ascii_alphabetic()) {
        replaced
    } else {
        format!("c{}", replaced)
    }
}
