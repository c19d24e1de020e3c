//! Formula rewriting.
//!
//! Before a formula is handed to Rhai, header references are replaced with
//! calls that read the column cache:
//! - `SUM(Price)` becomes `SUM_COLUMN(0)` (whole-column aggregate),
//! - any other `Price` becomes `VALUE(0, ROW)` (the value in the current row).
//!
//! The same reference scan drives the pandas rendering of a formula and the
//! rewrite of formulas when a column they read is renamed.

use super::deps::{HeaderReference, find_header_references};
use super::format::python_string_literal;
use crate::builtins::column_builtin_rhai_name;

/// A formula rewritten for evaluation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedFormula {
    /// Rhai expression text.
    pub script: String,
    /// Header read through each cache slot.
    pub slots: Vec<String>,
}

/// The formula text after the leading `=`.
pub fn formula_body(formula: &str) -> &str {
    let trimmed = formula.trim_start();
    trimmed.strip_prefix('=').unwrap_or(trimmed)
}

/// If `reference` is the sole argument of an aggregate call, the byte span
/// of the whole call and the cache function that replaces it.
fn aggregate_span(body: &str, reference: &HeaderReference) -> Option<(usize, usize, &'static str)> {
    let before = body[..reference.start].trim_end();
    let before = before.strip_suffix('(')?.trim_end();
    let name_start = before
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_alphanumeric() || *c == '_')
        .last()
        .map(|(i, _)| i)?;
    let rhai_name = column_builtin_rhai_name(&before[name_start..])?;

    let after = &body[reference.end..];
    let close = after.len() - after.trim_start().len();
    if !after[close..].starts_with(')') {
        return None;
    }
    Some((name_start, reference.end + close + 1, rhai_name))
}

/// Rewrite a formula into a Rhai expression over the column cache.
pub fn preprocess_formula<S: AsRef<str>>(formula: &str, headers: &[S]) -> PreparedFormula {
    let body = formula_body(formula);
    let mut slots: Vec<String> = Vec::new();
    let mut slot_for = |header: &str| match slots.iter().position(|s| s == header) {
        Some(slot) => slot,
        None => {
            slots.push(header.to_string());
            slots.len() - 1
        }
    };

    let mut script = String::with_capacity(body.len());
    let mut cursor = 0;
    for reference in find_header_references(body, headers) {
        if reference.start < cursor {
            continue;
        }
        let slot = slot_for(&reference.header);
        match aggregate_span(body, &reference) {
            Some((start, end, rhai_name)) if start >= cursor => {
                script.push_str(&body[cursor..start]);
                script.push_str(&format!("{}({})", rhai_name, slot));
                cursor = end;
            }
            _ => {
                script.push_str(&body[cursor..reference.start]);
                script.push_str(&format!("VALUE({}, ROW)", slot));
                cursor = reference.end;
            }
        }
    }
    script.push_str(&body[cursor..]);

    PreparedFormula { script, slots }
}

/// Render a formula body as a pandas expression over `df_name`.
pub fn to_python<S: AsRef<str>>(formula: &str, headers: &[S], df_name: &str) -> String {
    let body = formula_body(formula).trim();
    let mut out = String::with_capacity(body.len());
    let mut cursor = 0;
    for reference in find_header_references(body, headers) {
        out.push_str(&body[cursor..reference.start]);
        out.push_str(&format!("{}[{}]", df_name, python_string_literal(&reference.header)));
        cursor = reference.end;
    }
    out.push_str(&body[cursor..]);
    out
}

/// Rewrite references to `old` so they name `new` instead.
///
/// Only real references are touched: text inside string literals and
/// longer headers that merely contain `old` are left alone.
pub fn rename_references<S: AsRef<str>>(formula: &str, old: &str, new: &str, headers: &[S]) -> String {
    let prefix_len = formula.len() - formula_body(formula).len();
    let body = &formula[prefix_len..];

    let mut out = String::with_capacity(formula.len());
    out.push_str(&formula[..prefix_len]);
    let mut cursor = 0;
    for reference in find_header_references(body, headers) {
        if reference.header != old {
            continue;
        }
        out.push_str(&body[cursor..reference.start]);
        out.push_str(new);
        cursor = reference.end;
    }
    out.push_str(&body[cursor..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_row_references_become_value_calls() {
        let prepared = preprocess_formula("=A + B * 2", &["A", "B"]);
        assert_eq!(prepared.script, "VALUE(0, ROW) + VALUE(1, ROW) * 2");
        assert_eq!(prepared.slots, vec!["A", "B"]);
    }

    #[test]
    fn test_aggregates_become_column_calls() {
        let prepared = preprocess_formula("=A / SUM( A )", &["A"]);
        assert_eq!(prepared.script, "VALUE(0, ROW) / SUM_COLUMN(0)");
        assert_eq!(prepared.slots, vec!["A"]);
    }

    #[test]
    fn test_non_aggregate_calls_keep_row_values() {
        let prepared = preprocess_formula("=UPPER(name)", &["name"]);
        assert_eq!(prepared.script, "UPPER(VALUE(0, ROW))");
    }

    #[test]
    fn test_to_python() {
        assert_eq!(
            to_python("=Total Price * 2 + LEN(\"Total Price\")", &["Total Price"], "df1"),
            "df1['Total Price'] * 2 + LEN(\"Total Price\")"
        );
    }

    #[test]
    fn test_rename_references_is_safe() {
        let headers = ["A", "AB"];
        assert_eq!(
            rename_references("=A + AB + \"A\"", "A", "Z", &headers),
            "=Z + AB + \"A\""
        );
    }

    #[test]
    fn test_formula_body() {
        assert_eq!(formula_body("=1+2"), "1+2");
        assert_eq!(formula_body("  =A"), "A");
        assert_eq!(formula_body("A"), "A");
    }
}
