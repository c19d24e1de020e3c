//! Generated code, one chunk per step (plus helper chunks).

use serde::Serialize;
use std::collections::BTreeSet;

use stepsheet_engine::engine::{ColumnId, python_string_literal};

use crate::config::CodegenConfig;
use crate::state::State;

/// A block of pandas code reproducing part of a step.
///
/// A chunk with no code is a placeholder: the step it stands for changed
/// metadata only (formats, graphs) and needs no replay.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CodeChunk {
    pub display_name: String,
    pub description_comment: String,
    pub code: Vec<String>,
    /// Sheets the code reads.
    pub reads: BTreeSet<usize>,
    /// Sheets the code writes.
    pub writes: BTreeSet<usize>,
}

impl CodeChunk {
    pub fn new(display_name: impl Into<String>, description_comment: impl Into<String>) -> CodeChunk {
        CodeChunk {
            display_name: display_name.into(),
            description_comment: description_comment.into(),
            ..CodeChunk::default()
        }
    }

    pub fn with_code(mut self, code: impl IntoIterator<Item = String>) -> CodeChunk {
        self.code.extend(code);
        self
    }

    pub fn reading(mut self, sheets: impl IntoIterator<Item = usize>) -> CodeChunk {
        self.reads.extend(sheets);
        self
    }

    pub fn writing(mut self, sheets: impl IntoIterator<Item = usize>) -> CodeChunk {
        self.writes.extend(sheets);
        self
    }

    pub fn is_placeholder(&self) -> bool {
        self.code.is_empty()
    }

    /// Recompute the given formula columns, in order, from their stored code.
    pub fn refresh_dependant_columns(post: &State, sheet: usize, refreshed: &[ColumnId]) -> CodeChunk {
        let code = refreshed
            .iter()
            .filter_map(|id| post.meta(sheet, id).ok())
            .map(|meta| meta.python_code.clone())
            .filter(|line| !line.is_empty());
        CodeChunk::new(
            "Refresh dependant columns",
            "Refreshed columns that depend on the changed column",
        )
        .with_code(code)
        .reading([sheet])
        .writing([sheet])
    }
}

/// `df['header']`.
pub fn column_reference(df_name: &str, header: &str) -> String {
    format!("{}[{}]", df_name, python_string_literal(header))
}

/// Python list literal of column headers.
pub fn header_list_literal<S: AsRef<str>>(headers: &[S]) -> String {
    let items: Vec<String> = headers.iter().map(|h| python_string_literal(h.as_ref())).collect();
    format!("[{}]", items.join(", "))
}

/// Assemble the full script: preamble, then every non-placeholder chunk.
pub fn transpile_script(chunks: &[CodeChunk], config: &CodegenConfig) -> Vec<String> {
    let mut lines: Vec<String> = config.imports.clone();
    for chunk in chunks.iter().filter(|c| !c.is_placeholder()) {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        if config.comments {
            lines.push(format!("# {}", chunk.description_comment));
        }
        lines.extend(chunk.code.iter().cloned());
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_transpile_skips_placeholders() {
        let chunks = vec![
            CodeChunk::new("Sort", "Sorted A").with_code(["df1 = df1.sort_values(by='A')".to_string()]),
            CodeChunk::new("Changed format", "Changed a format"),
        ];
        let config = CodegenConfig {
            imports: vec!["import pandas as pd".to_string()],
            comments: true,
        };
        assert_eq!(
            transpile_script(&chunks, &config),
            vec![
                "import pandas as pd",
                "",
                "# Sorted A",
                "df1 = df1.sort_values(by='A')",
            ]
        );
    }

    #[test]
    fn test_transpile_without_comments_or_imports() {
        let chunks = vec![
            CodeChunk::new("a", "a").with_code(["x = 1".to_string()]),
            CodeChunk::new("b", "b").with_code(["y = 2".to_string()]),
        ];
        let config = CodegenConfig { imports: Vec::new(), comments: false };
        assert_eq!(transpile_script(&chunks, &config), vec!["x = 1", "", "y = 2"]);
    }

    #[test]
    fn test_literals() {
        assert_eq!(column_reference("df1", "it's"), "df1['it\\'s']");
        assert_eq!(header_list_literal(&["A", "B"]), "['A', 'B']");
    }
}
