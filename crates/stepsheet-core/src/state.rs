//! Immutable analysis snapshots.
//!
//! A [`State`] owns every dataframe of an analysis plus the metadata the
//! steps maintain about them: names, provenance, column ids, per-column
//! formula/format/filter metadata and graph definitions. Steps never edit a
//! state in place; they build a new one with [`State::copy`], which shares
//! untouched tables with the previous snapshot through `Arc`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use stepsheet_engine::engine::{
    ColumnId, DType, DependencyGraph, FormulaEvaluator, Table, detect_cycle,
};

use crate::column_ids::ColumnIdMap;
use crate::error::{Result, StepError};

pub type GraphId = String;

/// Where a dataframe came from.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataframeSource {
    #[default]
    Passed,
    Imported,
    Pivoted,
    Merged,
    Duplicated,
    Concatenated,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnMetatype {
    #[default]
    Value,
    Formula,
}

/// Display format of a column. Formats never change the data.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum FormatSpec {
    #[default]
    #[serde(rename = "default")]
    Default,
    #[serde(rename = "plain text")]
    PlainText,
    #[serde(rename = "percentage")]
    Percentage,
    #[serde(rename = "accounting")]
    Accounting,
    #[serde(rename = "currency")]
    Currency,
    #[serde(rename = "round decimals")]
    RoundDecimals { num_decimals: u32 },
    #[serde(rename = "k_m_b")]
    Kmb,
    #[serde(rename = "scientific notation")]
    ScientificNotation,
}

impl fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatSpec::Default => f.write_str("default"),
            FormatSpec::PlainText => f.write_str("plain text"),
            FormatSpec::Percentage => f.write_str("percentage"),
            FormatSpec::Accounting => f.write_str("accounting"),
            FormatSpec::Currency => f.write_str("currency"),
            FormatSpec::RoundDecimals { num_decimals } => write!(f, "{} decimals", num_decimals),
            FormatSpec::Kmb => f.write_str("K/M/B"),
            FormatSpec::ScientificNotation => f.write_str("scientific notation"),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[default]
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub condition: String,
    pub value: serde_json::Value,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterGroup {
    pub operator: FilterOperator,
    pub filters: Vec<Filter>,
}

/// Per-column metadata kept beside the table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ColumnMeta {
    pub metatype: ColumnMetatype,
    pub dtype: DType,
    /// `=`-prefixed formula, empty for value columns.
    pub spreadsheet_code: String,
    /// Code that recomputes the column, empty for value columns.
    pub python_code: String,
    /// Columns the formula reads.
    pub dependencies: BTreeSet<ColumnId>,
    pub filters: FilterGroup,
    pub format: FormatSpec,
}

impl ColumnMeta {
    pub fn value(dtype: DType) -> ColumnMeta {
        ColumnMeta {
            metatype: ColumnMetatype::Value,
            dtype,
            spreadsheet_code: String::new(),
            python_code: String::new(),
            dependencies: BTreeSet::new(),
            filters: FilterGroup::default(),
            format: FormatSpec::Default,
        }
    }

    pub fn is_formula(&self) -> bool {
        self.metatype == ColumnMetatype::Formula
    }
}

/// A graph the user configured. Graphs are metadata only.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    pub graph_type: String,
    pub sheet_index: usize,
    pub x_axis_column_ids: Vec<ColumnId>,
    pub y_axis_column_ids: Vec<ColumnId>,
    pub color: Option<ColumnId>,
    pub title: Option<String>,
    pub tab_name: String,
}

impl GraphDefinition {
    pub fn column_ids(&self) -> impl Iterator<Item = &ColumnId> {
        self.x_axis_column_ids
            .iter()
            .chain(&self.y_axis_column_ids)
            .chain(self.color.as_ref())
    }
}

/// One snapshot of an analysis.
#[derive(Clone, Debug, Default)]
pub struct State {
    pub tables: Vec<Arc<Table>>,
    pub names: Vec<String>,
    pub sources: Vec<DataframeSource>,
    pub column_ids: ColumnIdMap,
    pub columns: Vec<BTreeMap<ColumnId, ColumnMeta>>,
    /// Inverse permutation of the latest sort applied to each sheet.
    pub presort_orders: Vec<Option<Vec<usize>>>,
    pub graphs: BTreeMap<GraphId, GraphDefinition>,
}

impl State {
    pub fn new(tables: Vec<Table>) -> State {
        State::with_options(tables, None, false)
    }

    pub fn with_names(tables: Vec<Table>, names: Vec<String>) -> State {
        State::with_options(tables, Some(names), false)
    }

    /// Initial snapshot: every table is `passed`, named `df1`, `df2`, ...
    /// unless names are given.
    pub fn with_options(tables: Vec<Table>, names: Option<Vec<String>>, legacy_ids: bool) -> State {
        let mut state = State {
            column_ids: ColumnIdMap::new(legacy_ids),
            ..State::default()
        };
        for (i, table) in tables.into_iter().enumerate() {
            let name = names.as_ref().and_then(|n| n.get(i)).cloned();
            state.append_table(table, DataframeSource::Passed, name, &BTreeMap::new());
        }
        state
    }

    pub fn num_sheets(&self) -> usize {
        self.tables.len()
    }

    pub fn table_index_in_range(&self, sheet: usize) -> bool {
        sheet < self.tables.len()
    }

    pub fn ensure_sheet(&self, sheet: usize, step_type: &'static str) -> Result<()> {
        if self.table_index_in_range(sheet) {
            Ok(())
        } else {
            Err(StepError::SheetIndexOutOfRange {
                sheet_index: sheet,
                num_sheets: self.tables.len(),
                step_type,
            })
        }
    }

    pub fn table(&self, sheet: usize) -> Result<&Table> {
        self.ensure_sheet(sheet, "read")?;
        Ok(&self.tables[sheet])
    }

    /// Mutable access to a sheet's table. Shared tables are cloned first,
    /// so the previous snapshot is never written through.
    pub fn table_mut(&mut self, sheet: usize) -> Result<&mut Table> {
        self.ensure_sheet(sheet, "write")?;
        Ok(Arc::make_mut(&mut self.tables[sheet]))
    }

    /// A new snapshot sharing tables with this one, except the tables at
    /// `deep_sheet_indexes`, which are copied. Metadata is always copied.
    pub fn copy(&self, deep_sheet_indexes: &[usize]) -> State {
        let mut copy = self.clone();
        for &sheet in deep_sheet_indexes {
            if let Some(table) = copy.tables.get_mut(sheet) {
                *table = Arc::new(Table::clone(table));
            }
        }
        copy
    }

    pub fn deep_copy(&self) -> State {
        let all: Vec<usize> = (0..self.tables.len()).collect();
        self.copy(&all)
    }

    fn fresh_metadata(
        table: &Table,
        ids: &[ColumnId],
        format_overrides: &BTreeMap<ColumnId, FormatSpec>,
    ) -> BTreeMap<ColumnId, ColumnMeta> {
        ids.iter()
            .zip(table.columns())
            .map(|(id, (_, column))| {
                let mut meta = ColumnMeta::value(column.dtype);
                if let Some(format) = format_overrides.get(id) {
                    meta.format = format.clone();
                }
                (id.clone(), meta)
            })
            .collect()
    }

    fn append_table(
        &mut self,
        table: Table,
        source: DataframeSource,
        name: Option<String>,
        format_overrides: &BTreeMap<ColumnId, FormatSpec>,
    ) -> usize {
        let ids = self.column_ids.add_table(&table.header_list(), None);
        let requested = name.unwrap_or_else(|| format!("df{}", self.tables.len() + 1));
        let name = valid_dataframe_name(&self.names, &requested);
        self.columns.push(State::fresh_metadata(&table, &ids, format_overrides));
        self.tables.push(Arc::new(table));
        self.names.push(name);
        self.sources.push(source);
        self.presort_orders.push(None);
        self.tables.len() - 1
    }

    /// Append `table` as a new sheet, or replace the sheet at `target`.
    ///
    /// All per-column metadata of the sheet is rebuilt; `format_overrides`
    /// seeds column formats. A replaced sheet keeps its name unless `name`
    /// is given, and keeps the ids of headers that survive.
    pub fn add_or_replace_table(
        &mut self,
        table: Table,
        source: DataframeSource,
        target: Option<usize>,
        name: Option<String>,
        format_overrides: &BTreeMap<ColumnId, FormatSpec>,
    ) -> Result<usize> {
        let Some(sheet) = target else {
            return Ok(self.append_table(table, source, name, format_overrides));
        };
        self.ensure_sheet(sheet, "add_or_replace_table")?;
        let ids = self.column_ids.add_table(&table.header_list(), Some(sheet));
        self.columns[sheet] = State::fresh_metadata(&table, &ids, format_overrides);
        self.tables[sheet] = Arc::new(table);
        self.sources[sheet] = source;
        self.presort_orders[sheet] = None;
        if let Some(name) = name {
            let others: Vec<String> = self
                .names
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != sheet)
                .map(|(_, n)| n.clone())
                .collect();
            self.names[sheet] = valid_dataframe_name(&others, &name);
        }
        Ok(sheet)
    }

    pub fn header(&self, sheet: usize, id: &ColumnId) -> Result<&str> {
        self.column_ids
            .header_for(sheet, id)
            .ok_or_else(|| StepError::NoColumn {
                sheet_index: sheet,
                column: id.to_string(),
            })
    }

    pub fn column_id(&self, sheet: usize, header: &str) -> Result<ColumnId> {
        self.column_ids
            .id_for(sheet, header)
            .cloned()
            .ok_or_else(|| StepError::NoColumn {
                sheet_index: sheet,
                column: header.to_string(),
            })
    }

    pub fn meta(&self, sheet: usize, id: &ColumnId) -> Result<&ColumnMeta> {
        self.columns
            .get(sheet)
            .and_then(|metas| metas.get(id))
            .ok_or_else(|| StepError::NoColumn {
                sheet_index: sheet,
                column: id.to_string(),
            })
    }

    pub fn meta_mut(&mut self, sheet: usize, id: &ColumnId) -> Result<&mut ColumnMeta> {
        self.columns
            .get_mut(sheet)
            .and_then(|metas| metas.get_mut(id))
            .ok_or_else(|| StepError::NoColumn {
                sheet_index: sheet,
                column: id.to_string(),
            })
    }

    /// Each column of a sheet mapped to the columns it reads.
    pub fn dependency_graph(&self, sheet: usize) -> DependencyGraph {
        self.columns
            .get(sheet)
            .map(|metas| {
                metas
                    .iter()
                    .map(|(id, meta)| (id.clone(), meta.dependencies.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Columns whose formulas read `id` directly, in column order.
    pub fn direct_dependents(&self, sheet: usize, id: &ColumnId) -> Vec<ColumnId> {
        let Some(metas) = self.columns.get(sheet) else {
            return Vec::new();
        };
        self.column_ids
            .ids(sheet)
            .iter()
            .filter(|other| metas.get(*other).is_some_and(|m| m.dependencies.contains(id)))
            .cloned()
            .collect()
    }

    /// Re-render the stored code of every formula column in a sheet, after
    /// the dataframe or one of its columns was renamed.
    pub fn regenerate_python_code(&mut self, sheet: usize, formulas: &dyn FormulaEvaluator) -> Result<()> {
        let headers = self.table(sheet)?.header_list();
        let name = self.names[sheet].clone();
        for id in self.column_ids.ids(sheet).to_vec() {
            let header = self.header(sheet, &id)?.to_string();
            let meta = self.meta_mut(sheet, &id)?;
            if !meta.is_formula() {
                continue;
            }
            let parsed = formulas
                .parse(&meta.spreadsheet_code, &header, &headers, &name)
                .map_err(|source| StepError::InvalidFormula {
                    column_header: header.clone(),
                    source,
                })?;
            meta.python_code = parsed.python_code;
        }
        Ok(())
    }

    /// A copy with every column id rewritten by `transform(sheet, id, header)`.
    ///
    /// Keys of the metadata maps, dependency sets and graph axes are all
    /// rewritten together. A collision leaves `self` untouched and fails.
    pub fn remap_column_ids(
        &self,
        transform: impl FnMut(usize, &ColumnId, &str) -> ColumnId,
        legacy: bool,
    ) -> Result<State> {
        let (column_ids, mappings) = self
            .column_ids
            .remap(transform, legacy)
            .map_err(StepError::ConsistencyFault)?;

        let missing = |id: &ColumnId| StepError::ConsistencyFault(format!("column id {} has no mapping", id));
        let mut columns = Vec::with_capacity(self.columns.len());
        for (metas, mapping) in self.columns.iter().zip(&mappings) {
            let mut remapped = BTreeMap::new();
            for (id, meta) in metas {
                let mut meta = meta.clone();
                meta.dependencies = meta
                    .dependencies
                    .iter()
                    .map(|dep| mapping.get(dep).cloned().ok_or_else(|| missing(dep)))
                    .collect::<Result<_>>()?;
                remapped.insert(mapping.get(id).cloned().ok_or_else(|| missing(id))?, meta);
            }
            columns.push(remapped);
        }

        let mut graphs = self.graphs.clone();
        for graph in graphs.values_mut() {
            let Some(mapping) = mappings.get(graph.sheet_index) else {
                continue;
            };
            let remap = |id: &ColumnId| mapping.get(id).cloned().ok_or_else(|| missing(id));
            graph.x_axis_column_ids = graph.x_axis_column_ids.iter().map(remap).collect::<Result<_>>()?;
            graph.y_axis_column_ids = graph.y_axis_column_ids.iter().map(remap).collect::<Result<_>>()?;
            graph.color = graph.color.as_ref().map(remap).transpose()?;
        }

        Ok(State {
            column_ids,
            columns,
            graphs,
            ..self.clone()
        })
    }

    /// A copy using header-derived (legacy) column ids.
    pub fn to_legacy_ids(&self) -> Result<State> {
        self.remap_column_ids(|_, _, header| ColumnId::legacy(header), true)
    }

    /// Verify the snapshot's cross-structure invariants.
    pub fn check_consistency(&self) -> Result<()> {
        let fault = |msg: String| Err(StepError::ConsistencyFault(msg));
        let n = self.tables.len();
        if [
            self.names.len(),
            self.sources.len(),
            self.columns.len(),
            self.presort_orders.len(),
            self.column_ids.num_sheets(),
        ]
        .iter()
        .any(|len| *len != n)
        {
            return fault(format!("per-sheet structures disagree on the number of dataframes ({})", n));
        }
        let unique_names: BTreeSet<&String> = self.names.iter().collect();
        if unique_names.len() != n {
            return fault("dataframe names are not unique".to_string());
        }

        for sheet in 0..n {
            self.column_ids.check_sheet(sheet).map_err(StepError::ConsistencyFault)?;
            let table = &self.tables[sheet];
            if self.column_ids.headers(sheet) != table.header_list() {
                return fault(format!("column ids of {} do not match its headers", self.names[sheet]));
            }
            let metas = &self.columns[sheet];
            let ids = self.column_ids.ids(sheet);
            if metas.len() != ids.len() || ids.iter().any(|id| !metas.contains_key(id)) {
                return fault(format!("column metadata of {} does not match its ids", self.names[sheet]));
            }
            for (id, meta) in metas {
                let header = self.header(sheet, id)?;
                if table.column(header).map(|c| c.dtype) != Some(meta.dtype) {
                    return fault(format!("dtype of {} in {} is stale", header, self.names[sheet]));
                }
                if !meta.is_formula() && (!meta.dependencies.is_empty() || !meta.spreadsheet_code.is_empty()) {
                    return fault(format!("value column {} has a formula", header));
                }
                if meta.dependencies.iter().any(|dep| !metas.contains_key(dep)) {
                    return fault(format!("column {} depends on a missing column", header));
                }
            }
            let graph = self.dependency_graph(sheet);
            if let Some(cycle) = ids.iter().find_map(|id| detect_cycle(id, &graph)) {
                let path: Vec<&str> = cycle.iter().map(ColumnId::as_str).collect();
                return fault(format!("dependency cycle {}", path.join(" -> ")));
            }
            if let Some(order) = &self.presort_orders[sheet]
                && order.len() != table.num_rows()
            {
                return fault(format!("recorded sort order of {} is stale", self.names[sheet]));
            }
        }

        for (graph_id, graph) in &self.graphs {
            if !self.table_index_in_range(graph.sheet_index) {
                return fault(format!("graph {} points at a missing dataframe", graph_id));
            }
            if graph.column_ids().any(|id| self.column_ids.header_for(graph.sheet_index, id).is_none()) {
                return fault(format!("graph {} points at a missing column", graph_id));
            }
        }
        Ok(())
    }
}

const PYTHON_KEYWORDS: &[&str] = &[
    "False", "None", "True", "and", "as", "assert", "async", "await", "break", "class", "continue",
    "def", "del", "elif", "else", "except", "finally", "for", "from", "global", "if", "import", "in",
    "is", "lambda", "nonlocal", "not", "or", "pass", "raise", "return", "try", "while", "with",
    "yield", "pd",
];

/// Turn `requested` into a valid Python identifier not in `existing`.
pub fn valid_dataframe_name(existing: &[String], requested: &str) -> String {
    let mut name: String = requested
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if name.is_empty() {
        name = "df".to_string();
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name = format!("df_{}", name);
    }
    if PYTHON_KEYWORDS.contains(&name.as_str()) {
        name = format!("{}_df", name);
    }
    if !existing.contains(&name) {
        return name;
    }
    (1..)
        .map(|i| format!("{}_{}", name, i))
        .find(|candidate| !existing.contains(candidate))
        .unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use stepsheet_engine::engine::{Column, Value};

    fn table(headers: &[&str]) -> Table {
        Table::from_columns(
            headers
                .iter()
                .map(|h| (h.to_string(), Column::from_values(vec![Value::Int(1), Value::Int(2)]))),
        )
        .unwrap()
    }

    #[test]
    fn test_initial_state_names_and_sources() {
        let state = State::new(vec![table(&["A"]), table(&["B"])]);
        assert_eq!(state.names, vec!["df1", "df2"]);
        assert_eq!(state.sources, vec![DataframeSource::Passed; 2]);
        assert_eq!(state.column_id(1, "B").unwrap(), ColumnId::from("col-1"));
        state.check_consistency().unwrap();
    }

    #[test]
    fn test_copy_shares_untouched_tables() {
        let state = State::new(vec![table(&["A"]), table(&["B"])]);
        let copy = state.copy(&[0]);
        assert!(!Arc::ptr_eq(&state.tables[0], &copy.tables[0]));
        assert!(Arc::ptr_eq(&state.tables[1], &copy.tables[1]));
    }

    #[test]
    fn test_table_mut_never_writes_through() {
        let state = State::new(vec![table(&["A"])]);
        let mut copy = state.copy(&[]);
        copy.table_mut(0).unwrap().remove_column("A");
        assert_eq!(state.tables[0].num_columns(), 1);
        assert_eq!(copy.tables[0].num_columns(), 0);
    }

    #[test]
    fn test_replace_keeps_name_and_surviving_ids() {
        let mut state = State::new(vec![table(&["A", "B"])]);
        let mut formats = BTreeMap::new();
        formats.insert(ColumnId::from("col-1"), FormatSpec::Percentage);
        state
            .add_or_replace_table(table(&["B", "C"]), DataframeSource::Pivoted, Some(0), None, &formats)
            .unwrap();
        assert_eq!(state.names, vec!["df1"]);
        assert_eq!(state.sources[0], DataframeSource::Pivoted);
        assert_eq!(state.column_id(0, "B").unwrap(), ColumnId::from("col-1"));
        assert_eq!(state.meta(0, &ColumnId::from("col-1")).unwrap().format, FormatSpec::Percentage);
        state.check_consistency().unwrap();
    }

    #[test]
    fn test_replace_out_of_range_fails() {
        let mut state = State::new(vec![table(&["A"])]);
        let err = state
            .add_or_replace_table(table(&["A"]), DataframeSource::Passed, Some(3), None, &BTreeMap::new())
            .unwrap_err();
        assert_eq!(err.kind(), "sheet_index_out_of_range");
    }

    #[test]
    fn test_legacy_remap_rewrites_dependencies() {
        let mut state = State::new(vec![table(&["first name", "B"])]);
        let b = ColumnId::from("col-1");
        let meta = state.meta_mut(0, &b).unwrap();
        meta.metatype = ColumnMetatype::Formula;
        meta.spreadsheet_code = "=first name".to_string();
        meta.dependencies.insert(ColumnId::from("col-0"));

        let legacy = state.to_legacy_ids().unwrap();
        assert!(legacy.column_ids.is_legacy());
        let deps: Vec<&ColumnId> = legacy.meta(0, &ColumnId::from("B")).unwrap().dependencies.iter().collect();
        assert_eq!(deps, vec![&ColumnId::from("first_name")]);
        legacy.check_consistency().unwrap();
        assert!(!state.column_ids.is_legacy());
    }

    #[test]
    fn test_consistency_catches_stale_dtype() {
        let mut state = State::new(vec![table(&["A"])]);
        state.meta_mut(0, &ColumnId::from("col-0")).unwrap().dtype = DType::String;
        assert_eq!(state.check_consistency().unwrap_err().kind(), "consistency_fault");
    }

    #[test]
    fn test_valid_dataframe_name() {
        let existing = vec!["df1".to_string(), "sales".to_string(), "sales_1".to_string()];
        assert_eq!(valid_dataframe_name(&existing, "sales"), "sales_2");
        assert_eq!(valid_dataframe_name(&existing, "my sales"), "my_sales");
        assert_eq!(valid_dataframe_name(&existing, "2020"), "df_2020");
        assert_eq!(valid_dataframe_name(&existing, "class"), "class_df");
        assert_eq!(valid_dataframe_name(&existing, "df1"), "df1_1");
    }

    #[test]
    fn test_format_spec_serde_names() {
        let json = serde_json::to_value(FormatSpec::RoundDecimals { num_decimals: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"type": "round decimals", "num_decimals": 2}));
        let parsed: FormatSpec = serde_json::from_value(serde_json::json!({"type": "k_m_b"})).unwrap();
        assert_eq!(parsed, FormatSpec::Kmb);
    }
}
