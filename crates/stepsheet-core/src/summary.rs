//! Serializable views of a snapshot, enough to re-render a spreadsheet view.

use serde::Serialize;

use stepsheet_engine::engine::{ColumnId, DType};

use crate::state::{ColumnMetatype, DataframeSource, FilterGroup, FormatSpec, GraphId, State};

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ColumnSummary {
    pub id: ColumnId,
    pub header: String,
    pub dtype: DType,
    pub metatype: ColumnMetatype,
    /// Spreadsheet formula, for formula columns.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formula: Option<String>,
    pub format: FormatSpec,
    pub filters: FilterGroup,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SheetSummary {
    pub name: String,
    pub source: DataframeSource,
    pub num_rows: usize,
    pub columns: Vec<ColumnSummary>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GraphSummary {
    pub graph_id: GraphId,
    pub graph_type: String,
    pub tab_name: String,
    pub sheet_index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub x_axis_headers: Vec<String>,
    pub y_axis_headers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color_header: Option<String>,
}

impl State {
    /// One summary per sheet, columns in table order.
    pub fn sheet_summaries(&self) -> Vec<SheetSummary> {
        (0..self.num_sheets())
            .map(|sheet| {
                let columns = self
                    .column_ids
                    .ids(sheet)
                    .iter()
                    .filter_map(|id| {
                        let header = self.column_ids.header_for(sheet, id)?;
                        let meta = self.columns[sheet].get(id)?;
                        Some(ColumnSummary {
                            id: id.clone(),
                            header: header.to_string(),
                            dtype: meta.dtype,
                            metatype: meta.metatype,
                            formula: meta.is_formula().then(|| meta.spreadsheet_code.clone()),
                            format: meta.format.clone(),
                            filters: meta.filters.clone(),
                        })
                    })
                    .collect();
                SheetSummary {
                    name: self.names[sheet].clone(),
                    source: self.sources[sheet],
                    num_rows: self.tables[sheet].num_rows(),
                    columns,
                }
            })
            .collect()
    }

    pub fn graph_summaries(&self) -> Vec<GraphSummary> {
        self.graphs
            .iter()
            .map(|(graph_id, graph)| {
                let headers = |ids: &[ColumnId]| -> Vec<String> {
                    ids.iter()
                        .filter_map(|id| self.column_ids.header_for(graph.sheet_index, id))
                        .map(str::to_string)
                        .collect()
                };
                GraphSummary {
                    graph_id: graph_id.clone(),
                    graph_type: graph.graph_type.clone(),
                    tab_name: graph.tab_name.clone(),
                    sheet_index: graph.sheet_index,
                    title: graph.title.clone(),
                    x_axis_headers: headers(&graph.x_axis_column_ids),
                    y_axis_headers: headers(&graph.y_axis_column_ids),
                    color_header: graph
                        .color
                        .as_ref()
                        .and_then(|id| self.column_ids.header_for(graph.sheet_index, id))
                        .map(str::to_string),
                }
            })
            .collect()
    }
}
