use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use stepsheet_engine::engine::ColumnId;

use super::{
    ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult, decode_params, resolve_header,
};
use crate::code_chunk::{CodeChunk, header_list_literal};
use crate::error::{Result, StepError};
use crate::state::State;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DeleteColumnParams {
    pub sheet_index: usize,
    pub column_ids: Vec<ColumnId>,
}

#[derive(Deserialize)]
struct DeleteColumnParamsV1 {
    sheet_index: usize,
    column_header: String,
}

pub struct DeleteColumnStepPerformer;

impl StepPerformer for DeleteColumnStepPerformer {
    type Params = DeleteColumnParams;

    const STEP_TYPE: &'static str = "delete_column";
    const STEP_VERSION: u32 = 2;
    const COMPATIBLE_VERSIONS: &'static [u32] = &[1];

    fn upgrade(prev: &State, _version: u32, raw: serde_json::Value) -> Result<Self::Params> {
        let v1: DeleteColumnParamsV1 = decode_params(Self::STEP_TYPE, raw)?;
        Ok(DeleteColumnParams {
            sheet_index: v1.sheet_index,
            column_ids: vec![resolve_header(prev, v1.sheet_index, &v1.column_header, Self::STEP_TYPE)?],
        })
    }

    fn execute(prev: &Arc<State>, params: &Self::Params, _ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let deleted: BTreeSet<&ColumnId> = params.column_ids.iter().collect();
        let headers: Vec<String> = params
            .column_ids
            .iter()
            .map(|id| prev.header(sheet, id).map(str::to_string))
            .collect::<Result<_>>()?;

        let blocking: Vec<&str> = prev
            .column_ids
            .ids(sheet)
            .iter()
            .filter(|id| !deleted.contains(id))
            .filter(|id| {
                prev.meta(sheet, id)
                    .is_ok_and(|meta| meta.dependencies.iter().any(|dep| deleted.contains(dep)))
            })
            .filter_map(|id| prev.column_ids.header_for(sheet, id))
            .collect();
        if !blocking.is_empty() {
            return Err(StepError::InvalidColumnDelete {
                column_headers: headers.join(", "),
                dependents: blocking.join(", "),
            });
        }

        let start = Instant::now();
        let mut post = prev.copy(&[sheet]);
        for (id, header) in params.column_ids.iter().zip(&headers) {
            post.table_mut(sheet)?.remove_column(header);
            post.column_ids.remove(sheet, id);
            post.columns[sheet].remove(id);
        }
        for graph in post.graphs.values_mut().filter(|g| g.sheet_index == sheet) {
            graph.x_axis_column_ids.retain(|id| !deleted.contains(id));
            graph.y_axis_column_ids.retain(|id| !deleted.contains(id));
            if graph.color.as_ref().is_some_and(|id| deleted.contains(id)) {
                graph.color = None;
            }
        }
        Ok((Arc::new(post), Some(ExecutionData::since(start))))
    }

    fn transpile(
        prev: &State,
        _post: &State,
        params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let sheet = params.sheet_index;
        let (Some(df_name), Some(headers)) = (
            prev.names.get(sheet),
            prev.column_ids.headers_for(sheet, &params.column_ids),
        ) else {
            return Vec::new();
        };
        vec![
            CodeChunk::new(
                "Deleted columns",
                format!("Deleted columns {}", headers.join(", ")),
            )
            .with_code([format!(
                "{}.drop({}, axis=1, inplace=True)",
                df_name,
                header_list_literal(&headers)
            )])
            .reading([sheet])
            .writing([sheet]),
        ]
    }

    fn modified_sheet_indexes(params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::one(params.sheet_index)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::state::ColumnMetatype;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use stepsheet_engine::engine::Table;

    fn with_formula() -> Arc<State> {
        let mut state = State::new(vec![
            Table::from_columns([("A", ints(&[1])), ("B", ints(&[2])), ("C", ints(&[3]))]).unwrap(),
        ]);
        let b = ColumnId::from("col-1");
        let meta = state.meta_mut(0, &b).unwrap();
        meta.metatype = ColumnMetatype::Formula;
        meta.spreadsheet_code = "=A + 1".to_string();
        meta.dependencies.insert(ColumnId::from("col-0"));
        Arc::new(state)
    }

    #[test]
    fn test_delete_columns() {
        let prev = with_formula();
        let (step, post, execution) = run(
            &prev,
            "delete_column",
            json!({"sheet_index": 0, "column_ids": ["col-2", "col-1"]}),
        )
        .unwrap();
        assert_eq!(post.table(0).unwrap().header_list(), vec!["A"]);
        assert_eq!(post.column_ids.ids(0), &[ColumnId::from("col-0")]);
        assert_eq!(
            code(&step, &prev, &post, execution.as_ref()),
            vec!["df1.drop(['C', 'B'], axis=1, inplace=True)"]
        );
        post.check_consistency().unwrap();
    }

    #[test]
    fn test_delete_refuses_when_a_formula_reads_the_column() {
        let prev = with_formula();
        let err = run(&prev, "delete_column", json!({"sheet_index": 0, "column_ids": ["col-0"]})).unwrap_err();
        assert_eq!(err.kind(), "invalid_column_delete");
        assert_eq!(err.to_string(), "Sorry, B still reference A, so they cannot be deleted.");
    }

    #[test]
    fn test_delete_drops_column_from_graphs() {
        let prev = state_with(vec![("A", ints(&[1])), ("B", ints(&[2]))]);
        let (_, graphed, _) = run(
            &prev,
            "graph",
            json!({"graph_id": "g", "graph_type": "bar", "sheet_index": 0,
                   "x_axis_column_ids": ["col-0"], "y_axis_column_ids": ["col-1"], "color": "col-1"}),
        )
        .unwrap();
        let (_, post, _) = run(&graphed, "delete_column", json!({"sheet_index": 0, "column_ids": ["col-1"]})).unwrap();
        assert!(post.graphs["g"].y_axis_column_ids.is_empty());
        assert_eq!(post.graphs["g"].color, None);
        post.check_consistency().unwrap();
    }

    #[test]
    fn test_v1_deletes_by_header() {
        let prev = with_formula();
        let action = super::super::StepAction {
            step_type: "delete_column".to_string(),
            step_version: 1,
            params: json!({"sheet_index": 0, "column_header": "C"}),
        };
        let step = super::super::Step::decode(&prev, &action).unwrap();
        assert_eq!(step.to_action().unwrap().params["column_ids"], json!(["col-2"]));
    }
}
