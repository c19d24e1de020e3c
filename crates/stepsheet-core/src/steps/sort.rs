use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use stepsheet_engine::engine::{ColumnId, python_string_literal};

use super::{
    ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult, decode_params, no_op,
    resolve_header,
};
use crate::code_chunk::{CodeChunk, column_reference};
use crate::error::{Result, StepError};
use crate::state::State;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Ascending,
    Descending,
    /// Undo the latest sort of the sheet.
    None,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SortParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    pub sort_direction: SortDirection,
}

#[derive(Deserialize)]
struct SortParamsV1 {
    sheet_index: usize,
    column_header: String,
    sort_direction: SortDirection,
}

pub struct SortStepPerformer;

impl StepPerformer for SortStepPerformer {
    type Params = SortParams;

    const STEP_TYPE: &'static str = "sort";
    const STEP_VERSION: u32 = 2;
    const COMPATIBLE_VERSIONS: &'static [u32] = &[1];

    fn upgrade(prev: &State, _version: u32, raw: serde_json::Value) -> Result<Self::Params> {
        let v1: SortParamsV1 = decode_params(Self::STEP_TYPE, raw)?;
        Ok(SortParams {
            sheet_index: v1.sheet_index,
            column_id: resolve_header(prev, v1.sheet_index, &v1.column_header, Self::STEP_TYPE)?,
            sort_direction: v1.sort_direction,
        })
    }

    fn execute(prev: &Arc<State>, params: &Self::Params, _ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let header = prev.header(sheet, &params.column_id)?.to_string();
        let start = Instant::now();

        let (positions, presort) = match params.sort_direction {
            SortDirection::None => {
                let Some(restore) = prev.presort_orders[sheet].clone() else {
                    return no_op(prev);
                };
                (restore, None)
            }
            direction => {
                let ascending = direction == SortDirection::Ascending;
                let positions = prev.tables[sheet].sorted_positions(&header, ascending).map_err(|e| {
                    warn!(column = %header, error = %e, "sort failed");
                    StepError::InvalidSort { column_header: header.clone() }
                })?;
                let inverse = invert(&positions);
                (positions, Some(inverse))
            }
        };

        let mut post = prev.copy(&[]);
        post.tables[sheet] = Arc::new(prev.tables[sheet].take(&positions));
        post.presort_orders[sheet] = presort;

        let mut execution = ExecutionData::since(start);
        execution.row_positions = Some(positions);
        Ok((Arc::new(post), Some(execution)))
    }

    fn transpile(
        prev: &State,
        _post: &State,
        params: &Self::Params,
        execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let sheet = params.sheet_index;
        let (Ok(header), Some(df_name)) = (prev.header(sheet, &params.column_id), prev.names.get(sheet)) else {
            return Vec::new();
        };
        let (code, description) = match params.sort_direction {
            SortDirection::None => {
                let positions = execution.and_then(|e| e.row_positions.as_ref());
                let code = positions.map(|positions| {
                    let items: Vec<String> = positions.iter().map(usize::to_string).collect();
                    format!("{} = {}.iloc[[{}]]", df_name, df_name, items.join(", "))
                });
                (code, format!("Removed the sort on {} in {}", header, df_name))
            }
            direction => {
                let ascending = direction == SortDirection::Ascending;
                let code = format!(
                    "{} = {}.sort_values(by={}, ascending={}, na_position='{}', kind='mergesort')",
                    df_name,
                    df_name,
                    python_string_literal(header),
                    if ascending { "True" } else { "False" },
                    if ascending { "first" } else { "last" },
                );
                let description = format!(
                    "Sorted {} in {} order",
                    column_reference(df_name, header),
                    if ascending { "ascending" } else { "descending" }
                );
                (Some(code), description)
            }
        };
        vec![
            CodeChunk::new("Sorted a column", description)
                .with_code(code)
                .reading([sheet])
                .writing([sheet]),
        ]
    }

    fn modified_sheet_indexes(params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::one(params.sheet_index)
    }
}

/// `inverse[positions[i]] == i`: taking `inverse` undoes taking `positions`.
fn invert(positions: &[usize]) -> Vec<usize> {
    let mut inverse = vec![0; positions.len()];
    for (i, &p) in positions.iter().enumerate() {
        inverse[p] = i;
    }
    inverse
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use stepsheet_engine::engine::{Column, Value};

    fn values(state: &State, header: &str) -> Vec<Value> {
        state.table(0).unwrap().column(header).unwrap().values.clone()
    }

    fn unsorted() -> Arc<State> {
        state_with(vec![
            ("A", Column::from_values(vec![Value::Int(3), Value::Null, Value::Int(1), Value::Int(2)])),
            ("B", Column::from_values(vec!["c".into(), "null".into(), "a".into(), "b".into()])),
        ])
    }

    #[test]
    fn test_ascending_puts_nulls_first() {
        let prev = unsorted();
        let (step, post, execution) = run(
            &prev,
            "sort",
            json!({"sheet_index": 0, "column_id": "col-0", "sort_direction": "ascending"}),
        )
        .unwrap();
        assert_eq!(
            values(&post, "A"),
            vec![Value::Null, Value::Float(1.0), Value::Float(2.0), Value::Float(3.0)]
        );
        let expected: Vec<Value> = ["null", "a", "b", "c"].into_iter().map(Value::from).collect();
        assert_eq!(values(&post, "B"), expected);
        assert_eq!(post.tables[0].index(), &[1, 2, 3, 0]);
        assert_eq!(
            code(&step, &prev, &post, execution.as_ref()),
            vec!["df1 = df1.sort_values(by='A', ascending=True, na_position='first', kind='mergesort')"]
        );
        post.check_consistency().unwrap();
    }

    #[test]
    fn test_descending_puts_nulls_last() {
        let prev = unsorted();
        let (_, post, _) = run(
            &prev,
            "sort",
            json!({"sheet_index": 0, "column_id": "col-0", "sort_direction": "descending"}),
        )
        .unwrap();
        assert_eq!(post.tables[0].index(), &[0, 3, 2, 1]);
    }

    #[test]
    fn test_none_restores_previous_order() {
        let prev = unsorted();
        let (_, sorted, _) = run(
            &prev,
            "sort",
            json!({"sheet_index": 0, "column_id": "col-1", "sort_direction": "descending"}),
        )
        .unwrap();
        let (step, restored, execution) = run(
            &sorted,
            "sort",
            json!({"sheet_index": 0, "column_id": "col-1", "sort_direction": "none"}),
        )
        .unwrap();
        assert_eq!(restored.tables[0].as_ref(), prev.tables[0].as_ref());
        assert_eq!(restored.presort_orders[0], None);
        assert_eq!(
            code(&step, &sorted, &restored, execution.as_ref()),
            vec!["df1 = df1.iloc[[1, 0, 3, 2]]"]
        );
    }

    #[test]
    fn test_none_without_a_sort_is_a_no_op() {
        let prev = unsorted();
        let (_, post, execution) = run(
            &prev,
            "sort",
            json!({"sheet_index": 0, "column_id": "col-0", "sort_direction": "none"}),
        )
        .unwrap();
        assert!(execution.is_none());
        assert!(Arc::ptr_eq(&prev, &post));
    }

    #[test]
    fn test_mixed_types_fail_with_sort_error() {
        let prev = state_with(vec![(
            "A",
            Column::from_values(vec![Value::Int(1), Value::from("x")]),
        )]);
        let err = run(
            &prev,
            "sort",
            json!({"sheet_index": 0, "column_id": "col-0", "sort_direction": "ascending"}),
        )
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_sort");
        assert!(err.to_string().contains("column A has mixed data types"));
    }

    #[test]
    fn test_v1_params() {
        let prev = unsorted();
        let action = super::super::StepAction {
            step_type: "sort".to_string(),
            step_version: 1,
            params: json!({"sheet_index": 0, "column_header": "B", "sort_direction": "ascending"}),
        };
        let step = super::super::Step::decode(&prev, &action).unwrap();
        assert_eq!(step.to_action().unwrap().params["column_id"], json!("col-1"));
    }

    #[test]
    fn test_invert() {
        assert_eq!(invert(&[2, 0, 1]), vec![1, 2, 0]);
    }
}
