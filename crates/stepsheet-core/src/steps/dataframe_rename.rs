use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use super::{ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult, no_op};
use crate::code_chunk::CodeChunk;
use crate::error::Result;
use crate::state::{State, valid_dataframe_name};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataframeRenameParams {
    pub sheet_index: usize,
    pub new_dataframe_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_dataframe_name: Option<String>,
}

pub struct DataframeRenameStepPerformer;

impl StepPerformer for DataframeRenameStepPerformer {
    type Params = DataframeRenameParams;

    const STEP_TYPE: &'static str = "dataframe_rename";
    const STEP_VERSION: u32 = 1;

    fn saturate(prev: &State, mut params: Self::Params) -> Result<Self::Params> {
        prev.ensure_sheet(params.sheet_index, Self::STEP_TYPE)?;
        params.old_dataframe_name = Some(prev.names[params.sheet_index].clone());
        Ok(params)
    }

    fn execute(prev: &Arc<State>, params: &Self::Params, ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let old_name = &prev.names[sheet];
        if *old_name == params.new_dataframe_name {
            return no_op(prev);
        }

        let start = Instant::now();
        let others: Vec<String> = prev
            .names
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != sheet)
            .map(|(_, n)| n.clone())
            .collect();
        let new_name = valid_dataframe_name(&others, &params.new_dataframe_name);
        if new_name == *old_name {
            return no_op(prev);
        }

        let mut post = prev.copy(&[]);
        post.names[sheet] = new_name;
        post.regenerate_python_code(sheet, ctx.formulas)?;
        Ok((Arc::new(post), Some(ExecutionData::since(start))))
    }

    fn transpile(
        prev: &State,
        post: &State,
        params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let sheet = params.sheet_index;
        let (Some(old_name), Some(new_name)) = (prev.names.get(sheet), post.names.get(sheet)) else {
            return Vec::new();
        };
        vec![
            CodeChunk::new("Renamed dataframe", format!("Renamed {} to {}", old_name, new_name))
                .with_code([format!("{} = {}", new_name, old_name)])
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
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use stepsheet_engine::engine::{ColumnId, Table};

    fn sheets() -> Arc<State> {
        Arc::new(State::new(vec![
            Table::from_columns([("A", ints(&[1]))]).unwrap(),
            Table::from_columns([("B", ints(&[2]))]).unwrap(),
        ]))
    }

    #[test]
    fn test_rename_to_same_name_is_a_no_op() {
        let prev = sheets();
        let (_, post, execution) = run(
            &prev,
            "dataframe_rename",
            json!({"sheet_index": 0, "new_dataframe_name": "df1"}),
        )
        .unwrap();
        assert!(execution.is_none());
        assert!(Arc::ptr_eq(&prev, &post));
    }

    #[test]
    fn test_rename_makes_name_valid_and_unique() {
        let prev = sheets();
        let (step, post, execution) = run(
            &prev,
            "dataframe_rename",
            json!({"sheet_index": 0, "new_dataframe_name": "df2"}),
        )
        .unwrap();
        assert_eq!(post.names, vec!["df2_1", "df2"]);
        assert_eq!(code(&step, &prev, &post, execution.as_ref()), vec!["df2_1 = df1"]);
        assert!(Arc::ptr_eq(&prev.tables[0], &post.tables[0]));
        post.check_consistency().unwrap();
    }

    #[test]
    fn test_rename_saturates_old_name() {
        let prev = sheets();
        let (step, _, _) = run(
            &prev,
            "dataframe_rename",
            json!({"sheet_index": 1, "new_dataframe_name": "sales data"}),
        )
        .unwrap();
        let super::super::Step::DataframeRename(params) = step else {
            panic!("decoded the wrong step");
        };
        assert_eq!(params.old_dataframe_name.as_deref(), Some("df2"));
    }

    #[test]
    fn test_rename_rewrites_formula_code() {
        let mut state = State::new(vec![Table::from_columns([("A", ints(&[1])), ("B", ints(&[2]))]).unwrap()]);
        let b = ColumnId::from("col-1");
        let meta = state.meta_mut(0, &b).unwrap();
        meta.metatype = crate::state::ColumnMetatype::Formula;
        meta.spreadsheet_code = "=A + 1".to_string();
        meta.python_code = "df1['B'] = df1['A'] + 1".to_string();
        meta.dependencies.insert(ColumnId::from("col-0"));
        let prev = Arc::new(state);

        let (_, post, _) = run(
            &prev,
            "dataframe_rename",
            json!({"sheet_index": 0, "new_dataframe_name": "sales"}),
        )
        .unwrap();
        assert_eq!(post.meta(0, &b).unwrap().python_code, "sales['B'] = sales['A'] + 1");
    }
}
