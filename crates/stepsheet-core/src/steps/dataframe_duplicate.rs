use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use stepsheet_engine::engine::Table;

use super::{ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult};
use crate::code_chunk::CodeChunk;
use crate::error::Result;
use crate::state::{DataframeSource, State};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DataframeDuplicateParams {
    pub sheet_index: usize,
}

/// Append a copy of a sheet, metadata included, as a new sheet.
pub struct DataframeDuplicateStepPerformer;

impl StepPerformer for DataframeDuplicateStepPerformer {
    type Params = DataframeDuplicateParams;

    const STEP_TYPE: &'static str = "dataframe_duplicate";
    const STEP_VERSION: u32 = 1;

    fn execute(prev: &Arc<State>, params: &Self::Params, ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let start = Instant::now();

        let table = Table::clone(&prev.tables[sheet]);
        let name = format!("{}_copy", prev.names[sheet]);
        let mut post = prev.copy(&[]);
        let new_sheet =
            post.add_or_replace_table(table, DataframeSource::Duplicated, None, Some(name), &BTreeMap::new())?;

        // Carry formulas, formats and filters over to the new ids.
        for (old_id, new_id) in prev.column_ids.ids(sheet).iter().zip(post.column_ids.ids(new_sheet).to_vec()) {
            let mut meta = prev.meta(sheet, old_id)?.clone();
            meta.dependencies = meta
                .dependencies
                .iter()
                .map(|dep| {
                    let header = prev.header(sheet, dep)?;
                    post.column_id(new_sheet, header)
                })
                .collect::<Result<_>>()?;
            *post.meta_mut(new_sheet, &new_id)? = meta;
        }
        post.regenerate_python_code(new_sheet, ctx.formulas)?;
        Ok((Arc::new(post), Some(ExecutionData::since(start))))
    }

    fn transpile(
        prev: &State,
        post: &State,
        params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let (Some(old_name), Some(new_name)) = (prev.names.get(params.sheet_index), post.names.last()) else {
            return Vec::new();
        };
        vec![
            CodeChunk::new("Duplicated dataframe", format!("Duplicated {}", old_name))
                .with_code([format!("{} = {}.copy(deep=True)", new_name, old_name)])
                .reading([params.sheet_index])
                .writing([post.num_sheets() - 1]),
        ]
    }

    fn modified_sheet_indexes(_params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::All
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::state::{ColumnMetatype, FormatSpec};
    use stepsheet_engine::engine::ColumnId;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_duplicate_copies_metadata_to_new_ids() {
        let mut state = State::new(vec![Table::from_columns([("A", ints(&[1])), ("B", ints(&[2]))]).unwrap()]);
        let b = ColumnId::from("col-1");
        let meta = state.meta_mut(0, &b).unwrap();
        meta.metatype = ColumnMetatype::Formula;
        meta.spreadsheet_code = "=A + 1".to_string();
        meta.python_code = "df1['B'] = df1['A'] + 1".to_string();
        meta.dependencies.insert(ColumnId::from("col-0"));
        meta.format = FormatSpec::Accounting;
        let prev = Arc::new(state);

        let (step, post, execution) = run(&prev, "dataframe_duplicate", json!({"sheet_index": 0})).unwrap();
        assert_eq!(post.names, vec!["df1", "df1_copy"]);
        assert_eq!(post.sources[1], DataframeSource::Duplicated);

        let new_b = post.column_id(1, "B").unwrap();
        let new_a = post.column_id(1, "A").unwrap();
        let meta = post.meta(1, &new_b).unwrap();
        assert_eq!(meta.format, FormatSpec::Accounting);
        assert_eq!(meta.dependencies.iter().collect::<Vec<_>>(), vec![&new_a]);
        assert_eq!(meta.python_code, "df1_copy['B'] = df1_copy['A'] + 1");
        assert_eq!(
            code(&step, &prev, &post, execution.as_ref()),
            vec!["df1_copy = df1.copy(deep=True)"]
        );
        post.check_consistency().unwrap();
    }
}
