use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use stepsheet_engine::engine::{ColumnId, python_string_literal, rename_references};

use super::{
    ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult, decode_params, no_op,
    resolve_header,
};
use crate::code_chunk::CodeChunk;
use crate::error::{Result, StepError};
use crate::state::State;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenameColumnParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    pub new_column_header: String,
}

#[derive(Deserialize)]
struct RenameColumnParamsV1 {
    sheet_index: usize,
    old_column_header: String,
    new_column_header: String,
}

pub struct RenameColumnStepPerformer;

/// Rename one column of `state` in place: the header, its id mapping and
/// every formula that reads it. Returns the old header.
///
/// Stored python code is left stale; callers regenerate it once all
/// renames of a step are done.
pub(crate) fn rename_column_in_state(
    state: &mut State,
    sheet: usize,
    id: &ColumnId,
    new_header: &str,
) -> Result<String> {
    let old_header = state.header(sheet, id)?.to_string();
    let headers = state.table(sheet)?.header_list();
    for dependent in state.direct_dependents(sheet, id) {
        let meta = state.meta_mut(sheet, &dependent)?;
        meta.spreadsheet_code = rename_references(&meta.spreadsheet_code, &old_header, new_header, &headers);
    }
    state.table_mut(sheet)?.rename_column(&old_header, new_header)?;
    if !state.column_ids.set_header(sheet, id, new_header) {
        return Err(StepError::ConsistencyFault(format!(
            "column {} has a header but no id entry",
            old_header
        )));
    }
    Ok(old_header)
}

/// `df.rename(columns={...}, inplace=True)` for `(old, new)` pairs.
pub(crate) fn rename_code(df_name: &str, renames: &[(String, String)]) -> String {
    let pairs: Vec<String> = renames
        .iter()
        .map(|(old, new)| format!("{}: {}", python_string_literal(old), python_string_literal(new)))
        .collect();
    format!("{}.rename(columns={{{}}}, inplace=True)", df_name, pairs.join(", "))
}

impl StepPerformer for RenameColumnStepPerformer {
    type Params = RenameColumnParams;

    const STEP_TYPE: &'static str = "rename_column";
    const STEP_VERSION: u32 = 2;
    const COMPATIBLE_VERSIONS: &'static [u32] = &[1];

    fn upgrade(prev: &State, _version: u32, raw: serde_json::Value) -> Result<Self::Params> {
        let v1: RenameColumnParamsV1 = decode_params(Self::STEP_TYPE, raw)?;
        Ok(RenameColumnParams {
            sheet_index: v1.sheet_index,
            column_id: resolve_header(prev, v1.sheet_index, &v1.old_column_header, Self::STEP_TYPE)?,
            new_column_header: v1.new_column_header,
        })
    }

    fn execute(prev: &Arc<State>, params: &Self::Params, ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let old_header = prev.header(sheet, &params.column_id)?;
        let new_header = params.new_column_header.as_str();
        if new_header.is_empty() || new_header == old_header {
            return no_op(prev);
        }
        if prev.column_ids.contains_header(sheet, new_header) {
            return Err(StepError::ColumnExists { column_header: new_header.to_string() });
        }

        let start = Instant::now();
        let mut post = prev.copy(&[sheet]);
        let old_header = rename_column_in_state(&mut post, sheet, &params.column_id, new_header)?;
        post.regenerate_python_code(sheet, ctx.formulas)?;

        let mut execution = ExecutionData::since(start);
        execution
            .header_renames
            .insert(sheet, vec![(old_header, new_header.to_string())]);
        Ok((Arc::new(post), Some(execution)))
    }

    fn transpile(
        prev: &State,
        _post: &State,
        params: &Self::Params,
        execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let sheet = params.sheet_index;
        let Some(df_name) = prev.names.get(sheet) else {
            return Vec::new();
        };
        let renames = execution
            .and_then(|e| e.header_renames.get(&sheet))
            .cloned()
            .unwrap_or_default();
        let description = match renames.first() {
            Some((old, new)) => format!("Renamed {} to {}", old, new),
            None => "Renamed a column".to_string(),
        };
        let code = (!renames.is_empty()).then(|| rename_code(df_name, &renames));
        vec![
            CodeChunk::new("Renamed columns", description)
                .with_code(code)
                .reading([sheet])
                .writing([sheet]),
        ]
    }

    fn modified_sheet_indexes(params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::one(params.sheet_index)
    }
}
