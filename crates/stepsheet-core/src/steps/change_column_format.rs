use serde::{Deserialize, Serialize};
use std::sync::Arc;

use stepsheet_engine::engine::ColumnId;

use super::{ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult};
use crate::code_chunk::CodeChunk;
use crate::state::{FormatSpec, State};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeColumnFormatParams {
    pub sheet_index: usize,
    pub column_ids: Vec<ColumnId>,
    pub format_type: FormatSpec,
}

/// Set the display format of columns. Formats never touch the data.
pub struct ChangeColumnFormatStepPerformer;

impl StepPerformer for ChangeColumnFormatStepPerformer {
    type Params = ChangeColumnFormatParams;

    const STEP_TYPE: &'static str = "change_column_format";
    const STEP_VERSION: u32 = 1;

    fn execute(prev: &Arc<State>, params: &Self::Params, _ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let mut post = prev.copy(&[]);
        for id in &params.column_ids {
            post.meta_mut(sheet, id)?.format = params.format_type.clone();
        }
        Ok((Arc::new(post), Some(ExecutionData::default())))
    }

    fn transpile(
        _prev: &State,
        _post: &State,
        params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        vec![CodeChunk::new(
            "Changed column format",
            format!(
                "Changed the format of {} columns to {}",
                params.column_ids.len(),
                params.format_type
            ),
        )]
    }

    fn modified_sheet_indexes(params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::one(params.sheet_index)
    }
}
