use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use stepsheet_engine::engine::{Join, Table};

use super::{ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult};
use crate::code_chunk::CodeChunk;
use crate::state::{DataframeSource, State};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConcatParams {
    #[serde(default)]
    pub join: Join,
    #[serde(default)]
    pub ignore_index: bool,
    pub sheet_indexes: Vec<usize>,
}

/// Stack sheets on top of each other into a new sheet.
pub struct ConcatStepPerformer;

impl StepPerformer for ConcatStepPerformer {
    type Params = ConcatParams;

    const STEP_TYPE: &'static str = "concat";
    const STEP_VERSION: u32 = 1;

    fn execute(prev: &Arc<State>, params: &Self::Params, _ctx: &StepContext<'_>) -> StepResult {
        for &sheet in &params.sheet_indexes {
            prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        }
        let start = Instant::now();
        let sources: Vec<&Table> = params.sheet_indexes.iter().map(|&s| prev.tables[s].as_ref()).collect();
        let concatenated = Table::concat(&sources, params.join, params.ignore_index);
        let execution = ExecutionData::since(start);

        let mut post = prev.copy(&[]);
        post.add_or_replace_table(concatenated, DataframeSource::Concatenated, None, None, &BTreeMap::new())?;
        Ok((Arc::new(post), Some(execution)))
    }

    fn transpile(
        prev: &State,
        post: &State,
        params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let Some(new_name) = post.names.last() else {
            return Vec::new();
        };
        let new_sheet = post.num_sheets() - 1;
        let sources: Vec<&str> = params
            .sheet_indexes
            .iter()
            .filter_map(|&s| prev.names.get(s).map(String::as_str))
            .collect();

        let code = if sources.is_empty() {
            format!("{} = pd.DataFrame()", new_name)
        } else {
            format!(
                "{} = pd.concat([{}], join='{}', ignore_index={})",
                new_name,
                sources.join(", "),
                params.join.as_str(),
                if params.ignore_index { "True" } else { "False" }
            )
        };
        let description = if sources.is_empty() {
            format!("Created empty dataframe {}", new_name)
        } else {
            format!("Concatenated {} together", sources.join(", "))
        };
        vec![
            CodeChunk::new("Concatenated", description)
                .with_code([code])
                .reading(params.sheet_indexes.iter().copied())
                .writing([new_sheet]),
        ]
    }

    fn modified_sheet_indexes(_params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::All
    }
}
