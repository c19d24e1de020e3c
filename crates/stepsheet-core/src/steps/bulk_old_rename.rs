use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use stepsheet_engine::engine::legacy_header;

use super::{ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult, no_op};
use crate::code_chunk::CodeChunk;
use crate::state::State;
use crate::steps::rename_column::{rename_code, rename_column_in_state};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BulkOldRenameParams {
    /// Also switch every sheet to header-derived column ids.
    #[serde(default)]
    pub move_to_deprecated_id_algorithm: bool,
}

/// Rewrite every header of every sheet into the legacy identifier form.
///
/// Replayed ahead of analyses saved before headers could hold arbitrary
/// text, so that their steps see the headers they were recorded against.
pub struct BulkOldRenameStepPerformer;

/// Target headers for one sheet, in column order.
///
/// A target may only equal the column's own header or a header no other
/// column holds, so renames can be applied one at a time without clashing.
fn legacy_targets(headers: &[String]) -> Vec<String> {
    let originals: BTreeSet<&str> = headers.iter().map(String::as_str).collect();
    let mut assigned = BTreeSet::new();
    headers
        .iter()
        .map(|header| {
            let base = legacy_header(header);
            let free = |candidate: &str| {
                !assigned.contains(candidate) && (candidate == header || !originals.contains(candidate))
            };
            let mut target = base.clone();
            let mut n = 1;
            while !free(&target) {
                target = format!("{}_{}", base, n);
                n += 1;
            }
            assigned.insert(target.clone());
            target
        })
        .collect()
}

impl StepPerformer for BulkOldRenameStepPerformer {
    type Params = BulkOldRenameParams;

    const STEP_TYPE: &'static str = "bulk_old_rename";
    const STEP_VERSION: u32 = 1;

    fn execute(prev: &Arc<State>, params: &Self::Params, ctx: &StepContext<'_>) -> StepResult {
        let start = Instant::now();
        let mut post = prev.deep_copy();
        let mut execution = ExecutionData::default();
        for sheet in 0..post.num_sheets() {
            let ids = post.column_ids.ids(sheet).to_vec();
            let headers = post.column_ids.headers(sheet);
            let mut renames = Vec::new();
            for ((id, header), target) in ids.iter().zip(&headers).zip(legacy_targets(&headers)) {
                if *header != target {
                    rename_column_in_state(&mut post, sheet, id, &target)?;
                    renames.push((header.clone(), target));
                }
            }
            if !renames.is_empty() {
                post.regenerate_python_code(sheet, ctx.formulas)?;
                execution.header_renames.insert(sheet, renames);
            }
        }

        let switch_ids = params.move_to_deprecated_id_algorithm && !post.column_ids.is_legacy();
        if execution.header_renames.is_empty() && !switch_ids {
            return no_op(prev);
        }
        if switch_ids {
            post = post.to_legacy_ids()?;
        }
        execution.processing_time = start.elapsed();
        Ok((Arc::new(post), Some(execution)))
    }

    fn transpile(
        prev: &State,
        _post: &State,
        _params: &Self::Params,
        execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let Some(execution) = execution else {
            return Vec::new();
        };
        let code = execution
            .header_renames
            .iter()
            .filter_map(|(sheet, renames)| Some(rename_code(prev.names.get(*sheet)?, renames)));
        let sheets: Vec<usize> = execution.header_renames.keys().copied().collect();
        vec![
            CodeChunk::new("Renamed headers", "Renamed headers for compatibility with previous versions")
                .with_code(code.collect::<Vec<_>>())
                .reading(sheets.clone())
                .writing(sheets),
        ]
    }

    fn modified_sheet_indexes(_params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::All
    }
}
