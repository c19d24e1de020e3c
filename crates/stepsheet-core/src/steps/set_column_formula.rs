use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use stepsheet_engine::engine::{ColumnId, FormulaError, detect_cycle};

use super::{
    ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult, decode_params, no_op,
    resolve_header,
};
use crate::code_chunk::CodeChunk;
use crate::error::{Result, StepError};
use crate::refresh::refresh_dependant_columns;
use crate::state::{ColumnMetatype, State};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetColumnFormulaParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    pub new_formula: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_formula: Option<String>,
}

#[derive(Deserialize)]
struct SetColumnFormulaParamsV1 {
    sheet_index: usize,
    column_header: String,
    new_formula: String,
    #[serde(default)]
    old_formula: Option<String>,
}

/// Turn a column into a formula column, or change its formula.
pub struct SetColumnFormulaStepPerformer;

impl StepPerformer for SetColumnFormulaStepPerformer {
    type Params = SetColumnFormulaParams;

    const STEP_TYPE: &'static str = "set_column_formula";
    const STEP_VERSION: u32 = 2;
    const COMPATIBLE_VERSIONS: &'static [u32] = &[1];

    fn upgrade(prev: &State, _version: u32, raw: serde_json::Value) -> Result<Self::Params> {
        let v1: SetColumnFormulaParamsV1 = decode_params(Self::STEP_TYPE, raw)?;
        Ok(SetColumnFormulaParams {
            sheet_index: v1.sheet_index,
            column_id: resolve_header(prev, v1.sheet_index, &v1.column_header, Self::STEP_TYPE)?,
            new_formula: v1.new_formula,
            old_formula: v1.old_formula,
        })
    }

    fn saturate(prev: &State, mut params: Self::Params) -> Result<Self::Params> {
        prev.ensure_sheet(params.sheet_index, Self::STEP_TYPE)?;
        params.old_formula = Some(prev.meta(params.sheet_index, &params.column_id)?.spreadsheet_code.clone());
        Ok(params)
    }

    fn execute(prev: &Arc<State>, params: &Self::Params, ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let id = &params.column_id;
        let header = prev.header(sheet, id)?.to_string();
        let formula = params.new_formula.trim();
        if prev.meta(sheet, id)?.spreadsheet_code == formula {
            return no_op(prev);
        }

        let start = Instant::now();
        let table = prev.table(sheet)?;
        let headers = table.header_list();
        let invalid = |source: FormulaError| {
            warn!(column = %header, formula, error = ?source, "rejected formula");
            StepError::InvalidFormula {
                column_header: header.clone(),
                source,
            }
        };
        let parsed = ctx
            .formulas
            .parse(formula, &header, &headers, &prev.names[sheet])
            .map_err(invalid)?;

        let dependencies: BTreeSet<ColumnId> = parsed
            .dependencies
            .iter()
            .map(|dep| prev.column_id(sheet, dep))
            .collect::<Result<_>>()?;
        let mut graph = prev.dependency_graph(sheet);
        graph.insert(id.clone(), dependencies.clone());
        if dependencies.contains(id) || detect_cycle(id, &graph).is_some() {
            return Err(StepError::CircularReference { column_header: header.clone() });
        }

        let column = ctx.formulas.evaluate(formula, table).map_err(invalid)?;
        let dtype = column.dtype;
        let mut post = prev.copy(&[sheet]);
        post.table_mut(sheet)?.set_column(&header, column)?;
        let meta = post.meta_mut(sheet, id)?;
        meta.metatype = ColumnMetatype::Formula;
        meta.dtype = dtype;
        meta.spreadsheet_code = formula.to_string();
        meta.python_code = parsed.python_code;
        meta.dependencies = dependencies;
        let refreshed = refresh_dependant_columns(&mut post, sheet, id, ctx.formulas)?;

        let mut execution = ExecutionData::since(start);
        execution.refreshed_columns = refreshed;
        Ok((Arc::new(post), Some(execution)))
    }

    fn transpile(
        _prev: &State,
        post: &State,
        params: &Self::Params,
        execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let sheet = params.sheet_index;
        let (Ok(header), Ok(meta)) = (post.header(sheet, &params.column_id), post.meta(sheet, &params.column_id))
        else {
            return Vec::new();
        };
        let mut chunks = vec![
            CodeChunk::new(
                "Set column formula",
                format!("Set formula of {}", header),
            )
            .with_code([meta.python_code.clone()])
            .reading([sheet])
            .writing([sheet]),
        ];
        let refreshed = execution.map(|e| e.refreshed_columns.as_slice()).unwrap_or_default();
        if !refreshed.is_empty() {
            chunks.push(CodeChunk::refresh_dependant_columns(post, sheet, refreshed));
        }
        chunks
    }

    fn modified_sheet_indexes(params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::one(params.sheet_index)
    }
}
