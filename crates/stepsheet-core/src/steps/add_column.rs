use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use stepsheet_engine::engine::{Column, DType, Value, python_string_literal};

use super::{ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult};
use crate::code_chunk::CodeChunk;
use crate::error::StepError;
use crate::state::{ColumnMeta, ColumnMetatype, State};

const DEFAULT_FORMULA: &str = "=0";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AddColumnParams {
    pub sheet_index: usize,
    pub column_header: String,
    /// Position of the new column; past the end appends.
    pub column_header_index: usize,
}

/// Insert a formula column holding `=0`.
pub struct AddColumnStepPerformer;

impl StepPerformer for AddColumnStepPerformer {
    type Params = AddColumnParams;

    const STEP_TYPE: &'static str = "add_column";
    const STEP_VERSION: u32 = 1;

    fn execute(prev: &Arc<State>, params: &Self::Params, ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let header = params.column_header.as_str();
        if prev.column_ids.contains_header(sheet, header) {
            return Err(StepError::ColumnExists { column_header: header.to_string() });
        }

        let start = Instant::now();
        let mut post = prev.copy(&[sheet]);
        let num_columns = post.table(sheet)?.num_columns();
        let position = params.column_header_index.min(num_columns);
        let num_rows = post.table(sheet)?.num_rows();
        post.table_mut(sheet)?.insert_column(
            position,
            header,
            Column::new(DType::Int, vec![Value::Int(0); num_rows]),
        )?;
        let id = post.column_ids.insert(sheet, position, header).ok_or_else(|| {
            StepError::ConsistencyFault(format!("no column ids for dataframe {}", sheet))
        })?;

        let headers = post.table(sheet)?.header_list();
        let parsed = ctx
            .formulas
            .parse(DEFAULT_FORMULA, header, &headers, &post.names[sheet])
            .map_err(|source| StepError::InvalidFormula {
                column_header: header.to_string(),
                source,
            })?;
        let meta = ColumnMeta {
            metatype: ColumnMetatype::Formula,
            spreadsheet_code: DEFAULT_FORMULA.to_string(),
            python_code: parsed.python_code,
            ..ColumnMeta::value(DType::Int)
        };
        post.columns[sheet].insert(id, meta);
        Ok((Arc::new(post), Some(ExecutionData::since(start))))
    }

    fn transpile(
        prev: &State,
        post: &State,
        params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let sheet = params.sheet_index;
        let (Some(df_name), Ok(table)) = (prev.names.get(sheet), post.table(sheet)) else {
            return Vec::new();
        };
        let position = table.position(&params.column_header).unwrap_or(params.column_header_index);
        vec![
            CodeChunk::new("Added column", format!("Added column {}", params.column_header))
                .with_code([format!(
                    "{}.insert({}, {}, 0)",
                    df_name,
                    position,
                    python_string_literal(&params.column_header)
                )])
                .reading([sheet])
                .writing([sheet]),
        ]
    }

    fn modified_sheet_indexes(params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::one(params.sheet_index)
    }
}
