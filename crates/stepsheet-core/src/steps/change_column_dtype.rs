use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

use stepsheet_engine::engine::{
    ColumnId, DType, convert_column_with_format, preserves_format, python_string_literal,
};

use super::{
    ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult, decode_params, no_op,
    resolve_header,
};
use crate::code_chunk::{CodeChunk, column_reference};
use crate::error::{Result, StepError};
use crate::refresh::refresh_dependant_columns;
use crate::state::{FormatSpec, State};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChangeColumnDtypeParams {
    pub sheet_index: usize,
    pub column_id: ColumnId,
    pub new_dtype: DType,
    /// Filled in from the previous snapshot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_dtype: Option<DType>,
}

#[derive(Deserialize)]
struct ChangeColumnDtypeParamsV1 {
    sheet_index: usize,
    column_header: String,
    new_dtype: DType,
    #[serde(default)]
    old_dtype: Option<DType>,
}

pub struct ChangeColumnDtypeStepPerformer;

impl StepPerformer for ChangeColumnDtypeStepPerformer {
    type Params = ChangeColumnDtypeParams;

    const STEP_TYPE: &'static str = "change_column_dtype";
    const STEP_VERSION: u32 = 2;
    const COMPATIBLE_VERSIONS: &'static [u32] = &[1];

    fn upgrade(prev: &State, _version: u32, raw: serde_json::Value) -> Result<Self::Params> {
        let v1: ChangeColumnDtypeParamsV1 = decode_params(Self::STEP_TYPE, raw)?;
        Ok(ChangeColumnDtypeParams {
            sheet_index: v1.sheet_index,
            column_id: resolve_header(prev, v1.sheet_index, &v1.column_header, Self::STEP_TYPE)?,
            new_dtype: v1.new_dtype,
            old_dtype: v1.old_dtype,
        })
    }

    fn saturate(prev: &State, mut params: Self::Params) -> Result<Self::Params> {
        prev.ensure_sheet(params.sheet_index, Self::STEP_TYPE)?;
        params.old_dtype = Some(prev.meta(params.sheet_index, &params.column_id)?.dtype);
        Ok(params)
    }

    fn execute(prev: &Arc<State>, params: &Self::Params, ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let id = &params.column_id;
        let header = prev.header(sheet, id)?.to_string();
        let old_dtype = match params.old_dtype {
            Some(dtype) => dtype,
            None => prev.meta(sheet, id)?.dtype,
        };
        if old_dtype == params.new_dtype {
            return no_op(prev);
        }

        let start = Instant::now();
        let column = prev.table(sheet)?.column(&header).ok_or_else(|| StepError::NoColumn {
            sheet_index: sheet,
            column: header.clone(),
        })?;
        let options = ctx.config.conversion_options();
        let (converted, datetime_format) = convert_column_with_format(column, old_dtype, params.new_dtype, &options)
            .map_err(|e| {
                warn!(column = %header, error = %e, "dtype conversion failed");
                StepError::InvalidTypeChange {
                    column_header: header.clone(),
                    old_dtype: old_dtype.to_string(),
                    new_dtype: params.new_dtype.to_string(),
                }
            })?;

        let new_dtype = converted.dtype;
        let mut post = prev.copy(&[sheet]);
        post.table_mut(sheet)?.set_column(&header, converted)?;
        let meta = post.meta_mut(sheet, id)?;
        meta.dtype = new_dtype;
        if !preserves_format(old_dtype, new_dtype) {
            meta.format = FormatSpec::Default;
        }
        let refreshed = refresh_dependant_columns(&mut post, sheet, id, ctx.formulas)?;

        let mut execution = ExecutionData::since(start);
        execution.refreshed_columns = refreshed;
        execution.datetime_format = datetime_format;
        Ok((Arc::new(post), Some(execution)))
    }

    fn transpile(
        prev: &State,
        post: &State,
        params: &Self::Params,
        execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        let sheet = params.sheet_index;
        let (Ok(header), Some(df_name)) = (prev.header(sheet, &params.column_id), prev.names.get(sheet)) else {
            return Vec::new();
        };
        let old_dtype = params
            .old_dtype
            .or_else(|| prev.meta(sheet, &params.column_id).ok().map(|m| m.dtype));
        let new_dtype = post
            .meta(sheet, &params.column_id)
            .map(|m| m.dtype)
            .unwrap_or(params.new_dtype);
        let column = column_reference(df_name, header);
        let datetime_format = execution.and_then(|e| e.datetime_format.as_deref());
        let code = old_dtype
            .and_then(|old| conversion_expression(&column, old, new_dtype, datetime_format))
            .map(|expression| format!("{} = {}", column, expression));

        let mut chunks = vec![
            CodeChunk::new(
                "Changed dtype",
                format!("Changed {} to dtype {}", header, params.new_dtype),
            )
            .with_code(code)
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

/// The pandas expression converting `column` from `old` to `new`.
fn conversion_expression(column: &str, old: DType, new: DType, datetime_format: Option<&str>) -> Option<String> {
    let family = |d: DType| if d.is_string_like() { DType::String } else { d };
    let expression = match (family(old), family(new)) {
        (DType::String, DType::String) => format!("{}.astype('str')", column),
        (DType::Bool, DType::Int) => format!("{}.astype('int')", column),
        (DType::Bool | DType::Int, DType::Float) => format!("{}.astype('float')", column),
        (DType::Bool | DType::Int | DType::Float | DType::TimeDelta, DType::String) => {
            format!("{}.astype('str')", column)
        }
        (DType::Int | DType::Float, DType::Bool) => format!("{}.fillna(False).astype('bool')", column),
        (DType::Float, DType::Int) => format!("{}.fillna(0).astype('int')", column),
        (DType::Int | DType::Float, DType::DateTime) => {
            format!("pd.to_datetime({}, unit='s', errors='coerce')", column)
        }
        (DType::Int | DType::Float | DType::String, DType::TimeDelta) => {
            format!("to_timedelta_series({})", column)
        }
        (DType::String, DType::Bool) => format!("to_boolean_series({})", column),
        (DType::String, DType::Int) => format!("to_int_series({})", column),
        (DType::String, DType::Float) => format!("to_float_series({})", column),
        (DType::String, DType::DateTime) => match datetime_format {
            Some(format) => format!(
                "pd.to_datetime({}, format={}, errors='coerce')",
                column,
                python_string_literal(format)
            ),
            None => format!("pd.to_datetime({}, infer_datetime_format=True, errors='coerce')", column),
        },
        (DType::DateTime | DType::TimeDelta, DType::Bool) => format!("~{}.isnull()", column),
        (DType::DateTime, DType::Int) => format!("{}.astype('int') // 10**9", column),
        (DType::DateTime, DType::Float) => format!("{}.astype('int').astype('float') / 10**9", column),
        (DType::DateTime, DType::String) => format!("{}.dt.strftime('%Y-%m-%d %X')", column),
        (DType::TimeDelta, DType::Int) => format!("{}.dt.total_seconds().astype('int')", column),
        (DType::TimeDelta, DType::Float) => format!("{}.dt.total_seconds()", column),
        _ => return None,
    };
    Some(expression)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::state::ColumnMetatype;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use stepsheet_engine::engine::{Column, Table, Value};

    fn strings(values: &[&str]) -> Column {
        Column::from_values(values.iter().map(|v| Value::from(*v)).collect())
    }

    #[test]
    fn test_int_to_float_keeps_format() {
        let mut prev = State::new(vec![
            Table::from_columns([("A", ints(&[1, 2]))]).unwrap(),
        ]);
        prev.meta_mut(0, &ColumnId::from("col-0")).unwrap().format = FormatSpec::Percentage;
        let prev = Arc::new(prev);

        let (step, post, execution) = run(
            &prev,
            "change_column_dtype",
            json!({"sheet_index": 0, "column_id": "col-0", "new_dtype": "float"}),
        )
        .unwrap();
        let meta = post.meta(0, &ColumnId::from("col-0")).unwrap();
        assert_eq!(meta.dtype, DType::Float);
        assert_eq!(meta.format, FormatSpec::Percentage);
        assert_eq!(
            post.table(0).unwrap().column("A").unwrap().values,
            vec![Value::Float(1.0), Value::Float(2.0)]
        );
        assert_eq!(
            code(&step, &prev, &post, execution.as_ref()),
            vec!["df1['A'] = df1['A'].astype('float')"]
        );
        post.check_consistency().unwrap();
        // the previous snapshot is untouched
        assert_eq!(prev.table(0).unwrap().column("A").unwrap().dtype, DType::Int);
    }

    #[test]
    fn test_int_to_string_resets_format() {
        let mut prev = State::new(vec![
            Table::from_columns([("A", ints(&[1]))]).unwrap(),
        ]);
        prev.meta_mut(0, &ColumnId::from("col-0")).unwrap().format = FormatSpec::Currency;
        let prev = Arc::new(prev);
        let (_, post, _) = run(
            &prev,
            "change_column_dtype",
            json!({"sheet_index": 0, "column_id": "col-0", "new_dtype": "str"}),
        )
        .unwrap();
        assert_eq!(post.meta(0, &ColumnId::from("col-0")).unwrap().format, FormatSpec::Default);
    }

    #[test]
    fn test_bool_to_datetime_is_rejected() {
        let prev = state_with(vec![("flag", Column::from_values(vec![Value::Bool(true)]))]);
        let err = run(
            &prev,
            "change_column_dtype",
            json!({"sheet_index": 0, "column_id": "col-0", "new_dtype": "datetime64[ns]"}),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Sorry, the column flag has a type bool, which cannot be changed to the type datetime64[ns]."
        );
    }

    #[test]
    fn test_same_dtype_is_a_no_op() {
        let prev = state_with(vec![("A", ints(&[1]))]);
        let (_, post, execution) = run(
            &prev,
            "change_column_dtype",
            json!({"sheet_index": 0, "column_id": "col-0", "new_dtype": "int"}),
        )
        .unwrap();
        assert!(execution.is_none());
        assert!(Arc::ptr_eq(&prev, &post));
    }

    #[test]
    fn test_string_to_datetime_uses_shared_format() {
        let prev = state_with(vec![("d", strings(&["2021-03-04", "2022-01-31"]))]);
        let (step, post, execution) = run(
            &prev,
            "change_column_dtype",
            json!({"sheet_index": 0, "column_id": "col-0", "new_dtype": "datetime"}),
        )
        .unwrap();
        assert_eq!(execution.as_ref().unwrap().datetime_format.as_deref(), Some("%Y-%m-%d"));
        assert_eq!(
            code(&step, &prev, &post, execution.as_ref()),
            vec!["df1['d'] = pd.to_datetime(df1['d'], format='%Y-%m-%d', errors='coerce')"]
        );
    }

    #[test]
    fn test_object_to_datetime_records_the_applied_format() {
        let mixed = Column::new(DType::Object, vec![Value::from("2021-03-04"), Value::Int(20210305)]);
        let prev = state_with(vec![("d", mixed)]);
        let (step, post, execution) = run(
            &prev,
            "change_column_dtype",
            json!({"sheet_index": 0, "column_id": "col-0", "new_dtype": "datetime"}),
        )
        .unwrap();
        // no single format parses both values, so none is recorded
        assert_eq!(execution.as_ref().unwrap().datetime_format, None);
        assert_eq!(
            code(&step, &prev, &post, execution.as_ref()),
            vec!["df1['d'] = pd.to_datetime(df1['d'], infer_datetime_format=True, errors='coerce')"]
        );
        let values = &post.table(0).unwrap().column("d").unwrap().values;
        assert!(values.iter().all(|v| matches!(v, Value::DateTime(_))));
    }

    #[test]
    fn test_dependents_are_refreshed() {
        let mut prev = State::new(vec![
            Table::from_columns([
                ("A", strings(&["1", "2"])),
                ("B", strings(&["11", "21"])),
            ])
            .unwrap(),
        ]);
        let b = ColumnId::from("col-1");
        let meta = prev.meta_mut(0, &b).unwrap();
        meta.metatype = ColumnMetatype::Formula;
        meta.spreadsheet_code = "=A + 10".to_string();
        meta.python_code = "df1['B'] = df1['A'] + 10".to_string();
        meta.dependencies.insert(ColumnId::from("col-0"));
        let prev = Arc::new(prev);

        let (step, post, execution) = run(
            &prev,
            "change_column_dtype",
            json!({"sheet_index": 0, "column_id": "col-0", "new_dtype": "int"}),
        )
        .unwrap();
        let table = post.table(0).unwrap();
        assert_eq!(table.column("B").unwrap().values, vec![Value::Int(11), Value::Int(12)]);
        assert_eq!(post.meta(0, &b).unwrap().dtype, DType::Int);
        assert!(post.meta(0, &b).unwrap().dependencies.contains(&ColumnId::from("col-0")));
        assert_eq!(
            code(&step, &prev, &post, execution.as_ref()),
            vec!["df1['A'] = to_int_series(df1['A'])", "df1['B'] = df1['A'] + 10"]
        );
        post.check_consistency().unwrap();
    }

    #[test]
    fn test_v1_params_resolve_headers() {
        let prev = state_with(vec![("A", ints(&[1]))]);
        let action = super::super::StepAction {
            step_type: "change_column_dtype".to_string(),
            step_version: 1,
            params: json!({"sheet_index": 0, "column_header": "A", "new_dtype": "float"}),
        };
        let step = super::super::Step::decode(&prev, &action).unwrap();
        let super::super::Step::ChangeColumnDtype(params) = step else {
            panic!("decoded the wrong step");
        };
        assert_eq!(params.column_id, ColumnId::from("col-0"));
    }

    #[test]
    fn test_conversion_expressions() {
        let c = "df1['A']";
        assert_eq!(
            conversion_expression(c, DType::Float, DType::Int, None).unwrap(),
            "df1['A'].fillna(0).astype('int')"
        );
        assert_eq!(
            conversion_expression(c, DType::DateTime, DType::String, None).unwrap(),
            "df1['A'].dt.strftime('%Y-%m-%d %X')"
        );
        assert_eq!(
            conversion_expression(c, DType::Int, DType::DateTime, None).unwrap(),
            "pd.to_datetime(df1['A'], unit='s', errors='coerce')"
        );
        assert!(conversion_expression(c, DType::Bool, DType::TimeDelta, None).is_none());
    }
}
