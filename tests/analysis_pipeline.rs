//! End-to-end runs of the step pipeline across both crates.

use pretty_assertions::assert_eq;
use stepsheet::engine::{Column, DType, Table, Value};
use stepsheet::serde_json::{Value as Json, json};
use stepsheet::{Analysis, EngineConfig, ModifiedSheets, StepAction, StepOutcome};

fn ints(values: &[i64]) -> Column {
    Column::new(DType::Int, values.iter().copied().map(Value::Int).collect())
}

fn strs(values: &[&str]) -> Column {
    Column::new(DType::String, values.iter().copied().map(Value::from).collect())
}

fn tables() -> Vec<Table> {
    vec![
        Table::from_columns([("Price", ints(&[3, 1, 2])), ("Region", strs(&["b", "a", "c"]))]).unwrap(),
        Table::from_columns([("Price", ints(&[5])), ("Region", strs(&["d"]))]).unwrap(),
    ]
}

fn config() -> EngineConfig {
    EngineConfig::from_toml_str(
        r#"
        [codegen]
        imports = ["import pandas as pd"]
        comments = false
        "#,
    )
    .unwrap()
}

fn id(analysis: &Analysis, sheet: usize, header: &str) -> Json {
    json!(analysis.current_state().column_id(sheet, header).unwrap())
}

fn apply(analysis: &mut Analysis, step_type: &str, params: Json) -> StepOutcome {
    analysis
        .handle_action(&StepAction::new(step_type, params))
        .unwrap_or_else(|e| panic!("{} failed: {}", step_type, e))
}

fn build(analysis: &mut Analysis) {
    apply(
        analysis,
        "add_column",
        json!({"sheet_index": 0, "column_header": "Total", "column_header_index": 2}),
    );
    let total = id(analysis, 0, "Total");
    apply(
        analysis,
        "set_column_formula",
        json!({"sheet_index": 0, "column_id": total, "new_formula": "=Price * 2"}),
    );
    let price = id(analysis, 0, "Price");
    apply(
        analysis,
        "rename_column",
        json!({"sheet_index": 0, "column_id": price, "new_column_header": "Cost"}),
    );
    apply(
        analysis,
        "sort",
        json!({"sheet_index": 0, "column_id": price, "sort_direction": "descending"}),
    );
    apply(
        analysis,
        "concat",
        json!({"join": "inner", "ignore_index": true, "sheet_indexes": [0, 1]}),
    );
    apply(
        analysis,
        "dataframe_rename",
        json!({"sheet_index": 2, "new_dataframe_name": "combined"}),
    );
}

#[test]
fn test_pipeline_snapshots_and_script() {
    let mut analysis = Analysis::new(tables(), config()).unwrap();
    build(&mut analysis);

    let state = analysis.current_state();
    assert_eq!(state.names, vec!["df1", "df2", "combined"]);
    let df1 = state.table(0).unwrap();
    assert_eq!(df1.header_list(), vec!["Cost", "Region", "Total"]);
    assert_eq!(df1.column("Total").unwrap().values, vec![Value::Int(6), Value::Int(4), Value::Int(2)]);
    let total = state.column_id(0, "Total").unwrap();
    assert_eq!(state.meta(0, &total).unwrap().spreadsheet_code, "=Cost * 2");

    let combined = state.table(2).unwrap();
    assert_eq!(combined.header_list(), vec!["Region"]);
    assert_eq!(combined.num_rows(), 4);
    assert_eq!(combined.index(), &[0, 1, 2, 3]);

    assert_eq!(
        analysis.transpile(),
        [
            "import pandas as pd",
            "",
            "df1.insert(2, 'Total', 0)",
            "",
            "df1['Total'] = df1['Price'] * 2",
            "",
            "df1.rename(columns={'Price': 'Cost'}, inplace=True)",
            "",
            "df1 = df1.sort_values(by='Cost', ascending=False, na_position='last', kind='mergesort')",
            "",
            "df3 = pd.concat([df1, df2], join='inner', ignore_index=True)",
            "",
            "combined = df3",
        ]
        .join("\n")
    );
    state.check_consistency().unwrap();
}

#[test]
fn test_earlier_snapshots_are_untouched() {
    let mut analysis = Analysis::new(tables(), config()).unwrap();
    build(&mut analysis);

    let initial = analysis.initial_state();
    assert_eq!(initial.num_sheets(), 2);
    assert_eq!(initial.table(0).unwrap().header_list(), vec!["Price", "Region"]);
    assert_eq!(
        initial.table(0).unwrap().column("Price").unwrap().values,
        vec![Value::Int(3), Value::Int(1), Value::Int(2)]
    );
    for record in analysis.steps() {
        record.prev.check_consistency().unwrap();
    }
}

#[test]
fn test_saved_steps_replay_to_the_same_state() {
    let mut analysis = Analysis::new(tables(), config()).unwrap();
    build(&mut analysis);
    let saved = analysis.saved_steps().unwrap();
    assert_eq!(saved.len(), 6);

    let text = stepsheet::serde_json::to_string(&saved).unwrap();
    let loaded: Vec<StepAction> = stepsheet::serde_json::from_str(&text).unwrap();
    let replayed = Analysis::replay(tables(), &loaded, config()).unwrap();

    assert_eq!(replayed.transpile(), analysis.transpile());
    let (a, b) = (replayed.current_state(), analysis.current_state());
    assert_eq!(a.names, b.names);
    for sheet in 0..a.num_sheets() {
        assert_eq!(a.table(sheet).unwrap(), b.table(sheet).unwrap());
    }
    assert_eq!(a.sheet_summaries(), b.sheet_summaries());
}

#[test]
fn test_delete_and_dtype_change_report_modified_sheets() {
    let mut analysis = Analysis::new(tables(), config()).unwrap();
    let region = id(&analysis, 1, "Region");
    let StepOutcome::Applied(report) = apply(
        &mut analysis,
        "delete_column",
        json!({"sheet_index": 1, "column_ids": [region]}),
    ) else {
        panic!("delete should apply");
    };
    assert_eq!(report.modified, ModifiedSheets::one(1));
    assert_eq!(report.sheets[1].columns.len(), 1);

    let price = id(&analysis, 0, "Price");
    let StepOutcome::Applied(report) = apply(
        &mut analysis,
        "change_column_dtype",
        json!({"sheet_index": 0, "column_id": price, "new_dtype": "float64"}),
    ) else {
        panic!("dtype change should apply");
    };
    assert_eq!(report.sheets[0].columns[0].dtype, DType::Float);
    assert_eq!(
        analysis.code_chunks().last().unwrap().code,
        vec!["df1['Price'] = df1['Price'].astype('float')"]
    );

    let concat = apply(&mut analysis, "concat", json!({"sheet_indexes": [0, 1]}));
    let StepOutcome::Applied(report) = concat else {
        panic!("concat should apply");
    };
    assert_eq!(stepsheet::serde_json::to_value(&report.modified).unwrap(), json!([-1]));
}

#[test]
fn test_invalid_type_change_is_a_user_error() {
    let mut analysis = Analysis::new(
        vec![Table::from_columns([("Flag", Column::new(DType::Bool, vec![Value::Bool(true)]))]).unwrap()],
        config(),
    )
    .unwrap();
    let err = analysis
        .handle_action(&StepAction::new(
            "change_column_dtype",
            json!({"sheet_index": 0, "column_id": "col-0", "new_dtype": "datetime64[ns]"}),
        ))
        .unwrap_err();
    assert_eq!(err.kind(), "invalid_column_type_change");
    assert!(err.is_user_recoverable());
    assert!(analysis.steps().is_empty());
}

#[test]
fn test_legacy_ids_from_config() {
    let config = EngineConfig::from_toml_str("[ids]\nlegacy = true\n").unwrap();
    let analysis = Analysis::new(tables(), config).unwrap();
    assert_eq!(id(&analysis, 0, "Price"), json!("Price"));
}

#[test]
fn test_bulk_old_rename_switches_id_scheme() {
    let table = Table::from_columns([("unit price", ints(&[1])), ("qty", ints(&[2]))]).unwrap();
    let mut analysis = Analysis::new(vec![table], config()).unwrap();
    apply(
        &mut analysis,
        "bulk_old_rename",
        json!({"move_to_deprecated_id_algorithm": true}),
    );
    let state = analysis.current_state();
    assert!(state.column_ids.is_legacy());
    assert_eq!(state.table(0).unwrap().header_list(), vec!["unit_price", "qty"]);
    assert_eq!(id(&analysis, 0, "unit_price"), json!("unit_price"));
    state.check_consistency().unwrap();
}
