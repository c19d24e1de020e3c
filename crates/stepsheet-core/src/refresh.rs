//! Recomputing formula columns after a column they read changed.
//!
//! Only the transitive dependents of the changed column are recomputed, in
//! an order where every column comes after all columns it reads.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::debug;

use stepsheet_engine::engine::{ColumnId, FormulaEvaluator};

use crate::error::{Result, StepError};
use crate::state::State;

/// Every column that reads `id`, directly or through other columns.
pub fn dependents_of(state: &State, sheet: usize, id: &ColumnId) -> BTreeSet<ColumnId> {
    let mut found = BTreeSet::new();
    let mut queue = VecDeque::from([id.clone()]);
    while let Some(current) = queue.pop_front() {
        for dependent in state.direct_dependents(sheet, &current) {
            if found.insert(dependent.clone()) {
                queue.push_back(dependent);
            }
        }
    }
    found.remove(id);
    found
}

/// Topological order of the dependents of `id` (Kahn's algorithm), ties
/// broken by column position.
pub fn refresh_order(state: &State, sheet: usize, id: &ColumnId) -> Result<Vec<ColumnId>> {
    let closure = dependents_of(state, sheet, id);
    if closure.is_empty() {
        return Ok(Vec::new());
    }

    let mut pending: BTreeMap<&ColumnId, usize> = BTreeMap::new();
    for column in &closure {
        let meta = state.meta(sheet, column)?;
        let inside = meta.dependencies.iter().filter(|dep| closure.contains(*dep)).count();
        pending.insert(column, inside);
    }

    let positions: Vec<&ColumnId> = state.column_ids.ids(sheet).iter().collect();
    let mut order = Vec::with_capacity(closure.len());
    loop {
        let next = positions
            .iter()
            .find(|column| pending.get(**column) == Some(&0))
            .copied();
        let Some(column) = next else { break };
        pending.remove(column);
        for dependent in state.direct_dependents(sheet, column) {
            if let Some(count) = pending.get_mut(&dependent) {
                *count -= 1;
            }
        }
        order.push(column.clone());
    }

    if !pending.is_empty() {
        let stuck: Vec<&str> = pending.keys().map(|c| c.as_str()).collect();
        return Err(StepError::ConsistencyFault(format!(
            "dependency cycle among {}",
            stuck.join(", ")
        )));
    }
    Ok(order)
}

/// Re-evaluate every dependent of `id` in `state`, updating values and
/// dtypes. Returns the columns refreshed, in the order they were computed.
pub fn refresh_dependant_columns(
    state: &mut State,
    sheet: usize,
    id: &ColumnId,
    formulas: &dyn FormulaEvaluator,
) -> Result<Vec<ColumnId>> {
    let order = refresh_order(state, sheet, id)?;
    for column_id in &order {
        let header = state.header(sheet, column_id)?.to_string();
        let formula = state.meta(sheet, column_id)?.spreadsheet_code.clone();
        let column = formulas
            .evaluate(&formula, state.table(sheet)?)
            .map_err(|source| StepError::InvalidFormula {
                column_header: header.clone(),
                source,
            })?;
        let dtype = column.dtype;
        state.table_mut(sheet)?.set_column(&header, column)?;
        state.meta_mut(sheet, column_id)?.dtype = dtype;
    }
    if !order.is_empty() {
        debug!(sheet, changed = %id, refreshed = order.len(), "refreshed dependent columns");
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ColumnMetatype;
    use pretty_assertions::assert_eq;
    use stepsheet_engine::engine::{Column, RhaiFormulaEvaluator, Table, Value};

    /// A -> B = A + 1 -> C = B * 2, plus D = A + C.
    fn chain() -> State {
        let table = Table::from_columns([
            ("A", Column::from_values(vec![Value::Int(1), Value::Int(2)])),
            ("B", Column::from_values(vec![Value::Int(2), Value::Int(3)])),
            ("C", Column::from_values(vec![Value::Int(4), Value::Int(6)])),
            ("D", Column::from_values(vec![Value::Int(5), Value::Int(8)])),
        ])
        .unwrap();
        let mut state = State::new(vec![table]);
        for (id, formula, deps) in [
            ("col-1", "=A + 1", vec!["col-0"]),
            ("col-2", "=B * 2", vec!["col-1"]),
            ("col-3", "=A + C", vec!["col-0", "col-2"]),
        ] {
            let meta = state.meta_mut(0, &ColumnId::from(id)).unwrap();
            meta.metatype = ColumnMetatype::Formula;
            meta.spreadsheet_code = formula.to_string();
            meta.dependencies = deps.into_iter().map(ColumnId::from).collect();
        }
        state
    }

    #[test]
    fn test_dependents_are_transitive() {
        let state = chain();
        let deps: Vec<String> = dependents_of(&state, 0, &ColumnId::from("col-1"))
            .into_iter()
            .map(|c| c.to_string())
            .collect();
        assert_eq!(deps, vec!["col-2", "col-3"]);
    }

    #[test]
    fn test_refresh_order_respects_dependencies() {
        let state = chain();
        let order = refresh_order(&state, 0, &ColumnId::from("col-0")).unwrap();
        assert_eq!(
            order,
            vec![ColumnId::from("col-1"), ColumnId::from("col-2"), ColumnId::from("col-3")]
        );
    }

    #[test]
    fn test_refresh_recomputes_values() {
        let mut state = chain();
        state
            .table_mut(0)
            .unwrap()
            .set_column("A", Column::from_values(vec![Value::Int(10), Value::Int(20)]))
            .unwrap();
        let refreshed =
            refresh_dependant_columns(&mut state, 0, &ColumnId::from("col-0"), &RhaiFormulaEvaluator).unwrap();
        assert_eq!(refreshed.len(), 3);
        let table = state.table(0).unwrap();
        assert_eq!(table.column("B").unwrap().values, vec![Value::Int(11), Value::Int(21)]);
        assert_eq!(table.column("D").unwrap().values, vec![Value::Int(32), Value::Int(62)]);
        state.check_consistency().unwrap();
    }

    #[test]
    fn test_nothing_to_refresh() {
        let mut state = chain();
        let refreshed =
            refresh_dependant_columns(&mut state, 0, &ColumnId::from("col-3"), &RhaiFormulaEvaluator).unwrap();
        assert!(refreshed.is_empty());
    }
}
