//! Circular dependency detection for formula columns.
//!
//! A formula column may only read columns that do not, directly or
//! transitively, read it back. This module runs a depth-first search over
//! a column dependency graph to find such loops before a formula is
//! accepted.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use super::column_id::ColumnId;

/// Each column mapped to the columns its formula reads.
pub type DependencyGraph = BTreeMap<ColumnId, BTreeSet<ColumnId>>;

/// Detect circular dependencies starting from a column.
/// Returns Some(cycle_path) if a cycle is found, None otherwise.
pub fn detect_cycle(start: &ColumnId, graph: &DependencyGraph) -> Option<Vec<ColumnId>> {
    let mut visiting = HashSet::new();
    let mut done = HashSet::new();
    let mut path = Vec::new();

    if detect_cycle_dfs(start, graph, &mut visiting, &mut done, &mut path) {
        Some(path)
    } else {
        None
    }
}

fn detect_cycle_dfs<'a>(
    current: &'a ColumnId,
    graph: &'a DependencyGraph,
    visiting: &mut HashSet<&'a ColumnId>,
    done: &mut HashSet<&'a ColumnId>,
    path: &mut Vec<ColumnId>,
) -> bool {
    if visiting.contains(current) {
        path.push(current.clone());
        return true;
    }
    if done.contains(current) {
        return false;
    }

    let Some(deps) = graph.get(current) else {
        return false;
    };

    visiting.insert(current);
    path.push(current.clone());

    for dep in deps {
        if detect_cycle_dfs(dep, graph, visiting, done, path) {
            return true;
        }
    }

    path.pop();
    visiting.remove(current);
    done.insert(current);
    false
}
