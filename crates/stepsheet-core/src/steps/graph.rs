//! Graph steps. Graphs live beside the sheets and never reach the
//! generated script; each step still emits a placeholder chunk so the
//! chunk list stays aligned with the step list.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use stepsheet_engine::engine::ColumnId;

use super::{ExecutionData, ModifiedSheets, StepContext, StepPerformer, StepResult, no_op};
use crate::code_chunk::CodeChunk;
use crate::error::{Result, StepError};
use crate::state::{GraphDefinition, GraphId, State};

fn graph<'a>(state: &'a State, graph_id: &str) -> Result<&'a GraphDefinition> {
    state.graphs.get(graph_id).ok_or_else(|| StepError::NoGraph {
        graph_id: graph_id.to_string(),
    })
}

fn placeholder(display_name: &str, description: String) -> Vec<CodeChunk> {
    vec![CodeChunk::new(display_name, description)]
}

/// `graph1`, `graph2`, ... skipping names already shown.
fn new_tab_name(state: &State) -> String {
    (state.graphs.len() + 1..)
        .map(|n| format!("graph{}", n))
        .find(|name| state.graphs.values().all(|g| g.tab_name != *name))
        .unwrap_or_else(|| "graph".to_string())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphParams {
    pub graph_id: GraphId,
    pub graph_type: String,
    pub sheet_index: usize,
    #[serde(default)]
    pub x_axis_column_ids: Vec<ColumnId>,
    #[serde(default)]
    pub y_axis_column_ids: Vec<ColumnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<ColumnId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

/// Create a graph, or replace the definition of an existing one.
pub struct GraphStepPerformer;

impl StepPerformer for GraphStepPerformer {
    type Params = GraphParams;

    const STEP_TYPE: &'static str = "graph";
    const STEP_VERSION: u32 = 1;

    fn execute(prev: &Arc<State>, params: &Self::Params, _ctx: &StepContext<'_>) -> StepResult {
        let sheet = params.sheet_index;
        prev.ensure_sheet(sheet, Self::STEP_TYPE)?;
        let start = Instant::now();
        let axes = params
            .x_axis_column_ids
            .iter()
            .chain(&params.y_axis_column_ids)
            .chain(params.color.as_ref());
        for id in axes {
            prev.header(sheet, id)?;
        }

        let tab_name = match prev.graphs.get(&params.graph_id) {
            Some(existing) => existing.tab_name.clone(),
            None => new_tab_name(prev),
        };
        let mut post = prev.copy(&[]);
        post.graphs.insert(
            params.graph_id.clone(),
            GraphDefinition {
                graph_type: params.graph_type.clone(),
                sheet_index: sheet,
                x_axis_column_ids: params.x_axis_column_ids.clone(),
                y_axis_column_ids: params.y_axis_column_ids.clone(),
                color: params.color.clone(),
                title: params.title.clone(),
                tab_name,
            },
        );
        Ok((Arc::new(post), Some(ExecutionData::since(start))))
    }

    fn transpile(
        _prev: &State,
        _post: &State,
        params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        placeholder("Graphed", format!("Created a {} graph", params.graph_type))
    }

    fn modified_sheet_indexes(_params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::All
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphDeleteParams {
    pub graph_id: GraphId,
}

pub struct GraphDeleteStepPerformer;

impl StepPerformer for GraphDeleteStepPerformer {
    type Params = GraphDeleteParams;

    const STEP_TYPE: &'static str = "graph_delete";
    const STEP_VERSION: u32 = 1;

    fn execute(prev: &Arc<State>, params: &Self::Params, _ctx: &StepContext<'_>) -> StepResult {
        graph(prev, &params.graph_id)?;
        let mut post = prev.copy(&[]);
        post.graphs.remove(&params.graph_id);
        Ok((Arc::new(post), Some(ExecutionData::default())))
    }

    fn transpile(
        _prev: &State,
        _post: &State,
        _params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        placeholder("Deleted graph", "Deleted a graph".to_string())
    }

    fn modified_sheet_indexes(_params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::All
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphRenameParams {
    pub graph_id: GraphId,
    pub new_graph_tab_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_graph_tab_name: Option<String>,
}

pub struct GraphRenameStepPerformer;

impl StepPerformer for GraphRenameStepPerformer {
    type Params = GraphRenameParams;

    const STEP_TYPE: &'static str = "graph_rename";
    const STEP_VERSION: u32 = 1;

    fn saturate(prev: &State, mut params: Self::Params) -> Result<Self::Params> {
        params.old_graph_tab_name = Some(graph(prev, &params.graph_id)?.tab_name.clone());
        Ok(params)
    }

    fn execute(prev: &Arc<State>, params: &Self::Params, _ctx: &StepContext<'_>) -> StepResult {
        let current = graph(prev, &params.graph_id)?;
        let new_name = params.new_graph_tab_name.trim();
        if new_name.is_empty() || new_name == current.tab_name {
            return no_op(prev);
        }
        let mut post = prev.copy(&[]);
        if let Some(graph) = post.graphs.get_mut(&params.graph_id) {
            graph.tab_name = new_name.to_string();
        }
        Ok((Arc::new(post), Some(ExecutionData::default())))
    }

    fn transpile(
        _prev: &State,
        _post: &State,
        params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        placeholder(
            "Renamed graph",
            format!("Renamed a graph to {}", params.new_graph_tab_name.trim()),
        )
    }

    fn modified_sheet_indexes(_params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::All
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphDuplicateParams {
    pub old_graph_id: GraphId,
    pub new_graph_id: GraphId,
}

pub struct GraphDuplicateStepPerformer;

impl StepPerformer for GraphDuplicateStepPerformer {
    type Params = GraphDuplicateParams;

    const STEP_TYPE: &'static str = "graph_duplicate";
    const STEP_VERSION: u32 = 1;

    fn execute(prev: &Arc<State>, params: &Self::Params, _ctx: &StepContext<'_>) -> StepResult {
        let mut copy = graph(prev, &params.old_graph_id)?.clone();
        // Tab names are display-only and may repeat.
        copy.tab_name.push_str("_copy");
        let mut post = prev.copy(&[]);
        post.graphs.insert(params.new_graph_id.clone(), copy);
        Ok((Arc::new(post), Some(ExecutionData::default())))
    }

    fn transpile(
        _prev: &State,
        _post: &State,
        _params: &Self::Params,
        _execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk> {
        placeholder("Duplicated graph", "Duplicated a graph".to_string())
    }

    fn modified_sheet_indexes(_params: &Self::Params) -> ModifiedSheets {
        ModifiedSheets::All
    }
}
