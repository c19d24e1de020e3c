//! Step performers.
//!
//! A step turns one snapshot into the next. Each kind of step implements
//! [`StepPerformer`]; [`Step`] is the closed set of kinds, and
//! [`StepAction`] is the serialized form a step arrives in (and is saved
//! as). Performing a step runs:
//!
//! 1. `decode` - raw parameters to typed ones, upgrading older versions
//! 2. `saturate` - fill in values read from the current snapshot
//! 3. `execute` - build the next snapshot (or report a no-op)
//! 4. `transpile` - emit the code that replays the step

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use stepsheet_engine::engine::{ColumnId, FormulaEvaluator};

use crate::code_chunk::CodeChunk;
use crate::config::EngineConfig;
use crate::error::{Result, StepError};
use crate::state::State;

mod add_column;
mod bulk_old_rename;
mod change_column_dtype;
mod change_column_format;
mod concat;
mod dataframe_duplicate;
mod dataframe_rename;
mod delete_column;
mod graph;
mod rename_column;
mod set_column_formula;
mod sort;

pub use add_column::{AddColumnParams, AddColumnStepPerformer};
pub use bulk_old_rename::{BulkOldRenameParams, BulkOldRenameStepPerformer};
pub use change_column_dtype::{ChangeColumnDtypeParams, ChangeColumnDtypeStepPerformer};
pub use change_column_format::{ChangeColumnFormatParams, ChangeColumnFormatStepPerformer};
pub use concat::{ConcatParams, ConcatStepPerformer};
pub use dataframe_duplicate::{DataframeDuplicateParams, DataframeDuplicateStepPerformer};
pub use dataframe_rename::{DataframeRenameParams, DataframeRenameStepPerformer};
pub use delete_column::{DeleteColumnParams, DeleteColumnStepPerformer};
pub use graph::{
    GraphDeleteParams, GraphDeleteStepPerformer, GraphDuplicateParams, GraphDuplicateStepPerformer,
    GraphParams, GraphRenameParams, GraphRenameStepPerformer, GraphStepPerformer,
};
pub use rename_column::{RenameColumnParams, RenameColumnStepPerformer};
pub use set_column_formula::{SetColumnFormulaParams, SetColumnFormulaStepPerformer};
pub use sort::{SortDirection, SortParams, SortStepPerformer};

/// Collaborators a step may call while executing.
pub struct StepContext<'a> {
    pub formulas: &'a dyn FormulaEvaluator,
    pub config: &'a EngineConfig,
}

/// What a step learned while executing, for code generation and callers.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ExecutionData {
    pub processing_time: Duration,
    /// Formula columns recomputed, in order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub refreshed_columns: Vec<ColumnId>,
    /// Row positions the step reordered to, when it reordered rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_positions: Option<Vec<usize>>,
    /// Header renames per sheet, `(old, new)` in column order.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub header_renames: BTreeMap<usize, Vec<(String, String)>>,
    /// Format shared by every value of a string column parsed as datetimes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime_format: Option<String>,
}

impl ExecutionData {
    pub fn since(start: Instant) -> ExecutionData {
        ExecutionData {
            processing_time: start.elapsed(),
            ..ExecutionData::default()
        }
    }
}

/// Sheets a step changed. `All` means every sheet may have changed,
/// including sheets being added.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModifiedSheets {
    Sheets(BTreeSet<usize>),
    All,
}

impl ModifiedSheets {
    pub fn one(sheet: usize) -> ModifiedSheets {
        ModifiedSheets::Sheets(BTreeSet::from([sheet]))
    }

    pub fn includes(&self, sheet: usize) -> bool {
        match self {
            ModifiedSheets::Sheets(sheets) => sheets.contains(&sheet),
            ModifiedSheets::All => true,
        }
    }

    /// Sheet indexes, with `All` as the `[-1]` sentinel.
    pub fn to_indexes(&self) -> Vec<i64> {
        match self {
            ModifiedSheets::Sheets(sheets) => sheets.iter().map(|s| *s as i64).collect(),
            ModifiedSheets::All => vec![-1],
        }
    }
}

impl Serialize for ModifiedSheets {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.to_indexes())
    }
}

pub type StepResult = Result<(Arc<State>, Option<ExecutionData>)>;

pub trait StepPerformer {
    type Params: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned;

    const STEP_TYPE: &'static str;
    const STEP_VERSION: u32;
    /// Older versions whose parameters `upgrade` understands.
    const COMPATIBLE_VERSIONS: &'static [u32] = &[];

    fn decode(prev: &State, version: u32, raw: serde_json::Value) -> Result<Self::Params> {
        if version == Self::STEP_VERSION {
            decode_params(Self::STEP_TYPE, raw)
        } else if Self::COMPATIBLE_VERSIONS.contains(&version) {
            Self::upgrade(prev, version, raw)
        } else {
            Err(StepError::UnsupportedStepVersion {
                step_type: Self::STEP_TYPE.to_string(),
                step_version: version,
            })
        }
    }

    /// Decode parameters saved by an older version.
    fn upgrade(_prev: &State, version: u32, _raw: serde_json::Value) -> Result<Self::Params> {
        Err(StepError::UnsupportedStepVersion {
            step_type: Self::STEP_TYPE.to_string(),
            step_version: version,
        })
    }

    /// Record values from `prev` the step needs later (e.g. the dtype a
    /// column had before it was changed).
    fn saturate(_prev: &State, params: Self::Params) -> Result<Self::Params> {
        Ok(params)
    }

    /// Build the next snapshot. Returns `prev` itself and no execution data
    /// when the step changes nothing.
    fn execute(prev: &Arc<State>, params: &Self::Params, ctx: &StepContext<'_>) -> StepResult;

    fn transpile(
        prev: &State,
        post: &State,
        params: &Self::Params,
        execution: Option<&ExecutionData>,
    ) -> Vec<CodeChunk>;

    fn modified_sheet_indexes(params: &Self::Params) -> ModifiedSheets;
}

pub(crate) fn decode_params<P: DeserializeOwned>(step_type: &str, raw: serde_json::Value) -> Result<P> {
    serde_json::from_value(raw).map_err(|e| StepError::InvalidParams {
        step_type: step_type.to_string(),
        message: e.to_string(),
    })
}

/// The result of a step that changes nothing.
pub(crate) fn no_op(prev: &Arc<State>) -> StepResult {
    Ok((Arc::clone(prev), None))
}

/// Resolve a header from version 1 parameters to the column's id.
pub(crate) fn resolve_header(prev: &State, sheet: usize, header: &str, step_type: &'static str) -> Result<ColumnId> {
    prev.ensure_sheet(sheet, step_type)?;
    prev.column_id(sheet, header)
}

/// A step as it is received and saved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepAction {
    pub step_type: String,
    pub step_version: u32,
    pub params: serde_json::Value,
}

impl StepAction {
    /// An action at the latest version of `step_type`.
    pub fn new(step_type: &str, params: serde_json::Value) -> StepAction {
        StepAction {
            step_type: step_type.to_string(),
            step_version: Step::latest_version(step_type).unwrap_or(0),
            params,
        }
    }
}

macro_rules! step_catalog {
    ($($variant:ident($performer:ty)),* $(,)?) => {
        /// Every kind of step, with its typed parameters.
        #[derive(Clone, Debug, PartialEq)]
        pub enum Step {
            $($variant(<$performer as StepPerformer>::Params),)*
        }

        impl Step {
            pub fn step_type(&self) -> &'static str {
                match self {
                    $(Step::$variant(_) => <$performer as StepPerformer>::STEP_TYPE,)*
                }
            }

            pub fn step_version(&self) -> u32 {
                match self {
                    $(Step::$variant(_) => <$performer as StepPerformer>::STEP_VERSION,)*
                }
            }

            pub fn latest_version(step_type: &str) -> Option<u32> {
                $(
                    if step_type == <$performer as StepPerformer>::STEP_TYPE {
                        return Some(<$performer as StepPerformer>::STEP_VERSION);
                    }
                )*
                None
            }

            pub fn step_types() -> Vec<&'static str> {
                vec![$(<$performer as StepPerformer>::STEP_TYPE,)*]
            }

            pub fn decode(prev: &State, action: &StepAction) -> Result<Step> {
                $(
                    if action.step_type == <$performer as StepPerformer>::STEP_TYPE {
                        return <$performer as StepPerformer>::decode(
                            prev,
                            action.step_version,
                            action.params.clone(),
                        )
                        .map(Step::$variant);
                    }
                )*
                Err(StepError::UnknownStep { step_type: action.step_type.clone() })
            }

            pub fn saturate(self, prev: &State) -> Result<Step> {
                match self {
                    $(Step::$variant(params) => {
                        <$performer as StepPerformer>::saturate(prev, params).map(Step::$variant)
                    })*
                }
            }

            pub fn execute(&self, prev: &Arc<State>, ctx: &StepContext<'_>) -> StepResult {
                match self {
                    $(Step::$variant(params) => <$performer as StepPerformer>::execute(prev, params, ctx),)*
                }
            }

            pub fn transpile(
                &self,
                prev: &State,
                post: &State,
                execution: Option<&ExecutionData>,
            ) -> Vec<CodeChunk> {
                match self {
                    $(Step::$variant(params) => {
                        <$performer as StepPerformer>::transpile(prev, post, params, execution)
                    })*
                }
            }

            pub fn modified_sheet_indexes(&self) -> ModifiedSheets {
                match self {
                    $(Step::$variant(params) => <$performer as StepPerformer>::modified_sheet_indexes(params),)*
                }
            }

            /// The step as a saveable action at its current version.
            pub fn to_action(&self) -> Result<StepAction> {
                let params = match self {
                    $(Step::$variant(params) => serde_json::to_value(params),)*
                };
                let params = params.map_err(|e| StepError::InvalidParams {
                    step_type: self.step_type().to_string(),
                    message: e.to_string(),
                })?;
                Ok(StepAction {
                    step_type: self.step_type().to_string(),
                    step_version: self.step_version(),
                    params,
                })
            }
        }
    };
}

step_catalog! {
    AddColumn(AddColumnStepPerformer),
    BulkOldRename(BulkOldRenameStepPerformer),
    ChangeColumnDtype(ChangeColumnDtypeStepPerformer),
    ChangeColumnFormat(ChangeColumnFormatStepPerformer),
    Concat(ConcatStepPerformer),
    DataframeDuplicate(DataframeDuplicateStepPerformer),
    DataframeRename(DataframeRenameStepPerformer),
    DeleteColumn(DeleteColumnStepPerformer),
    Graph(GraphStepPerformer),
    GraphDelete(GraphDeleteStepPerformer),
    GraphDuplicate(GraphDuplicateStepPerformer),
    GraphRename(GraphRenameStepPerformer),
    RenameColumn(RenameColumnStepPerformer),
    SetColumnFormula(SetColumnFormulaStepPerformer),
    Sort(SortStepPerformer),
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use stepsheet_engine::engine::{Column, RhaiFormulaEvaluator, Table, Value};

    pub(crate) static FORMULAS: RhaiFormulaEvaluator = RhaiFormulaEvaluator;

    pub(crate) fn config() -> &'static EngineConfig {
        static CONFIG: std::sync::OnceLock<EngineConfig> = std::sync::OnceLock::new();
        CONFIG.get_or_init(EngineConfig::default)
    }

    pub(crate) fn ctx() -> StepContext<'static> {
        StepContext { formulas: &FORMULAS, config: config() }
    }

    pub(crate) fn ints(values: &[i64]) -> Column {
        Column::from_values(values.iter().map(|v| Value::Int(*v)).collect())
    }

    pub(crate) fn state_with(columns: Vec<(&str, Column)>) -> Arc<State> {
        Arc::new(State::new(vec![Table::from_columns(columns).unwrap()]))
    }

    /// Run the full decode/saturate/execute pipeline on raw params.
    pub(crate) fn run(prev: &Arc<State>, step_type: &str, params: serde_json::Value) -> Result<(Step, Arc<State>, Option<ExecutionData>)> {
        let step = Step::decode(prev, &StepAction::new(step_type, params))?.saturate(prev)?;
        let (post, execution) = step.execute(prev, &ctx())?;
        Ok((step, post, execution))
    }

    pub(crate) fn code(step: &Step, prev: &State, post: &State, execution: Option<&ExecutionData>) -> Vec<String> {
        step.transpile(prev, post, execution)
            .into_iter()
            .flat_map(|chunk| chunk.code)
            .collect()
    }
}
