//! stepsheet-core - state snapshots, step performers and code generation.

pub mod analysis;
pub mod code_chunk;
pub mod column_ids;
pub mod config;
pub mod error;
pub mod refresh;
pub mod state;
pub mod steps;
pub mod summary;

pub use analysis::{Analysis, StepOutcome, StepRecord, StepReport};
pub use code_chunk::{CodeChunk, transpile_script};
pub use column_ids::ColumnIdMap;
pub use config::EngineConfig;
pub use error::{Result, StepError};
pub use state::{ColumnMeta, ColumnMetatype, DataframeSource, FormatSpec, State};
pub use steps::{ExecutionData, ModifiedSheets, Step, StepAction, StepContext, StepPerformer};
pub use summary::{ColumnSummary, GraphSummary, SheetSummary};

pub use stepsheet_engine::engine::{ColumnId, DType, Table, Value};
