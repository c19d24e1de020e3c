//! Error types for stepsheet core.

use thiserror::Error;

use stepsheet_engine::engine::{FormulaError, TableError};

/// Errors a step can raise. Every variant carries enough context to tell
/// the user which sheet, column or step went wrong.
#[derive(Error, Debug)]
pub enum StepError {
    #[error(
        "Sorry, the column {column_header} has a type {old_dtype}, which cannot be changed to the type {new_dtype}."
    )]
    InvalidTypeChange {
        column_header: String,
        old_dtype: String,
        new_dtype: String,
    },

    #[error(
        "Sorry, the column {column_header} has mixed data types. Please make sure the column has one datatype before trying to sort."
    )]
    InvalidSort { column_header: String },

    #[error("Sorry, there is no dataframe at index {sheet_index} ({num_sheets} exist) for {step_type}.")]
    SheetIndexOutOfRange {
        sheet_index: usize,
        num_sheets: usize,
        step_type: &'static str,
    },

    #[error("Sorry, there is no column {column} in dataframe {sheet_index}.")]
    NoColumn { sheet_index: usize, column: String },

    #[error("Sorry, a column already exists with the name {column_header}. Try picking a different name!")]
    ColumnExists { column_header: String },

    #[error("Sorry, the formula for {column_header} is invalid: {source}")]
    InvalidFormula {
        column_header: String,
        #[source]
        source: FormulaError,
    },

    #[error("Sorry, the formula for {column_header} references itself, directly or through other columns.")]
    CircularReference { column_header: String },

    #[error("Sorry, {dependents} still reference {column_headers}, so they cannot be deleted.")]
    InvalidColumnDelete {
        column_headers: String,
        dependents: String,
    },

    #[error("Sorry, there is no graph with id {graph_id}.")]
    NoGraph { graph_id: String },

    #[error("Unknown step type {step_type}")]
    UnknownStep { step_type: String },

    #[error("Step {step_type} has no version {step_version}")]
    UnsupportedStepVersion { step_type: String, step_version: u32 },

    #[error("Invalid parameters for {step_type}: {message}")]
    InvalidParams { step_type: String, message: String },

    #[error("Internal consistency fault: {0}")]
    ConsistencyFault(String),

    #[error("Nothing to undo")]
    NothingToUndo,

    #[error("Nothing to redo")]
    NothingToRedo,

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StepError {
    /// Stable machine-readable name for the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            StepError::InvalidTypeChange { .. } => "invalid_column_type_change",
            StepError::InvalidSort { .. } => "invalid_sort",
            StepError::SheetIndexOutOfRange { .. } => "sheet_index_out_of_range",
            StepError::NoColumn { .. } => "no_column",
            StepError::ColumnExists { .. } => "column_exists",
            StepError::InvalidFormula { .. } => "invalid_formula",
            StepError::CircularReference { .. } => "circular_reference",
            StepError::InvalidColumnDelete { .. } => "invalid_column_delete",
            StepError::NoGraph { .. } => "no_graph",
            StepError::UnknownStep { .. } => "unknown_step",
            StepError::UnsupportedStepVersion { .. } => "unsupported_step_version",
            StepError::InvalidParams { .. } => "invalid_params",
            StepError::ConsistencyFault(_) => "consistency_fault",
            StepError::NothingToUndo => "nothing_to_undo",
            StepError::NothingToRedo => "nothing_to_redo",
            StepError::Config(_) => "config",
            StepError::Io(_) => "io",
        }
    }

    /// Short title suitable for an error banner.
    pub fn header(&self) -> &'static str {
        match self {
            StepError::InvalidTypeChange { .. } => "Invalid Column Type Change",
            StepError::InvalidSort { .. } => "Invalid Sort",
            StepError::SheetIndexOutOfRange { .. } => "Dataframe Does Not Exist",
            StepError::NoColumn { .. } => "No Column Exists",
            StepError::ColumnExists { .. } => "Column Already Exists",
            StepError::InvalidFormula { .. } => "Invalid Formula",
            StepError::CircularReference { .. } => "Circular Reference",
            StepError::InvalidColumnDelete { .. } => "Column Has Dependents",
            StepError::NoGraph { .. } => "Graph Does Not Exist",
            _ => "Execution Error",
        }
    }

    /// Whether the user can fix this by changing their input, as opposed to
    /// a programming or environment fault.
    pub fn is_user_recoverable(&self) -> bool {
        !matches!(
            self,
            StepError::ConsistencyFault(_)
                | StepError::UnknownStep { .. }
                | StepError::UnsupportedStepVersion { .. }
                | StepError::InvalidParams { .. }
                | StepError::Io(_)
        )
    }
}

impl From<TableError> for StepError {
    fn from(err: TableError) -> Self {
        StepError::ConsistencyFault(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StepError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_facing_messages() {
        let err = StepError::InvalidTypeChange {
            column_header: "A".to_string(),
            old_dtype: "bool".to_string(),
            new_dtype: "datetime64[ns]".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Sorry, the column A has a type bool, which cannot be changed to the type datetime64[ns]."
        );
        assert_eq!(err.kind(), "invalid_column_type_change");
        assert!(err.is_user_recoverable());
    }

    #[test]
    fn test_faults_are_not_user_recoverable() {
        let err = StepError::ConsistencyFault("ids out of sync".to_string());
        assert!(!err.is_user_recoverable());
        assert_eq!(err.header(), "Execution Error");
    }
}
