//! Table engine API.
//!
//! - [`Value`], [`DType`] - Cell values and pandas-style column dtypes
//! - [`Column`], [`Table`] - Column-major tables with row labels
//! - [`ColumnId`] - Stable column identifiers (counter and legacy schemes)
//! - [`convert_column`] - The dtype coercion matrix
//! - [`detect_cycle`] - Circular dependency detection over column graphs
//! - [`find_header_references`] - Header references inside formulas
//! - [`FormulaEvaluator`], [`RhaiFormulaEvaluator`] - Formula parsing and evaluation
//! - [`python_string_literal`], [`python_str`] - Python renderings for generated code

mod column_id;
mod convert;
mod cycle;
mod deps;
mod eval;
mod format;
mod preprocess;
mod table;
mod temporal;
mod value;

pub use column_id::{ColumnId, legacy_header};
pub use convert::{
    ConversionError, ConversionOptions, convert_column, convert_column_with_format, is_valid_conversion,
    preserves_format,
};
pub use cycle::{DependencyGraph, detect_cycle};
pub use deps::{HeaderReference, extract_dependencies, find_header_references};
pub use eval::{ColumnCache, FormulaError, FormulaEvaluator, ParsedFormula, RhaiFormulaEvaluator, create_engine};
pub use format::{python_float_repr, python_str, python_string_literal};
pub use preprocess::{PreparedFormula, formula_body, preprocess_formula, rename_references, to_python};
pub use table::{Column, Join, SortError, Table, TableError};
pub use temporal::{
    DEFAULT_DATETIME_FORMATS, format_datetime, format_timedelta, infer_datetime_format,
    parse_datetime, parse_timedelta,
};
pub use value::{DType, Value};

pub use rhai::Dynamic;
