//! Formula parsing and evaluation.
//!
//! Step performers only see the [`FormulaEvaluator`] trait. The default
//! implementation compiles formulas to Rhai expressions that read column
//! values through a shared [`ColumnCache`], evaluating once per row.

use dashmap::DashMap;
use regex::Regex;
use rhai::{Dynamic, Engine, Scope};
use std::sync::{Arc, OnceLock};
use thiserror::Error;
use tracing::{trace, warn};

use super::deps::{extract_dependencies, strip_string_literals};
use super::format::python_string_literal;
use super::preprocess::{formula_body, preprocess_formula, to_python};
use super::table::{Column, Table};
use super::temporal::{format_datetime, timedelta_total_seconds};
use super::value::Value;
use crate::builtins::{ColumnBuiltin, register_builtins};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FormulaError {
    #[error("it is empty")]
    Empty { formula: String },

    /// `message` is the evaluator's own diagnostic. It describes the
    /// rewritten script rather than the formula, so it is logged but never
    /// displayed.
    #[error("{formula} could not be parsed. Check for a missing value or an unclosed bracket")]
    Parse { formula: String, message: String },

    #[error("it references {name}, which is not a column")]
    UnknownReference { formula: String, name: String },
}

/// What a formula reads and the pandas code that computes it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParsedFormula {
    /// Headers read by the formula, in order of first use.
    pub dependencies: Vec<String>,
    /// Assignment of the formula's result to the target column.
    pub python_code: String,
}

pub trait FormulaEvaluator: Send + Sync {
    /// Validate `formula` against the table headers and render it as code
    /// assigning `df_name[target]`.
    fn parse(
        &self,
        formula: &str,
        target: &str,
        headers: &[String],
        df_name: &str,
    ) -> Result<ParsedFormula, FormulaError>;

    /// Evaluate `formula` for every row of `table`.
    fn evaluate(&self, formula: &str, table: &Table) -> Result<Column, FormulaError>;
}

/// Column values shared with built-in functions, keyed by cache slot.
#[derive(Clone, Default)]
pub struct ColumnCache {
    columns: Arc<DashMap<usize, Vec<Dynamic>>>,
    aggregates: Arc<DashMap<(usize, &'static str), Dynamic>>,
}

impl ColumnCache {
    pub fn insert(&self, slot: usize, values: Vec<Dynamic>) {
        self.columns.insert(slot, values);
        self.aggregates.retain(|(s, _), _| *s != slot);
    }

    pub(crate) fn value(&self, slot: i64, row: i64) -> Dynamic {
        let (Ok(slot), Ok(row)) = (usize::try_from(slot), usize::try_from(row)) else {
            return Dynamic::UNIT;
        };
        self.columns
            .get(&slot)
            .and_then(|values| values.get(row).cloned())
            .unwrap_or(Dynamic::UNIT)
    }

    pub(crate) fn aggregate(&self, slot: i64, builtin: &'static ColumnBuiltin) -> Dynamic {
        let Ok(slot) = usize::try_from(slot) else {
            return Dynamic::UNIT;
        };
        if let Some(cached) = self.aggregates.get(&(slot, builtin.rhai_name)) {
            return cached.clone();
        }
        let Some(values) = self.columns.get(&slot) else {
            return Dynamic::UNIT;
        };
        let result = (builtin.reduce)(&values);
        drop(values);
        self.aggregates.insert((slot, builtin.rhai_name), result.clone());
        result
    }
}

/// Create a Rhai engine with the built-in functions bound to `cache`.
pub fn create_engine(cache: ColumnCache) -> Engine {
    let mut engine = Engine::new();
    register_builtins(&mut engine, cache);
    engine
}

pub(crate) fn value_to_dynamic(value: &Value) -> Dynamic {
    match value {
        Value::Null => Dynamic::UNIT,
        Value::Bool(b) => Dynamic::from_bool(*b),
        Value::Int(i) => Dynamic::from_int(*i),
        Value::Float(f) => Dynamic::from_float(*f),
        Value::Str(s) => Dynamic::from(s.clone()),
        Value::DateTime(dt) => Dynamic::from(format_datetime(dt)),
        Value::TimeDelta(td) => Dynamic::from_float(timedelta_total_seconds(td)),
    }
}

pub(crate) fn dynamic_to_value(value: Dynamic) -> Value {
    if value.is_unit() {
        Value::Null
    } else if let Ok(b) = value.as_bool() {
        Value::Bool(b)
    } else if let Ok(i) = value.as_int() {
        Value::Int(i)
    } else if let Ok(f) = value.as_float() {
        Value::float(f)
    } else if value.is_string() {
        value.into_string().map(Value::Str).unwrap_or(Value::Null)
    } else {
        Value::Str(value.to_string())
    }
}

const KNOWN_IDENTIFIERS: &[&str] = &["ROW", "true", "false", "if", "else", "switch", "in"];

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("identifier regex must compile"))
}

/// The first bare identifier in a rewritten script that is neither a
/// keyword nor a function call. After header rewriting, any such name is a
/// reference to a column that does not exist.
fn unknown_identifier(script: &str) -> Option<String> {
    let masked = strip_string_literals(script);
    identifier_re().find_iter(&masked).find_map(|m| {
        let prev = masked[..m.start()].chars().next_back();
        if prev.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.') {
            return None;
        }
        if masked[m.end()..].trim_start().starts_with('(') {
            return None;
        }
        if KNOWN_IDENTIFIERS.contains(&m.as_str()) {
            return None;
        }
        Some(m.as_str().to_string())
    })
}

/// Default evaluator: formulas are `=`-prefixed Rhai expressions.
#[derive(Clone, Copy, Debug, Default)]
pub struct RhaiFormulaEvaluator;

impl RhaiFormulaEvaluator {
    pub fn new() -> Self {
        RhaiFormulaEvaluator
    }

    fn compile(&self, engine: &Engine, formula: &str, script: &str) -> Result<rhai::AST, FormulaError> {
        engine.compile_expression(script).map_err(|err| {
            warn!(formula, script, error = %err, "formula failed to compile");
            FormulaError::Parse {
                formula: formula.to_string(),
                message: err.to_string(),
            }
        })
    }
}

impl FormulaEvaluator for RhaiFormulaEvaluator {
    fn parse(
        &self,
        formula: &str,
        target: &str,
        headers: &[String],
        df_name: &str,
    ) -> Result<ParsedFormula, FormulaError> {
        let body = formula_body(formula);
        if body.trim().is_empty() {
            return Err(FormulaError::Empty { formula: formula.to_string() });
        }

        let prepared = preprocess_formula(formula, headers);
        if let Some(name) = unknown_identifier(&prepared.script) {
            return Err(FormulaError::UnknownReference {
                formula: formula.to_string(),
                name,
            });
        }
        self.compile(&create_engine(ColumnCache::default()), formula, &prepared.script)?;

        Ok(ParsedFormula {
            dependencies: extract_dependencies(body, headers),
            python_code: format!(
                "{}[{}] = {}",
                df_name,
                python_string_literal(target),
                to_python(formula, headers, df_name)
            ),
        })
    }

    fn evaluate(&self, formula: &str, table: &Table) -> Result<Column, FormulaError> {
        let headers = table.header_list();
        let prepared = preprocess_formula(formula, &headers);

        let cache = ColumnCache::default();
        for (slot, header) in prepared.slots.iter().enumerate() {
            let column = table.column(header).ok_or_else(|| FormulaError::UnknownReference {
                formula: formula.to_string(),
                name: header.clone(),
            })?;
            cache.insert(slot, column.values.iter().map(value_to_dynamic).collect());
        }

        let engine = create_engine(cache);
        let ast = self.compile(&engine, formula, &prepared.script)?;

        let values = (0..table.num_rows())
            .map(|row| {
                let mut scope = Scope::new();
                scope.push_constant("ROW", row as i64);
                match engine.eval_ast_with_scope::<Dynamic>(&mut scope, &ast) {
                    Ok(result) => dynamic_to_value(result),
                    Err(err) => {
                        trace!(row, formula, error = %err, "formula row evaluated to null");
                        Value::Null
                    }
                }
            })
            .collect();

        Ok(Column::from_values(values))
    }
}
