//! The dtype coercion matrix.
//!
//! Every `(from, to)` pair is either a total conversion (values that cannot
//! be converted become null) or rejected up front. A rejected pair, or a
//! value that cannot be represented at all (e.g. an infinite float cast to
//! int), fails the whole conversion: a column is never partially converted.

use thiserror::Error;

use super::format::python_str;
use super::table::Column;
use super::temporal::{
    DEFAULT_DATETIME_FORMATS, datetime_from_seconds, datetime_to_nanos, format_datetime,
    format_timedelta, infer_datetime_format, parse_datetime, parse_timedelta, parse_with_format,
    timedelta_from_seconds, timedelta_total_seconds,
};
use super::value::{DType, Value};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    #[error("Cannot convert from {from} to {to}")]
    Unsupported { from: DType, to: DType },

    #[error("Cannot convert {value} from {from} to {to}")]
    Failed { from: DType, to: DType, value: String },
}

/// Knobs for conversions that need them.
#[derive(Clone, Debug)]
pub struct ConversionOptions {
    /// Candidate formats for string to datetime, tried in order.
    pub datetime_formats: Vec<String>,
}

impl Default for ConversionOptions {
    fn default() -> Self {
        ConversionOptions {
            datetime_formats: DEFAULT_DATETIME_FORMATS.iter().map(|f| f.to_string()).collect(),
        }
    }
}

/// Objects convert through the string row and into string columns.
fn family(dtype: DType) -> DType {
    if dtype == DType::Object { DType::String } else { dtype }
}

pub fn is_valid_conversion(from: DType, to: DType) -> bool {
    !matches!(
        (family(from), family(to)),
        (DType::Bool, DType::DateTime)
            | (DType::Bool, DType::TimeDelta)
            | (DType::DateTime, DType::TimeDelta)
            | (DType::TimeDelta, DType::DateTime)
    )
}

/// Whether a column keeps its display format across this change.
pub fn preserves_format(from: DType, to: DType) -> bool {
    family(from) == family(to) || (from.is_number() && to.is_number())
}

/// Convert `column`, whose declared dtype is `from`, to `to`.
pub fn convert_column(
    column: &Column,
    from: DType,
    to: DType,
    options: &ConversionOptions,
) -> Result<Column, ConversionError> {
    convert_column_with_format(column, from, to, options).map(|(column, _)| column)
}

/// As [`convert_column`], also returning the datetime format every value
/// was parsed with when a string column became a datetime column through
/// one shared format.
pub fn convert_column_with_format(
    column: &Column,
    from: DType,
    to: DType,
    options: &ConversionOptions,
) -> Result<(Column, Option<String>), ConversionError> {
    let (source, target) = (family(from), family(to));
    if !is_valid_conversion(from, to) {
        return Err(ConversionError::Unsupported { from, to });
    }
    if from == to {
        return Ok((Column::new(from, column.values.clone()), None));
    }
    if source == target {
        let values = column
            .values
            .iter()
            .map(|value| text_of(value).map_or(Value::Null, Value::Str))
            .collect();
        return Ok((Column::new(target, values), None));
    }

    let failed = |value: &Value| ConversionError::Failed {
        from,
        to,
        value: python_str(value),
    };

    if (source, target) == (DType::String, DType::DateTime) {
        let texts: Vec<Option<String>> = column.values.iter().map(text_of).collect();
        let shared = infer_datetime_format(
            texts.iter().flatten().map(String::as_str),
            options.datetime_formats.as_slice(),
        );
        let values = texts
            .iter()
            .map(|text| {
                let Some(text) = text else { return Value::Null };
                let parsed = match &shared {
                    Some(format) => parse_with_format(text, format),
                    None => parse_datetime(text, options.datetime_formats.as_slice()),
                };
                Value::from(parsed)
            })
            .collect();
        return Ok((Column::new(target, values), shared));
    }

    let values = column
        .values
        .iter()
        .map(|value| convert_value(value, source, target).ok_or_else(|| failed(value)))
        .collect::<Result<_, _>>()?;
    Ok((Column::new(target, values), None))
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Str(s) => Some(s.clone()),
        other => Some(python_str(other)),
    }
}

/// Convert one value. `None` means the value cannot be represented and
/// the whole conversion fails; an unparseable input yields `Some(Null)`.
fn convert_value(value: &Value, source: DType, target: DType) -> Option<Value> {
    if source == DType::String {
        let Some(text) = text_of(value) else {
            return Some(Value::Null);
        };
        return Some(match target {
            DType::Bool => Value::from(parse_bool(&text)),
            DType::Int => Value::from(parse_int(&text)),
            DType::Float => Value::from(parse_float(&text)),
            DType::TimeDelta => Value::from(parse_timedelta(&text)),
            _ => Value::Null,
        });
    }

    Some(match (value, target) {
        (Value::Null, DType::Bool) => Value::Bool(false),
        (Value::Null, DType::Int) if source == DType::Float => Value::Int(0),
        (Value::Null, DType::String) => match source {
            DType::DateTime => Value::Null,
            DType::TimeDelta => Value::Str("NaT".to_string()),
            _ => Value::Str("nan".to_string()),
        },
        (Value::Null, _) => Value::Null,

        (v, DType::String) => Value::Str(match v {
            Value::DateTime(dt) => format_datetime(dt),
            Value::TimeDelta(td) => format_timedelta(td),
            other => python_str(other),
        }),

        (Value::Bool(b), DType::Int) => Value::Int(i64::from(*b)),
        (Value::Bool(b), DType::Float) => Value::Float(if *b { 1.0 } else { 0.0 }),

        (Value::Int(i), DType::Bool) => Value::Bool(*i != 0),
        (Value::Int(i), DType::Float) => Value::Float(*i as f64),
        (Value::Int(i), DType::DateTime) => Value::from(datetime_from_seconds(*i as f64)),
        (Value::Int(i), DType::TimeDelta) => Value::from(timedelta_from_seconds(*i as f64)),

        (Value::Float(f), DType::Bool) => Value::Bool(*f != 0.0),
        (Value::Float(f), DType::Int) => Value::Int(float_to_int(*f)?),
        (Value::Float(f), DType::DateTime) => Value::from(datetime_from_seconds(*f)),
        (Value::Float(f), DType::TimeDelta) => Value::from(timedelta_from_seconds(*f)),

        (Value::DateTime(_) | Value::TimeDelta(_), DType::Bool) => Value::Bool(true),
        (Value::DateTime(dt), DType::Int) => {
            Value::from(datetime_to_nanos(dt).map(|ns| ns.div_euclid(1_000_000_000)))
        }
        (Value::DateTime(dt), DType::Float) => {
            Value::from(datetime_to_nanos(dt).map(|ns| ns as f64 / 1e9))
        }
        (Value::TimeDelta(td), DType::Int) => Value::Int(td.num_seconds()),
        (Value::TimeDelta(td), DType::Float) => Value::Float(timedelta_total_seconds(td)),

        (v, t) if v.kind() == Some(t) => v.clone(),

        // A value whose kind disagrees with the declared dtype.
        _ => return None,
    })
}

fn float_to_int(f: f64) -> Option<i64> {
    if !f.is_finite() || f >= i64::MAX as f64 || f < i64::MIN as f64 {
        return None;
    }
    Some(f.trunc() as i64)
}

fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" => Some(true),
        "false" | "f" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn clean_number(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, ',' | '$' | '€' | '£' | '¥'))
        .collect()
}

fn parse_int(text: &str) -> Option<i64> {
    let cleaned = clean_number(text);
    cleaned
        .parse::<i64>()
        .ok()
        .or_else(|| parse_float(&cleaned).and_then(float_to_int))
}

fn parse_float(text: &str) -> Option<f64> {
    clean_number(text).parse::<f64>().ok().filter(|f| !f.is_nan())
}
