//! Cell values and column dtypes.
//!
//! Values mirror what a pandas column can hold: nullable booleans, 64-bit
//! integers, floats, strings, naive datetimes and timedeltas. Float NaN is
//! folded into [`Value::Null`] so a column only has one notion of "missing".

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A single cell value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(NaiveDateTime),
    TimeDelta(TimeDelta),
}

impl Value {
    /// Build a float value, mapping NaN to null.
    pub fn float(f: f64) -> Value {
        if f.is_nan() { Value::Null } else { Value::Float(f) }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The dtype family this value belongs to, or `None` for null.
    pub fn kind(&self) -> Option<DType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DType::Bool),
            Value::Int(_) => Some(DType::Int),
            Value::Float(_) => Some(DType::Float),
            Value::Str(_) => Some(DType::String),
            Value::DateTime(_) => Some(DType::DateTime),
            Value::TimeDelta(_) => Some(DType::TimeDelta),
        }
    }

    /// Numeric view of bools, ints and floats.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Order two non-null values the way pandas orders a homogeneous
    /// column. Returns `None` when the pair has no defined order.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::DateTime(a), Value::DateTime(b)) => Some(a.cmp(b)),
            (Value::TimeDelta(a), Value::TimeDelta(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (a, b) => {
                let (x, y) = (a.as_f64()?, b.as_f64()?);
                x.partial_cmp(&y)
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<NaiveDateTime> for Value {
    fn from(dt: NaiveDateTime) -> Self {
        Value::DateTime(dt)
    }
}

impl From<TimeDelta> for Value {
    fn from(td: TimeDelta) -> Self {
        Value::TimeDelta(td)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Column dtype, named after the pandas dtype it stands for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum DType {
    Bool,
    Int,
    Float,
    String,
    DateTime,
    TimeDelta,
    Object,
}

impl DType {
    pub fn pandas_name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::Int => "int64",
            DType::Float => "float64",
            DType::String => "str",
            DType::DateTime => "datetime64[ns]",
            DType::TimeDelta => "timedelta64[ns]",
            DType::Object => "object",
        }
    }

    /// Parse a dtype name permissively (`int`, `Int64`, `float32`,
    /// `datetime64[ns, UTC]`, `string`, ...).
    pub fn parse(name: &str) -> Option<DType> {
        let name = name.trim().to_ascii_lowercase();
        if name.contains("bool") {
            Some(DType::Bool)
        } else if name.contains("timedelta") {
            Some(DType::TimeDelta)
        } else if name.contains("datetime") {
            Some(DType::DateTime)
        } else if name.contains("int") {
            Some(DType::Int)
        } else if name.contains("float") {
            Some(DType::Float)
        } else if name == "object" {
            Some(DType::Object)
        } else if name.contains("str") {
            Some(DType::String)
        } else {
            None
        }
    }

    pub fn is_number(self) -> bool {
        matches!(self, DType::Int | DType::Float)
    }

    /// Strings and objects share the string conversion row.
    pub fn is_string_like(self) -> bool {
        matches!(self, DType::String | DType::Object)
    }

    /// Infer the dtype of a column from its values.
    ///
    /// An all-null or empty column is `Object`; ints mixed with floats
    /// widen to `Float`; any other mixture is `Object`.
    pub fn infer(values: &[Value]) -> DType {
        let mut inferred: Option<DType> = None;
        for kind in values.iter().filter_map(Value::kind) {
            inferred = Some(match inferred {
                None => kind,
                Some(current) => DType::common(current, kind),
            });
            if inferred == Some(DType::Object) {
                break;
            }
        }
        inferred.unwrap_or(DType::Object)
    }

    /// The dtype two columns widen to when stacked.
    pub fn common(a: DType, b: DType) -> DType {
        match (a, b) {
            (a, b) if a == b => a,
            (DType::Int, DType::Float) | (DType::Float, DType::Int) => DType::Float,
            _ => DType::Object,
        }
    }

    /// The dtype a column takes once missing rows are filled with nulls,
    /// as pandas does when it introduces NaN.
    pub fn with_nulls(self) -> DType {
        match self {
            DType::Int => DType::Float,
            DType::Bool => DType::Object,
            other => other,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.pandas_name())
    }
}

impl FromStr for DType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DType::parse(s).ok_or_else(|| format!("Unknown dtype: {}", s))
    }
}

impl From<DType> for String {
    fn from(dtype: DType) -> Self {
        dtype.pandas_name().to_string()
    }
}

impl TryFrom<String> for DType {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_permissive_dtype_names() {
        assert_eq!(DType::parse("int"), Some(DType::Int));
        assert_eq!(DType::parse("Int64"), Some(DType::Int));
        assert_eq!(DType::parse("float32"), Some(DType::Float));
        assert_eq!(DType::parse("datetime64[ns, UTC]"), Some(DType::DateTime));
        assert_eq!(DType::parse("timedelta64[ns]"), Some(DType::TimeDelta));
        assert_eq!(DType::parse("string"), Some(DType::String));
        assert_eq!(DType::parse("object"), Some(DType::Object));
        assert_eq!(DType::parse("boolean"), Some(DType::Bool));
        assert_eq!(DType::parse("complex"), None);
    }

    #[test]
    fn test_infer_widens_ints_and_floats() {
        let values = vec![Value::Int(1), Value::Null, Value::Float(2.5)];
        assert_eq!(DType::infer(&values), DType::Float);
        let values = vec![Value::Int(1), Value::from("a")];
        assert_eq!(DType::infer(&values), DType::Object);
        assert_eq!(DType::infer(&[Value::Null]), DType::Object);
    }

    #[test]
    fn test_nan_is_null() {
        assert_eq!(Value::float(f64::NAN), Value::Null);
        assert_eq!(Value::from(1.5), Value::Float(1.5));
    }

    #[test]
    fn test_compare_numeric_across_int_and_float() {
        assert_eq!(Value::Int(2).compare(&Value::Float(1.5)), Some(Ordering::Greater));
        assert_eq!(Value::from("a").compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_dtype_string_round_trip_uses_pandas_names() {
        assert_eq!(String::from(DType::DateTime), "datetime64[ns]");
        assert_eq!(DType::try_from("float64".to_string()), Ok(DType::Float));
    }
}
