//! Column-major tables with pandas-style row labels.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use thiserror::Error;

use super::value::{DType, Value};

/// A typed column of values.
#[derive(Clone, Debug, PartialEq)]
pub struct Column {
    pub dtype: DType,
    pub values: Vec<Value>,
}

impl Column {
    pub fn new(dtype: DType, values: Vec<Value>) -> Column {
        Column { dtype, values }
    }

    /// Build a column whose dtype is inferred from its values. Ints and
    /// bools mixed with nulls widen the way pandas stores NaN.
    pub fn from_values(values: Vec<Value>) -> Column {
        let mut dtype = DType::infer(&values);
        if values.iter().any(Value::is_null) {
            dtype = dtype.with_nulls();
        }
        Column { dtype: DType::Object, values }.widen_to(dtype)
    }

    pub fn nulls(dtype: DType, len: usize) -> Column {
        Column { dtype, values: vec![Value::Null; len] }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Re-tag the column as `dtype`, widening ints to floats when the
    /// target is `Float`.
    fn widen_to(mut self, dtype: DType) -> Column {
        if dtype == DType::Float {
            for value in &mut self.values {
                if let Value::Int(i) = value {
                    *value = Value::Float(*i as f64);
                }
            }
        }
        self.dtype = dtype;
        self
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("Column {header} has {found} rows but the table has {expected}")]
    LengthMismatch { header: String, expected: usize, found: usize },

    #[error("Column {0} already exists")]
    DuplicateHeader(String),

    #[error("No column named {0}")]
    NoColumn(String),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SortError {
    #[error("No column named {0}")]
    NoColumn(String),

    #[error("Column {header} mixes {left} and {right} values")]
    Incomparable { header: String, left: DType, right: DType },
}

/// How concatenation treats columns missing from some inputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Join {
    Inner,
    #[default]
    Outer,
}

impl Join {
    pub fn as_str(self) -> &'static str {
        match self {
            Join::Inner => "inner",
            Join::Outer => "outer",
        }
    }
}

/// An ordered set of uniquely-headed columns sharing one row index.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Table {
    index: Vec<i64>,
    columns: Vec<(String, Column)>,
}

impl Table {
    pub fn new() -> Table {
        Table::default()
    }

    /// Build a table from `(header, column)` pairs with a `0..n` index.
    pub fn from_columns<H: Into<String>>(
        columns: impl IntoIterator<Item = (H, Column)>,
    ) -> Result<Table, TableError> {
        let mut table = Table::new();
        for (i, (header, column)) in columns.into_iter().enumerate() {
            if i == 0 {
                table.index = (0..column.len() as i64).collect();
            }
            table.push_column(header.into(), column)?;
        }
        Ok(table)
    }

    /// Replace the row labels.
    pub fn with_index(mut self, index: Vec<i64>) -> Result<Table, TableError> {
        if index.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                header: "index".to_string(),
                expected: self.num_rows(),
                found: index.len(),
            });
        }
        self.index = index;
        Ok(self)
    }

    pub fn num_rows(&self) -> usize {
        self.index.len()
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn index(&self) -> &[i64] {
        &self.index
    }

    pub fn reset_index(&mut self) {
        self.index = (0..self.index.len() as i64).collect();
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(h, _)| h.as_str())
    }

    pub fn header_list(&self) -> Vec<String> {
        self.columns.iter().map(|(h, _)| h.clone()).collect()
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(h, c)| (h.as_str(), c))
    }

    pub fn position(&self, header: &str) -> Option<usize> {
        self.columns.iter().position(|(h, _)| h == header)
    }

    pub fn has_column(&self, header: &str) -> bool {
        self.position(header).is_some()
    }

    pub fn column(&self, header: &str) -> Option<&Column> {
        self.columns.iter().find(|(h, _)| h == header).map(|(_, c)| c)
    }

    fn check_len(&self, header: &str, column: &Column) -> Result<(), TableError> {
        // A table with no columns adopts the first column's length.
        if self.columns.is_empty() && self.index.is_empty() {
            return Ok(());
        }
        if column.len() != self.num_rows() {
            return Err(TableError::LengthMismatch {
                header: header.to_string(),
                expected: self.num_rows(),
                found: column.len(),
            });
        }
        Ok(())
    }

    fn push_column(&mut self, header: String, column: Column) -> Result<(), TableError> {
        self.insert_column(self.columns.len(), header, column)
    }

    /// Insert a new column at `position` (clamped to the end).
    pub fn insert_column(
        &mut self,
        position: usize,
        header: impl Into<String>,
        column: Column,
    ) -> Result<(), TableError> {
        let header = header.into();
        if self.has_column(&header) {
            return Err(TableError::DuplicateHeader(header));
        }
        self.check_len(&header, &column)?;
        if self.columns.is_empty() && self.index.is_empty() {
            self.index = (0..column.len() as i64).collect();
        }
        let position = position.min(self.columns.len());
        self.columns.insert(position, (header, column));
        Ok(())
    }

    /// Replace an existing column, or append it if the header is new.
    pub fn set_column(&mut self, header: &str, column: Column) -> Result<(), TableError> {
        self.check_len(header, &column)?;
        match self.columns.iter_mut().find(|(h, _)| h == header) {
            Some((_, existing)) => {
                *existing = column;
                Ok(())
            }
            None => self.push_column(header.to_string(), column),
        }
    }

    pub fn remove_column(&mut self, header: &str) -> Option<Column> {
        let position = self.position(header)?;
        Some(self.columns.remove(position).1)
    }

    pub fn rename_column(&mut self, old: &str, new: &str) -> Result<(), TableError> {
        if old != new && self.has_column(new) {
            return Err(TableError::DuplicateHeader(new.to_string()));
        }
        let (header, _) = self
            .columns
            .iter_mut()
            .find(|(h, _)| h == old)
            .ok_or_else(|| TableError::NoColumn(old.to_string()))?;
        *header = new.to_string();
        Ok(())
    }

    /// Reorder rows by position; labels travel with their rows.
    pub fn take(&self, positions: &[usize]) -> Table {
        let index = positions.iter().map(|&p| self.index[p]).collect();
        let columns = self
            .columns
            .iter()
            .map(|(h, c)| {
                let values = positions.iter().map(|&p| c.values[p].clone()).collect();
                (h.clone(), Column::new(c.dtype, values))
            })
            .collect();
        Table { index, columns }
    }

    /// Stable sort permutation for one column.
    ///
    /// Ascending places nulls first; descending places them last. Values of
    /// kinds with no mutual order (e.g. strings and numbers) are rejected.
    pub fn sorted_positions(&self, header: &str, ascending: bool) -> Result<Vec<usize>, SortError> {
        let column = self
            .column(header)
            .ok_or_else(|| SortError::NoColumn(header.to_string()))?;

        let mut first_kind: Option<&Value> = None;
        let (mut nulls, mut present) = (Vec::new(), Vec::new());
        for (position, value) in column.values.iter().enumerate() {
            if value.is_null() {
                nulls.push(position);
                continue;
            }
            match first_kind {
                None => first_kind = Some(value),
                Some(first) => {
                    if first.compare(value).is_none()
                        && let (Some(left), Some(right)) = (first.kind(), value.kind())
                    {
                        return Err(SortError::Incomparable {
                            header: header.to_string(),
                            left,
                            right,
                        });
                    }
                }
            }
            present.push(position);
        }

        let values = &column.values;
        let order = |a: &usize, b: &usize| values[*a].compare(&values[*b]).unwrap_or(Ordering::Equal);
        if ascending {
            present.sort_by(order);
            nulls.extend(present);
            Ok(nulls)
        } else {
            present.sort_by(|a, b| order(b, a));
            present.extend(nulls);
            Ok(present)
        }
    }

    /// Stack tables vertically.
    ///
    /// `Outer` keeps the union of headers in order of first appearance and
    /// fills gaps with nulls; `Inner` keeps only headers present in every
    /// table, in the first table's order. No tables yields an empty table.
    pub fn concat(tables: &[&Table], join: Join, ignore_index: bool) -> Table {
        let Some(first) = tables.first() else {
            return Table::new();
        };

        let headers: Vec<String> = match join {
            Join::Outer => {
                let mut seen = BTreeSet::new();
                let mut headers = Vec::new();
                for table in tables {
                    for header in table.headers() {
                        if seen.insert(header.to_string()) {
                            headers.push(header.to_string());
                        }
                    }
                }
                headers
            }
            Join::Inner => first
                .headers()
                .filter(|h| tables.iter().all(|t| t.has_column(h)))
                .map(str::to_string)
                .collect(),
        };

        let mut index: Vec<i64> = tables.iter().flat_map(|t| t.index.iter().copied()).collect();
        if ignore_index {
            index = (0..index.len() as i64).collect();
        }

        let columns = headers
            .into_iter()
            .map(|header| {
                let mut dtype: Option<DType> = None;
                let mut gaps = false;
                let mut values = Vec::with_capacity(index.len());
                for table in tables {
                    match table.column(&header) {
                        Some(column) => {
                            dtype = Some(match dtype {
                                None => column.dtype,
                                Some(current) => DType::common(current, column.dtype),
                            });
                            values.extend(column.values.iter().cloned());
                        }
                        None => {
                            gaps |= table.num_rows() > 0;
                            values.extend(std::iter::repeat_n(Value::Null, table.num_rows()));
                        }
                    }
                }
                let mut dtype = dtype.unwrap_or(DType::Object);
                if gaps {
                    dtype = dtype.with_nulls();
                }
                (header, Column::new(DType::Object, values).widen_to(dtype))
            })
            .collect();

        Table { index, columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ints(values: &[Option<i64>]) -> Column {
        Column::new(DType::Int, values.iter().map(|v| Value::from(*v)).collect())
    }

    fn sample() -> Table {
        Table::from_columns([
            ("A", ints(&[Some(3), None, Some(1), Some(2)])),
            ("B", Column::from_values(vec!["c".into(), "n".into(), "a".into(), "b".into()])),
        ])
        .unwrap()
    }

    #[test]
    fn test_from_columns_rejects_ragged_columns() {
        let err = Table::from_columns([("A", ints(&[Some(1)])), ("B", ints(&[Some(1), Some(2)]))]).unwrap_err();
        assert_eq!(
            err,
            TableError::LengthMismatch { header: "B".to_string(), expected: 1, found: 2 }
        );
    }

    #[test]
    fn test_sort_ascending_puts_nulls_first() {
        let table = sample();
        assert_eq!(table.sorted_positions("A", true).unwrap(), vec![1, 2, 3, 0]);
    }

    #[test]
    fn test_sort_descending_puts_nulls_last() {
        let table = sample();
        assert_eq!(table.sorted_positions("A", false).unwrap(), vec![0, 3, 2, 1]);
    }

    #[test]
    fn test_sort_is_stable() {
        let table = Table::from_columns([("A", ints(&[Some(1), Some(0), Some(1), Some(0)]))]).unwrap();
        assert_eq!(table.sorted_positions("A", true).unwrap(), vec![1, 3, 0, 2]);
        assert_eq!(table.sorted_positions("A", false).unwrap(), vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_sort_rejects_mixed_kinds() {
        let table = Table::from_columns([(
            "A",
            Column::from_values(vec![Value::Int(1), Value::from("x")]),
        )])
        .unwrap();
        assert!(matches!(
            table.sorted_positions("A", true),
            Err(SortError::Incomparable { .. })
        ));
    }

    #[test]
    fn test_take_moves_labels_with_rows() {
        let table = sample().take(&[2, 0]);
        assert_eq!(table.index(), &[2, 0]);
        assert_eq!(table.column("B").unwrap().values, vec![Value::from("a"), Value::from("c")]);
    }

    #[test]
    fn test_concat_outer_fills_and_widens() {
        let left = Table::from_columns([("A", ints(&[Some(1)])), ("B", ints(&[Some(2)]))]).unwrap();
        let right = Table::from_columns([("A", ints(&[Some(3)]))]).unwrap();
        let out = Table::concat(&[&left, &right], Join::Outer, false);
        assert_eq!(out.header_list(), vec!["A", "B"]);
        assert_eq!(out.index(), &[0, 0]);
        assert_eq!(out.column("A").unwrap().dtype, DType::Int);
        let b = out.column("B").unwrap();
        assert_eq!(b.dtype, DType::Float);
        assert_eq!(b.values, vec![Value::Float(2.0), Value::Null]);
    }

    #[test]
    fn test_concat_inner_keeps_shared_headers() {
        let left = Table::from_columns([("A", ints(&[Some(1)])), ("B", ints(&[Some(2)]))]).unwrap();
        let right = Table::from_columns([("B", ints(&[Some(3)])), ("A", ints(&[Some(4)]))]).unwrap();
        let out = Table::concat(&[&left, &right], Join::Inner, true);
        assert_eq!(out.header_list(), vec!["A", "B"]);
        assert_eq!(out.index(), &[0, 1]);
        assert_eq!(out.column("A").unwrap().values, vec![Value::Int(1), Value::Int(4)]);
    }

    #[test]
    fn test_concat_disjoint_headers() {
        let left = Table::from_columns([("A", ints(&[Some(1), Some(2)]))]).unwrap();
        let right = Table::from_columns([("C", ints(&[Some(3)]))]).unwrap();

        let outer = Table::concat(&[&left, &right], Join::Outer, false);
        assert_eq!(outer.header_list(), vec!["A", "C"]);
        assert_eq!(outer.num_rows(), 3);
        assert_eq!(outer.index(), &[0, 1, 0]);

        let inner = Table::concat(&[&left, &right], Join::Inner, false);
        assert_eq!(inner.num_columns(), 0);
        assert_eq!(inner.num_rows(), 3);
        assert_eq!(inner.index(), &[0, 1, 0]);
    }

    #[test]
    fn test_concat_of_nothing_is_empty() {
        let out = Table::concat(&[], Join::Inner, true);
        assert_eq!(out.num_rows(), 0);
        assert_eq!(out.num_columns(), 0);
    }

    #[test]
    fn test_rename_column_refuses_existing_header() {
        let mut table = sample();
        assert_eq!(
            table.rename_column("A", "B"),
            Err(TableError::DuplicateHeader("B".to_string()))
        );
        table.rename_column("A", "C").unwrap();
        assert_eq!(table.header_list(), vec!["C", "B"]);
    }
}
