//! Typed column storage.

use chrono::{DateTime, Utc};

use crate::value::{ColumnKind, Value};

/// A homogeneous column of cell values.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    Float(Vec<f64>),
    Int(Vec<i64>),
    Bool(Vec<bool>),
    Category(Vec<String>),
    Time(Vec<Option<DateTime<Utc>>>),
}

impl Column {
    /// An empty column of the given kind.
    #[must_use]
    pub const fn empty(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Float => Self::Float(Vec::new()),
            ColumnKind::Int => Self::Int(Vec::new()),
            ColumnKind::Bool => Self::Bool(Vec::new()),
            ColumnKind::Category => Self::Category(Vec::new()),
            ColumnKind::Time => Self::Time(Vec::new()),
        }
    }

    /// A column holding `len` copies of `value`.
    #[must_use]
    pub fn filled(value: &Value, len: usize) -> Self {
        let mut column = Self::empty(value.kind());
        column.extend_filled(value, len);
        column
    }

    #[must_use]
    pub const fn kind(&self) -> ColumnKind {
        match self {
            Self::Float(_) => ColumnKind::Float,
            Self::Int(_) => ColumnKind::Int,
            Self::Bool(_) => ColumnKind::Bool,
            Self::Category(_) => ColumnKind::Category,
            Self::Time(_) => ColumnKind::Time,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Float(v) => v.len(),
            Self::Int(v) => v.len(),
            Self::Bool(v) => v.len(),
            Self::Category(v) => v.len(),
            Self::Time(v) => v.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The value at row position `row`.
    #[must_use]
    pub fn get(&self, row: usize) -> Option<Value> {
        match self {
            Self::Float(v) => v.get(row).map(|x| Value::Float(*x)),
            Self::Int(v) => v.get(row).map(|x| Value::Int(*x)),
            Self::Bool(v) => v.get(row).map(|x| Value::Bool(*x)),
            Self::Category(v) => v.get(row).map(|x| Value::Category(x.clone())),
            Self::Time(v) => v.get(row).map(|x| Value::Time(*x)),
        }
    }

    /// Appends `n` copies of `value`. Returns false (and appends nothing)
    /// if the value's kind does not match the column.
    pub fn extend_filled(&mut self, value: &Value, n: usize) -> bool {
        match (self, value) {
            (Self::Float(v), Value::Float(x)) => v.extend(std::iter::repeat(*x).take(n)),
            (Self::Int(v), Value::Int(x)) => v.extend(std::iter::repeat(*x).take(n)),
            (Self::Bool(v), Value::Bool(x)) => v.extend(std::iter::repeat(*x).take(n)),
            (Self::Category(v), Value::Category(x)) => {
                v.extend(std::iter::repeat(x).take(n).cloned());
            }
            (Self::Time(v), Value::Time(x)) => v.extend(std::iter::repeat(*x).take(n)),
            _ => return false,
        }
        true
    }

    /// Gathers the given row positions into a new column.
    ///
    /// Positions must be in bounds.
    #[must_use]
    pub(crate) fn take(&self, rows: &[usize]) -> Self {
        match self {
            Self::Float(v) => Self::Float(rows.iter().map(|&r| v[r]).collect()),
            Self::Int(v) => Self::Int(rows.iter().map(|&r| v[r]).collect()),
            Self::Bool(v) => Self::Bool(rows.iter().map(|&r| v[r]).collect()),
            Self::Category(v) => Self::Category(rows.iter().map(|&r| v[r].clone()).collect()),
            Self::Time(v) => Self::Time(rows.iter().map(|&r| v[r]).collect()),
        }
    }

    /// Writes `values[i]` into row `rows[i]`.
    ///
    /// Caller guarantees matching kinds, matching lengths and in-bounds rows;
    /// returns false without writing if the kinds differ.
    pub(crate) fn scatter(&mut self, rows: &[usize], values: &Self) -> bool {
        match (self, values) {
            (Self::Float(dst), Self::Float(src)) => scatter_copy(dst, rows, src),
            (Self::Int(dst), Self::Int(src)) => scatter_copy(dst, rows, src),
            (Self::Bool(dst), Self::Bool(src)) => scatter_copy(dst, rows, src),
            (Self::Time(dst), Self::Time(src)) => scatter_copy(dst, rows, src),
            (Self::Category(dst), Self::Category(src)) => {
                for (&row, value) in rows.iter().zip(src) {
                    dst[row].clone_from(value);
                }
            }
            _ => return false,
        }
        true
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i64]> {
        match self {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bools(&self) -> Option<&[bool]> {
        match self {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_categories(&self) -> Option<&[String]> {
        match self {
            Self::Category(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_times(&self) -> Option<&[Option<DateTime<Utc>>]> {
        match self {
            Self::Time(v) => Some(v),
            _ => None,
        }
    }
}

fn scatter_copy<T: Copy>(dst: &mut [T], rows: &[usize], src: &[T]) {
    for (&row, &value) in rows.iter().zip(src) {
        dst[row] = value;
    }
}

impl From<Vec<f64>> for Column {
    fn from(v: Vec<f64>) -> Self {
        Self::Float(v)
    }
}

impl From<Vec<i64>> for Column {
    fn from(v: Vec<i64>) -> Self {
        Self::Int(v)
    }
}

impl From<Vec<bool>> for Column {
    fn from(v: Vec<bool>) -> Self {
        Self::Bool(v)
    }
}

impl From<Vec<String>> for Column {
    fn from(v: Vec<String>) -> Self {
        Self::Category(v)
    }
}

impl From<Vec<&str>> for Column {
    fn from(v: Vec<&str>) -> Self {
        Self::Category(v.into_iter().map(str::to_string).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filled_and_extend() {
        let mut c = Column::filled(&Value::Float(1.5), 3);
        assert_eq!(c, Column::Float(vec![1.5, 1.5, 1.5]));
        assert!(c.extend_filled(&Value::Float(0.0), 1));
        assert_eq!(c.len(), 4);
        assert!(!c.extend_filled(&Value::Int(0), 1));
        assert_eq!(c.len(), 4);
    }

    #[test]
    fn take_and_scatter() {
        let mut c = Column::from(vec!["a", "b", "c", "d"]);
        let taken = c.take(&[3, 1]);
        assert_eq!(taken, Column::from(vec!["d", "b"]));

        assert!(c.scatter(&[0, 2], &Column::from(vec!["x", "y"])));
        assert_eq!(c, Column::from(vec!["x", "b", "y", "d"]));
        assert!(!c.scatter(&[0], &Column::Float(vec![1.0])));
    }
}
