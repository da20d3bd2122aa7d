//! Owned sub-tables.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::PopulationError;
use crate::value::{ColumnKind, Value};

use super::column::Column;
use super::SimulantId;

/// An owned slice of the population: an index plus named columns aligned to it.
///
/// Frames are what views return from `get` and accept in `update`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    index: Vec<SimulantId>,
    columns: BTreeMap<String, Column>,
}

impl Frame {
    /// An empty frame over `index`.
    #[must_use]
    pub fn new(index: Vec<SimulantId>) -> Self {
        Self {
            index,
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style [`Frame::insert`].
    ///
    /// # Errors
    ///
    /// Returns `PopulationError::LengthMismatch` if the column length differs
    /// from the index length.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        column: impl Into<Column>,
    ) -> Result<Self, PopulationError> {
        self.insert(name, column)?;
        Ok(self)
    }

    /// Adds or replaces a column.
    ///
    /// # Errors
    ///
    /// Returns `PopulationError::LengthMismatch` if the column length differs
    /// from the index length.
    pub fn insert(
        &mut self,
        name: impl Into<String>,
        column: impl Into<Column>,
    ) -> Result<(), PopulationError> {
        let name = name.into();
        let column = column.into();
        if column.len() != self.index.len() {
            return Err(PopulationError::LengthMismatch {
                column: name,
                expected: self.index.len(),
                actual: column.len(),
            });
        }
        self.columns.insert(name, column);
        Ok(())
    }

    #[must_use]
    pub fn index(&self) -> &[SimulantId] {
        &self.index
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&str, &Column)> {
        self.columns.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Looks up a column by name.
    ///
    /// # Errors
    ///
    /// Returns `PopulationError::UnknownColumn` if absent.
    pub fn column(&self, name: &str) -> Result<&Column, PopulationError> {
        self.columns
            .get(name)
            .ok_or_else(|| PopulationError::UnknownColumn {
                column: name.to_string(),
            })
    }

    /// The cell at row position `pos` of column `name`.
    ///
    /// # Errors
    ///
    /// Returns `UnknownColumn` for a missing column and `IndexOutOfBounds`
    /// for a position past the end.
    pub fn value(&self, name: &str, pos: usize) -> Result<Value, PopulationError> {
        self.column(name)?
            .get(pos)
            .ok_or(PopulationError::IndexOutOfBounds {
                index: pos,
                size: self.len(),
            })
    }

    fn typed<'a, T: ?Sized>(
        &'a self,
        name: &str,
        expected: ColumnKind,
        pick: impl FnOnce(&'a Column) -> Option<&'a T>,
    ) -> Result<&'a T, PopulationError> {
        let column = self.column(name)?;
        pick(column).ok_or_else(|| PopulationError::TypeMismatch {
            column: name.to_string(),
            expected: expected.name(),
            actual: column.kind().name(),
        })
    }

    /// # Errors
    ///
    /// `UnknownColumn` or `TypeMismatch`.
    pub fn floats(&self, name: &str) -> Result<&[f64], PopulationError> {
        self.typed(name, ColumnKind::Float, Column::as_floats)
    }

    /// # Errors
    ///
    /// `UnknownColumn` or `TypeMismatch`.
    pub fn ints(&self, name: &str) -> Result<&[i64], PopulationError> {
        self.typed(name, ColumnKind::Int, Column::as_ints)
    }

    /// # Errors
    ///
    /// `UnknownColumn` or `TypeMismatch`.
    pub fn bools(&self, name: &str) -> Result<&[bool], PopulationError> {
        self.typed(name, ColumnKind::Bool, Column::as_bools)
    }

    /// # Errors
    ///
    /// `UnknownColumn` or `TypeMismatch`.
    pub fn categories(&self, name: &str) -> Result<&[String], PopulationError> {
        self.typed(name, ColumnKind::Category, Column::as_categories)
    }

    /// # Errors
    ///
    /// `UnknownColumn` or `TypeMismatch`.
    pub fn times(&self, name: &str) -> Result<&[Option<DateTime<Utc>>], PopulationError> {
        self.typed(name, ColumnKind::Time, Column::as_times)
    }

    /// Keeps the rows at the given positions, in that order.
    ///
    /// # Errors
    ///
    /// `IndexOutOfBounds` if a position is not a row of this frame.
    pub fn select(&self, positions: &[usize]) -> Result<Self, PopulationError> {
        if let Some(&index) = positions.iter().find(|&&p| p >= self.len()) {
            return Err(PopulationError::IndexOutOfBounds {
                index,
                size: self.len(),
            });
        }
        Ok(self.take_rows(positions))
    }

    /// Keeps the rows for which `keep(position)` holds.
    #[must_use]
    pub fn filter(&self, keep: impl Fn(usize) -> bool) -> Self {
        let positions: Vec<usize> = (0..self.len()).filter(|&p| keep(p)).collect();
        self.take_rows(&positions)
    }

    fn take_rows(&self, positions: &[usize]) -> Self {
        Self {
            index: positions.iter().map(|&p| self.index[p]).collect(),
            columns: self
                .columns
                .iter()
                .map(|(k, c)| (k.clone(), c.take(positions)))
                .collect(),
        }
    }
}
