//! Column-scoped access to the population table.

use std::collections::BTreeSet;
use std::sync::{Arc, RwLock};

use crate::error::{lock_err, SimResult};
use crate::value::Value;

use super::column::Column;
use super::frame::Frame;
use super::query::Query;
use super::{PopulationTable, SimulantId};

/// A capability granting read/write access to a fixed set of columns.
///
/// Reads return only granted columns, restricted to rows matching the view's
/// query. Writes to any other column fail with an access violation before any
/// cell is modified.
#[derive(Debug, Clone)]
pub struct PopulationView {
    table: Arc<RwLock<PopulationTable>>,
    columns: BTreeSet<String>,
    query: Option<Query>,
}

impl PopulationView {
    pub(crate) fn new(
        table: Arc<RwLock<PopulationTable>>,
        columns: BTreeSet<String>,
        query: Option<Query>,
    ) -> Self {
        Self {
            table,
            columns,
            query,
        }
    }

    /// The granted columns.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(String::as_str)
    }

    #[must_use]
    pub const fn query(&self) -> Option<&Query> {
        self.query.as_ref()
    }

    /// Reads the granted columns for the rows of `index` matching the query.
    ///
    /// # Errors
    ///
    /// `UnknownColumn` if a granted or queried column does not exist yet,
    /// `IndexOutOfBounds` for an index past the end of the table.
    pub fn get(&self, index: &[SimulantId]) -> SimResult<Frame> {
        let table = self.table.read().map_err(|_| lock_err("population"))?;
        Ok(table.read(&self.columns, index, self.query.as_ref())?)
    }

    /// The full population index, restricted to rows matching the query.
    ///
    /// # Errors
    ///
    /// `UnknownColumn` if a queried column does not exist.
    pub fn index(&self) -> SimResult<Vec<SimulantId>> {
        let table = self.table.read().map_err(|_| lock_err("population"))?;
        Ok(table.filter_index(&table.index(), self.query.as_ref())?)
    }

    /// Writes every column of `frame` back at the frame's index.
    ///
    /// The view's query does not restrict writes.
    ///
    /// # Errors
    ///
    /// `AccessViolation` for a column outside the grant, `UnknownColumn`,
    /// `TypeMismatch` or `IndexOutOfBounds` otherwise. Nothing is written
    /// when an error is returned.
    pub fn update(&self, frame: &Frame) -> SimResult<()> {
        let mut table = self.table.write().map_err(|_| lock_err("population"))?;
        Ok(table.write(frame, &self.columns)?)
    }

    /// Writes a single column at `index`.
    ///
    /// # Errors
    ///
    /// See [`PopulationView::update`].
    pub fn update_column(
        &self,
        name: &str,
        index: &[SimulantId],
        column: impl Into<Column>,
    ) -> SimResult<()> {
        let frame = Frame::new(index.to_vec()).with_column(name, column)?;
        self.update(&frame)
    }

    /// Creates a granted column, filling existing rows with `default`.
    ///
    /// # Errors
    ///
    /// `AccessViolation` if the column is not granted, `ColumnConflict` if it
    /// exists with another kind.
    pub fn create_column(&self, name: &str, default: Value) -> SimResult<()> {
        let mut table = self.table.write().map_err(|_| lock_err("population"))?;
        table.check_granted(name, &self.columns)?;
        table.create_column(name, default)?;
        Ok(())
    }
}
