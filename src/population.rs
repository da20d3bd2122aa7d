//! Population state.
//!
//! The population is a columnar table indexed by [`SimulantId`]. Simulants
//! are rows, never objects. Rows are only ever appended, so an id stays valid
//! for the whole run, but an index snapshot taken before a creation event does
//! not contain the rows it added: re-fetch the index after creating simulants.
//!
//! Components never touch the table directly. They receive a
//! [`PopulationView`] granting a fixed set of columns, which makes the
//! read/write footprint of every component explicit.

pub mod column;
pub mod frame;
pub mod query;
pub mod view;

pub use column::Column;
pub use frame::Frame;
pub use query::{Clause, Comparison, Query};
pub use view::PopulationView;

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::engine::{Component, Manager};
use crate::error::{lock_err, PopulationError, SimResult};
use crate::event::{Emitter, Event};
use crate::time::Clock;
use crate::value::Value;

/// Channel emitted when new simulants are created.
pub const INITIALIZE_SIMULANTS: &str = "initialize_simulants";

/// Row identity of a simulant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimulantId(usize);

impl SimulantId {
    #[must_use]
    pub const fn new(row: usize) -> Self {
        Self(row)
    }

    /// The row position in the population table.
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Display for SimulantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
struct ColumnSlot {
    data: Column,
    default: Value,
}

/// The canonical columnar store.
#[derive(Debug, Default)]
pub(crate) struct PopulationTable {
    size: usize,
    columns: BTreeMap<String, ColumnSlot>,
}

impl PopulationTable {
    pub(crate) fn len(&self) -> usize {
        self.size
    }

    pub(crate) fn index(&self) -> Vec<SimulantId> {
        (0..self.size).map(SimulantId).collect()
    }

    fn column(&self, name: &str) -> Result<&Column, PopulationError> {
        self.columns
            .get(name)
            .map(|slot| &slot.data)
            .ok_or_else(|| PopulationError::UnknownColumn {
                column: name.to_string(),
            })
    }

    fn check_granted(&self, name: &str, granted: &BTreeSet<String>) -> Result<(), PopulationError> {
        if granted.contains(name) {
            return Ok(());
        }
        Err(PopulationError::AccessViolation {
            column: name.to_string(),
            granted: granted.iter().cloned().collect::<Vec<_>>().join(", "),
        })
    }

    /// Returns true if the column was created, false if it already existed.
    fn create_column(&mut self, name: &str, default: Value) -> Result<bool, PopulationError> {
        if let Some(slot) = self.columns.get(name) {
            if slot.data.kind() != default.kind() {
                return Err(PopulationError::ColumnConflict {
                    column: name.to_string(),
                    existing: slot.data.kind().name(),
                    requested: default.kind().name(),
                });
            }
            return Ok(false);
        }
        let data = Column::filled(&default, self.size);
        self.columns.insert(name.to_string(), ColumnSlot { data, default });
        Ok(true)
    }

    fn append(&mut self, count: usize) -> Vec<SimulantId> {
        let start = self.size;
        for slot in self.columns.values_mut() {
            // Kinds always match: the default fixed the column's kind.
            slot.data.extend_filled(&slot.default, count);
        }
        self.size += count;
        (start..self.size).map(SimulantId).collect()
    }

    fn rows(&self, index: &[SimulantId]) -> Result<Vec<usize>, PopulationError> {
        index
            .iter()
            .map(|id| {
                if id.0 < self.size {
                    Ok(id.0)
                } else {
                    Err(PopulationError::IndexOutOfBounds {
                        index: id.0,
                        size: self.size,
                    })
                }
            })
            .collect()
    }

    fn filter_index(
        &self,
        index: &[SimulantId],
        query: Option<&Query>,
    ) -> Result<Vec<SimulantId>, PopulationError> {
        let rows = self.rows(index)?;
        let Some(query) = query.filter(|q| !q.is_empty()) else {
            return Ok(index.to_vec());
        };
        for clause in query.clauses() {
            self.column(&clause.column)?;
        }
        let mut kept = Vec::with_capacity(rows.len());
        for row in rows {
            let matched = query.matches(|name| {
                self.column(name)?
                    .get(row)
                    .ok_or(PopulationError::IndexOutOfBounds {
                        index: row,
                        size: self.size,
                    })
            })?;
            if matched {
                kept.push(SimulantId(row));
            }
        }
        Ok(kept)
    }

    pub(crate) fn read(
        &self,
        columns: &BTreeSet<String>,
        index: &[SimulantId],
        query: Option<&Query>,
    ) -> Result<Frame, PopulationError> {
        let index = self.filter_index(index, query)?;
        let rows: Vec<usize> = index.iter().map(|id| id.0).collect();
        let mut frame = Frame::new(index);
        for name in columns {
            let column = self.column(name)?;
            frame.insert(name.clone(), column.take(&rows))?;
        }
        Ok(frame)
    }

    pub(crate) fn write(
        &mut self,
        frame: &Frame,
        granted: &BTreeSet<String>,
    ) -> Result<(), PopulationError> {
        let rows = self.rows(frame.index())?;
        for (name, column) in frame.columns() {
            self.check_granted(name, granted)?;
            let existing = self.column(name)?;
            if existing.kind() != column.kind() {
                return Err(PopulationError::TypeMismatch {
                    column: name.to_string(),
                    expected: existing.kind().name(),
                    actual: column.kind().name(),
                });
            }
        }
        for (name, column) in frame.columns() {
            if let Some(slot) = self.columns.get_mut(name) {
                slot.data.scatter(&rows, column);
            }
        }
        Ok(())
    }
}

/// Owns the population table and hands out scoped views.
#[derive(Debug, Default)]
pub struct PopulationManager {
    table: Arc<RwLock<PopulationTable>>,
}

impl PopulationManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A view granting `columns`, optionally restricted to rows matching `query`.
    #[must_use]
    pub fn get_view(&self, columns: &[&str], query: Option<Query>) -> PopulationView {
        let granted = columns.iter().map(|c| (*c).to_string()).collect();
        PopulationView::new(Arc::clone(&self.table), granted, query)
    }

    /// Ensures column `name` exists (existing simulants get `default`), then
    /// appends `count` new simulants and returns their ids.
    ///
    /// # Errors
    ///
    /// `ColumnConflict` if the column exists with a different kind.
    pub fn create_columns_from_defaults(
        &self,
        name: &str,
        default: Value,
        count: usize,
    ) -> SimResult<Vec<SimulantId>> {
        let mut table = self.table.write().map_err(|_| lock_err("population"))?;
        table.create_column(name, default)?;
        Ok(table.append(count))
    }

    /// Appends `count` simulants, filling every column with its default.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the table lock is poisoned.
    pub fn add_simulants(&self, count: usize) -> SimResult<Vec<SimulantId>> {
        let mut table = self.table.write().map_err(|_| lock_err("population"))?;
        Ok(table.append(count))
    }

    /// Every simulant id currently in the table.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the table lock is poisoned.
    pub fn index(&self) -> SimResult<Vec<SimulantId>> {
        let table = self.table.read().map_err(|_| lock_err("population"))?;
        Ok(table.index())
    }

    /// Number of simulants.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the table lock is poisoned.
    pub fn len(&self) -> SimResult<usize> {
        let table = self.table.read().map_err(|_| lock_err("population"))?;
        Ok(table.len())
    }

    /// Names of all existing columns.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the table lock is poisoned.
    pub fn column_names(&self) -> SimResult<Vec<String>> {
        let table = self.table.read().map_err(|_| lock_err("population"))?;
        Ok(table.columns.keys().cloned().collect())
    }

    /// A creator that appends simulants and announces them on `emitter`.
    #[must_use]
    pub fn simulant_creator(&self, emitter: Emitter, clock: Clock) -> SimulantCreator {
        SimulantCreator {
            table: Arc::clone(&self.table),
            emitter,
            clock,
        }
    }
}

impl Component for PopulationManager {
    fn name(&self) -> &str {
        "population_manager"
    }
}

impl Manager for PopulationManager {
    fn finalize(&self, components: &[Arc<dyn Component>]) -> SimResult<()> {
        let columns = self.column_names()?;
        debug!(
            components = components.len(),
            columns = ?columns,
            "population manager finalized"
        );
        Ok(())
    }
}

/// Creates simulants and emits `initialize_simulants` for them.
#[derive(Clone)]
pub struct SimulantCreator {
    table: Arc<RwLock<PopulationTable>>,
    emitter: Emitter,
    clock: Clock,
}

impl SimulantCreator {
    /// Appends `count` simulants and emits the creation event carrying
    /// `population_configuration` as user data. Returns the new ids.
    ///
    /// # Errors
    ///
    /// Propagates listener failures from the creation event.
    pub fn create(
        &self,
        count: usize,
        population_configuration: JsonValue,
    ) -> SimResult<Vec<SimulantId>> {
        let index = {
            let mut table = self.table.write().map_err(|_| lock_err("population"))?;
            table.append(count)
        };
        debug!(count, "creating simulants");
        let event = Event::new(index.clone(), self.clock.now(), self.clock.step())
            .with_user_data(population_configuration);
        self.emitter.emit(&event)?;
        Ok(index)
    }
}

impl fmt::Debug for SimulantCreator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulantCreator")
            .field("channel", &self.emitter.channel())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with_people(n: usize) -> PopulationManager {
        let pm = PopulationManager::new();
        pm.create_columns_from_defaults("age", Value::Float(0.0), n).unwrap();
        pm.create_columns_from_defaults("sex", Value::from("Male"), 0).unwrap();
        pm.create_columns_from_defaults("alive", Value::Bool(true), 0).unwrap();
        pm
    }

    #[test]
    fn create_columns_extends_existing_and_new_rows() {
        let pm = manager_with_people(3);
        assert_eq!(pm.len().unwrap(), 3);

        let added = pm
            .create_columns_from_defaults("bmi", Value::Float(22.0), 2)
            .unwrap();
        assert_eq!(added, vec![SimulantId::new(3), SimulantId::new(4)]);

        let view = pm.get_view(&["bmi", "sex"], None);
        let frame = view.get(&pm.index().unwrap()).unwrap();
        assert_eq!(frame.floats("bmi").unwrap(), &[22.0; 5]);
        assert_eq!(frame.categories("sex").unwrap().len(), 5);
    }

    #[test]
    fn recreating_column_with_other_kind_conflicts() {
        let pm = manager_with_people(1);
        pm.create_columns_from_defaults("age", Value::Float(5.0), 0).unwrap();
        let err = pm
            .create_columns_from_defaults("age", Value::Int(5), 0)
            .unwrap_err();
        assert!(matches!(
            err,
            crate::SimError::Population(PopulationError::ColumnConflict { .. })
        ));
    }

    #[test]
    fn write_outside_grant_is_access_violation_and_writes_nothing() {
        let pm = manager_with_people(2);
        let view = pm.get_view(&["age"], None);
        let index = vec![SimulantId::new(0)];
        let frame = Frame::new(index.clone())
            .with_column("age", vec![40.0])
            .unwrap()
            .with_column("sex", vec!["Female"])
            .unwrap();
        let err = view.update(&frame).unwrap_err();
        assert!(err.is_access_violation());

        let all = pm.get_view(&["age", "sex"], None).get(&index).unwrap();
        assert_eq!(all.floats("age").unwrap(), &[0.0]);
        assert_eq!(all.categories("sex").unwrap(), &["Male".to_string()]);
    }

    #[test]
    fn read_of_ungranted_column_is_absent() {
        let pm = manager_with_people(2);
        let frame = pm.get_view(&["age"], None).get(&pm.index().unwrap()).unwrap();
        assert!(frame.column("sex").is_err());
    }

    #[test]
    fn subset_write_leaves_other_rows_and_columns_untouched() {
        let pm = manager_with_people(4);
        let full = pm.get_view(&["age", "sex", "alive"], None);
        let before = full.get(&pm.index().unwrap()).unwrap();

        let view = pm.get_view(&["age"], None);
        view.update_column("age", &[SimulantId::new(1), SimulantId::new(3)], vec![10.0, 30.0])
            .unwrap();

        let after = full.get(&pm.index().unwrap()).unwrap();
        assert_eq!(after.floats("age").unwrap(), &[0.0, 10.0, 0.0, 30.0]);
        assert_eq!(after.categories("sex").unwrap(), before.categories("sex").unwrap());
        assert_eq!(after.bools("alive").unwrap(), before.bools("alive").unwrap());
    }

    #[test]
    fn write_type_mismatch_and_bounds() {
        let pm = manager_with_people(1);
        let view = pm.get_view(&["age"], None);
        assert!(view
            .update_column("age", &[SimulantId::new(0)], vec![1_i64])
            .is_err());
        assert!(view
            .update_column("age", &[SimulantId::new(7)], vec![1.0])
            .is_err());
    }

    #[test]
    fn query_restricts_reads() {
        let pm = manager_with_people(3);
        pm.get_view(&["alive"], None)
            .update_column("alive", &[SimulantId::new(1)], vec![false])
            .unwrap();
        let living = pm.get_view(&["age"], Some(Query::new().eq("alive", true)));
        let frame = living.get(&pm.index().unwrap()).unwrap();
        assert_eq!(frame.index(), &[SimulantId::new(0), SimulantId::new(2)]);
        assert_eq!(living.index().unwrap().len(), 2);
    }

    #[test]
    fn view_create_column_requires_grant() {
        let pm = manager_with_people(2);
        let view = pm.get_view(&["medication_count"], None);
        view.create_column("medication_count", Value::Int(0)).unwrap();
        assert!(pm.column_names().unwrap().contains(&"medication_count".to_string()));
        let err = view.create_column("other", Value::Int(0)).unwrap_err();
        assert!(err.is_access_violation());
    }
}
