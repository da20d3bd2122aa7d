//! Interpolated lookup tables.
//!
//! A table is built from columnar data and queried with simulant ids. Each
//! simulant's key cells (sex, location, ...) select a bucket by exact match,
//! then its parameter cells (age, year, ...) are interpolated multilinearly
//! over that bucket's grid.
//!
//! A `year` parameter absent from the population is read from the clock as a
//! fractional year, so sub-year queries interpolate smoothly between yearly
//! data points.

mod grid;
mod table;

pub use table::{
    InterpolatedTable, LookupData, TableOptions, DEFAULT_PARAMETER_COLUMNS, YEAR_COLUMN,
};

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::engine::{Component, Manager};
use crate::error::SimResult;
use crate::population::PopulationManager;
use crate::time::Clock;

/// Builds interpolated tables bound to the run's population and clock.
pub struct LookupManager {
    population: Arc<PopulationManager>,
    clock: Clock,
}

impl LookupManager {
    #[must_use]
    pub fn new(population: Arc<PopulationManager>, clock: Clock) -> Self {
        Self { population, clock }
    }

    /// Builds a table from `data`.
    ///
    /// # Errors
    ///
    /// `DuplicatePoint`, `IncompleteGrid` or `InvalidTable`.
    pub fn build_table(&self, data: &LookupData, options: TableOptions) -> SimResult<InterpolatedTable> {
        let table = InterpolatedTable::build(
            data,
            options,
            Arc::clone(&self.population),
            self.clock.clone(),
        )?;
        debug!(
            rows = data.len(),
            keys = ?table.key_columns(),
            parameters = ?table.parameter_columns(),
            "built lookup table"
        );
        Ok(table)
    }
}

impl fmt::Debug for LookupManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LookupManager").finish_non_exhaustive()
    }
}

impl Component for LookupManager {
    fn name(&self) -> &str {
        "lookup_manager"
    }
}

impl Manager for LookupManager {
    fn finalize(&self, _components: &[Arc<dyn Component>]) -> SimResult<()> {
        Ok(())
    }
}
