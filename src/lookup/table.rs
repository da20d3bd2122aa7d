//! Tabular input data and built interpolated tables.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use crate::error::{LookupError, SimResult};
use crate::population::{Column, PopulationManager, SimulantId};
use crate::time::{fractional_year, Clock};
use crate::value::ColumnKind;

use super::grid::Grid;

/// Parameter columns used when none are given, if present in the data.
pub const DEFAULT_PARAMETER_COLUMNS: [&str; 2] = ["age", "year"];

/// Parameter taken from the simulation clock when the population lacks it.
pub const YEAR_COLUMN: &str = "year";

/// Columnar input data for [`super::LookupManager::build_table`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LookupData {
    len: usize,
    columns: BTreeMap<String, Column>,
}

impl LookupData {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a column. The first column fixes the row count.
    ///
    /// # Errors
    ///
    /// `InvalidTable` if the column length differs from earlier columns.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        column: impl Into<Column>,
    ) -> Result<Self, LookupError> {
        let name = name.into();
        let column = column.into();
        if !self.columns.is_empty() && column.len() != self.len {
            return Err(LookupError::InvalidTable {
                reason: format!(
                    "column '{name}' has {} rows, expected {}",
                    column.len(),
                    self.len
                ),
            });
        }
        self.len = column.len();
        self.columns.insert(name, column);
        Ok(self)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.get(name)
    }

    /// Keeps only the first occurrence of each distinct row.
    #[must_use]
    pub fn drop_duplicates(&self) -> Self {
        let mut seen = BTreeSet::new();
        let rows: Vec<usize> = (0..self.len)
            .filter(|&row| {
                let signature: Vec<String> = self
                    .columns
                    .values()
                    .map(|c| c.get(row).map(|v| v.key_string()).unwrap_or_default())
                    .collect();
                seen.insert(signature)
            })
            .collect();
        Self {
            len: rows.len(),
            columns: self
                .columns
                .iter()
                .map(|(k, c)| (k.clone(), c.take(&rows)))
                .collect(),
        }
    }

    /// Removes a column.
    #[must_use]
    pub fn without_column(mut self, name: &str) -> Self {
        self.columns.remove(name);
        self
    }
}

/// How to partition and interpolate a [`LookupData`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableOptions {
    key_columns: Option<Vec<String>>,
    parameter_columns: Option<Vec<String>>,
    clamp: bool,
}

impl Default for TableOptions {
    fn default() -> Self {
        Self {
            key_columns: None,
            parameter_columns: None,
            clamp: true,
        }
    }
}

impl TableOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Exact-match bucket columns. Defaults to every categorical or boolean
    /// column that is not a parameter.
    #[must_use]
    pub fn key_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.key_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Interpolation axes. Defaults to `age` and `year`, where present.
    #[must_use]
    pub fn parameter_columns<S: Into<String>>(
        mut self,
        columns: impl IntoIterator<Item = S>,
    ) -> Self {
        self.parameter_columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Extrapolate linearly past the observed range instead of clamping.
    #[must_use]
    pub const fn without_clamping(mut self) -> Self {
        self.clamp = false;
        self
    }
}

#[allow(clippy::cast_precision_loss)]
fn numeric(name: &str, column: &Column) -> Result<Vec<f64>, LookupError> {
    let not_numeric = || LookupError::InvalidTable {
        reason: format!("parameter column '{name}' holds {} values", column.kind()),
    };
    match column {
        Column::Float(v) => Ok(v.clone()),
        Column::Int(v) => Ok(v.iter().map(|x| *x as f64).collect()),
        Column::Time(v) => Ok(v
            .iter()
            .map(|t| t.map_or(f64::NAN, fractional_year))
            .collect()),
        Column::Bool(_) | Column::Category(_) => Err(not_numeric()),
    }
}

fn keys(column: &Column) -> Vec<String> {
    (0..column.len())
        .map(|row| column.get(row).map(|v| v.key_string()).unwrap_or_default())
        .collect()
}

/// A callable interpolator over population attributes.
pub struct InterpolatedTable {
    key_columns: Vec<String>,
    parameter_columns: Vec<String>,
    value_columns: Vec<String>,
    buckets: BTreeMap<Vec<String>, Grid>,
    clamp: bool,
    population: Arc<PopulationManager>,
    clock: Clock,
}

impl InterpolatedTable {
    pub(crate) fn build(
        data: &LookupData,
        options: TableOptions,
        population: Arc<PopulationManager>,
        clock: Clock,
    ) -> Result<Self, LookupError> {
        let parameter_columns = options.parameter_columns.unwrap_or_else(|| {
            DEFAULT_PARAMETER_COLUMNS
                .iter()
                .filter(|c| data.columns.contains_key(**c))
                .map(|c| (*c).to_string())
                .collect()
        });
        let key_columns = options.key_columns.unwrap_or_else(|| {
            data.columns
                .iter()
                .filter(|(name, c)| {
                    matches!(c.kind(), ColumnKind::Category | ColumnKind::Bool)
                        && !parameter_columns.contains(*name)
                })
                .map(|(name, _)| name.clone())
                .collect()
        });
        let value_columns: Vec<String> = data
            .columns
            .iter()
            .filter(|(name, c)| {
                c.kind().is_numeric()
                    && !parameter_columns.contains(*name)
                    && !key_columns.contains(*name)
            })
            .map(|(name, _)| name.clone())
            .collect();
        if value_columns.is_empty() {
            return Err(LookupError::InvalidTable {
                reason: "no value columns".to_string(),
            });
        }

        let column = |name: &str| {
            data.column(name).ok_or_else(|| LookupError::InvalidTable {
                reason: format!("column '{name}' is not in the data"),
            })
        };
        let coordinates = parameter_columns
            .iter()
            .map(|name| numeric(name, column(name)?))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(bad) = coordinates.iter().flatten().find(|x| !x.is_finite()) {
            return Err(LookupError::InvalidTable {
                reason: format!("parameter coordinate {bad} is not finite"),
            });
        }
        let key_cells = key_columns
            .iter()
            .map(|name| Ok(keys(column(name)?)))
            .collect::<Result<Vec<_>, LookupError>>()?;
        let value_cells = value_columns
            .iter()
            .map(|name| numeric(name, column(name)?))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows_by_key: BTreeMap<Vec<String>, Vec<usize>> = BTreeMap::new();
        for row in 0..data.len() {
            let key = key_cells.iter().map(|k| k[row].clone()).collect();
            rows_by_key.entry(key).or_default().push(row);
        }

        let mut buckets = BTreeMap::new();
        for (key, rows) in rows_by_key {
            let points: Vec<Vec<f64>> = rows
                .iter()
                .map(|&r| coordinates.iter().map(|c| c[r]).collect())
                .collect();
            let samples: Vec<Vec<f64>> = value_cells
                .iter()
                .map(|v| rows.iter().map(|&r| v[r]).collect())
                .collect();
            let grid = Grid::build(&key, &parameter_columns, &points, &samples)?;
            buckets.insert(key, grid);
        }

        Ok(Self {
            key_columns,
            parameter_columns,
            value_columns,
            buckets,
            clamp: options.clamp,
            population,
            clock,
        })
    }

    #[must_use]
    pub fn key_columns(&self) -> &[String] {
        &self.key_columns
    }

    #[must_use]
    pub fn parameter_columns(&self) -> &[String] {
        &self.parameter_columns
    }

    #[must_use]
    pub fn value_columns(&self) -> &[String] {
        &self.value_columns
    }

    /// Interpolates the table's only value column for every simulant.
    ///
    /// # Errors
    ///
    /// `InvalidTable` if the table has more than one value column, otherwise
    /// see [`InterpolatedTable::values`].
    pub fn call(&self, index: &[SimulantId]) -> SimResult<Vec<f64>> {
        if self.value_columns.len() != 1 {
            return Err(LookupError::InvalidTable {
                reason: format!(
                    "table has value columns {:?}; use values()",
                    self.value_columns
                ),
            }
            .into());
        }
        let mut out = self.interpolate(index)?;
        Ok(out.pop().unwrap_or_default())
    }

    /// Interpolates every value column for every simulant.
    ///
    /// # Errors
    ///
    /// `Miss` if a simulant's key cells match no bucket; population errors if
    /// a key or parameter column is missing from the population.
    pub fn values(&self, index: &[SimulantId]) -> SimResult<BTreeMap<String, Vec<f64>>> {
        let columns = self.interpolate(index)?;
        Ok(self.value_columns.iter().cloned().zip(columns).collect())
    }

    fn interpolate(&self, index: &[SimulantId]) -> SimResult<Vec<Vec<f64>>> {
        let present: BTreeSet<String> = self.population.column_names()?.into_iter().collect();
        let synthetic_year = |name: &str| name == YEAR_COLUMN && !present.contains(name);

        let mut granted: Vec<&str> = self.key_columns.iter().map(String::as_str).collect();
        granted.extend(
            self.parameter_columns
                .iter()
                .filter(|p| !synthetic_year(p.as_str()))
                .map(String::as_str),
        );
        let frame = self.population.get_view(&granted, None).get(index)?;

        let key_cells = self
            .key_columns
            .iter()
            .map(|name| Ok(keys(frame.column(name)?)))
            .collect::<SimResult<Vec<_>>>()?;
        let now = self.clock.fractional_year();
        let coordinates = self
            .parameter_columns
            .iter()
            .map(|name| {
                if synthetic_year(name.as_str()) {
                    Ok(vec![now; index.len()])
                } else {
                    Ok(numeric(name, frame.column(name)?)?)
                }
            })
            .collect::<SimResult<Vec<_>>>()?;

        let mut out = vec![Vec::with_capacity(index.len()); self.value_columns.len()];
        let mut point = vec![0.0; self.parameter_columns.len()];
        for row in 0..index.len() {
            let key: Vec<String> = key_cells.iter().map(|k| k[row].clone()).collect();
            let grid = self
                .buckets
                .get(&key)
                .ok_or(LookupError::Miss { key })?;
            for (p, c) in point.iter_mut().zip(&coordinates) {
                *p = c[row];
            }
            for (column, v) in out.iter_mut().zip(grid.interpolate(&point, self.clamp)) {
                column.push(v);
            }
        }
        Ok(out)
    }
}

impl fmt::Debug for InterpolatedTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpolatedTable")
            .field("key_columns", &self.key_columns)
            .field("parameter_columns", &self.parameter_columns)
            .field("value_columns", &self.value_columns)
            .field("buckets", &self.buckets.len())
            .field("clamp", &self.clamp)
            .finish_non_exhaustive()
    }
}
