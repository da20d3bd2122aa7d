//! Rectilinear grids and multilinear interpolation.

use crate::error::LookupError;

/// One interpolation axis: sorted, distinct coordinates.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Axis {
    coords: Vec<f64>,
}

impl Axis {
    fn from_samples(samples: impl Iterator<Item = f64>) -> Self {
        let mut coords: Vec<f64> = samples.collect();
        coords.sort_by(f64::total_cmp);
        coords.dedup_by(|a, b| a.total_cmp(b).is_eq());
        Self { coords }
    }

    fn position(&self, x: f64) -> Option<usize> {
        self.coords.binary_search_by(|c| c.total_cmp(&x)).ok()
    }

    /// Lower segment index and fractional offset of `x` in that segment.
    ///
    /// Single-point axes are constant (offset 0). With `clamp`, offsets stay
    /// in `[0, 1]`; without, the edge segment extends linearly.
    fn locate(&self, x: f64, clamp: bool) -> (usize, f64) {
        let n = self.coords.len();
        if n < 2 {
            return (0, 0.0);
        }
        let x = if clamp {
            x.clamp(self.coords[0], self.coords[n - 1])
        } else {
            x
        };
        let upper = self.coords.partition_point(|c| *c <= x);
        let lower = upper.saturating_sub(1).min(n - 2);
        let (a, b) = (self.coords[lower], self.coords[lower + 1]);
        (lower, (x - a) / (b - a))
    }

    fn len(&self) -> usize {
        self.coords.len()
    }
}

/// Values of every value column over the full cartesian product of the axes.
#[derive(Debug, Clone)]
pub(crate) struct Grid {
    axes: Vec<Axis>,
    strides: Vec<usize>,
    /// One row-major array per value column.
    values: Vec<Vec<f64>>,
}

impl Grid {
    /// Builds a grid from scattered sample points.
    ///
    /// `points[i]` holds the parameter coordinates of sample `i`, and
    /// `samples[v][i]` the value of value column `v` at that sample.
    pub(crate) fn build(
        key: &[String],
        axis_names: &[String],
        points: &[Vec<f64>],
        samples: &[Vec<f64>],
    ) -> Result<Self, LookupError> {
        let dims = axis_names.len();
        let axes: Vec<Axis> = (0..dims)
            .map(|d| Axis::from_samples(points.iter().map(|p| p[d])))
            .collect();

        let mut strides = vec![1; dims];
        for d in (0..dims.saturating_sub(1)).rev() {
            strides[d] = strides[d + 1] * axes[d + 1].len();
        }
        let cells: usize = axes.iter().map(Axis::len).product();

        let mut filled = vec![false; cells];
        let mut values = vec![vec![f64::NAN; cells]; samples.len()];
        for (i, point) in points.iter().enumerate() {
            let mut offset = 0;
            for (d, x) in point.iter().enumerate() {
                let pos = axes[d].position(*x).ok_or_else(|| LookupError::InvalidTable {
                    reason: format!("coordinate {x} is not a number"),
                })?;
                offset += pos * strides[d];
            }
            if filled[offset] {
                return Err(LookupError::DuplicatePoint {
                    key: key.to_vec(),
                    point: point.clone(),
                });
            }
            filled[offset] = true;
            for (column, sample) in values.iter_mut().zip(samples) {
                column[offset] = sample[i];
            }
        }
        if filled.iter().any(|f| !f) {
            return Err(LookupError::IncompleteGrid {
                key: key.to_vec(),
                axes: axis_names.to_vec(),
            });
        }

        Ok(Self {
            axes,
            strides,
            values,
        })
    }

    /// Interpolates every value column at `point`.
    ///
    /// Tensor-product weights over the `2^d` corners of the enclosing cell.
    pub(crate) fn interpolate(&self, point: &[f64], clamp: bool) -> Vec<f64> {
        let located: Vec<(usize, f64)> = self
            .axes
            .iter()
            .zip(point)
            .map(|(axis, x)| axis.locate(*x, clamp))
            .collect();

        let mut out = vec![0.0; self.values.len()];
        for corner in 0..(1_usize << located.len()) {
            let mut weight = 1.0;
            let mut offset = 0;
            let mut skip = false;
            for (d, (lower, t)) in located.iter().enumerate() {
                let upper = (corner >> d) & 1 == 1;
                if self.axes[d].len() < 2 {
                    // Constant axis: only the lower corner exists.
                    if upper {
                        skip = true;
                        break;
                    }
                    continue;
                }
                let (pos, w) = if upper { (lower + 1, *t) } else { (*lower, 1.0 - t) };
                weight *= w;
                offset += pos * self.strides[d];
            }
            if skip {
                continue;
            }
            for (acc, column) in out.iter_mut().zip(&self.values) {
                *acc += weight * column[offset];
            }
        }
        out
    }
}
