//! How mutator contributions merge, and what happens after.

use std::fmt;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, SimResult};
use crate::time::from_yearly;

use super::PipelineValue;

/// Strategy merging mutator outputs into the running value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Combiner {
    /// Each mutator receives the running value and returns the next one.
    #[default]
    Replace,
    /// Each mutator's output is added to the running value.
    Accumulate,
    /// Contributions are collected into a list after the source value.
    List,
    /// Like `List`, for probabilities. Joined by [`PostProcessor::Joint`]
    /// unless the pipeline names another post-processor.
    Joint,
}

impl Combiner {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Replace => "replace",
            Self::Accumulate => "accumulate",
            Self::List => "list",
            Self::Joint => "joint",
        }
    }

    /// Whether mutators see the source value instead of the running value.
    pub(crate) const fn collects(self) -> bool {
        matches!(self, Self::List | Self::Joint)
    }

    /// Seeds the running value from the source output.
    pub(crate) fn start(self, source: PipelineValue) -> PipelineValue {
        match (self, source) {
            (Self::List | Self::Joint, PipelineValue::List(items)) => PipelineValue::List(items),
            (Self::List | Self::Joint, other) => PipelineValue::List(vec![other]),
            (_, other) => other,
        }
    }

    /// Merges one contribution into the running value.
    pub(crate) fn combine(
        self,
        pipeline: &str,
        running: PipelineValue,
        contribution: PipelineValue,
    ) -> Result<PipelineValue, PipelineError> {
        match self {
            Self::Replace => Ok(contribution),
            Self::Accumulate => running.add(&contribution, pipeline),
            Self::List | Self::Joint => match running {
                PipelineValue::List(mut items) => {
                    items.push(contribution);
                    Ok(PipelineValue::List(items))
                }
                other => Ok(PipelineValue::List(vec![other, contribution])),
            },
        }
    }
}

type CustomFn = dyn Fn(PipelineValue, Duration) -> SimResult<PipelineValue> + Send + Sync;

/// Final transformation applied to a combined value.
#[derive(Clone)]
pub enum PostProcessor {
    /// `1 - Π(1 - p_i)` over the collected contributions. A lone contribution
    /// is returned unchanged.
    Joint,
    /// Yearly rate to per-step rate: `rate * step_days / 365`.
    Rescale,
    /// Arbitrary function of the value and the current step.
    Custom(Arc<CustomFn>),
}

impl PostProcessor {
    /// Wraps a closure as a custom post-processor.
    pub fn custom(
        f: impl Fn(PipelineValue, Duration) -> SimResult<PipelineValue> + Send + Sync + 'static,
    ) -> Self {
        Self::Custom(Arc::new(f))
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Joint => "joint",
            Self::Rescale => "rescale",
            Self::Custom(_) => "custom",
        }
    }

    pub(crate) fn apply(
        &self,
        pipeline: &str,
        value: PipelineValue,
        step: Duration,
    ) -> SimResult<PipelineValue> {
        match self {
            Self::Joint => Ok(joint(pipeline, value)?),
            Self::Rescale => Ok(value.map(|rate| from_yearly(rate, step))),
            Self::Custom(f) => f(value, step),
        }
    }
}

impl fmt::Debug for PostProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Probabilistic union of independent contributions.
fn joint(pipeline: &str, value: PipelineValue) -> Result<PipelineValue, PipelineError> {
    let mut items = match value {
        PipelineValue::List(items) => items,
        other => return Ok(other),
    };
    if items.len() == 1 {
        return Ok(items.remove(0));
    }
    let mut survival: Option<PipelineValue> = None;
    for p in items {
        let complement = p.map(|x| 1.0 - x);
        survival = Some(match survival {
            None => complement,
            Some(acc) => acc.mul(&complement, pipeline)?,
        });
    }
    Ok(survival.map_or(PipelineValue::Scalar(0.0), |s| s.map(|x| 1.0 - x)))
}
