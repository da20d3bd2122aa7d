//! Value pipelines.
//!
//! A pipeline is a named computed quantity: one source produces a base value
//! for an index, then every registered mutator gets a say, merged by the
//! pipeline's [`Combiner`], and finally an optional [`PostProcessor`] runs.
//! Independent components use this to influence the same quantity (a cost,
//! a combined risk) without knowing about each other.
//!
//! Nothing is cached. Every call re-evaluates the source and all mutators.

mod combiner;
mod pipeline;

pub use combiner::{Combiner, PostProcessor};
pub use pipeline::{MutatorFn, Source};

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::{Component, Manager};
use crate::error::{lock_err, ConfigurationError, PipelineError, SimResult};
use crate::event::MAX_PRIORITY;
use crate::population::SimulantId;
use crate::time::Clock;

use pipeline::{Mutator, Pipeline};

/// A value flowing through a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineValue {
    /// One number for every simulant.
    Scalar(f64),
    /// One number per simulant, aligned with the queried index.
    Series(Vec<f64>),
    /// Named aggregates, e.g. the `metrics` pipeline.
    Metrics(BTreeMap<String, f64>),
    /// Collected contributions of `List` and `Joint` pipelines.
    List(Vec<PipelineValue>),
}

impl PipelineValue {
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(_) => "scalar",
            Self::Series(_) => "series",
            Self::Metrics(_) => "metrics",
            Self::List(_) => "list",
        }
    }

    /// An empty metrics mapping.
    #[must_use]
    pub const fn empty_metrics() -> Self {
        Self::Metrics(BTreeMap::new())
    }

    /// Applies `f` to every number.
    #[must_use]
    pub fn map(self, f: impl Fn(f64) -> f64 + Copy) -> Self {
        match self {
            Self::Scalar(x) => Self::Scalar(f(x)),
            Self::Series(v) => Self::Series(v.into_iter().map(f).collect()),
            Self::Metrics(m) => Self::Metrics(m.into_iter().map(|(k, v)| (k, f(v))).collect()),
            Self::List(items) => Self::List(items.into_iter().map(|i| i.map(f)).collect()),
        }
    }

    fn zip_with(
        &self,
        other: &Self,
        pipeline: &str,
        f: impl Fn(f64, f64) -> f64 + Copy,
    ) -> Result<Self, PipelineError> {
        let incompatible = || PipelineError::IncompatibleValues {
            name: pipeline.to_string(),
            left: self.kind_name(),
            right: other.kind_name(),
        };
        Ok(match (self, other) {
            (Self::Scalar(a), Self::Scalar(b)) => Self::Scalar(f(*a, *b)),
            (Self::Scalar(a), Self::Series(v)) => Self::Series(v.iter().map(|b| f(*a, *b)).collect()),
            (Self::Series(v), Self::Scalar(b)) => Self::Series(v.iter().map(|a| f(*a, *b)).collect()),
            (Self::Series(a), Self::Series(b)) => {
                if a.len() != b.len() {
                    return Err(incompatible());
                }
                Self::Series(a.iter().zip(b).map(|(x, y)| f(*x, *y)).collect())
            }
            (Self::Metrics(a), Self::Metrics(b)) => {
                let mut out = a.clone();
                for (k, v) in b {
                    out.entry(k.clone())
                        .and_modify(|x| *x = f(*x, *v))
                        .or_insert(*v);
                }
                Self::Metrics(out)
            }
            _ => return Err(incompatible()),
        })
    }

    /// Elementwise sum. Scalars broadcast over series; metrics merge by key,
    /// summing shared keys.
    ///
    /// # Errors
    ///
    /// `IncompatibleValues` for mismatched shapes.
    pub fn add(&self, other: &Self, pipeline: &str) -> Result<Self, PipelineError> {
        self.zip_with(other, pipeline, |a, b| a + b)
    }

    /// Elementwise product, broadcasting like [`PipelineValue::add`].
    ///
    /// # Errors
    ///
    /// `IncompatibleValues` for mismatched shapes.
    pub fn mul(&self, other: &Self, pipeline: &str) -> Result<Self, PipelineError> {
        self.zip_with(other, pipeline, |a, b| a * b)
    }
}

impl From<f64> for PipelineValue {
    fn from(x: f64) -> Self {
        Self::Scalar(x)
    }
}

impl From<Vec<f64>> for PipelineValue {
    fn from(v: Vec<f64>) -> Self {
        Self::Series(v)
    }
}

impl From<BTreeMap<String, f64>> for PipelineValue {
    fn from(m: BTreeMap<String, f64>) -> Self {
        Self::Metrics(m)
    }
}

/// Introspection record for one pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDescription {
    pub name: String,
    pub has_source: bool,
    pub combiner: String,
    pub post_processor: Option<String>,
    /// Mutator labels in application order.
    pub mutators: Vec<String>,
}

type PipelineMap = Arc<RwLock<BTreeMap<String, Pipeline>>>;

/// Owns every pipeline.
pub struct ValuesManager {
    pipelines: PipelineMap,
    clock: Clock,
    seq: AtomicU64,
}

impl ValuesManager {
    #[must_use]
    pub fn new(clock: Clock) -> Self {
        Self {
            pipelines: Arc::default(),
            clock,
            seq: AtomicU64::new(0),
        }
    }

    fn with_pipeline<R>(&self, name: &str, f: impl FnOnce(&mut Pipeline) -> R) -> SimResult<R> {
        let mut pipelines = self.pipelines.write().map_err(|_| lock_err("pipelines"))?;
        Ok(f(pipelines.entry(name.to_string()).or_default()))
    }

    /// Declares the source of `name` with default combination.
    ///
    /// # Errors
    ///
    /// `DuplicateSource` if `name` already has a source.
    pub fn declare_pipeline(
        &self,
        name: &str,
        source: impl Fn(&[SimulantId]) -> SimResult<PipelineValue> + Send + Sync + 'static,
    ) -> SimResult<()> {
        self.install_source(name, Arc::new(source), None, None)
    }

    /// Declares the source of `name` together with its combiner and
    /// post-processor.
    ///
    /// # Errors
    ///
    /// `DuplicateSource` if `name` already has a source.
    pub fn declare_pipeline_with(
        &self,
        name: &str,
        source: impl Fn(&[SimulantId]) -> SimResult<PipelineValue> + Send + Sync + 'static,
        combiner: Combiner,
        post_processor: Option<PostProcessor>,
    ) -> SimResult<()> {
        self.install_source(name, Arc::new(source), Some(combiner), post_processor)
    }

    fn install_source(
        &self,
        name: &str,
        source: Source,
        combiner: Option<Combiner>,
        post_processor: Option<PostProcessor>,
    ) -> SimResult<()> {
        self.with_pipeline(name, |p| {
            if p.source.is_some() {
                return Err(ConfigurationError::DuplicateSource {
                    name: name.to_string(),
                });
            }
            debug!(pipeline = name, "declared pipeline source");
            p.source = Some(source);
            if combiner.is_some() {
                p.combiner = combiner;
            }
            if post_processor.is_some() {
                p.post_processor = post_processor;
            }
            Ok(())
        })??;
        Ok(())
    }

    /// Installs `source` only if `name` has none.
    pub(crate) fn ensure_source(
        &self,
        name: &str,
        source: impl Fn(&[SimulantId]) -> SimResult<PipelineValue> + Send + Sync + 'static,
    ) -> SimResult<()> {
        self.with_pipeline(name, |p| {
            if p.source.is_none() {
                p.source = Some(Arc::new(source));
            }
        })
    }

    /// Registers a mutator on `name`. May precede the source declaration.
    ///
    /// # Errors
    ///
    /// `PriorityOutOfRange` for a priority above [`MAX_PRIORITY`].
    pub fn mutator(
        &self,
        name: &str,
        label: &str,
        priority: u8,
        f: impl Fn(&[SimulantId], &PipelineValue) -> SimResult<PipelineValue> + Send + Sync + 'static,
    ) -> SimResult<()> {
        if priority > MAX_PRIORITY {
            return Err(ConfigurationError::PriorityOutOfRange {
                priority,
                max: MAX_PRIORITY,
            }
            .into());
        }
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        self.with_pipeline(name, |p| {
            p.add_mutator(Mutator {
                label: label.to_string(),
                priority,
                seq,
                f: Arc::new(f),
            });
        })
    }

    /// A handle evaluating `name`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the pipeline lock is poisoned.
    pub fn get_value(&self, name: &str) -> SimResult<ValueHandle> {
        self.get_value_with(name, None, None)
    }

    /// A handle evaluating `name` as a per-step rate from a yearly rate.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the pipeline lock is poisoned.
    pub fn get_rate(&self, name: &str) -> SimResult<ValueHandle> {
        self.get_value_with(name, None, Some(PostProcessor::Rescale))
    }

    /// A handle evaluating `name`, recording a combiner and post-processor
    /// preference the pipeline does not already have.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the pipeline lock is poisoned.
    pub fn get_value_with(
        &self,
        name: &str,
        combiner: Option<Combiner>,
        post_processor: Option<PostProcessor>,
    ) -> SimResult<ValueHandle> {
        self.with_pipeline(name, |p| p.prefer(combiner, post_processor))?;
        Ok(ValueHandle {
            name: name.to_string(),
            pipelines: Arc::clone(&self.pipelines),
            clock: self.clock.clone(),
        })
    }

    /// Whether `name` has a source.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the pipeline lock is poisoned.
    pub fn has_source(&self, name: &str) -> SimResult<bool> {
        let pipelines = self.pipelines.read().map_err(|_| lock_err("pipelines"))?;
        Ok(pipelines.get(name).is_some_and(|p| p.source.is_some()))
    }

    /// Every known pipeline, by name.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the pipeline lock is poisoned.
    pub fn list_pipelines(&self) -> SimResult<Vec<PipelineDescription>> {
        let pipelines = self.pipelines.read().map_err(|_| lock_err("pipelines"))?;
        Ok(pipelines
            .iter()
            .map(|(name, p)| PipelineDescription {
                name: name.clone(),
                has_source: p.source.is_some(),
                combiner: p.combiner.unwrap_or_default().name().to_string(),
                post_processor: p.post_processor.as_ref().map(|pp| pp.name().to_string()),
                mutators: p.mutators.iter().map(|m| m.label.clone()).collect(),
            })
            .collect())
    }
}

impl fmt::Debug for ValuesManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValuesManager").finish_non_exhaustive()
    }
}

impl Component for ValuesManager {
    fn name(&self) -> &str {
        "values_manager"
    }
}

impl Manager for ValuesManager {
    fn finalize(&self, _components: &[Arc<dyn Component>]) -> SimResult<()> {
        for p in self.list_pipelines()? {
            if !p.has_source && !p.mutators.is_empty() {
                warn!(
                    pipeline = %p.name,
                    mutators = ?p.mutators,
                    "pipeline has mutators but no source"
                );
            }
        }
        Ok(())
    }
}

/// Callable handle to a pipeline.
///
/// Handles are cheap to clone and stay valid as mutators are added.
#[derive(Clone)]
pub struct ValueHandle {
    name: String,
    pipelines: PipelineMap,
    clock: Clock,
}

impl ValueHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates the pipeline for `index`.
    ///
    /// The pipeline is snapshotted first; the source and mutators run without
    /// holding any lock, so they may read other pipelines.
    ///
    /// # Errors
    ///
    /// `NoSource` if no source has been declared, otherwise whatever the
    /// source, mutators or post-processor return.
    pub fn call(&self, index: &[SimulantId]) -> SimResult<PipelineValue> {
        let pipeline = {
            let pipelines = self.pipelines.read().map_err(|_| lock_err("pipelines"))?;
            pipelines.get(&self.name).cloned().unwrap_or_default()
        };
        pipeline.evaluate(&self.name, index, self.clock.step())
    }

    /// Evaluates to one number per simulant; scalars are broadcast.
    ///
    /// # Errors
    ///
    /// `UnexpectedShape` for metrics or list results, or a series whose
    /// length differs from the index.
    pub fn series(&self, index: &[SimulantId]) -> SimResult<Vec<f64>> {
        match self.call(index)? {
            PipelineValue::Scalar(x) => Ok(vec![x; index.len()]),
            PipelineValue::Series(v) if v.len() == index.len() => Ok(v),
            other => Err(PipelineError::UnexpectedShape {
                name: self.name.clone(),
                expected: "series",
                actual: other.kind_name(),
            }
            .into()),
        }
    }

    /// Evaluates to a metrics mapping.
    ///
    /// # Errors
    ///
    /// `UnexpectedShape` for any other result.
    pub fn metrics(&self, index: &[SimulantId]) -> SimResult<BTreeMap<String, f64>> {
        match self.call(index)? {
            PipelineValue::Metrics(m) => Ok(m),
            other => Err(PipelineError::UnexpectedShape {
                name: self.name.clone(),
                expected: "metrics",
                actual: other.kind_name(),
            }
            .into()),
        }
    }
}

impl fmt::Debug for ValueHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueHandle").field("name", &self.name).finish()
    }
}
