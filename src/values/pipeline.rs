//! A single named pipeline and its evaluation.

use std::sync::Arc;

use chrono::Duration;
use tracing::trace;

use crate::error::{PipelineError, SimResult};
use crate::population::SimulantId;

use super::combiner::{Combiner, PostProcessor};
use super::PipelineValue;

/// Base computation of a pipeline.
pub type Source = Arc<dyn Fn(&[SimulantId]) -> SimResult<PipelineValue> + Send + Sync>;

/// A modification applied on top of the source.
///
/// For `Replace` and `Accumulate` the second argument is the running value;
/// for `List` and `Joint` it is the source value.
pub type MutatorFn =
    Arc<dyn Fn(&[SimulantId], &PipelineValue) -> SimResult<PipelineValue> + Send + Sync>;

#[derive(Clone)]
pub(crate) struct Mutator {
    pub(crate) label: String,
    pub(crate) priority: u8,
    pub(crate) seq: u64,
    pub(crate) f: MutatorFn,
}

#[derive(Clone, Default)]
pub(crate) struct Pipeline {
    pub(crate) source: Option<Source>,
    /// Sorted by `(priority, seq)`.
    pub(crate) mutators: Vec<Mutator>,
    pub(crate) combiner: Option<Combiner>,
    pub(crate) post_processor: Option<PostProcessor>,
}

impl Pipeline {
    pub(crate) fn add_mutator(&mut self, mutator: Mutator) {
        let key = (mutator.priority, mutator.seq);
        let pos = self
            .mutators
            .partition_point(|m| (m.priority, m.seq) <= key);
        self.mutators.insert(pos, mutator);
    }

    /// Records preferences the pipeline does not already have.
    pub(crate) fn prefer(&mut self, combiner: Option<Combiner>, post_processor: Option<PostProcessor>) {
        if self.combiner.is_none() {
            self.combiner = combiner;
        }
        if self.post_processor.is_none() {
            self.post_processor = post_processor;
        }
    }

    /// Source, then mutators through the combiner, then the post-processor.
    pub(crate) fn evaluate(
        &self,
        name: &str,
        index: &[SimulantId],
        step: Duration,
    ) -> SimResult<PipelineValue> {
        let source = self.source.as_ref().ok_or_else(|| PipelineError::NoSource {
            name: name.to_string(),
        })?;
        let combiner = self.combiner.unwrap_or_default();
        let base = source(index)?;
        let mut running = if combiner.collects() {
            combiner.start(base.clone())
        } else {
            base.clone()
        };
        for mutator in &self.mutators {
            trace!(pipeline = name, mutator = %mutator.label, "applying mutator");
            let input = if combiner.collects() { &base } else { &running };
            let contribution = (mutator.f)(index, input)?;
            running = combiner.combine(name, running, contribution)?;
        }
        match (&self.post_processor, combiner) {
            (Some(post), _) => post.apply(name, running, step),
            // A joint pipeline without an explicit post-processor still
            // yields the union of its contributions.
            (None, Combiner::Joint) => PostProcessor::Joint.apply(name, running, step),
            (None, _) => Ok(running),
        }
    }
}
