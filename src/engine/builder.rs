//! The setup facade handed to components.

use std::sync::Arc;

use crate::config::Configuration;
use crate::error::SimResult;
use crate::event::{Emitter, EventManager, Listener};
use crate::lookup::{InterpolatedTable, LookupData, LookupManager, TableOptions};
use crate::population::{PopulationManager, PopulationView, Query, SimulantCreator, SimulantId, INITIALIZE_SIMULANTS};
use crate::randomness::RandomnessStream;
use crate::time::Clock;
use crate::values::{Combiner, PipelineValue, PostProcessor, ValueHandle, ValuesManager};

/// The only way components reach the kernel.
///
/// A builder bundles exactly the capabilities a component may use during
/// setup. Listener registrations made here are bound when setup finishes.
#[derive(Debug, Clone)]
pub struct Builder {
    population: Arc<PopulationManager>,
    events: Arc<EventManager>,
    values: Arc<ValuesManager>,
    lookups: Arc<LookupManager>,
    clock: Clock,
    configuration: Configuration,
    draw_number: u64,
}

impl Builder {
    pub(crate) fn new(
        population: Arc<PopulationManager>,
        events: Arc<EventManager>,
        values: Arc<ValuesManager>,
        lookups: Arc<LookupManager>,
        clock: Clock,
        configuration: Configuration,
        draw_number: u64,
    ) -> Self {
        Self {
            population,
            events,
            values,
            lookups,
            clock,
            configuration,
            draw_number,
        }
    }

    /// Builds an interpolated table over population attributes.
    ///
    /// # Errors
    ///
    /// See [`LookupManager::build_table`].
    pub fn lookup(&self, data: &LookupData, options: TableOptions) -> SimResult<InterpolatedTable> {
        self.lookups.build_table(data, options)
    }

    /// # Errors
    ///
    /// Returns an internal error if the pipeline lock is poisoned.
    pub fn value(&self, name: &str) -> SimResult<ValueHandle> {
        self.values.get_value(name)
    }

    /// # Errors
    ///
    /// Returns an internal error if the pipeline lock is poisoned.
    pub fn value_with(
        &self,
        name: &str,
        combiner: Option<Combiner>,
        post_processor: Option<PostProcessor>,
    ) -> SimResult<ValueHandle> {
        self.values.get_value_with(name, combiner, post_processor)
    }

    /// A yearly rate pipeline, rescaled to the step size.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the pipeline lock is poisoned.
    pub fn rate(&self, name: &str) -> SimResult<ValueHandle> {
        self.values.get_rate(name)
    }

    /// # Errors
    ///
    /// `DuplicateSource` if the pipeline already has a source.
    pub fn declare_pipeline(
        &self,
        name: &str,
        source: impl Fn(&[SimulantId]) -> SimResult<PipelineValue> + Send + Sync + 'static,
    ) -> SimResult<()> {
        self.values.declare_pipeline(name, source)
    }

    /// # Errors
    ///
    /// `DuplicateSource` if the pipeline already has a source.
    pub fn declare_pipeline_with(
        &self,
        name: &str,
        source: impl Fn(&[SimulantId]) -> SimResult<PipelineValue> + Send + Sync + 'static,
        combiner: Combiner,
        post_processor: Option<PostProcessor>,
    ) -> SimResult<()> {
        self.values
            .declare_pipeline_with(name, source, combiner, post_processor)
    }

    /// Registers a mutator on pipeline `name`.
    ///
    /// # Errors
    ///
    /// `PriorityOutOfRange` for a priority above 9.
    pub fn modifies_value(
        &self,
        name: &str,
        label: &str,
        priority: u8,
        f: impl Fn(&[SimulantId], &PipelineValue) -> SimResult<PipelineValue> + Send + Sync + 'static,
    ) -> SimResult<()> {
        self.values.mutator(name, label, priority, f)
    }

    /// # Errors
    ///
    /// Returns an internal error if the registry lock is poisoned.
    pub fn emitter(&self, channel: &str) -> SimResult<Emitter> {
        self.events.get_emitter(channel)
    }

    /// Subscribes `listener` to `channel` once setup completes.
    ///
    /// # Errors
    ///
    /// `PriorityOutOfRange` for a priority above 9.
    pub fn register_listener(&self, channel: &str, listener: Listener, priority: u8) -> SimResult<()> {
        self.events.defer_listener(channel, listener, priority)
    }

    #[must_use]
    pub fn population_view(&self, columns: &[&str], query: Option<Query>) -> PopulationView {
        self.population.get_view(columns, query)
    }

    /// A creator that adds simulants and emits `initialize_simulants`.
    ///
    /// # Errors
    ///
    /// Returns an internal error if the registry lock is poisoned.
    pub fn simulant_creator(&self) -> SimResult<SimulantCreator> {
        let emitter = self.events.get_emitter(INITIALIZE_SIMULANTS)?;
        Ok(self.population.simulant_creator(emitter, self.clock.clone()))
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock.clone()
    }

    /// A randomness stream for the run's draw number.
    #[must_use]
    pub fn randomness(&self, key: &str) -> RandomnessStream {
        RandomnessStream::new(key, self.clock.clone(), self.draw_number)
    }

    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }
}
