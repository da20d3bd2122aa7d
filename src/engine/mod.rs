//! Simulation orchestration.
//!
//! A [`SimulationContext`] owns the managers, resolves component setup and
//! drives the time-step loop:
//!
//! ```text
//! Uninitialized -> SettingUp -> Ready -> Running -> Finished
//! ```
//!
//! Setup is a work queue. Managers go first, then the configured components;
//! components returned from a `setup` call are appended to the tail, and a
//! component already set up (same allocation) is skipped. Once the queue is
//! empty every manager is finalized and `post_setup` is emitted.
//!
//! Each tick emits `time_step__prepare`, `time_step` and `time_step__cleanup`
//! in that order and then advances the clock. Ticks are not transactional:
//! an error aborts the run where it happened.

mod builder;
mod component;

pub use builder::Builder;
pub use component::{from_fn, Component, FnComponent, Manager};

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{Configuration, Layer, SimulationParameters};
use crate::error::{SimError, SimResult};
use crate::event::{Event, EventManager, ListenerDescription};
use crate::lookup::LookupManager;
use crate::population::{PopulationManager, INITIALIZE_SIMULANTS};
use crate::time::{midyear, step_from_days, Clock};
use crate::values::{PipelineValue, ValuesManager};

use component::component_id;

/// Emitted once, after setup and before the initial cohort exists.
pub const POST_SETUP: &str = "post_setup";
/// First channel of every tick.
pub const TIME_STEP_PREPARE: &str = "time_step__prepare";
/// Main channel of every tick.
pub const TIME_STEP: &str = "time_step";
/// Last channel of every tick.
pub const TIME_STEP_CLEANUP: &str = "time_step__cleanup";
/// Emitted once, after the last tick.
pub const SIMULATION_END: &str = "simulation_end";
/// Pipeline evaluated over the final population.
pub const METRICS_PIPELINE: &str = "metrics";

/// Lifecycle state of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationState {
    Uninitialized,
    SettingUp,
    Ready,
    Running,
    Finished,
}

impl fmt::Display for SimulationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::SettingUp => "setting up",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub draw: u64,
    /// Wall-clock seconds from start to finish.
    pub run_time: f64,
    pub ticks: u64,
    /// Values of the `metrics` pipeline.
    pub metrics: BTreeMap<String, f64>,
}

impl RunResult {
    /// Metrics merged with run metadata (`draw`, `simulation_run_time`).
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn flat(&self) -> BTreeMap<String, f64> {
        let mut out = self.metrics.clone();
        out.insert("draw".to_string(), self.draw as f64);
        out.insert("simulation_run_time".to_string(), self.run_time);
        out
    }
}

/// Owns the managers and runs the simulation.
pub struct SimulationContext {
    state: SimulationState,
    components: Vec<Arc<dyn Component>>,
    configuration: Configuration,
    clock: Clock,
    population: Arc<PopulationManager>,
    events: Arc<EventManager>,
    values: Arc<ValuesManager>,
    lookups: Arc<LookupManager>,
    draw: u64,
    stop: Option<DateTime<Utc>>,
    ticks: u64,
    started: Option<Instant>,
}

impl SimulationContext {
    /// Creates the managers. Nothing is set up yet.
    #[must_use]
    pub fn new(components: Vec<Arc<dyn Component>>, configuration: Configuration) -> Self {
        let clock = Clock::default();
        let population = Arc::new(PopulationManager::new());
        let events = Arc::new(EventManager::new());
        let values = Arc::new(ValuesManager::new(clock.clone()));
        let lookups = Arc::new(LookupManager::new(Arc::clone(&population), clock.clone()));
        Self {
            state: SimulationState::Uninitialized,
            components,
            configuration,
            clock,
            population,
            events,
            values,
            lookups,
            draw: 0,
            stop: None,
            ticks: 0,
            started: None,
        }
    }

    fn expect_state(&self, expected: SimulationState, action: &'static str) -> SimResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(SimError::InvalidState {
                action,
                state: self.state.to_string(),
            })
        }
    }

    fn managers(&self) -> [Arc<dyn Manager>; 4] {
        // Events last: deferred listeners bind after everything else settled.
        [
            Arc::clone(&self.population) as Arc<dyn Manager>,
            Arc::clone(&self.lookups) as Arc<dyn Manager>,
            Arc::clone(&self.values) as Arc<dyn Manager>,
            Arc::clone(&self.events) as Arc<dyn Manager>,
        ]
    }

    fn manager_components(&self) -> [Arc<dyn Component>; 4] {
        [
            Arc::clone(&self.population) as Arc<dyn Component>,
            Arc::clone(&self.lookups) as Arc<dyn Component>,
            Arc::clone(&self.values) as Arc<dyn Component>,
            Arc::clone(&self.events) as Arc<dyn Component>,
        ]
    }

    fn builder(&self) -> Builder {
        Builder::new(
            Arc::clone(&self.population),
            Arc::clone(&self.events),
            Arc::clone(&self.values),
            Arc::clone(&self.lookups),
            self.clock.clone(),
            self.configuration.clone(),
            self.draw,
        )
    }

    fn event(&self) -> SimResult<Event> {
        Ok(Event::new(
            self.population.index()?,
            self.clock.now(),
            self.clock.step(),
        ))
    }

    fn emit(&self, channel: &str) -> SimResult<()> {
        let event = self.event()?;
        self.events.emit(channel, &event)
    }

    /// Sets up every component and finalizes the managers.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless uninitialized; otherwise the first error raised
    /// by a component, a manager, or a `post_setup` listener.
    pub fn setup(&mut self) -> SimResult<()> {
        self.expect_state(SimulationState::Uninitialized, "set up")?;
        self.state = SimulationState::SettingUp;
        self.draw = self.configuration.draw_number()?;
        let builder = self.builder();

        let mut queue: VecDeque<Arc<dyn Component>> =
            self.manager_components().into_iter().collect();
        queue.extend(self.components.iter().cloned());

        let mut done = HashSet::new();
        let mut resolved: Vec<Arc<dyn Component>> = Vec::new();
        while let Some(component) = queue.pop_front() {
            let id = component_id(&component);
            if done.contains(&id) {
                continue;
            }
            if let Some(defaults) = component.configuration_defaults() {
                self.configuration
                    .read_dict(&defaults, Layer::ComponentConfigs, component.name())?;
            }
            debug!(component = component.name(), "setting up component");
            let children = Arc::clone(&component).setup(&builder)?;
            done.insert(id);
            resolved.push(component);
            queue.extend(children);
        }

        for manager in self.managers() {
            manager.finalize(&resolved)?;
        }
        self.components = resolved;
        self.state = SimulationState::Ready;
        info!(components = self.components.len(), "simulation set up");
        self.emit(POST_SETUP)
    }

    /// Positions the clock and creates the initial cohort.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless ready; configuration errors for bad
    /// `simulation_parameters`; listener failures from `initialize_simulants`.
    pub fn start(&mut self) -> SimResult<()> {
        self.expect_state(SimulationState::Ready, "start")?;
        let params = self
            .configuration
            .with_store(SimulationParameters::from_store)??;
        let start = midyear(params.year_start)?;
        let stop = midyear(params.year_end)?;
        self.clock.set_time(start);
        self.clock.set_step(step_from_days(params.time_step)?);
        self.stop = Some(stop);
        self.state = SimulationState::Running;
        self.started = Some(Instant::now());
        info!(
            %start,
            %stop,
            step_days = params.time_step,
            population_size = params.population_size,
            draw = self.draw,
            "starting simulation"
        );

        let emitter = self.events.get_emitter(INITIALIZE_SIMULANTS)?;
        let creator = self.population.simulant_creator(emitter, self.clock.clone());
        creator.create(
            params.population_size,
            json!({ "initial_age": params.initial_age }),
        )?;
        Ok(())
    }

    /// Runs one tick.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless running; the first listener failure otherwise.
    pub fn step(&mut self) -> SimResult<()> {
        self.expect_state(SimulationState::Running, "step")?;
        debug!(tick = self.ticks, time = %self.clock.now(), "tick");
        self.emit(TIME_STEP_PREPARE)?;
        self.emit(TIME_STEP)?;
        self.emit(TIME_STEP_CLEANUP)?;
        self.clock.advance()?;
        self.ticks += 1;
        Ok(())
    }

    /// Runs to completion, setting up and starting first if needed.
    ///
    /// # Errors
    ///
    /// `InvalidState` once finished; any setup, tick or finish error.
    pub fn run(&mut self) -> SimResult<RunResult> {
        if self.state == SimulationState::Uninitialized {
            self.setup()?;
        }
        if self.state == SimulationState::Ready {
            self.start()?;
        }
        self.expect_state(SimulationState::Running, "run")?;
        while self.stop.is_some_and(|stop| self.clock.now() < stop) {
            self.step()?;
        }
        self.finish()
    }

    /// Emits `simulation_end` and evaluates the `metrics` pipeline.
    ///
    /// # Errors
    ///
    /// `InvalidState` unless running; listener or pipeline failures.
    pub fn finish(&mut self) -> SimResult<RunResult> {
        self.expect_state(SimulationState::Running, "finish")?;
        self.emit(SIMULATION_END)?;

        self.values
            .ensure_source(METRICS_PIPELINE, |_| Ok(PipelineValue::empty_metrics()))?;
        let index = self.population.index()?;
        let metrics = self.values.get_value(METRICS_PIPELINE)?.metrics(&index)?;

        self.state = SimulationState::Finished;
        let run_time = self
            .started
            .map_or(0.0, |started| started.elapsed().as_secs_f64());
        info!(ticks = self.ticks, run_time, "simulation finished");
        Ok(RunResult {
            run_id: Uuid::new_v4(),
            draw: self.draw,
            run_time,
            ticks: self.ticks,
            metrics,
        })
    }

    #[must_use]
    pub const fn state(&self) -> SimulationState {
        self.state
    }

    /// Components in setup order, once set up; the configured list before.
    #[must_use]
    pub fn components(&self) -> &[Arc<dyn Component>] {
        &self.components
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    #[must_use]
    pub fn population(&self) -> &Arc<PopulationManager> {
        &self.population
    }

    #[must_use]
    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    #[must_use]
    pub fn values(&self) -> &Arc<ValuesManager> {
        &self.values
    }

    #[must_use]
    pub fn lookups(&self) -> &Arc<LookupManager> {
        &self.lookups
    }

    #[must_use]
    pub const fn ticks(&self) -> u64 {
        self.ticks
    }

    /// See [`EventManager::list_events`].
    ///
    /// # Errors
    ///
    /// Returns an internal error if the registry lock is poisoned.
    pub fn list_events(&self) -> SimResult<BTreeMap<String, Vec<ListenerDescription>>> {
        self.events.list_events()
    }
}

impl fmt::Debug for SimulationContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationContext")
            .field("state", &self.state)
            .field("components", &self.components.len())
            .field("ticks", &self.ticks)
            .finish_non_exhaustive()
    }
}

/// Applies user overrides: an optional JSON file, then the draw number.
///
/// # Errors
///
/// `Unreadable` if the file cannot be read or parsed.
pub fn configure(configuration: &Configuration, draw: u64, path: Option<&Path>) -> SimResult<()> {
    if let Some(path) = path {
        configuration.read(path, Layer::Override)?;
    }
    configuration.set(
        "run_configuration.draw_number",
        json!(draw),
        Layer::Override,
        "command_line_argument",
    )
}

/// Creates a context and sets it up.
///
/// # Errors
///
/// See [`SimulationContext::setup`].
pub fn setup_simulation(
    components: Vec<Arc<dyn Component>>,
    configuration: Configuration,
) -> SimResult<SimulationContext> {
    let mut context = SimulationContext::new(components, configuration);
    context.setup()?;
    Ok(context)
}

/// Sets up, runs and finishes a simulation.
///
/// # Errors
///
/// See [`SimulationContext::run`].
pub fn run_simulation(
    components: Vec<Arc<dyn Component>>,
    configuration: Configuration,
) -> SimResult<RunResult> {
    setup_simulation(components, configuration)?.run()
}
