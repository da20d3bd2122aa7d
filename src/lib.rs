//! # microsim - a discrete-time population microsimulation kernel
//!
//! A simulation advances a population of simulants through fixed time steps.
//! Behaviour lives in components, which wire themselves into the kernel at
//! setup and never call each other directly.
//!
//! ## Core Concepts
//!
//! - **Population**: a columnar table, one row per simulant, accessed through
//!   column-scoped views
//! - **Events**: named channels whose listeners run in priority order
//! - **Value pipelines**: named computed quantities with a source and any
//!   number of mutators
//! - **Lookup tables**: interpolated tables over population attributes and time
//! - **Randomness**: reproducible streams keyed by name, time and simulant
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use microsim::components::BasePopulation;
//! use microsim::config::Configuration;
//! use microsim::engine::{configure, run_simulation, Component};
//!
//! let configuration = Configuration::with_defaults();
//! configure(&configuration, 0, None)?;
//!
//! let components: Vec<Arc<dyn Component>> = vec![Arc::new(BasePopulation::new())];
//! let result = run_simulation(components, configuration)?;
//! println!("{:?}", result.flat());
//! # Ok::<(), microsim::SimError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod error;
pub mod time;
pub mod value;

// Kernel subsystems
pub mod config;
pub mod event;
pub mod lookup;
pub mod population;
pub mod randomness;
pub mod values;

// Orchestration and outer surfaces
pub mod catalog;
pub mod components;
pub mod engine;
pub mod results;

// Re-export primary types at crate root for convenience
pub use config::{Configuration, Layer};
pub use engine::{
    Builder, Component, Manager, RunResult, SimulationContext, SimulationState,
};
pub use error::{SimError, SimResult};
pub use event::{Event, EventManager, Listener};
pub use lookup::{InterpolatedTable, LookupData, LookupManager, TableOptions};
pub use population::{PopulationManager, PopulationView, Query, SimulantId};
pub use randomness::{Distribution, RandomnessStream};
pub use time::Clock;
pub use value::{ColumnKind, Value};
pub use values::{Combiner, PipelineValue, PostProcessor, ValueHandle, ValuesManager};
