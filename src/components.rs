//! Built-in components.
//!
//! [`BasePopulation`] gives every simulant the standard attributes (`age`,
//! `sex`, `alive`, `entrance_time`), ages the living each tick, and reports
//! population summaries through the `metrics` pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::engine::{Builder, Component, METRICS_PIPELINE, TIME_STEP};
use crate::error::{PipelineError, SimResult};
use crate::event::{Event, Listener, DEFAULT_PRIORITY};
use crate::population::{Column, Frame, PopulationView, Query, SimulantId, INITIALIZE_SIMULANTS};
use crate::randomness::{Distribution, RandomnessStream};
use crate::time::{duration_days, DAYS_PER_YEAR};
use crate::value::Value;
use crate::values::PipelineValue;

const COLUMNS: [&str; 4] = ["age", "sex", "alive", "entrance_time"];
const SEXES: [&str; 2] = ["Male", "Female"];

/// Standard demographic attributes.
///
/// Reads `base_population.max_age` (default 100) as the upper bound of the
/// uniform initial age draw. A creation event whose user data carries
/// `initial_age` gives every new simulant exactly that age instead.
#[derive(Debug, Default)]
pub struct BasePopulation;

impl BasePopulation {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Component for BasePopulation {
    fn name(&self) -> &str {
        "base_population"
    }

    fn configuration_defaults(&self) -> Option<JsonValue> {
        Some(json!({ "base_population": { "max_age": 100.0 } }))
    }

    fn setup(self: Arc<Self>, builder: &Builder) -> SimResult<Vec<Arc<dyn Component>>> {
        let view = builder.population_view(&COLUMNS, None);
        view.create_column("age", Value::Float(0.0))?;
        view.create_column("sex", Value::from(SEXES[0]))?;
        view.create_column("alive", Value::Bool(true))?;
        view.create_column("entrance_time", Value::Time(None))?;

        let max_age = builder.configuration().get_f64("base_population.max_age")?;
        let initializer = Initializer {
            view: view.clone(),
            age_stream: builder.randomness("population_age"),
            sex_stream: builder.randomness("population_sex"),
            max_age,
        };
        builder.register_listener(
            INITIALIZE_SIMULANTS,
            Listener::new("base_population.initialize", move |event| {
                initializer.on_initialize(event)
            }),
            0,
        )?;

        let living = builder.population_view(&["age", "alive"], Some(Query::new().eq("alive", true)));
        builder.register_listener(
            TIME_STEP,
            Listener::new("base_population.age", move |event| age_simulants(&living, event)),
            DEFAULT_PRIORITY,
        )?;

        let reporting = view;
        builder.modifies_value(METRICS_PIPELINE, "base_population", 5, move |index, running| {
            population_metrics(&reporting, index, running)
        })?;
        Ok(Vec::new())
    }
}

struct Initializer {
    view: PopulationView,
    age_stream: RandomnessStream,
    sex_stream: RandomnessStream,
    max_age: f64,
}

impl Initializer {
    fn on_initialize(&self, event: &Event) -> SimResult<()> {
        let index = &event.index;
        let ages = match event.user_data.get("initial_age").and_then(JsonValue::as_f64) {
            Some(age) => vec![age; index.len()],
            None => self.age_stream.draw(
                index,
                &Distribution::Uniform {
                    low: 0.0,
                    high: self.max_age,
                },
            )?,
        };
        let sexes: Vec<String> = self
            .sex_stream
            .choice(index, &SEXES, None)?
            .into_iter()
            .map(str::to_string)
            .collect();
        let frame = Frame::new(index.clone())
            .with_column("age", ages)?
            .with_column("sex", sexes)?
            .with_column("alive", vec![true; index.len()])?
            .with_column("entrance_time", Column::Time(vec![Some(event.time); index.len()]))?;
        self.view.update(&frame)?;
        debug!(count = index.len(), "initialized base population");
        Ok(())
    }
}

fn age_simulants(view: &PopulationView, event: &Event) -> SimResult<()> {
    let index = view.index()?;
    if index.is_empty() {
        return Ok(());
    }
    let years = duration_days(event.step) / DAYS_PER_YEAR;
    let frame = view.get(&index)?;
    let ages: Vec<f64> = frame.floats("age")?.iter().map(|a| a + years).collect();
    view.update_column("age", frame.index(), ages)
}

#[allow(clippy::cast_precision_loss)]
fn population_metrics(
    view: &PopulationView,
    index: &[SimulantId],
    running: &PipelineValue,
) -> SimResult<PipelineValue> {
    let PipelineValue::Metrics(current) = running else {
        return Err(PipelineError::UnexpectedShape {
            name: METRICS_PIPELINE.to_string(),
            expected: "metrics",
            actual: running.kind_name(),
        }
        .into());
    };
    let frame = view.get(index)?;
    let alive = frame.bools("alive")?;
    let ages = frame.floats("age")?;
    let living_ages: Vec<f64> = ages
        .iter()
        .zip(alive)
        .filter(|(_, a)| **a)
        .map(|(age, _)| *age)
        .collect();
    let mean_age = if living_ages.is_empty() {
        0.0
    } else {
        living_ages.iter().sum::<f64>() / living_ages.len() as f64
    };

    let mut metrics: BTreeMap<String, f64> = current.clone();
    metrics.insert("population_size".to_string(), index.len() as f64);
    metrics.insert("alive".to_string(), living_ages.len() as f64);
    metrics.insert("mean_age".to_string(), mean_age);
    Ok(PipelineValue::Metrics(metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Configuration, Layer};
    use crate::engine::SimulationContext;

    fn context(population_size: u64, initial_age: Option<f64>) -> SimulationContext {
        let config = Configuration::with_defaults();
        let mut overrides = json!({
            "simulation_parameters": {
                "population_size": population_size,
                "year_start": 2000,
                "year_end": 2001,
                "time_step": 30.5
            }
        });
        if let Some(age) = initial_age {
            overrides["simulation_parameters"]["initial_age"] = json!(age);
        }
        config.read_dict(&overrides, Layer::Override, "test").unwrap();
        SimulationContext::new(vec![Arc::new(BasePopulation::new())], config)
    }

    #[test]
    fn test_initial_ages_are_drawn_below_max_age() {
        let mut ctx = context(200, None);
        ctx.setup().unwrap();
        ctx.start().unwrap();

        let population = Arc::clone(ctx.population());
        let frame = population
            .get_view(&COLUMNS, None)
            .get(&population.index().unwrap())
            .unwrap();
        assert_eq!(frame.len(), 200);
        assert!(frame.floats("age").unwrap().iter().all(|a| (0.0..100.0).contains(a)));
        assert!(frame.bools("alive").unwrap().iter().all(|a| *a));
        assert!(frame
            .categories("sex")
            .unwrap()
            .iter()
            .all(|s| s == "Male" || s == "Female"));
        assert!(frame.times("entrance_time").unwrap().iter().all(Option::is_some));
    }

    #[test]
    fn test_initial_age_from_user_data_and_aging() {
        let mut ctx = context(10, Some(20.0));
        let result = ctx.run().unwrap();
        assert_eq!(result.ticks, 12);

        let expected = 20.0 + 12.0 * 30.5 / DAYS_PER_YEAR;
        assert!((result.metrics["mean_age"] - expected).abs() < 1e-9);
        assert!((result.metrics["population_size"] - 10.0).abs() < f64::EPSILON);
        assert!((result.metrics["alive"] - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dead_simulants_do_not_age() {
        let mut ctx = context(4, Some(30.0));
        ctx.setup().unwrap();
        ctx.start().unwrap();

        let population = Arc::clone(ctx.population());
        let view = population.get_view(&["alive"], None);
        view.update_column("alive", &[SimulantId::new(0)], vec![false])
            .unwrap();
        ctx.step().unwrap();

        let frame = population
            .get_view(&["age"], None)
            .get(&population.index().unwrap())
            .unwrap();
        let ages = frame.floats("age").unwrap();
        assert!((ages[0] - 30.0).abs() < f64::EPSILON);
        assert!(ages[1] > 30.0);
    }
}
