use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use serde_json::json;

use microsim::components::BasePopulation;
use microsim::config::{Configuration, Layer};
use microsim::engine::{from_fn, setup_simulation, Component, TIME_STEP};
use microsim::lookup::{LookupData, TableOptions};
use microsim::population::Query;
use microsim::randomness::Distribution;
use microsim::{Listener, SimulationContext};

const POPULATION: u64 = 10_000;

fn configuration() -> Configuration {
    let configuration = Configuration::with_defaults();
    configuration
        .read_dict(
            &json!({"simulation_parameters": {
                "population_size": POPULATION,
                "year_start": 2000,
                "year_end": 2001,
            }}),
            Layer::Override,
            "bench",
        )
        .unwrap();
    configuration
}

/// A mortality-like component: a yearly hazard looked up by age, turned
/// into deaths with a randomness stream.
fn mortality() -> Arc<dyn Component> {
    from_fn("mortality", |builder| {
        let ages: Vec<f64> = (0..=120).map(f64::from).collect();
        let hazard: Vec<f64> = ages.iter().map(|a| 0.0005 * (a / 10.0).exp()).collect();
        let table = builder.lookup(
            &LookupData::new()
                .with_column("age", ages)?
                .with_column("mortality_rate", hazard)?,
            TableOptions::new(),
        )?;
        builder.declare_pipeline("mortality_rate", move |index| Ok(table.call(index)?.into()))?;
        let rate = builder.rate("mortality_rate")?;
        let stream = builder.randomness("mortality");
        let view = builder.population_view(&["alive"], Some(Query::new().eq("alive", true)));
        builder.register_listener(
            TIME_STEP,
            Listener::new("mortality.die", move |_| {
                let index = view.index()?;
                let deaths = stream.filter_for_rate(&index, &rate.series(&index)?)?;
                view.update_column("alive", &deaths, vec![false; deaths.len()])
            }),
            5,
        )?;
        Ok(Vec::new())
    })
}

fn started() -> SimulationContext {
    let mut ctx = setup_simulation(
        vec![Arc::new(BasePopulation::new()), mortality()],
        configuration(),
    )
    .unwrap();
    ctx.start().unwrap();
    ctx
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("kernel/tick");
    group.throughput(Throughput::Elements(POPULATION));
    group.bench_function("base_population_and_mortality", |b| {
        b.iter_batched(started, |mut ctx| ctx.step().unwrap(), BatchSize::LargeInput);
    });
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let ctx = started();
    let mut years = Vec::new();
    let mut ages = Vec::new();
    let mut values = Vec::new();
    for age in 0..=120 {
        for year in 1990..=2020 {
            ages.push(f64::from(age));
            years.push(f64::from(year));
            values.push(f64::from(age) * 0.01 + f64::from(year - 1990));
        }
    }
    let data = LookupData::new()
        .with_column("age", ages)
        .unwrap()
        .with_column("year", years)
        .unwrap()
        .with_column("value", values)
        .unwrap();
    let table = ctx.lookups().build_table(&data, TableOptions::new()).unwrap();
    let index = ctx.population().index().unwrap();

    let mut group = c.benchmark_group("kernel/lookup");
    group.throughput(Throughput::Elements(POPULATION));
    group.bench_function("age_year_bilinear", |b| b.iter(|| table.call(&index).unwrap()));
    group.finish();
}

fn bench_randomness(c: &mut Criterion) {
    let ctx = started();
    let index = ctx.population().index().unwrap();
    let stream = microsim::RandomnessStream::new("bench", ctx.clock().clone(), 0);
    let normal = Distribution::Normal {
        mean: 25.0,
        std_dev: 4.0,
    };

    let mut group = c.benchmark_group("kernel/randomness");
    group.throughput(Throughput::Elements(POPULATION));
    group.bench_function("get_draw", |b| b.iter(|| stream.get_draw(&index)));
    group.bench_function("normal", |b| b.iter(|| stream.draw(&index, &normal).unwrap()));
    group.finish();
}

criterion_group!(kernel, bench_tick, bench_lookup, bench_randomness);
criterion_main!(kernel);
