//! Interpolated lookups against a running simulation.

use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};

use microsim::components::BasePopulation;
use microsim::config::Configuration;
use microsim::lookup::{LookupData, TableOptions};
use microsim::time::fractional_year;
use microsim::{SimulantId, SimulationContext};

const SEXES: [&str; 2] = ["Male", "Female"];

/// One row per (age, sex, year) with `value = f(age, sex, year)`.
fn build_table(f: impl Fn(f64, &str, f64) -> f64, year_start: i32, year_end: i32) -> LookupData {
    let mut ages = Vec::new();
    let mut sexes = Vec::new();
    let mut years = Vec::new();
    let mut values = Vec::new();
    for age in 0..=120 {
        for sex in SEXES {
            for year in year_start..=year_end {
                let (age, year) = (f64::from(age), f64::from(year));
                ages.push(age);
                sexes.push(sex.to_string());
                years.push(year);
                values.push(f(age, sex, year));
            }
        }
    }
    LookupData::new()
        .with_column("age", ages)
        .unwrap()
        .with_column("sex", sexes)
        .unwrap()
        .with_column("year", years)
        .unwrap()
        .with_column("value", values)
        .unwrap()
}

fn started_simulation() -> SimulationContext {
    let configuration = Configuration::with_defaults();
    configuration
        .set(
            "simulation_parameters.population_size",
            serde_json::json!(1000),
            microsim::Layer::Override,
            "test",
        )
        .unwrap();
    let mut ctx = SimulationContext::new(vec![Arc::new(BasePopulation::new())], configuration);
    ctx.setup().unwrap();
    ctx.start().unwrap();
    ctx
}

fn ages(ctx: &SimulationContext, index: &[SimulantId]) -> Vec<f64> {
    ctx.population()
        .get_view(&["age"], None)
        .get(index)
        .unwrap()
        .floats("age")
        .unwrap()
        .to_vec()
}

fn assert_all_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-8, "{a} != {e}");
    }
}

#[test]
fn test_interpolated_tables_follow_clock_and_population() {
    let ctx = started_simulation();
    let lookups = ctx.lookups();
    let years = lookups
        .build_table(&build_table(|_, _, year| year, 1990, 2010), TableOptions::new())
        .unwrap();
    let by_age = build_table(|age, _, _| age, 1990, 2010);
    let ages_table = lookups.build_table(&by_age, TableOptions::new()).unwrap();
    let one_d_age = lookups
        .build_table(
            &by_age.clone().without_column("year").drop_duplicates(),
            TableOptions::new().parameter_columns(["age"]),
        )
        .unwrap();
    assert_eq!(years.key_columns(), ["sex".to_string()]);
    assert_eq!(one_d_age.parameter_columns(), ["age".to_string()]);

    let index = ctx.population().index().unwrap();
    let check = |ctx: &SimulationContext| {
        let now = fractional_year(ctx.clock().now());
        assert_all_close(&years.call(&index).unwrap(), &vec![now; index.len()]);
        let expected_ages = ages(ctx, &index);
        assert_all_close(&ages_table.call(&index).unwrap(), &expected_ages);
        assert_all_close(&one_d_age.call(&index).unwrap(), &expected_ages);
    };
    check(&ctx);

    // 125 steps of 30.5 days.
    ctx.clock().set_time(ctx.clock().now() + Duration::hours(91_500));
    let aged: Vec<f64> = ages(&ctx, &index).iter().map(|a| a + 125.0 / 12.0).collect();
    ctx.population()
        .get_view(&["age"], None)
        .update_column("age", &index, aged)
        .unwrap();
    check(&ctx);
}

#[test]
fn test_tables_without_key_columns() {
    let ctx = started_simulation();
    let data = build_table(|_, _, year| year, 1990, 2010)
        .without_column("sex")
        .drop_duplicates();
    let years = ctx
        .lookups()
        .build_table(
            &data,
            TableOptions::new()
                .key_columns(std::iter::empty::<&str>())
                .parameter_columns(["year", "age"]),
        )
        .unwrap();
    assert!(years.key_columns().is_empty());

    let index = ctx.population().index().unwrap();
    for _ in 0..2 {
        let now = fractional_year(ctx.clock().now());
        assert_all_close(&years.call(&index).unwrap(), &vec![now; index.len()]);
        ctx.clock().set_time(ctx.clock().now() + Duration::hours(91_500));
    }
}

#[test]
fn test_exact_values_at_input_points() {
    let ctx = started_simulation();
    let years = ctx
        .lookups()
        .build_table(&build_table(|_, _, year| year, 1990, 2010), TableOptions::new())
        .unwrap();
    let index = ctx.population().index().unwrap();

    for year in 1990..2010 {
        ctx.clock()
            .set_time(Utc.with_ymd_and_hms(year, 1, 1, 0, 0, 0).unwrap());
        let expected = f64::from(year) + 1.0 / 365.25;
        assert_all_close(&years.call(&index).unwrap(), &vec![expected; index.len()]);
    }

    // Past the last input year the table clamps.
    ctx.clock()
        .set_time(Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap());
    assert_all_close(&years.call(&index).unwrap(), &vec![2010.0; index.len()]);
}

#[test]
fn test_miss_for_unmatched_key() {
    let ctx = started_simulation();
    let males_only = LookupData::new()
        .with_column("sex", vec!["Male", "Male"])
        .unwrap()
        .with_column("age", vec![0.0, 120.0])
        .unwrap()
        .with_column("value", vec![1.0, 2.0])
        .unwrap();
    let table = ctx
        .lookups()
        .build_table(&males_only, TableOptions::new())
        .unwrap();
    let index = ctx.population().index().unwrap();
    let err = table.call(&index).unwrap_err();
    assert!(err.is_lookup_miss());
}
