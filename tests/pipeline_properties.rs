use microsim::time::Clock;
use microsim::{Combiner, PipelineValue, PostProcessor, SimulantId, ValuesManager};
use proptest::prelude::*;

/// Evaluates a joint pipeline whose source and mutators contribute `risks`
/// in the given order.
fn joint_risk(risks: &[f64]) -> f64 {
    joint_risk_with(risks, Some(PostProcessor::Joint))
}

fn joint_risk_with(risks: &[f64], post_processor: Option<PostProcessor>) -> f64 {
    let values = ValuesManager::new(Clock::default());
    let first = risks[0];
    values
        .declare_pipeline_with(
            "incidence",
            move |_| Ok(PipelineValue::Scalar(first)),
            Combiner::Joint,
            post_processor,
        )
        .unwrap();
    for (i, &risk) in risks[1..].iter().enumerate() {
        values
            .mutator("incidence", &format!("risk_{i}"), 5, move |_, _| {
                Ok(PipelineValue::Scalar(risk))
            })
            .unwrap();
    }
    match values
        .get_value("incidence")
        .unwrap()
        .call(&[SimulantId::new(0)])
        .unwrap()
    {
        PipelineValue::Scalar(x) => x,
        other => panic!("expected a scalar, got {other:?}"),
    }
}

proptest! {
    #[test]
    fn property_joint_is_one_minus_product_of_complements(
        risks in prop::collection::vec(0.0f64..=1.0, 1..8)
    ) {
        let expected = 1.0 - risks.iter().map(|p| 1.0 - p).product::<f64>();
        prop_assert!((joint_risk(&risks) - expected).abs() < 1e-12);
    }

    #[test]
    fn property_joint_ignores_contribution_order(
        risks in prop::collection::vec(0.0f64..=1.0, 1..8),
        rotation in 0usize..8,
    ) {
        let mut reordered = risks.clone();
        reordered.reverse();
        let shift = rotation % reordered.len();
        reordered.rotate_left(shift);
        prop_assert!((joint_risk(&risks) - joint_risk(&reordered)).abs() < 1e-12);
    }

    #[test]
    fn property_joint_combiner_defaults_to_union(
        risks in prop::collection::vec(0.0f64..=1.0, 1..8)
    ) {
        prop_assert!((joint_risk_with(&risks, None) - joint_risk(&risks)).abs() < 1e-12);
    }

    #[test]
    fn property_accumulate_sums_in_any_order(
        parts in prop::collection::vec(-100.0f64..100.0, 1..8)
    ) {
        let total = |parts: &[f64]| {
            let values = ValuesManager::new(Clock::default());
            let first = parts[0];
            values
                .declare_pipeline_with(
                    "cost",
                    move |_| Ok(PipelineValue::Scalar(first)),
                    Combiner::Accumulate,
                    None,
                )
                .unwrap();
            for &part in &parts[1..] {
                values
                    .mutator("cost", "part", 5, move |_, _| Ok(PipelineValue::Scalar(part)))
                    .unwrap();
            }
            match values.get_value("cost").unwrap().call(&[SimulantId::new(0)]).unwrap() {
                PipelineValue::Scalar(x) => x,
                other => panic!("expected a scalar, got {other:?}"),
            }
        };
        let mut reversed = parts.clone();
        reversed.reverse();
        let expected: f64 = parts.iter().sum();
        prop_assert!((total(&parts) - expected).abs() < 1e-9);
        prop_assert!((total(&reversed) - expected).abs() < 1e-9);
    }
}
