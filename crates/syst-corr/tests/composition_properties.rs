use proptest::prelude::*;
use syst_core::{MemoryFrame, Scale};
use syst_corr::{compose, ComposeOptions, WeightGroup};

const SOURCES: [&str; 3] = ["pu", "tauID", "trgSF"];

/// Central value plus an optional up-shift factor per source.
type GroupSpec = (f64, [Option<f64>; 3]);

fn group_strategy() -> impl Strategy<Value = GroupSpec> {
    (
        0.5f64..2.0,
        prop::array::uniform3(prop::option::of(0.8f64..1.2)),
    )
}

fn build(specs: &[GroupSpec]) -> (MemoryFrame, Vec<WeightGroup>) {
    let mut frame = MemoryFrame::new(1);
    let mut groups = Vec::new();
    for (idx, (central, factors)) in specs.iter().enumerate() {
        let stem = format!("sf{idx}");
        frame.insert_scalars(&stem, vec![*central]).unwrap();
        let mut group = WeightGroup::new(stem.clone()).with("Central", Scale::Central, stem.clone());
        for (source, factor) in SOURCES.iter().zip(factors) {
            let Some(factor) = factor else { continue };
            let up = format!("{stem}_{source}Up");
            let down = format!("{stem}_{source}Down");
            frame.insert_scalars(&up, vec![central * factor]).unwrap();
            frame.insert_scalars(&down, vec![central / factor]).unwrap();
            group = group
                .with(*source, Scale::Up, up)
                .with(*source, Scale::Down, down);
        }
        groups.push(group);
    }
    (frame, groups)
}

proptest! {
    #[test]
    fn relative_weights_only_see_their_own_source(
        specs in prop::collection::vec(group_strategy(), 1..5)
    ) {
        let (mut frame, groups) = build(&specs);
        let out = compose(&mut frame, &groups, None, &ComposeOptions::default()).unwrap();

        let central: f64 = specs.iter().map(|(c, _)| c).product();
        prop_assert!((frame.scalar(&out.central, 0).unwrap() - central).abs() < 1e-5 * central);

        for (k, source) in SOURCES.iter().enumerate() {
            let factors: Vec<f64> = specs.iter().filter_map(|(_, f)| f[k]).collect();
            let up = out
                .relative
                .iter()
                .find(|r| r.systematic.as_str() == format!("{source}Up"));
            if factors.is_empty() {
                prop_assert!(up.is_none());
                continue;
            }
            let expected: f64 = factors.iter().product();
            let up = up.unwrap();
            let actual = frame.scalar(&up.branch, 0).unwrap();
            prop_assert!((actual - expected).abs() < 1e-5 * expected, "{} {} vs {}", source, actual, expected);
        }
    }
}
