use syst_core::{codes, ColumnStore, MemoryFrame, Scale, Source, SystError, SystName};
use syst_corr::{
    compose, denominator_column, AnaCaches, ComposeOptions, DenominatorHook, FixedNormalisation,
    Normalisation, WeightGroup,
};

fn pu_group() -> WeightGroup {
    WeightGroup::new("pileup")
        .with("Central", Scale::Central, "w_pu_c")
        .with("pu", Scale::Up, "w_pu_u")
        .with("pu", Scale::Down, "w_pu_d")
}

fn frame() -> MemoryFrame {
    MemoryFrame::new(2)
        .with_scalars("genWeightD", vec![1.0, -1.0])
        .and_then(|f| f.with_scalars("crossSection", vec![2.0, 2.0]))
        .and_then(|f| f.with_scalars("w_pu_c", vec![0.9, 0.5]))
        .and_then(|f| f.with_scalars("w_pu_u", vec![0.95, 0.6]))
        .and_then(|f| f.with_scalars("w_pu_d", vec![0.85, 0.4]))
        .expect("frame")
}

fn close(actual: f64, expected: f64) {
    assert!(
        (actual - expected).abs() < 1e-4,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn normalised_composite_and_relative_weights() {
    let mut frame = frame();
    let hook = FixedNormalisation::new("norm", 2.0, 1.0);
    let caches = AnaCaches::new();
    let norm = Normalisation {
        luminosity: 10.0,
        factors: vec!["genWeightD".into(), "crossSection".into()],
        denominator: &hook,
        caches: &caches,
    };
    let out = compose(&mut frame, &[pu_group()], Some(&norm), &ComposeOptions::default())
        .expect("compose");

    assert_eq!(out.central, "weight_MC_Lumi_Central");
    assert_eq!(out.central_composite, "weight_MC_Lumi_Central_double");
    assert_eq!(
        out.branches(),
        vec![
            "weight_MC_Lumi_Central",
            "weight_MC_Lumi_puUp_rel",
            "weight_MC_Lumi_puDown_rel",
        ]
    );
    close(frame.scalar("weight_MC_Lumi_Central_double", 0).unwrap(), 18.0);
    close(frame.scalar("weight_MC_Lumi_Central", 0).unwrap(), 18.0);
    close(frame.scalar("weight_MC_Lumi_puUp_rel", 0).unwrap(), 0.95 / 0.9);
    close(frame.scalar("weight_MC_Lumi_puDown_rel", 0).unwrap(), 0.85 / 0.9);
    close(frame.scalar("weight_MC_Lumi_Central", 1).unwrap(), -10.0);
    close(frame.scalar("weight_MC_Lumi_puUp_rel", 1).unwrap(), 1.2);
    assert!(frame
        .formula("weight_MC_Lumi_puUp_rel")
        .expect("defined")
        .is_narrowed());
}

#[test]
fn sources_without_dedicated_denominator_reuse_central() {
    let mut frame = frame();
    let up = SystName::parse("puUp").unwrap();
    let hook = FixedNormalisation::new("norm", 2.0, 4.0).with_denominator(&up, 5.0);
    let caches = AnaCaches::new();
    let norm = Normalisation {
        luminosity: 1.0,
        factors: vec![],
        denominator: &hook,
        caches: &caches,
    };
    let groups = vec![
        pu_group(),
        WeightGroup::new("tau")
            .with("Central", Scale::Central, "w_pu_c")
            .with("tauID", Scale::Up, "w_pu_u"),
    ];
    let out = compose(&mut frame, &groups, Some(&norm), &ComposeOptions::default())
        .expect("compose");
    assert_eq!(
        out.denominators,
        vec![
            "__denom_Central",
            "__denom_puUp",
            "__denom_puDown",
            "__denom_tauIDUp",
        ]
    );
    assert_eq!(frame.scalar("__denom_puUp", 0).unwrap(), 5.0);
    // puDown falls back to Central inside the hook, tauID gets an alias.
    assert_eq!(frame.scalar("__denom_puDown", 0).unwrap(), 4.0);
    let tau = denominator_column(&SystName::parse("tauIDUp").unwrap());
    assert!(frame
        .formula(&tau)
        .expect("defined")
        .is_alias_of("__denom_Central"));
}

#[test]
fn unvaried_groups_contribute_their_central_branches() {
    let mut frame = frame();
    let groups = vec![
        pu_group(),
        WeightGroup::new("tau")
            .with("Central", Scale::Central, "crossSection")
            .with("tauID", Scale::Down, "genWeightD"),
    ];
    let options = ComposeOptions {
        prefix: "weight_sf".into(),
        return_variations: true,
    };
    let out = compose(&mut frame, &groups, None, &options).expect("compose");
    assert!(out.denominators.is_empty());
    close(frame.scalar("weight_sf_Central", 0).unwrap(), 1.8);
    // tauID varies only its own branch; pileup stays central.
    close(frame.scalar("weight_sf_tauIDDown_double", 0).unwrap(), 0.9);
    close(frame.scalar("weight_sf_tauIDDown_rel", 0).unwrap(), 0.5);
    // pu varies only the pileup branch; tau stays central.
    close(frame.scalar("weight_sf_puUp_double", 0).unwrap(), 1.9);
    assert_eq!(
        out.central_counterpart("weight_sf_tauIDDown_rel").unwrap(),
        "weight_sf_Central"
    );
}

#[test]
fn central_only_when_variations_disabled() {
    let mut frame = frame();
    let options = ComposeOptions {
        return_variations: false,
        ..ComposeOptions::default()
    };
    let out = compose(&mut frame, &[pu_group()], None, &options).expect("compose");
    assert_eq!(out.branches(), vec!["weight_MC_Lumi_Central"]);
    assert!(!frame.has_column("weight_MC_Lumi_puUp_rel"));
}

#[test]
fn branch_names_are_stable_across_runs() {
    let run = || {
        let mut frame = frame();
        let out = compose(&mut frame, &[pu_group()], None, &ComposeOptions::default())
            .expect("compose");
        (out.schema_hash().expect("hash"), frame.column_names())
    };
    assert_eq!(run(), run());
}

#[test]
fn zero_central_weight_is_reported_on_evaluation() {
    let mut frame = MemoryFrame::new(1)
        .with_scalars("w_pu_c", vec![0.0])
        .and_then(|f| f.with_scalars("w_pu_u", vec![1.0]))
        .and_then(|f| f.with_scalars("w_pu_d", vec![1.0]))
        .expect("frame");
    compose(&mut frame, &[pu_group()], None, &ComposeOptions::default()).expect("compose");
    let err = frame.scalar("weight_MC_Lumi_puUp_rel", 0).unwrap_err();
    assert_eq!(err.code(), codes::DIVISION_BY_ZERO);
}

#[test]
fn invalid_groups_are_rejected() {
    let mut frame = frame();
    let missing_central = WeightGroup::new("pu").with("pu", Scale::Up, "w_pu_u");
    let err = compose(&mut frame, &[missing_central], None, &ComposeOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), codes::MISSING_CENTRAL_FOR_SOURCE);

    let bad_scale = WeightGroup::new("pu")
        .with("Central", Scale::Central, "w_pu_c")
        .with("pu", Scale::Central, "w_pu_u");
    let err = compose(&mut frame, &[bad_scale], None, &ComposeOptions::default()).unwrap_err();
    assert_eq!(err.code(), codes::UNKNOWN_SCALE_FOR_SOURCE);
    assert!(frame.column_names().iter().all(|c| !c.starts_with("weight_")));
}

struct SilentHook;

impl DenominatorHook for SilentHook {
    fn define_denominator(
        &self,
        _store: &mut dyn ColumnStore,
        _column: &str,
        _source: &Source,
        _scale: Scale,
        _caches: &AnaCaches,
    ) -> Result<(), SystError> {
        Ok(())
    }
}

#[test]
fn hook_must_define_its_column() {
    let mut frame = frame();
    let caches = AnaCaches::new();
    let norm = Normalisation {
        luminosity: 1.0,
        factors: vec![],
        denominator: &SilentHook,
        caches: &caches,
    };
    let err = compose(&mut frame, &[pu_group()], Some(&norm), &ComposeOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), codes::MISSING_DENOMINATOR);
    assert!(matches!(err, SystError::Anchor(_)));
}
