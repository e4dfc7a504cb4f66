use std::sync::Arc;

use syst_core::{codes, ColumnStore, Formula, MemoryFrame, SystError, Value, P4};

fn frame() -> MemoryFrame {
    MemoryFrame::new(2)
        .with_scalars("a", vec![2.0, 3.0])
        .unwrap()
        .with_scalars("b", vec![4.0, 0.0])
        .unwrap()
        .with_momenta(
            "Muon_p4_nano",
            vec![vec![P4::new(30.0, 0.1, 0.2, 0.105)], vec![]],
        )
        .unwrap()
}

#[test]
fn defined_columns_evaluate_lazily() {
    let mut frame = frame();
    frame.define("ab", Formula::product(["a", "b"])).unwrap();
    frame.define("ab_f", Formula::narrow("ab")).unwrap();
    assert_eq!(frame.scalar("ab", 0).unwrap(), 8.0);
    assert_eq!(frame.evaluate("ab_f", 0).unwrap(), Value::Narrow(8.0));
    assert_eq!(
        frame.column_names(),
        vec!["a", "b", "Muon_p4_nano", "ab", "ab_f"]
    );
}

#[test]
fn define_rejects_unknown_inputs_and_duplicates() {
    let mut frame = frame();
    let err = frame.define("x", Formula::alias("missing")).unwrap_err();
    assert_eq!(err.code(), codes::COLUMN_MISSING);
    let err = frame.define("a", Formula::constant(1.0)).unwrap_err();
    assert_eq!(err.code(), codes::COLUMN_EXISTS);
}

#[test]
fn redefine_rejects_cycles() {
    let mut frame = frame();
    frame.define("x", Formula::alias("a")).unwrap();
    frame.define("y", Formula::alias("x")).unwrap();
    let err = frame.redefine("x", Formula::alias("y")).unwrap_err();
    assert_eq!(err.code(), codes::COLUMN_CYCLE);
    frame.redefine("x", Formula::constant(5.0)).unwrap();
    assert_eq!(frame.scalar("y", 1).unwrap(), 5.0);
}

#[test]
fn division_by_zero_surfaces_at_evaluation() {
    let mut frame = frame();
    frame.define("ratio", Formula::ratio(["a"], ["b"])).unwrap();
    assert_eq!(frame.scalar("ratio", 0).unwrap(), 0.5);
    let err = frame.scalar("ratio", 1).unwrap_err();
    assert_eq!(err.code(), codes::DIVISION_BY_ZERO);
}

#[test]
fn map_formula_reads_momenta() {
    let mut frame = frame();
    frame
        .define(
            "n_muons",
            Formula::map(
                "count",
                ["Muon_p4_nano"],
                Arc::new(|values: &[Value]| -> Result<Value, SystError> {
                    Ok(Value::Scalar(values[0].as_momenta()?.len() as f64))
                }),
            ),
        )
        .unwrap();
    assert_eq!(frame.scalar("n_muons", 0).unwrap(), 1.0);
    assert_eq!(frame.scalar("n_muons", 1).unwrap(), 0.0);
    let err = frame.scalar("n_muons", 2).unwrap_err();
    assert_eq!(err.code(), codes::EVENT_RANGE);
}
