use std::path::PathBuf;
use std::process::Command;

use serde_json::Value;

fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("..")
        .join(relative)
}

fn syst(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_syst"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("run syst")
}

#[test]
fn resolve_prints_canonical_json() {
    let global = fixture_path("configs/global.yaml");
    let dataset = fixture_path("configs/datasets/DYJetsToLL.yaml");
    let output = syst(&[
        "resolve",
        "--global",
        global.to_str().expect("utf8 path"),
        "--dataset",
        dataset.to_str().expect("utf8 path"),
        "--stage",
        "anaTuple",
    ]);
    assert!(output.status.success(), "resolve failed: {output:?}");
    let value: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["era"], "Run2_2018");
    assert_eq!(value["campaign"], "2018_UL");
    assert_eq!(value["stage"], "anaTuple");
    let names: Vec<&str> = value["active"]
        .as_array()
        .expect("active list")
        .iter()
        .filter_map(|entry| entry["name"].as_str())
        .collect();
    assert_eq!(names[0], "pu");
    assert!(names.contains(&"btag"));
    assert_eq!(value["diagnostics"][0]["context"]["discarded"], "global");
}

#[test]
fn name_and_split_agree() {
    let output = syst(&["name", "JES_Total", "Up"]);
    assert!(output.status.success());
    assert_eq!(String::from_utf8(output.stdout).expect("utf8").trim(), "JES_TotalUp");

    let output = syst(&["split", "JES_TotalUp"]);
    assert!(output.status.success());
    let value: Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(value["source"], "JES_Total");
    assert_eq!(value["scale"], "Up");
}

#[test]
fn inconsistent_pairs_fail() {
    assert!(!syst(&["name", "Central", "Up"]).status.success());
    assert!(!syst(&["name", "pu", "Central"]).status.success());
    assert!(!syst(&["split", "Up"]).status.success());
}
