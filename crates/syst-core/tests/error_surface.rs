use syst_core::errors::{codes, ErrorInfo, SystError};

fn sample_info(code: &str, message: &str) -> ErrorInfo {
    ErrorInfo::new(code, message)
        .with_context("source", "pu")
        .with_context("scale", "Up")
}

#[test]
fn naming_error_surface() {
    let err = SystError::Naming(sample_info(codes::INCONSISTENT_VARIATION, "bad pair"));
    assert_eq!(err.code(), codes::INCONSISTENT_VARIATION);
    assert!(err.info().context.contains_key("source"));
    assert!(err.to_string().starts_with("naming error: bad pair"));
}

#[test]
fn variation_error_surface() {
    let err = SystError::Variation(sample_info(
        codes::DUPLICATE_VARIATION_REGISTRATION,
        "duplicate",
    ));
    assert_eq!(err.info().code, "variation.duplicate_registration");
}

#[test]
fn anchor_error_surface_carries_hint() {
    let err = SystError::Anchor(
        sample_info(codes::MISSING_CENTRAL_FOR_SOURCE, "no anchor").with_hint("add Central"),
    );
    let rendered = err.to_string();
    assert!(rendered.contains("scale=Up"));
    assert!(rendered.contains("hint: add Central"));
}

#[test]
fn errors_serialize_with_family_tag() {
    let err = SystError::Provider(ErrorInfo::new(codes::ALREADY_INITIALIZED, "twice"));
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["family"], "Provider");
    assert_eq!(json["detail"]["code"], codes::ALREADY_INITIALIZED);
    let back: SystError = serde_json::from_value(json).unwrap();
    assert_eq!(back, err);
}
