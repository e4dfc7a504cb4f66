//! Structured error types shared across the syst crates.

use std::collections::BTreeMap;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Stable machine readable error codes.
pub mod codes {
    /// A (source, scale) pair outside the taxonomy.
    pub const INCONSISTENT_VARIATION: &str = "naming.inconsistent_variation";
    /// A systematic name that cannot be split back into (source, scale).
    pub const UNPARSABLE_SYSTEMATIC_NAME: &str = "naming.unparsable_systematic_name";
    /// A scale string other than `Central`, `Up` or `Down`.
    pub const UNPARSABLE_SCALE: &str = "naming.unparsable_scale";
    /// A weight group entry whose scale is not valid for its source.
    pub const UNKNOWN_SCALE_FOR_SOURCE: &str = "naming.unknown_scale_for_source";
    /// An era identifier missing from the era table.
    pub const UNKNOWN_ERA: &str = "config.unknown_era";
    /// Correction entry declaring both `stage` and `stages`.
    pub const AMBIGUOUS_STAGE_DECLARATION: &str = "config.ambiguous_stage_declaration";
    /// Correction entry that is neither a name nor a mapping with `name`.
    pub const INVALID_CORRECTION_ENTRY: &str = "config.invalid_correction_entry";
    /// Missing or malformed global setting.
    pub const INVALID_SETTING: &str = "config.invalid_setting";
    /// Active correction without a registered handler.
    pub const UNKNOWN_CORRECTION: &str = "config.unknown_correction";
    /// Pipeline step invoked out of order.
    pub const LIFECYCLE: &str = "config.lifecycle";
    /// Zero or several analysis processors implementing a hook.
    pub const HOOK_RESOLUTION: &str = "config.hook_resolution";
    /// Normalisation weights requested for collision data.
    pub const DATA_NORMALISATION: &str = "config.data_normalisation";
    /// Provider construction failed.
    pub const PROVIDER_INITIALIZATION: &str = "provider.initialization";
    /// Provider asked for something its configuration does not support.
    pub const UNSUPPORTED_CONFIGURATION: &str = "provider.unsupported_configuration";
    /// Explicit initialization of an already constructed provider.
    pub const ALREADY_INITIALIZED: &str = "provider.already_initialized";
    /// Provider requested before construction.
    pub const NOT_INITIALIZED: &str = "provider.not_initialized";
    /// Same (source, collection) pair registered twice.
    pub const DUPLICATE_VARIATION_REGISTRATION: &str = "variation.duplicate_registration";
    /// Nominal momentum column missing for a non-sparse collection.
    pub const MISSING_NOMINAL_COLUMN: &str = "variation.missing_nominal_column";
    /// Weight group variation without a central anchor.
    pub const MISSING_CENTRAL_FOR_SOURCE: &str = "anchor.missing_central_for_source";
    /// Denominator collaborator did not define its column.
    pub const MISSING_DENOMINATOR: &str = "anchor.missing_denominator";
    /// Column already defined.
    pub const COLUMN_EXISTS: &str = "column.exists";
    /// Column referenced but not defined.
    pub const COLUMN_MISSING: &str = "column.missing";
    /// Redefinition would make a column depend on itself.
    pub const COLUMN_CYCLE: &str = "column.cycle";
    /// Formula evaluated against values of the wrong kind.
    pub const COLUMN_TYPE: &str = "column.type_mismatch";
    /// Division by an exact zero while evaluating a formula.
    pub const DIVISION_BY_ZERO: &str = "column.division_by_zero";
    /// Event index outside the table.
    pub const EVENT_RANGE: &str = "column.event_out_of_range";
}

/// Structured payload attached to every [`SystError`] variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable machine readable error code.
    pub code: String,
    /// Human readable diagnostic message.
    pub message: String,
    /// Contextual key value pairs (source, scale, collection, ...).
    #[serde(default)]
    pub context: BTreeMap<String, String>,
    /// Optional hint that may help the caller resolve the issue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl ErrorInfo {
    /// Creates a new error payload with the provided code and message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
            hint: None,
        }
    }

    /// Adds a context entry to the payload.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets a human readable hint for remediation.
    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Canonical error type for the systematics engine.
///
/// None of these are retried: each one either reports a misconfiguration or
/// an engine invariant violation, and processing of the current dataset stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "family", content = "detail")]
pub enum SystError {
    /// Ambiguous or invalid correction configuration, lifecycle misuse.
    #[error("configuration error: {0}")]
    Configuration(ErrorInfo),
    /// Provider construction or unsupported provider configuration.
    #[error("provider error: {0}")]
    Provider(ErrorInfo),
    /// Variation registry invariant violations.
    #[error("variation registration error: {0}")]
    Variation(ErrorInfo),
    /// Malformed systematic names and inconsistent (source, scale) pairs.
    #[error("naming error: {0}")]
    Naming(ErrorInfo),
    /// Relative weights or denominators without their central anchor.
    #[error("missing anchor error: {0}")]
    Anchor(ErrorInfo),
    /// Column store definition and evaluation failures.
    #[error("column error: {0}")]
    Column(ErrorInfo),
    /// Serialization and schema errors.
    #[error("serde error: {0}")]
    Serde(ErrorInfo),
}

impl Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code: {})", self.message, self.code)?;
        if !self.context.is_empty() {
            write!(f, " | context: [")?;
            for (idx, (key, value)) in self.context.iter().enumerate() {
                if idx > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{key}={value}")?;
            }
            write!(f, "]")?;
        }
        if let Some(hint) = &self.hint {
            write!(f, " | hint: {hint}")?;
        }
        Ok(())
    }
}

impl SystError {
    /// Returns a reference to the payload describing the error.
    pub fn info(&self) -> &ErrorInfo {
        match self {
            SystError::Configuration(info)
            | SystError::Provider(info)
            | SystError::Variation(info)
            | SystError::Naming(info)
            | SystError::Anchor(info)
            | SystError::Column(info)
            | SystError::Serde(info) => info,
        }
    }

    /// Shorthand for the stable error code.
    pub fn code(&self) -> &str {
        &self.info().code
    }
}
