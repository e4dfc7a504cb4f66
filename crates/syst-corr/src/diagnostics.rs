use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Correction re-declared by a lower-precedence layer.
pub const DUPLICATE_DECLARATION: &str = "selector.duplicate_declaration";
/// `btag` synthesized from the global `btag` block.
pub const BTAG_SYNTHESIZED: &str = "selector.btag_synthesized";
/// Sparse collection without a nominal momentum column.
pub const SPARSE_COLLECTION_SKIPPED: &str = "variation.sparse_collection_skipped";
/// Provider requested again with different settings.
pub const SETTINGS_IGNORED: &str = "provider.settings_ignored";
/// MC-only kinematic correction skipped for collision data.
pub const MC_ONLY_SKIPPED: &str = "handler.mc_only_skipped";

/// Non-fatal condition reported alongside a successful result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Stable machine readable code.
    pub code: String,
    /// Human readable description.
    pub message: String,
    /// Key/value details, e.g. the correction or layer involved.
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl Diagnostic {
    /// Diagnostic without context.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            context: BTreeMap::new(),
        }
    }

    /// Adds one context entry.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}
