//! Correction selection across configuration layers.
//!
//! Layers are visited dataset → process → global. The first layer to declare
//! a correction claims it; later declarations are dropped with a diagnostic
//! naming the layer they came from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use syst_core::errors::{codes, ErrorInfo, SystError};
use tracing::{debug, info, warn};

use crate::config::{Layer, LayeredConfig};
use crate::diagnostics::{self, Diagnostic};

/// Name of the correction synthesized from the global `btag` block.
pub const BTAG: &str = "btag";

/// Stages a correction applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "stages")]
pub enum StageSet {
    /// No `stage`/`stages` key: every stage.
    All,
    /// Only the listed stages.
    Only(Vec<String>),
}

impl StageSet {
    /// Whether `stage` is covered.
    pub fn contains(&self, stage: &str) -> bool {
        match self {
            StageSet::All => true,
            StageSet::Only(stages) => stages.iter().any(|s| s == stage),
        }
    }
}

/// A claimed correction declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    /// Correction name.
    pub name: String,
    /// Stages the correction applies to.
    pub stages: StageSet,
    /// Parameters without the stage keys.
    pub params: Map<String, Value>,
    /// Layer that claimed the correction.
    pub origin: Layer,
    /// Whether the entry was synthesized rather than declared.
    #[serde(default)]
    pub synthesized: bool,
}

impl CorrectionEntry {
    fn from_declaration(
        name: String,
        mut params: Map<String, Value>,
        origin: Layer,
    ) -> Result<Self, SystError> {
        let single = params.remove("stage");
        let multi = params.remove("stages");
        let stages = match (single, multi) {
            (Some(_), Some(_)) => {
                return Err(SystError::Configuration(
                    ErrorInfo::new(
                        codes::AMBIGUOUS_STAGE_DECLARATION,
                        "correction declares both `stage` and `stages`",
                    )
                    .with_context("correction", name)
                    .with_context("layer", origin.as_str()),
                ))
            }
            (Some(stage), None) => StageSet::Only(vec![stage_name(&name, &stage)?]),
            (None, Some(Value::Array(items))) => StageSet::Only(
                items
                    .iter()
                    .map(|item| stage_name(&name, item))
                    .collect::<Result<_, _>>()?,
            ),
            (None, Some(other)) => StageSet::Only(vec![stage_name(&name, &other)?]),
            (None, None) => StageSet::All,
        };
        Ok(Self {
            name,
            stages,
            params,
            origin,
            synthesized: false,
        })
    }

    /// Whether the entry is active at `stage`.
    pub fn applies_to(&self, stage: &str) -> bool {
        self.stages.contains(stage)
    }
}

fn stage_name(correction: &str, value: &Value) -> Result<String, SystError> {
    value.as_str().map(str::to_string).ok_or_else(|| {
        SystError::Configuration(
            ErrorInfo::new(codes::INVALID_CORRECTION_ENTRY, "stage must be a string")
                .with_context("correction", correction)
                .with_context("stage", value.to_string()),
        )
    })
}

/// Outcome of selecting corrections for one stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Stage the selection was made for.
    pub stage: String,
    /// Active corrections in claim order.
    pub active: Vec<CorrectionEntry>,
    /// Non-fatal findings, e.g. discarded re-declarations.
    pub diagnostics: Vec<Diagnostic>,
}

impl Resolution {
    /// Whether `name` is active.
    pub fn is_active(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Active entry named `name`.
    pub fn get(&self, name: &str) -> Option<&CorrectionEntry> {
        self.active.iter().find(|entry| entry.name == name)
    }

    /// Active names in claim order.
    pub fn names(&self) -> Vec<&str> {
        self.active.iter().map(|entry| entry.name.as_str()).collect()
    }
}

/// Resolves the corrections active at `stage`.
pub fn resolve(config: &LayeredConfig, stage: &str) -> Result<Resolution, SystError> {
    let mut claimed: Vec<CorrectionEntry> = Vec::new();
    let mut origins: BTreeMap<String, Layer> = BTreeMap::new();
    let mut diagnostics = Vec::new();

    for layer in Layer::PRECEDENCE {
        for (name, params) in config.layer(layer).declarations()? {
            let entry = CorrectionEntry::from_declaration(name, params, layer)?;
            if let Some(owner) = origins.get(&entry.name) {
                warn!(
                    correction = %entry.name,
                    claimed_by = %owner,
                    discarded = %layer,
                    "correction already defined, skipping later definition"
                );
                diagnostics.push(
                    Diagnostic::new(
                        diagnostics::DUPLICATE_DECLARATION,
                        format!(
                            "correction {} is already defined in {owner}. Skipping definition from {layer}",
                            entry.name
                        ),
                    )
                    .with_context("correction", entry.name.clone())
                    .with_context("claimed_by", owner.as_str())
                    .with_context("discarded", layer.as_str()),
                );
                continue;
            }
            origins.insert(entry.name.clone(), layer);
            claimed.push(entry);
        }
    }

    let mut active: Vec<CorrectionEntry> = claimed
        .into_iter()
        .filter(|entry| entry.applies_to(stage))
        .collect();

    if !origins.contains_key(BTAG) {
        if let Some(btag) = config.btag()? {
            if btag.synthesizes_at(stage) {
                debug!(stage, mode = %btag.mode, "synthesizing btag correction from global block");
                let mut params = btag.params.clone();
                params.insert("mode".to_string(), Value::from(btag.mode.clone()));
                active.push(CorrectionEntry {
                    name: BTAG.to_string(),
                    stages: StageSet::All,
                    params,
                    origin: Layer::Global,
                    synthesized: true,
                });
                diagnostics.push(
                    Diagnostic::new(
                        diagnostics::BTAG_SYNTHESIZED,
                        "btag synthesized from global configuration",
                    )
                    .with_context("mode", btag.mode.clone())
                    .with_context("stage", stage),
                );
            }
        }
    }

    if !active.is_empty() {
        let names: Vec<&str> = active.iter().map(|entry| entry.name.as_str()).collect();
        info!(stage, corrections = %names.join(", "), "corrections to apply");
    }

    Ok(Resolution {
        stage: stage.to_string(),
        active,
        diagnostics,
    })
}
