//! Layered configuration: global, process and dataset YAML documents.

use std::fmt::{self, Display};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use syst_core::errors::{codes, ErrorInfo, SystError};
use syst_core::serde::from_yaml_slice;
use syst_core::Era;

/// MET flavour used when the global layer does not name one.
pub const DEFAULT_MET_TYPE: &str = "PuppiMET";

/// Configuration layer, in the order the selector visits them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Dataset-specific document.
    Dataset,
    /// Process-wide document.
    Process,
    /// Analysis-wide document.
    Global,
}

impl Layer {
    /// Visiting order used for precedence: most specific first.
    pub const PRECEDENCE: [Layer; 3] = [Layer::Dataset, Layer::Process, Layer::Global];

    /// Lowercase layer name used in diagnostics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Dataset => "dataset",
            Layer::Process => "process",
            Layer::Global => "global",
        }
    }
}

impl Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One item of a `corrections` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrectionItem {
    /// Bare correction name.
    Name(String),
    /// Mapping with a `name` key plus parameters.
    Entry(Map<String, Value>),
}

/// The `corrections` key of a layer.
///
/// The mapping form (name → parameters) visits names in key order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CorrectionsDecl {
    /// Sequence of names or single-entry mappings.
    List(Vec<CorrectionItem>),
    /// Mapping from correction name to its parameters.
    Map(Map<String, Value>),
}

/// A raw declaration: correction name and its parameter bag.
pub type RawDeclaration = (String, Map<String, Value>);

impl CorrectionsDecl {
    /// Flattens the declaration into (name, parameters) pairs in declaration order.
    pub fn declarations(&self) -> Result<Vec<RawDeclaration>, SystError> {
        match self {
            CorrectionsDecl::List(items) => items
                .iter()
                .map(|item| match item {
                    CorrectionItem::Name(name) => Ok((name.clone(), Map::new())),
                    CorrectionItem::Entry(entry) => {
                        let name = entry
                            .get("name")
                            .and_then(Value::as_str)
                            .ok_or_else(|| invalid_entry(&Value::Object(entry.clone())))?;
                        let params = entry
                            .iter()
                            .filter(|(key, _)| key.as_str() != "name")
                            .map(|(key, value)| (key.clone(), value.clone()))
                            .collect();
                        Ok((name.to_string(), params))
                    }
                })
                .collect(),
            CorrectionsDecl::Map(entries) => entries
                .iter()
                .map(|(name, params)| match params {
                    Value::Null => Ok((name.clone(), Map::new())),
                    Value::Object(params) => Ok((name.clone(), params.clone())),
                    other => Err(invalid_entry(other)),
                })
                .collect(),
        }
    }
}

fn invalid_entry(entry: &Value) -> SystError {
    SystError::Configuration(
        ErrorInfo::new(codes::INVALID_CORRECTION_ENTRY, "unknown correction entry type")
            .with_context("entry", entry.to_string())
            .with_hint("use a bare name or a mapping with a `name` key"),
    )
}

/// A single configuration layer.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayerConfig {
    /// Corrections declared by this layer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrections: Option<CorrectionsDecl>,
    /// Every other key, kept verbatim.
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl LayerConfig {
    /// Declarations of this layer, empty when `corrections` is absent.
    pub fn declarations(&self) -> Result<Vec<RawDeclaration>, SystError> {
        match &self.corrections {
            Some(decl) => decl.declarations(),
            None => Ok(Vec::new()),
        }
    }

    /// Raw value of a top-level key other than `corrections`.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }
}

/// `btag` block of the global layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BtagSettings {
    /// `wp` or `shape`.
    #[serde(default = "BtagSettings::default_mode")]
    pub mode: String,
    /// Stages at which shape mode needs the dedicated `btagShape` correction.
    #[serde(default)]
    pub shape_stages: Vec<String>,
    /// Remaining keys, passed to the synthesized correction.
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl BtagSettings {
    fn default_mode() -> String {
        "wp".to_string()
    }

    /// Whether the fallback `btag` correction should be synthesized at `stage`.
    pub fn synthesizes_at(&self, stage: &str) -> bool {
        self.mode != "shape" || !self.shape_stages.iter().any(|s| s == stage)
    }
}

/// The three layers seen by one dataset.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LayeredConfig {
    /// Analysis-wide layer.
    pub global: LayerConfig,
    /// Process layer, empty when absent.
    #[serde(default)]
    pub process: LayerConfig,
    /// Dataset layer, empty when absent.
    #[serde(default)]
    pub dataset: LayerConfig,
}

impl LayeredConfig {
    /// Bundles the three layers.
    pub fn new(global: LayerConfig, process: LayerConfig, dataset: LayerConfig) -> Self {
        Self {
            global,
            process,
            dataset,
        }
    }

    /// The layer of the given kind.
    pub fn layer(&self, layer: Layer) -> &LayerConfig {
        match layer {
            Layer::Dataset => &self.dataset,
            Layer::Process => &self.process,
            Layer::Global => &self.global,
        }
    }

    /// Analysis era named by the global `era` key.
    pub fn era(&self) -> Result<Era, SystError> {
        let name = self
            .global
            .setting("era")
            .and_then(Value::as_str)
            .ok_or_else(|| missing_setting("era"))?;
        Era::parse(name)
    }

    /// Integrated luminosity from the global `luminosity` key.
    pub fn luminosity(&self) -> Result<f64, SystError> {
        self.global
            .setting("luminosity")
            .and_then(Value::as_f64)
            .ok_or_else(|| missing_setting("luminosity"))
    }

    /// MET flavour from the global `MET_type` key, `PuppiMET` by default.
    pub fn met_type(&self) -> String {
        self.global
            .setting("MET_type")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MET_TYPE)
            .to_string()
    }

    /// Parsed global `btag` block, if configured.
    pub fn btag(&self) -> Result<Option<BtagSettings>, SystError> {
        match self.global.setting("btag") {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some).map_err(|err| {
                SystError::Configuration(
                    ErrorInfo::new(codes::INVALID_SETTING, err.to_string())
                        .with_context("key", "btag"),
                )
            }),
        }
    }
}

fn missing_setting(key: &str) -> SystError {
    SystError::Configuration(
        ErrorInfo::new(codes::INVALID_SETTING, "missing or malformed global setting")
            .with_context("key", key),
    )
}

fn io_error(err: impl ToString, path: &Path) -> SystError {
    SystError::Serde(
        ErrorInfo::new("layer_read", err.to_string())
            .with_context("path", path.display().to_string()),
    )
}

/// Loads one layer from a YAML file.
pub fn load_layer<P: AsRef<Path>>(path: P) -> Result<LayerConfig, SystError> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|err| io_error(err, path))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(LayerConfig::default());
    }
    from_yaml_slice(&bytes)
}

/// Loads the global layer and the optional process and dataset layers.
pub fn load_layers(
    global: &Path,
    process: Option<&Path>,
    dataset: Option<&Path>,
) -> Result<LayeredConfig, SystError> {
    let optional = |path: Option<&Path>| -> Result<LayerConfig, SystError> {
        path.map(load_layer).transpose().map(Option::unwrap_or_default)
    };
    Ok(LayeredConfig {
        global: load_layer(global)?,
        process: optional(process)?,
        dataset: optional(dataset)?,
    })
}
