//! Correction handler table: correction name → (domain, provider factory,
//! kinematic handler, weight handler).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use syst_core::errors::SystError;
use syst_core::{ColumnStore, Era};

use crate::builtin::{BranchWeightProvider, ShiftTableProvider};
use crate::provider::{downcast, Domain, Provider, ProviderHandle};
use crate::variations::VariationRegistry;
use crate::weights::WeightGroup;

/// What a kinematic handler may touch.
pub struct KinematicScope<'a> {
    /// Column store receiving the shifted momenta.
    pub store: &'a mut dyn ColumnStore,
    /// Registry the shifted sources are recorded in.
    pub registry: &'a mut VariationRegistry,
    /// Era used to resolve templated sources.
    pub era: Era,
}

/// What a weight handler may touch.
pub struct WeightScope<'a> {
    /// Column store holding the scale-factor columns.
    pub store: &'a mut dyn ColumnStore,
    /// Era used to resolve templated sources.
    pub era: Era,
    /// Analysis lepton legs.
    pub lepton_legs: &'a [String],
    /// Offline legs matched to trigger objects.
    pub offline_legs: &'a [String],
    /// When false, handlers emit central branches only.
    pub return_variations: bool,
}

/// Where a contribution's groups end up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fold {
    /// Folded into the normalisation composite.
    Normalisation,
    /// Own family with its own central and relative branches.
    Standalone {
        /// Branch prefix of the family.
        prefix: String,
    },
}

/// Weight groups contributed by one provider query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightContribution {
    /// Groups in leg order.
    pub groups: Vec<WeightGroup>,
    /// Destination of the groups.
    pub fold: Fold,
}

/// Builds a provider for a domain from merged settings.
pub type ProviderFactory =
    Arc<dyn Fn(&Domain, &Value) -> Result<ProviderHandle, SystError> + Send + Sync>;
/// Defines shifted momenta for an active kinematic correction.
pub type KinematicFn =
    Arc<dyn Fn(&dyn Provider, &mut KinematicScope<'_>) -> Result<(), SystError> + Send + Sync>;
/// Returns the weight groups of an active weight correction.
pub type WeightFn = Arc<
    dyn Fn(&dyn Provider, &mut WeightScope<'_>) -> Result<Vec<WeightContribution>, SystError>
        + Send
        + Sync,
>;

/// How one correction name is served.
#[derive(Clone)]
pub struct CorrectionHandler {
    /// Provider domain; corrections sharing it share one provider.
    pub domain: Domain,
    /// Settings applied when the configuration leaves them out.
    pub defaults: Map<String, Value>,
    /// Provider constructor.
    pub factory: ProviderFactory,
    /// Kinematic handler, if the correction shifts momenta.
    pub kinematic: Option<KinematicFn>,
    /// Weight handler, if the correction contributes weights.
    pub weights: Option<WeightFn>,
}

impl fmt::Debug for CorrectionHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrectionHandler")
            .field("domain", &self.domain)
            .field("defaults", &self.defaults)
            .field("kinematic", &self.kinematic.is_some())
            .field("weights", &self.weights.is_some())
            .finish()
    }
}

fn defaults_of(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

fn build_shift_table(domain: &Domain, settings: &Value) -> Result<ProviderHandle, SystError> {
    Ok(Arc::new(ShiftTableProvider::from_settings(
        domain.clone(),
        settings,
    )?))
}

fn apply_shift_table(
    provider: &dyn Provider,
    scope: &mut KinematicScope<'_>,
) -> Result<(), SystError> {
    downcast::<ShiftTableProvider>(provider)?.apply(scope)
}

fn build_branch_weight(domain: &Domain, settings: &Value) -> Result<ProviderHandle, SystError> {
    Ok(Arc::new(BranchWeightProvider::from_settings(
        domain.clone(),
        settings,
    )?))
}

fn branch_weight_groups(
    provider: &dyn Provider,
    scope: &mut WeightScope<'_>,
) -> Result<Vec<WeightContribution>, SystError> {
    downcast::<BranchWeightProvider>(provider)?.contributions(scope)
}

impl CorrectionHandler {
    /// Kinematic handler backed by a [`ShiftTableProvider`].
    pub fn shift_table(domain: &str, defaults: &[(&str, Value)]) -> Self {
        Self {
            domain: Domain::new(domain),
            defaults: defaults_of(defaults),
            factory: Arc::new(build_shift_table),
            kinematic: Some(Arc::new(apply_shift_table)),
            weights: None,
        }
    }

    /// Weight handler backed by a [`BranchWeightProvider`].
    pub fn branch_weight(domain: &str, defaults: &[(&str, Value)]) -> Self {
        Self {
            domain: Domain::new(domain),
            defaults: defaults_of(defaults),
            factory: Arc::new(build_branch_weight),
            kinematic: None,
            weights: Some(Arc::new(branch_weight_groups)),
        }
    }

    /// Settings for the provider: `params` over the handler defaults.
    pub fn settings(&self, params: &Map<String, Value>) -> Value {
        let mut merged = self.defaults.clone();
        for (key, value) in params {
            merged.insert(key.clone(), value.clone());
        }
        Value::Object(merged)
    }
}

/// Name-keyed handler table.
#[derive(Debug, Clone, Default)]
pub struct HandlerTable {
    handlers: BTreeMap<String, CorrectionHandler>,
}

impl HandlerTable {
    /// Empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the handler for `name`.
    pub fn register(&mut self, name: impl Into<String>, handler: CorrectionHandler) {
        self.handlers.insert(name.into(), handler);
    }

    /// Builder form of [`HandlerTable::register`].
    pub fn with(mut self, name: impl Into<String>, handler: CorrectionHandler) -> Self {
        self.register(name, handler);
        self
    }

    /// Handler registered for `name`.
    pub fn get(&self, name: &str) -> Option<&CorrectionHandler> {
        self.handlers.get(name)
    }

    /// Registered correction names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Table with the built-in corrections.
    pub fn with_builtins() -> Self {
        let standalone = |name: &str| {
            CorrectionHandler::branch_weight(
                name,
                &[
                    ("branch", Value::from(format!("{name}Weight"))),
                    ("source", Value::from(name)),
                    ("prefix", Value::from(format!("weight_{name}"))),
                ],
            )
        };
        let mut table = HandlerTable::new()
            .with(
                "pu",
                CorrectionHandler::branch_weight(
                    "pileup",
                    &[
                        ("branch", Value::from("puWeight")),
                        ("source", Value::from("pu")),
                        ("fold", Value::from("normalisation")),
                    ],
                ),
            )
            .with(
                "tauES",
                CorrectionHandler::shift_table("tau_es", &[("collection", Value::from("Tau"))]),
            )
            .with(
                "eleES",
                CorrectionHandler::shift_table(
                    "electron_es",
                    &[
                        ("collection", Value::from("Electron")),
                        ("apply_to_data", Value::from(true)),
                    ],
                ),
            )
            .with(
                "JEC",
                CorrectionHandler::shift_table(
                    "jet",
                    &[
                        ("collection", Value::from("Jet")),
                        ("source_prefix", Value::from("JES_")),
                    ],
                ),
            )
            .with(
                "JER",
                CorrectionHandler::shift_table(
                    "jet_resolution",
                    &[("collection", Value::from("Jet"))],
                ),
            )
            .with(
                "muScaRe",
                CorrectionHandler::shift_table(
                    "muon_scale",
                    &[
                        ("collection", Value::from("Muon")),
                        ("apply_to_data", Value::from(true)),
                    ],
                ),
            );
        for name in [
            "tauID", "btagWP", "btagShape", "btag", "mu", "ele", "trgSF", "puJetID", "Vpt",
        ] {
            table.register(name, standalone(name));
        }
        table.register(
            "trgEff",
            CorrectionHandler::branch_weight(
                "trigger_eff",
                &[
                    ("branch", Value::from("trgEff")),
                    ("source", Value::from("trgEff")),
                    ("prefix", Value::from("weight_trgEff")),
                    ("per_leg", Value::from(true)),
                    ("leg_set", Value::from("offline")),
                ],
            ),
        );
        table
    }
}
