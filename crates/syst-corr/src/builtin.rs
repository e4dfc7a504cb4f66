//! Built-in table-driven providers and derived MET propagation.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use syst_core::errors::{codes, ErrorInfo, SystError};
use syst_core::{
    nano_p4_column, p4_column, scales_for, ColumnStore, Formula, Scale, Source, SystName, Value,
    P4, CENTRAL,
};
use tracing::debug;

use crate::handlers::{Fold, KinematicScope, WeightContribution, WeightScope};
use crate::provider::{Capabilities, Domain, Provider, PtVariant};
use crate::variations::VariationRegistry;
use crate::weights::WeightGroup;

fn init_error(domain: &Domain, message: impl Into<String>) -> SystError {
    SystError::Provider(
        ErrorInfo::new(codes::PROVIDER_INITIALIZATION, message).with_context("domain", domain.as_str()),
    )
}

fn unsupported(domain: &Domain, key: &str, value: &str) -> SystError {
    SystError::Provider(
        ErrorInfo::new(codes::UNSUPPORTED_CONFIGURATION, "unsupported provider setting")
            .with_context("domain", domain.as_str())
            .with_context("key", key)
            .with_context("value", value),
    )
}

fn parse_settings<T: serde::de::DeserializeOwned>(
    domain: &Domain,
    settings: &Json,
) -> Result<T, SystError> {
    serde_json::from_value(settings.clone()).map_err(|err| init_error(domain, err.to_string()))
}

fn check_calibration(domain: &Domain, path: Option<&PathBuf>) -> Result<(), SystError> {
    match path {
        Some(path) if !path.exists() => Err(SystError::Provider(
            ErrorInfo::new(codes::PROVIDER_INITIALIZATION, "calibration file is not found")
                .with_context("domain", domain.as_str())
                .with_context("path", path.display().to_string()),
        )),
        _ => Ok(()),
    }
}

/// Momenta of `objects` scaled by `factor`.
fn scale_momenta(factor: f64) -> syst_core::MapFn {
    Arc::new(move |values: &[Value]| -> Result<Value, SystError> {
        let objects = values
            .first()
            .ok_or_else(|| missing_input("momenta"))?
            .as_momenta()?;
        Ok(Value::Momenta(
            objects.iter().map(|p4| p4.scaled(factor)).collect(),
        ))
    })
}

fn missing_input(what: &str) -> SystError {
    SystError::Column(
        ErrorInfo::new(codes::COLUMN_MISSING, "mapping called without its input")
            .with_context("input", what),
    )
}

/// Settings of a [`ShiftTableProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShiftTableSettings {
    /// Collection whose momenta are shifted.
    pub collection: String,
    /// Fractional momentum shift per source; names ending in `_` are per-era templates.
    pub shifts: BTreeMap<String, f64>,
    /// Fractional shift defining the corrected nominal momentum.
    #[serde(default)]
    pub central_shift: Option<f64>,
    /// Prefix prepended to every resolved source name, e.g. `JES_`.
    #[serde(default)]
    pub source_prefix: String,
    /// Whether the shifts also apply to collision data.
    #[serde(default)]
    pub apply_to_data: bool,
    /// Calibration file that must exist when given.
    #[serde(default)]
    pub calibration: Option<PathBuf>,
}

/// Kinematic provider shifting a collection's momenta by a fixed fraction per source.
#[derive(Debug, Clone)]
pub struct ShiftTableProvider {
    domain: Domain,
    capabilities: Capabilities,
    settings: ShiftTableSettings,
}

impl ShiftTableProvider {
    /// Builds the provider from its JSON settings.
    /// Shifts must be finite and strictly between -1 and 1.
    pub fn from_settings(domain: Domain, settings: &Json) -> Result<Self, SystError> {
        let settings: ShiftTableSettings = parse_settings(&domain, settings)?;
        check_calibration(&domain, settings.calibration.as_ref())?;
        if settings.shifts.contains_key(CENTRAL) {
            return Err(unsupported(&domain, "shifts", CENTRAL));
        }
        let shifts = settings
            .shifts
            .iter()
            .map(|(source, shift)| (source.as_str(), *shift))
            .chain(settings.central_shift.map(|shift| (CENTRAL, shift)));
        for (source, shift) in shifts {
            if !shift.is_finite() || shift.abs() >= 1.0 {
                return Err(SystError::Provider(
                    ErrorInfo::new(
                        codes::PROVIDER_INITIALIZATION,
                        "momentum shift must be finite and strictly between -1 and 1",
                    )
                    .with_context("domain", domain.as_str())
                    .with_context("source", source)
                    .with_context("shift", shift.to_string()),
                ));
            }
        }
        let capabilities = Capabilities {
            kinematic: true,
            weights: false,
            data: settings.apply_to_data,
            variants: BTreeSet::new(),
        };
        Ok(Self {
            domain,
            capabilities,
            settings,
        })
    }

    /// Settings the provider was built with.
    pub fn settings(&self) -> &ShiftTableSettings {
        &self.settings
    }

    /// Defines the shifted momentum columns and registers their sources.
    pub fn apply(&self, scope: &mut KinematicScope<'_>) -> Result<(), SystError> {
        let collection = self.settings.collection.as_str();
        let central_column = p4_column(collection, CENTRAL);

        if let Some(shift) = self.settings.central_shift {
            if scope.registry.is_registered(&Source::central(), collection) {
                debug!(collection, domain = %self.domain, "central momenta already corrected");
            } else {
                scope.store.define(
                    &central_column,
                    Formula::map(
                        format!("{}_central", self.domain),
                        [nano_p4_column(collection)],
                        scale_momenta(1.0 + shift),
                    ),
                )?;
                scope.registry.register(&Source::central(), collection)?;
            }
        }
        let base = if scope.store.has_column(&central_column) {
            central_column
        } else {
            nano_p4_column(collection)
        };

        for (name, shift) in &self.settings.shifts {
            let source = Source::new(name.as_str())
                .resolve(&scope.era)
                .prefixed(&self.settings.source_prefix);
            scope.registry.register(&source, collection)?;
            for scale in scales_for(&source) {
                let syst = SystName::new(&source, *scale)?;
                scope.store.define(
                    &p4_column(collection, syst.as_str()),
                    Formula::map(
                        format!("{}_{}", self.domain, syst),
                        [base.as_str()],
                        scale_momenta(1.0 + scale.sign() * shift),
                    ),
                )?;
            }
        }
        Ok(())
    }
}

impl Provider for ShiftTableProvider {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

fn default_up() -> String {
    "Up".to_string()
}

fn default_down() -> String {
    "Down".to_string()
}

fn default_fold() -> String {
    "standalone".to_string()
}

/// Settings of a [`BranchWeightProvider`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchWeightSettings {
    /// Central scale-factor column.
    pub branch: String,
    /// Uncertainty source of the up/down columns.
    pub source: String,
    /// Suffix of the up-variation columns.
    #[serde(default = "default_up")]
    pub up_suffix: String,
    /// Suffix of the down-variation columns.
    #[serde(default = "default_down")]
    pub down_suffix: String,
    /// `normalisation` or `standalone`.
    #[serde(default = "default_fold")]
    pub fold: String,
    /// Output prefix of a standalone family.
    #[serde(default)]
    pub prefix: Option<String>,
    /// Separately provided pT regimes (`lowPt`, `medPt`, `highPt`).
    #[serde(default)]
    pub variants: Vec<String>,
    /// One branch per leg, named `{leg}_{branch}`.
    #[serde(default)]
    pub per_leg: bool,
    /// Which legs `per_leg` iterates.
    #[serde(default)]
    pub leg_set: LegSet,
    /// Calibration file that must exist when given.
    #[serde(default)]
    pub calibration: Option<PathBuf>,
    /// Configuration keys this provider does not interpret (e.g. `mode`).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Json>,
}

/// Leg list a per-leg weight provider iterates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegSet {
    /// Analysis lepton legs.
    #[default]
    Lepton,
    /// Offline objects matched to trigger legs.
    Offline,
}

/// Weight provider reading scale factors already present as columns.
#[derive(Debug, Clone)]
pub struct BranchWeightProvider {
    domain: Domain,
    capabilities: Capabilities,
    settings: BranchWeightSettings,
    fold: Fold,
}

impl BranchWeightProvider {
    /// Builds the provider from its JSON settings.
    pub fn from_settings(domain: Domain, settings: &Json) -> Result<Self, SystError> {
        let settings: BranchWeightSettings = parse_settings(&domain, settings)?;
        check_calibration(&domain, settings.calibration.as_ref())?;
        let source = Source::new(settings.source.as_str());
        if source.is_central() || settings.source.is_empty() {
            return Err(unsupported(&domain, "source", &settings.source));
        }
        let fold = match settings.fold.as_str() {
            "normalisation" => Fold::Normalisation,
            "standalone" => Fold::Standalone {
                prefix: settings
                    .prefix
                    .clone()
                    .unwrap_or_else(|| format!("weight_{}", domain)),
            },
            other => return Err(unsupported(&domain, "fold", other)),
        };
        let variants = settings
            .variants
            .iter()
            .map(|name| PtVariant::parse(name).ok_or_else(|| unsupported(&domain, "variants", name)))
            .collect::<Result<BTreeSet<_>, _>>()?;
        let capabilities = Capabilities {
            kinematic: false,
            weights: true,
            data: false,
            variants,
        };
        Ok(Self {
            domain,
            capabilities,
            settings,
            fold,
        })
    }

    /// Settings the provider was built with.
    pub fn settings(&self) -> &BranchWeightSettings {
        &self.settings
    }

    fn group(&self, label: String, stem: &str, source: &Source, variations: bool) -> WeightGroup {
        let mut group = WeightGroup::new(label).with(Source::central(), Scale::Central, stem);
        if variations {
            group.push(
                source.clone(),
                Scale::Up,
                format!("{stem}{}", self.settings.up_suffix),
            );
            group.push(
                source.clone(),
                Scale::Down,
                format!("{stem}{}", self.settings.down_suffix),
            );
        }
        group
    }

    /// Weight groups for every advertised variant and lepton leg.
    pub fn contributions(
        &self,
        scope: &mut WeightScope<'_>,
    ) -> Result<Vec<WeightContribution>, SystError> {
        let base_source = Source::new(self.settings.source.as_str()).resolve(&scope.era);
        let variants: Vec<Option<PtVariant>> = if self.capabilities.variants.is_empty() {
            vec![None]
        } else {
            [PtVariant::Low, PtVariant::Medium, PtVariant::High]
                .into_iter()
                .filter(|variant| self.capabilities.supports(*variant))
                .map(Some)
                .collect()
        };
        let legs: Vec<Option<&str>> = if self.settings.per_leg {
            let legs = match self.settings.leg_set {
                LegSet::Lepton => scope.lepton_legs,
                LegSet::Offline => scope.offline_legs,
            };
            legs.iter().map(|leg| Some(leg.as_str())).collect()
        } else {
            vec![None]
        };

        let mut contributions = Vec::new();
        for variant in variants {
            let source = match variant {
                Some(variant) => Source::new(format!("{base_source}_{}", variant.as_str())),
                None => base_source.clone(),
            };
            let mut groups = Vec::new();
            for leg in &legs {
                let stem = [*leg, Some(self.settings.branch.as_str()), variant.map(|v| v.as_str())]
                    .into_iter()
                    .flatten()
                    .collect::<Vec<_>>()
                    .join("_");
                for column in std::iter::once(stem.clone()).chain(
                    scope
                        .return_variations
                        .then(|| {
                            [
                                format!("{stem}{}", self.settings.up_suffix),
                                format!("{stem}{}", self.settings.down_suffix),
                            ]
                        })
                        .into_iter()
                        .flatten(),
                ) {
                    if !scope.store.has_column(&column) {
                        return Err(SystError::Column(
                            ErrorInfo::new(codes::COLUMN_MISSING, "scale-factor column not found")
                                .with_context("domain", self.domain.as_str())
                                .with_context("column", column),
                        ));
                    }
                }
                groups.push(self.group(stem.clone(), &stem, &source, scope.return_variations));
            }
            let fold = match (&self.fold, variant) {
                (Fold::Standalone { prefix }, Some(variant)) => Fold::Standalone {
                    prefix: format!("{prefix}_{}", variant.as_str()),
                },
                (fold, _) => fold.clone(),
            };
            contributions.push(WeightContribution { groups, fold });
        }
        Ok(contributions)
    }
}

impl Provider for BranchWeightProvider {
    fn domain(&self) -> &Domain {
        &self.domain
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Name of the derived missing-momentum collection.
pub const MET_COLLECTION: &str = "MET";

/// Collections whose variations feed into MET.
pub const MET_INPUTS: [&str; 4] = ["Electron", "Muon", "Tau", "Jet"];

/// MET minus the summed transverse shifts of the perturbed objects.
fn shift_met() -> syst_core::MapFn {
    Arc::new(|values: &[Value]| -> Result<Value, SystError> {
        let (met, pairs) = values.split_first().ok_or_else(|| missing_input("met"))?;
        let met = leading_met(met)?;
        let (mut px, mut py) = (met.px(), met.py());
        for pair in pairs.chunks(2) {
            let [original, shifted] = pair else {
                return Err(missing_input("shifted momenta"));
            };
            let original = original.as_momenta()?;
            let shifted = shifted.as_momenta()?;
            if original.len() != shifted.len() {
                return Err(SystError::Column(
                    ErrorInfo::new(codes::COLUMN_TYPE, "shifted and original object counts differ")
                        .with_context("original", original.len().to_string())
                        .with_context("shifted", shifted.len().to_string()),
                ));
            }
            for (orig, shift) in original.iter().zip(shifted) {
                px -= shift.px() - orig.px();
                py -= shift.py() - orig.py();
            }
        }
        Ok(Value::Momenta(vec![P4::from_transverse(px, py)]))
    })
}

fn leading_met(value: &Value) -> Result<P4, SystError> {
    Ok(value
        .as_momenta()?
        .first()
        .copied()
        .unwrap_or_else(|| P4::from_transverse(0.0, 0.0)))
}

/// Shifted MET minus the baseline MET.
fn met_delta() -> syst_core::MapFn {
    Arc::new(|values: &[Value]| -> Result<Value, SystError> {
        let [shifted, baseline] = values else {
            return Err(missing_input("met"));
        };
        let shifted = leading_met(shifted)?;
        let baseline = leading_met(baseline)?;
        Ok(Value::Momenta(vec![P4::from_transverse(
            shifted.px() - baseline.px(),
            shifted.py() - baseline.py(),
        )]))
    })
}

/// Registers MET under every source perturbing a MET input (and Central) and
/// defines `MET_p4_{syst}` from the `{met_type}_p4_nano` baseline, plus its
/// difference to that baseline as `MET_p4_{syst}_delta`.
pub fn propagate_met(
    store: &mut dyn ColumnStore,
    registry: &mut VariationRegistry,
    met_type: &str,
) -> Result<Vec<SystName>, SystError> {
    let baseline = nano_p4_column(met_type);
    let snapshot: Vec<(Source, Vec<String>)> = registry
        .sources()
        .map(|source| {
            let touched = registry
                .collections(source)
                .map(|set| {
                    set.iter()
                        .filter(|c| MET_INPUTS.contains(&c.as_str()))
                        .cloned()
                        .collect()
                })
                .unwrap_or_default();
            (source.clone(), touched)
        })
        .collect();

    let mut defined = Vec::new();
    for (source, objects) in snapshot {
        if !source.is_central() && objects.is_empty() {
            continue;
        }
        registry.register(&source, MET_COLLECTION)?;
        for scale in scales_for(&source) {
            let syst = SystName::new(&source, *scale)?;
            let mut inputs = vec![baseline.clone()];
            for object in &objects {
                inputs.push(nano_p4_column(object));
                inputs.push(p4_column(object, syst.as_str()));
            }
            let shifted = p4_column(MET_COLLECTION, syst.as_str());
            store.define(&shifted, Formula::map("shift_met", inputs, shift_met()))?;
            store.define(
                &format!("{shifted}_delta"),
                Formula::map("met_delta", [shifted.clone(), baseline.clone()], met_delta()),
            )?;
            defined.push(syst);
        }
    }
    debug!(met_type, variations = defined.len(), "MET variations propagated");
    Ok(defined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use syst_core::{Era, MemoryFrame};

    #[test]
    fn variants_and_legs_expand_into_groups() {
        let provider = BranchWeightProvider::from_settings(
            Domain::new("tauID"),
            &json!({
                "branch": "tauID",
                "source": "tauID",
                "variants": ["highPt", "lowPt"],
                "per_leg": true,
                "mode": "ignored",
            }),
        )
        .unwrap();
        assert!(provider.capabilities().supports(PtVariant::Low));
        assert!(!provider.capabilities().supports(PtVariant::Medium));

        let mut frame = MemoryFrame::new(1);
        for leg in ["tau1", "tau2"] {
            for variant in ["lowPt", "highPt"] {
                for suffix in ["", "Up", "Down"] {
                    frame
                        .insert_scalars(&format!("{leg}_tauID_{variant}{suffix}"), vec![1.0])
                        .unwrap();
                }
            }
        }
        let legs = vec!["tau1".to_string(), "tau2".to_string()];
        let mut scope = WeightScope {
            store: &mut frame,
            era: Era::parse("Run3_2022").unwrap(),
            lepton_legs: &legs,
            offline_legs: &[],
            return_variations: true,
        };
        let contributions = provider.contributions(&mut scope).unwrap();
        assert_eq!(contributions.len(), 2);
        assert_eq!(
            contributions[0].fold,
            Fold::Standalone {
                prefix: "weight_tauID_lowPt".into()
            }
        );
        let group = &contributions[1].groups[1];
        assert_eq!(group.label, "tau2_tauID_highPt");
        assert_eq!(
            group.branches(&Source::new("tauID_highPt"), Scale::Down),
            Some(&["tau2_tauID_highPtDown".to_string()][..])
        );
    }

    #[test]
    fn missing_scale_factor_columns_are_reported() {
        let provider = BranchWeightProvider::from_settings(
            Domain::new("pileup"),
            &json!({ "branch": "puWeight", "source": "pu", "fold": "normalisation" }),
        )
        .unwrap();
        let mut frame = MemoryFrame::new(1).with_scalars("puWeight", vec![1.0]).unwrap();
        let mut scope = WeightScope {
            store: &mut frame,
            era: Era::parse("Run2_2017").unwrap(),
            lepton_legs: &[],
            offline_legs: &[],
            return_variations: false,
        };
        let central_only = provider.contributions(&mut scope).unwrap();
        assert_eq!(central_only[0].fold, Fold::Normalisation);
        scope.return_variations = true;
        let err = provider.contributions(&mut scope).unwrap_err();
        assert_eq!(err.code(), codes::COLUMN_MISSING);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let domain = Domain::new("tauID");
        let cases = [
            json!({ "branch": "w", "source": "Central" }),
            json!({ "branch": "w", "source": "tauID", "fold": "sideways" }),
            json!({ "branch": "w", "source": "tauID", "variants": ["ultraPt"] }),
        ];
        for settings in cases {
            let err = BranchWeightProvider::from_settings(domain.clone(), &settings).unwrap_err();
            assert_eq!(err.code(), codes::UNSUPPORTED_CONFIGURATION);
        }
        for shift in [-1.5, -1.0, 1.0, 1.5] {
            let err = ShiftTableProvider::from_settings(
                Domain::new("jet"),
                &json!({ "collection": "Jet", "shifts": { "Total": shift } }),
            )
            .unwrap_err();
            assert_eq!(err.code(), codes::PROVIDER_INITIALIZATION, "shift {shift}");
        }
        let err = ShiftTableProvider::from_settings(
            Domain::new("jet"),
            &json!({ "collection": "Jet", "shifts": {}, "central_shift": 2.0 }),
        )
        .unwrap_err();
        assert_eq!(err.code(), codes::PROVIDER_INITIALIZATION);
        let err = ShiftTableProvider::from_settings(
            Domain::new("jet"),
            &json!({ "collection": "Jet", "shifts": {}, "calibration": "/nonexistent/jec.json" }),
        )
        .unwrap_err();
        assert_eq!(err.code(), codes::PROVIDER_INITIALIZATION);
    }
}
