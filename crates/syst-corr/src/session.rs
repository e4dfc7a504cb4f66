//! Per-dataset driver sequencing correction resolution, provider setup,
//! kinematic variations and normalisation weights.
//!
//! States advance strictly forward:
//! `Unconfigured → CorrectionsResolved → ProvidersInitialized →
//! VariationsRegistered → WeightsComposed`. Providers live in the shared
//! [`ProviderRegistry`] and outlive the session.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use syst_core::errors::{codes, ErrorInfo, SystError};
use syst_core::{ColumnStore, Era, Formula, SystName};
use tracing::{debug, info};

use crate::builtin::propagate_met;
use crate::config::LayeredConfig;
use crate::diagnostics::{self, Diagnostic};
use crate::handlers::{CorrectionHandler, Fold, HandlerTable, KinematicScope, WeightScope};
use crate::hooks::{cross_section_hook, denominator_hook, AnalysisProcessor};
use crate::provider::{Domain, ProviderHandle, ProviderRegistry};
use crate::selector::{self, Resolution};
use crate::variations::{CollectionRequest, VariationRegistry};
use crate::weights::{compose, AnaCaches, ComposeOptions, ComposedWeights, Normalisation, WeightGroup};

/// Column holding the generator weight used in composites.
pub const GEN_WEIGHT_COLUMN: &str = "genWeightD";
/// Column holding the per-event cross-section.
pub const CROSS_SECTION_COLUMN: &str = "crossSection";

/// Lifecycle of a [`DatasetSession`]; each step moves it forward by one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PipelineState {
    /// Nothing done yet.
    Unconfigured,
    /// Active corrections selected for the stage.
    CorrectionsResolved,
    /// Providers of the active corrections constructed or reused.
    ProvidersInitialized,
    /// Momentum variations defined and systematic names known.
    VariationsRegistered,
    /// Normalisation and standalone weights defined.
    WeightsComposed,
}

/// How `genWeight` enters the composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenWeightPolicy {
    /// Only the sign of `genWeight`.
    #[default]
    SignOnly,
    /// The full `genWeight` value.
    Full,
}

/// Parameters of [`DatasetSession::compute_normalisation`].
#[derive(Debug, Clone, PartialEq)]
pub struct NormalisationRequest {
    /// Kinematic systematic the weights are computed for.
    pub syst_name: SystName,
    /// Whether relative weights are produced; ignored for non-central requests.
    pub return_variations: bool,
    /// How `genWeight` enters the composite.
    pub gen_weight: GenWeightPolicy,
    /// Analysis lepton legs, e.g. `tau1`, `tau2`.
    pub lepton_legs: Vec<String>,
    /// Offline objects matched to trigger legs.
    pub offline_legs: Vec<String>,
    /// Denominator cache shared with the analysis processors.
    pub caches: AnaCaches,
    /// Prefix of the normalisation family.
    pub prefix: String,
}

impl Default for NormalisationRequest {
    fn default() -> Self {
        Self {
            syst_name: SystName::central(),
            return_variations: true,
            gen_weight: GenWeightPolicy::default(),
            lepton_legs: Vec::new(),
            offline_legs: Vec::new(),
            caches: AnaCaches::new(),
            prefix: crate::weights::DEFAULT_PREFIX.to_string(),
        }
    }
}

/// Branches produced by [`DatasetSession::compute_normalisation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalisationOutput {
    /// The `weight_MC_Lumi` family, or the requested prefix.
    pub normalisation: ComposedWeights,
    /// Standalone families in correction order.
    pub standalone: Vec<ComposedWeights>,
}

impl NormalisationOutput {
    /// Every output branch: normalisation family first.
    pub fn branches(&self) -> Vec<String> {
        std::iter::once(&self.normalisation)
            .chain(self.standalone.iter())
            .flat_map(ComposedWeights::branches)
            .collect()
    }
}

/// Drives one dataset at one stage through the correction pipeline.
/// 
/// Providers live in the shared registry and outlive the session.
pub struct DatasetSession {
    dataset: String,
    is_data: bool,
    stage: String,
    config: LayeredConfig,
    providers: Arc<ProviderRegistry>,
    handlers: Arc<HandlerTable>,
    state: PipelineState,
    resolution: Option<Resolution>,
    active: Vec<(String, CorrectionHandler, ProviderHandle)>,
    era: Option<Era>,
    variations: VariationRegistry,
    systematics: Vec<SystName>,
    diagnostics: Vec<Diagnostic>,
}

impl DatasetSession {
    /// Session in [`PipelineState::Unconfigured`].
    pub fn new(
        dataset: impl Into<String>,
        is_data: bool,
        stage: impl Into<String>,
        config: LayeredConfig,
        providers: Arc<ProviderRegistry>,
        handlers: Arc<HandlerTable>,
    ) -> Self {
        Self {
            dataset: dataset.into(),
            is_data,
            stage: stage.into(),
            config,
            providers,
            handlers,
            state: PipelineState::Unconfigured,
            resolution: None,
            active: Vec::new(),
            era: None,
            variations: VariationRegistry::new(),
            systematics: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Dataset name.
    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Selection result, once corrections are resolved.
    pub fn resolution(&self) -> Option<&Resolution> {
        self.resolution.as_ref()
    }

    /// Variation registry filled by the kinematic stage.
    pub fn variations(&self) -> &VariationRegistry {
        &self.variations
    }

    /// Systematic names declared by the kinematic stage, Central first.
    pub fn systematics(&self) -> &[SystName] {
        &self.systematics
    }

    /// Non-fatal diagnostics collected so far.
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    fn expect_state(&self, from: PipelineState, to: PipelineState) -> Result<(), SystError> {
        if self.state != from {
            return Err(SystError::Configuration(
                ErrorInfo::new(codes::LIFECYCLE, "pipeline step invoked out of order")
                    .with_context("dataset", self.dataset.as_str())
                    .with_context("state", format!("{:?}", self.state))
                    .with_context("expected", format!("{from:?}"))
                    .with_context("requested", format!("{to:?}")),
            ));
        }
        Ok(())
    }

    fn era(&self) -> Result<Era, SystError> {
        match self.era {
            Some(era) => Ok(era),
            None => self.config.era(),
        }
    }

    /// Selects the corrections active at this session's stage.
    pub fn resolve_corrections(&mut self) -> Result<&Resolution, SystError> {
        self.expect_state(PipelineState::Unconfigured, PipelineState::CorrectionsResolved)?;
        let resolution = selector::resolve(&self.config, &self.stage)?;
        self.diagnostics.extend(resolution.diagnostics.iter().cloned());
        self.state = PipelineState::CorrectionsResolved;
        Ok(self.resolution.insert(resolution))
    }

    /// Looks up or constructs the provider of every active correction.
    pub fn initialize_providers(&mut self) -> Result<(), SystError> {
        self.expect_state(
            PipelineState::CorrectionsResolved,
            PipelineState::ProvidersInitialized,
        )?;
        let era = self.config.era()?;
        let Some(resolution) = self.resolution.clone() else {
            return Err(SystError::Configuration(
                ErrorInfo::new(codes::LIFECYCLE, "corrections were not resolved")
                    .with_context("dataset", self.dataset.as_str()),
            ));
        };

        self.active.clear();
        let mut by_domain: BTreeMap<Domain, Map<String, Value>> = BTreeMap::new();
        let mut handlers = Vec::new();
        for entry in &resolution.active {
            let handler = self.handlers.get(&entry.name).cloned().ok_or_else(|| {
                SystError::Configuration(
                    ErrorInfo::new(codes::UNKNOWN_CORRECTION, "no handler for correction")
                        .with_context("correction", entry.name.as_str())
                        .with_context("origin", entry.origin.as_str()),
                )
            })?;
            let first_claim = !by_domain.contains_key(&handler.domain);
            let params = by_domain.entry(handler.domain.clone()).or_default();
            for (key, value) in &entry.params {
                params.entry(key.clone()).or_insert_with(|| value.clone());
            }
            // One provider per domain, run by the first correction naming it.
            if first_claim {
                handlers.push((entry.name.clone(), handler));
            } else {
                debug!(correction = %entry.name, domain = %handler.domain, "domain already handled");
            }
        }

        for (name, handler) in handlers {
            let params = by_domain.get(&handler.domain).cloned().unwrap_or_default();
            let settings = handler.settings(&params);
            let factory = handler.factory.clone();
            let domain = handler.domain.clone();
            let acquired = self
                .providers
                .get_or_init(&domain, &settings, |settings| factory(&domain, settings))?;
            if acquired.settings_ignored {
                self.diagnostics.push(
                    Diagnostic::new(
                        diagnostics::SETTINGS_IGNORED,
                        format!("provider {domain} keeps its first configuration"),
                    )
                    .with_context("correction", name.as_str())
                    .with_context("domain", domain.as_str()),
                );
            }
            debug!(correction = %name, domain = %domain, constructed = acquired.constructed, "provider ready");
            self.active.push((name, handler, acquired.provider));
        }
        self.era = Some(era);
        self.state = PipelineState::ProvidersInitialized;
        info!(
            dataset = %self.dataset,
            era = era.name(),
            providers = self.active.len(),
            "providers initialized"
        );
        Ok(())
    }

    /// Runs the kinematic handlers, propagates MET and defines nominal
    /// fallbacks for `objects`. Returns the declared systematic names.
    pub fn apply_scale_uncertainties(
        &mut self,
        store: &mut dyn ColumnStore,
        objects: &[CollectionRequest],
    ) -> Result<&[SystName], SystError> {
        self.expect_state(
            PipelineState::ProvidersInitialized,
            PipelineState::VariationsRegistered,
        )?;
        let era = self.era()?;
        let mut kinematic_active = false;

        for (name, handler, provider) in &self.active {
            let Some(kinematic) = &handler.kinematic else {
                continue;
            };
            kinematic_active = true;
            let capabilities = provider.capabilities();
            if !capabilities.kinematic {
                return Err(unsupported_dispatch(name, &handler.domain, "kinematic"));
            }
            if self.is_data && !capabilities.data {
                debug!(correction = %name, dataset = %self.dataset, "MC-only correction skipped for data");
                self.diagnostics.push(
                    Diagnostic::new(
                        diagnostics::MC_ONLY_SKIPPED,
                        format!("correction {name} is not applied to data"),
                    )
                    .with_context("correction", name.as_str()),
                );
                continue;
            }
            let mut scope = KinematicScope {
                store: &mut *store,
                registry: &mut self.variations,
                era,
            };
            kinematic(provider.as_ref(), &mut scope)?;
        }

        if kinematic_active {
            let met_type = self.config.met_type();
            propagate_met(&mut *store, &mut self.variations, &met_type)?;
        }

        let resolved = self.variations.resolve(store, objects)?;
        self.diagnostics.extend(resolved.diagnostics);
        self.systematics = resolved.systematics;
        self.state = PipelineState::VariationsRegistered;
        info!(
            dataset = %self.dataset,
            systematics = self.systematics.len(),
            aliases = resolved.aliases.len(),
            "scale uncertainties applied"
        );
        Ok(&self.systematics)
    }

    /// Defines the generator weight, cross-section, denominators and every
    /// weight family of the active corrections.
    pub fn compute_normalisation(
        &mut self,
        store: &mut dyn ColumnStore,
        request: &NormalisationRequest,
        processors: &[&dyn AnalysisProcessor],
    ) -> Result<NormalisationOutput, SystError> {
        if self.is_data {
            return Err(SystError::Configuration(
                ErrorInfo::new(
                    codes::DATA_NORMALISATION,
                    "normalisation weights are not defined for data",
                )
                .with_context("dataset", self.dataset.as_str()),
            ));
        }
        self.expect_state(
            PipelineState::VariationsRegistered,
            PipelineState::WeightsComposed,
        )?;
        let era = self.era()?;
        let luminosity = self.config.luminosity()?;
        let return_variations = request.return_variations && request.syst_name.is_central();
        if !request.syst_name.is_central() {
            debug!(syst = %request.syst_name, "non-central request, central weights only");
        }

        let gen_weight = match request.gen_weight {
            GenWeightPolicy::SignOnly => Formula::sign("genWeight"),
            GenWeightPolicy::Full => Formula::alias("genWeight"),
        };
        store.define(GEN_WEIGHT_COLUMN, gen_weight)?;

        let xs_hook = cross_section_hook(processors, &self.dataset)?;
        xs_hook.define_cross_section(&mut *store, CROSS_SECTION_COLUMN, &self.dataset)?;
        if !store.has_column(CROSS_SECTION_COLUMN) {
            return Err(SystError::Column(
                ErrorInfo::new(codes::COLUMN_MISSING, "cross-section hook did not define its column")
                    .with_context("column", CROSS_SECTION_COLUMN)
                    .with_context("dataset", self.dataset.as_str()),
            ));
        }
        let denominator = denominator_hook(processors, &self.dataset)?;

        let mut folded: Vec<WeightGroup> = Vec::new();
        let mut standalone: Vec<(String, Vec<WeightGroup>)> = Vec::new();
        for (name, handler, provider) in &self.active {
            let Some(weights) = &handler.weights else {
                continue;
            };
            if !provider.capabilities().weights {
                return Err(unsupported_dispatch(name, &handler.domain, "weights"));
            }
            let mut scope = WeightScope {
                store: &mut *store,
                era,
                lepton_legs: &request.lepton_legs,
                offline_legs: &request.offline_legs,
                return_variations,
            };
            for contribution in weights(provider.as_ref(), &mut scope)? {
                match contribution.fold {
                    Fold::Normalisation => folded.extend(contribution.groups),
                    Fold::Standalone { prefix } => standalone.push((prefix, contribution.groups)),
                }
            }
        }

        let normalisation = Normalisation {
            luminosity,
            factors: vec![GEN_WEIGHT_COLUMN.to_string(), CROSS_SECTION_COLUMN.to_string()],
            denominator,
            caches: &request.caches,
        };
        let normalisation = compose(
            store,
            &folded,
            Some(&normalisation),
            &ComposeOptions {
                prefix: request.prefix.clone(),
                return_variations,
            },
        )?;
        let standalone = standalone
            .into_iter()
            .map(|(prefix, groups)| {
                compose(
                    &mut *store,
                    &groups,
                    None,
                    &ComposeOptions {
                        prefix,
                        return_variations,
                    },
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let output = NormalisationOutput {
            normalisation,
            standalone,
        };
        self.state = PipelineState::WeightsComposed;
        info!(
            dataset = %self.dataset,
            syst = %request.syst_name,
            branches = output.branches().len(),
            "normalisation weights defined"
        );
        Ok(output)
    }
}

fn unsupported_dispatch(name: &str, domain: &Domain, kind: &str) -> SystError {
    SystError::Provider(
        ErrorInfo::new(
            codes::UNSUPPORTED_CONFIGURATION,
            "provider does not advertise the requested capability",
        )
        .with_context("correction", name)
        .with_context("domain", domain.as_str())
        .with_context("capability", kind),
    )
}
