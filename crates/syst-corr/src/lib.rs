#![deny(missing_docs)]
#![doc = "Correction selection, provider lifecycle, variation bookkeeping and weight composition."]

/// Built-in providers and MET propagation.
pub mod builtin;
/// Layered YAML configuration.
pub mod config;
/// Non-fatal findings surfaced to callers.
pub mod diagnostics;
/// Correction name to handler dispatch table.
pub mod handlers;
/// Analysis processor hooks.
pub mod hooks;
/// Memoizing provider registry.
pub mod provider;
/// Stage-aware correction selection.
pub mod selector;
/// Per-dataset pipeline driver.
pub mod session;
/// Kinematic variation registry.
pub mod variations;
/// Weight composition.
pub mod weights;

pub use builtin::{
    propagate_met, BranchWeightProvider, LegSet, ShiftTableProvider, MET_COLLECTION,
};
pub use config::{load_layer, load_layers, Layer, LayerConfig, LayeredConfig};
pub use diagnostics::Diagnostic;
pub use handlers::{
    CorrectionHandler, Fold, HandlerTable, KinematicScope, WeightContribution, WeightScope,
};
pub use hooks::{
    cross_section_hook, denominator_hook, AnalysisProcessor, CrossSectionHook, FixedNormalisation,
};
pub use provider::{Capabilities, Domain, Provider, ProviderHandle, ProviderRegistry, PtVariant};
pub use selector::{resolve, CorrectionEntry, Resolution, StageSet};
pub use session::{
    DatasetSession, GenWeightPolicy, NormalisationOutput, NormalisationRequest, PipelineState,
};
pub use variations::{CollectionRequest, ResolvedVariations, VariationRegistry};
pub use weights::{
    compose, denominator_column, AnaCaches, ComposeOptions, ComposedWeights, DenominatorHook,
    Normalisation, RelativeWeight, WeightGroup,
};
