//! Weight composition.
//!
//! Independent per-source scale-factor branches are folded into one central
//! composite and, for every non-central (source, scale) pair, one relative
//! weight `composite(syst) / composite(Central)`. A group without an entry
//! for a given pair contributes its central branches. Composites are built in
//! `f64`; only the output branches are narrowed to `f32`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use syst_core::errors::{codes, ErrorInfo, SystError};
use syst_core::{scales_for, stable_hash_string, ColumnStore, Formula, Scale, Source, SystName};
use tracing::debug;

/// Default prefix of the normalisation weight family.
pub const DEFAULT_PREFIX: &str = "weight_MC_Lumi";

/// Opaque analysis caches handed to the denominator collaborator.
pub type AnaCaches = BTreeMap<String, serde_json::Value>;

/// Column name of the denominator for `syst`.
pub fn denominator_column(syst: &SystName) -> String {
    format!("__denom_{}", syst.as_str())
}

/// Scale-factor branches of one provider, keyed by (source, scale).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightGroup {
    /// Label used in errors, usually the central branch.
    pub label: String,
    entries: Vec<(Source, Scale, Vec<String>)>,
}

impl WeightGroup {
    /// Group without entries.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            entries: Vec::new(),
        }
    }

    /// Appends (or extends) the branches of `(source, scale)`.
    pub fn push(&mut self, source: Source, scale: Scale, branch: impl Into<String>) {
        let branch = branch.into();
        match self
            .entries
            .iter_mut()
            .find(|(s, sc, _)| s == &source && *sc == scale)
        {
            Some((_, _, branches)) => branches.push(branch),
            None => self.entries.push((source, scale, vec![branch])),
        }
    }

    /// Builder form of [`WeightGroup::push`].
    pub fn with(mut self, source: impl Into<Source>, scale: Scale, branch: impl Into<String>) -> Self {
        self.push(source.into(), scale, branch);
        self
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = (&Source, Scale, &[String])> {
        self.entries
            .iter()
            .map(|(source, scale, branches)| (source, *scale, branches.as_slice()))
    }

    /// Branches registered for `(source, scale)`.
    pub fn branches(&self, source: &Source, scale: Scale) -> Option<&[String]> {
        self.entries
            .iter()
            .find(|(s, sc, _)| s == source && *sc == scale)
            .map(|(_, _, branches)| branches.as_slice())
    }

    /// Branches of the (Central, Central) entry.
    pub fn central(&self) -> Option<&[String]> {
        self.branches(&Source::central(), Scale::Central)
    }

    /// Whether no entry was added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks every entry against the taxonomy and the central anchor rule.
    pub fn validate(&self) -> Result<(), SystError> {
        for (source, scale, _) in &self.entries {
            if !scales_for(source).contains(scale) {
                return Err(SystError::Naming(
                    ErrorInfo::new(codes::UNKNOWN_SCALE_FOR_SOURCE, "scale not valid for source")
                        .with_context("group", self.label.as_str())
                        .with_context("source", source.as_str())
                        .with_context("scale", scale.as_str()),
                ));
            }
        }
        if self.central().is_none() {
            if let Some((source, scale, _)) = self.entries.first() {
                return Err(SystError::Anchor(
                    ErrorInfo::new(
                        codes::MISSING_CENTRAL_FOR_SOURCE,
                        "weight group has variations but no central branches",
                    )
                    .with_context("group", self.label.as_str())
                    .with_context("source", source.as_str())
                    .with_context("scale", scale.as_str()),
                ));
            }
        }
        Ok(())
    }
}

/// External collaborator defining one denominator column per call.
pub trait DenominatorHook: Send + Sync {
    /// Whether a dedicated denominator exists for `source`. When it does not,
    /// the Central denominator is reused.
    fn has_dedicated(&self, _source: &Source) -> bool {
        true
    }

    /// Defines exactly one new scalar column named `column`.
    fn define_denominator(
        &self,
        store: &mut dyn ColumnStore,
        column: &str,
        source: &Source,
        scale: Scale,
        caches: &AnaCaches,
    ) -> Result<(), SystError>;
}

/// Flat factors and denominators of the normalisation family.
pub struct Normalisation<'a> {
    /// Integrated luminosity, a constant factor of every composite.
    pub luminosity: f64,
    /// Scalar columns multiplied into every composite (generator weight, cross-section).
    pub factors: Vec<String>,
    /// Analysis hook defining the denominators.
    pub denominator: &'a dyn DenominatorHook,
    /// Cache the denominator hook reads from.
    pub caches: &'a AnaCaches,
}

/// Output naming and variation switch of [`compose`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposeOptions {
    /// Branch prefix, `weight_MC_Lumi` by default.
    pub prefix: String,
    /// Whether relative weights are produced at all.
    pub return_variations: bool,
}

impl Default for ComposeOptions {
    fn default() -> Self {
        Self {
            prefix: DEFAULT_PREFIX.to_string(),
            return_variations: true,
        }
    }
}

/// Relative weight of one systematic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeWeight {
    /// Systematic the weight belongs to.
    pub systematic: SystName,
    /// `f64` composite at this variation.
    pub composite: String,
    /// `f32` output branch.
    pub branch: String,
}

/// Branch names defined by one [`compose`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComposedWeights {
    /// Prefix shared by every branch.
    pub prefix: String,
    /// `f32` central output branch.
    pub central: String,
    /// `f64` central composite.
    pub central_composite: String,
    /// Relative weights in variation order.
    pub relative: Vec<RelativeWeight>,
    /// Denominator columns, Central first.
    pub denominators: Vec<String>,
}

impl ComposedWeights {
    /// Output branches: central first, then relative weights in variation order.
    pub fn branches(&self) -> Vec<String> {
        std::iter::once(self.central.clone())
            .chain(self.relative.iter().map(|r| r.branch.clone()))
            .collect()
    }

    /// Central branch a relative branch of this family is anchored on.
    pub fn central_counterpart(&self, branch: &str) -> Result<String, SystError> {
        let syst = branch
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.strip_suffix("_rel"))
            .ok_or_else(|| {
                SystError::Naming(
                    ErrorInfo::new(codes::UNPARSABLE_SYSTEMATIC_NAME, "not a relative weight branch")
                        .with_context("branch", branch)
                        .with_context("prefix", self.prefix.as_str()),
                )
            })?;
        let syst = SystName::parse(syst)?;
        if syst.is_central() {
            return Err(SystError::Naming(
                ErrorInfo::new(codes::INCONSISTENT_VARIATION, "central weight has no relative form")
                    .with_context("branch", branch),
            ));
        }
        Ok(central_branch(&self.prefix))
    }

    /// Stable hash of the output schema.
    pub fn schema_hash(&self) -> Result<String, SystError> {
        stable_hash_string(&self.branches())
    }
}

fn central_branch(prefix: &str) -> String {
    format!("{prefix}_{}", syst_core::CENTRAL)
}

/// Distinct non-central (source, scale) pairs in group then entry order.
fn variations(groups: &[WeightGroup]) -> Vec<(Source, Scale)> {
    let mut seen: Vec<(Source, Scale)> = Vec::new();
    for group in groups {
        for (source, scale, _) in group.entries() {
            if scale != Scale::Central && !seen.iter().any(|(s, sc)| s == source && *sc == scale) {
                seen.push((source.clone(), scale));
            }
        }
    }
    seen
}

/// Scale-factor branches at `(source, scale)`, falling back to each group's central ones.
fn branches_at(groups: &[WeightGroup], source: &Source, scale: Scale) -> Vec<String> {
    groups
        .iter()
        .flat_map(|group| {
            group
                .branches(source, scale)
                .or_else(|| group.central())
                .unwrap_or(&[])
                .iter()
                .cloned()
        })
        .collect()
}

fn define_denominator(
    store: &mut dyn ColumnStore,
    norm: &Normalisation<'_>,
    syst: &SystName,
    defined: &mut Vec<String>,
) -> Result<String, SystError> {
    let column = denominator_column(syst);
    if store.has_column(&column) {
        defined.push(column.clone());
        return Ok(column);
    }
    if !syst.is_central() && !norm.denominator.has_dedicated(syst.source()) {
        let central = denominator_column(&SystName::central());
        debug!(column = %column, "reusing central denominator");
        store.define(&column, Formula::alias(central))?;
    } else {
        norm.denominator
            .define_denominator(store, &column, syst.source(), syst.scale(), norm.caches)?;
        if !store.has_column(&column) {
            return Err(SystError::Anchor(
                ErrorInfo::new(codes::MISSING_DENOMINATOR, "denominator hook did not define its column")
                    .with_context("column", column.as_str())
                    .with_context("source", syst.source().as_str())
                    .with_context("scale", syst.scale().as_str()),
            ));
        }
    }
    defined.push(column.clone());
    Ok(column)
}

fn composite_formula(
    norm: Option<&Normalisation<'_>>,
    branches: Vec<String>,
    denominator: Option<String>,
) -> Formula {
    match norm {
        Some(norm) => {
            let numerators = norm.factors.iter().cloned().chain(branches);
            Formula::monomial(norm.luminosity, numerators, denominator)
        }
        None => Formula::product(branches),
    }
}

/// Folds `groups` into composite and relative weight branches.
pub fn compose(
    store: &mut dyn ColumnStore,
    groups: &[WeightGroup],
    normalisation: Option<&Normalisation<'_>>,
    options: &ComposeOptions,
) -> Result<ComposedWeights, SystError> {
    for group in groups {
        group.validate()?;
    }
    let prefix = options.prefix.as_str();
    let mut denominators = Vec::new();

    let central = SystName::central();
    let central_denom = match normalisation {
        Some(norm) => Some(define_denominator(store, norm, &central, &mut denominators)?),
        None => None,
    };
    let central_composite = format!("{prefix}_{}_double", central.as_str());
    store.define(
        &central_composite,
        composite_formula(
            normalisation,
            branches_at(groups, &Source::central(), Scale::Central),
            central_denom,
        ),
    )?;
    let central_out = central_branch(prefix);
    store.define(&central_out, Formula::narrow(central_composite.as_str()))?;

    let mut relative = Vec::new();
    if options.return_variations {
        for (source, scale) in variations(groups) {
            let syst = SystName::new(&source, scale)?;
            let denom = match normalisation {
                Some(norm) => Some(define_denominator(store, norm, &syst, &mut denominators)?),
                None => None,
            };
            let composite = format!("{prefix}_{}_double", syst.as_str());
            store.define(
                &composite,
                composite_formula(normalisation, branches_at(groups, &source, scale), denom),
            )?;
            let branch = format!("{prefix}_{}_rel", syst.as_str());
            store.define(
                &branch,
                Formula::ratio([composite.as_str()], [central_composite.as_str()]).narrowed(),
            )?;
            relative.push(RelativeWeight {
                systematic: syst,
                composite,
                branch,
            });
        }
    }

    debug!(
        prefix,
        groups = groups.len(),
        variations = relative.len(),
        "weights composed"
    );
    Ok(ComposedWeights {
        prefix: prefix.to_string(),
        central: central_out,
        central_composite,
        relative,
        denominators,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variations_follow_group_then_entry_order() {
        let groups = vec![
            WeightGroup::new("pu")
                .with("Central", Scale::Central, "puWeight")
                .with("pu", Scale::Up, "puWeightUp")
                .with("pu", Scale::Down, "puWeightDown"),
            WeightGroup::new("tau")
                .with("Central", Scale::Central, "tauSF")
                .with("tauID", Scale::Down, "tauSFDown")
                .with("pu", Scale::Up, "tauSFpuUp"),
        ];
        let order: Vec<String> = variations(&groups)
            .into_iter()
            .map(|(source, scale)| format!("{source}{scale}"))
            .collect();
        assert_eq!(order, vec!["puUp", "puDown", "tauIDDown"]);
        assert_eq!(
            branches_at(&groups, &Source::new("tauID"), Scale::Down),
            vec!["puWeight", "tauSFDown"]
        );
        assert_eq!(
            branches_at(&groups, &Source::new("pu"), Scale::Up),
            vec!["puWeightUp", "tauSFpuUp"]
        );
    }

    #[test]
    fn group_without_central_is_rejected() {
        let group = WeightGroup::new("pu").with("pu", Scale::Up, "puWeightUp");
        assert_eq!(group.validate().unwrap_err().code(), codes::MISSING_CENTRAL_FOR_SOURCE);
    }
}
