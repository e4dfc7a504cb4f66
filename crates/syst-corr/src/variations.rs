//! Registry of kinematic-variation sources and the collections they perturb.
//!
//! After every kinematic provider registered its effect, [`VariationRegistry::resolve`]
//! gives each requested collection a momentum column under every declared
//! systematic name, aliasing the nominal momentum where the source does not
//! touch the collection.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use syst_core::errors::{codes, ErrorInfo, SystError};
use syst_core::{nano_p4_column, p4_column, scales_for, ColumnStore, Formula, Source, SystName};
use tracing::debug;

use crate::diagnostics::{self, Diagnostic};

/// Collection requested by the analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionRequest {
    /// Collection name, e.g. `Jet`.
    pub name: String,
    /// Sparse collections may lack a nominal momentum column.
    #[serde(default)]
    pub sparse: bool,
}

impl CollectionRequest {
    /// Collection whose nominal momenta must exist.
    pub fn dense(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sparse: false,
        }
    }

    /// Collection that may be absent from the input.
    pub fn sparse(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            sparse: true,
        }
    }
}

impl From<&str> for CollectionRequest {
    fn from(value: &str) -> Self {
        CollectionRequest::dense(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SourceEntry {
    source: Source,
    collections: BTreeSet<String>,
}

/// Ordered map from effective source to the collections it perturbs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariationRegistry {
    entries: Vec<SourceEntry>,
}

impl Default for VariationRegistry {
    fn default() -> Self {
        Self {
            entries: vec![SourceEntry {
                source: Source::central(),
                collections: BTreeSet::new(),
            }],
        }
    }
}

/// Result of [`VariationRegistry::resolve`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVariations {
    /// Every declared systematic name, Central first.
    pub systematics: Vec<SystName>,
    /// Nominal aliases defined by this call.
    pub aliases: Vec<String>,
    /// Sparse collections skipped for lack of a nominal column.
    pub diagnostics: Vec<Diagnostic>,
}

impl VariationRegistry {
    /// Registry holding only the Central source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `source` perturbs `collection`.
    pub fn register(&mut self, source: &Source, collection: &str) -> Result<(), SystError> {
        let entry = match self.entries.iter_mut().position(|e| &e.source == source) {
            Some(idx) => &mut self.entries[idx],
            None => {
                self.entries.push(SourceEntry {
                    source: source.clone(),
                    collections: BTreeSet::new(),
                });
                let last = self.entries.len() - 1;
                &mut self.entries[last]
            }
        };
        if !entry.collections.insert(collection.to_string()) {
            return Err(SystError::Variation(
                ErrorInfo::new(
                    codes::DUPLICATE_VARIATION_REGISTRATION,
                    "duplicated source definition for collection",
                )
                .with_context("source", source.as_str())
                .with_context("collection", collection),
            ));
        }
        Ok(())
    }

    /// Whether `source` perturbs `collection`.
    pub fn is_registered(&self, source: &Source, collection: &str) -> bool {
        self.collections(source)
            .map(|collections| collections.contains(collection))
            .unwrap_or(false)
    }

    /// Collections perturbed by `source`, if it is registered.
    pub fn collections(&self, source: &Source) -> Option<&BTreeSet<String>> {
        self.entries
            .iter()
            .find(|entry| &entry.source == source)
            .map(|entry| &entry.collections)
    }

    /// Sources in registration order, Central first.
    pub fn sources(&self) -> impl Iterator<Item = &Source> {
        self.entries.iter().map(|entry| &entry.source)
    }

    /// Sources perturbing at least one of `collections`, with the subset they perturb.
    pub fn sources_touching(&self, collections: &[&str]) -> Vec<(Source, Vec<String>)> {
        self.entries
            .iter()
            .map(|entry| {
                let touched = entry
                    .collections
                    .iter()
                    .filter(|c| collections.contains(&c.as_str()))
                    .cloned()
                    .collect::<Vec<_>>();
                (entry.source.clone(), touched)
            })
            .filter(|(_, touched)| !touched.is_empty())
            .collect()
    }

    /// Every systematic name declared by the registered sources.
    pub fn systematic_names(&self) -> Result<Vec<SystName>, SystError> {
        let mut names = Vec::new();
        for source in self.sources() {
            for scale in scales_for(source) {
                names.push(SystName::new(source, *scale)?);
            }
        }
        Ok(names)
    }

    /// Defines the nominal fallbacks for every (systematic, collection) pair
    /// the registered sources do not cover.
    pub fn resolve(
        &self,
        store: &mut dyn ColumnStore,
        collections: &[CollectionRequest],
    ) -> Result<ResolvedVariations, SystError> {
        let systematics = self.systematic_names()?;
        let mut aliases = Vec::new();
        let mut diagnostics = Vec::new();
        let mut skipped = BTreeSet::new();

        for syst in &systematics {
            let perturbed = self.collections(syst.source());
            for request in collections {
                let collection = request.name.as_str();
                if perturbed.map_or(false, |set| set.contains(collection)) {
                    continue;
                }
                let central = p4_column(collection, syst_core::CENTRAL);
                let nominal = if store.has_column(&central) {
                    central
                } else {
                    nano_p4_column(collection)
                };
                if !store.has_column(&nominal) {
                    if request.sparse {
                        if skipped.insert(collection.to_string()) {
                            debug!(collection, "sparse collection without nominal momenta, skipping");
                            diagnostics.push(
                                Diagnostic::new(
                                    diagnostics::SPARSE_COLLECTION_SKIPPED,
                                    format!("collection {collection} has no nominal momenta"),
                                )
                                .with_context("collection", collection)
                                .with_context("column", nominal),
                            );
                        }
                        continue;
                    }
                    return Err(SystError::Variation(
                        ErrorInfo::new(codes::MISSING_NOMINAL_COLUMN, "nominal momentum column missing")
                            .with_context("collection", collection)
                            .with_context("column", nominal)
                            .with_context("systematic", syst.as_str()),
                    ));
                }
                let target = p4_column(collection, syst.as_str());
                if store.has_column(&target) {
                    continue;
                }
                debug!(column = %target, nominal = %nominal, "defining nominal fallback");
                store.define(&target, Formula::alias(nominal))?;
                aliases.push(target);
            }
        }

        Ok(ResolvedVariations {
            systematics,
            aliases,
            diagnostics,
        })
    }
}
