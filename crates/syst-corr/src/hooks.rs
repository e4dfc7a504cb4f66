//! Analysis processors supplying the cross-section and the denominators.
//!
//! Exactly one processor of a session may implement each hook.

use std::collections::BTreeMap;

use syst_core::errors::{codes, ErrorInfo, SystError};
use syst_core::{ColumnStore, Formula, Scale, Source, SystName};
use tracing::info;

use crate::weights::{AnaCaches, DenominatorHook};

/// Defines the per-event cross-section column for a dataset.
pub trait CrossSectionHook: Send + Sync {
    /// Defines `column` in `store` for `dataset`.
    fn define_cross_section(
        &self,
        store: &mut dyn ColumnStore,
        column: &str,
        dataset: &str,
    ) -> Result<(), SystError>;
}

/// Analysis-specific processor. Hooks it does not implement return `None`.
pub trait AnalysisProcessor: Send + Sync {
    /// Processor name used in diagnostics.
    fn name(&self) -> &str;

    /// Cross-section hook, if this processor implements it.
    fn cross_section(&self) -> Option<&dyn CrossSectionHook> {
        None
    }

    /// Denominator hook, if this processor implements it.
    fn denominator(&self) -> Option<&dyn DenominatorHook> {
        None
    }
}

fn single<'a, T: ?Sized>(
    hook: &str,
    dataset: &str,
    processors: &'a [&'a dyn AnalysisProcessor],
    pick: impl Fn(&'a dyn AnalysisProcessor) -> Option<&'a T>,
) -> Result<&'a T, SystError> {
    let found: Vec<(&str, &T)> = processors
        .iter()
        .filter_map(|proc| pick(*proc).map(|h| (proc.name(), h)))
        .collect();
    match found.as_slice() {
        [(name, hook_impl)] => {
            info!(processor = %name, dataset, hook, "using processor");
            Ok(*hook_impl)
        }
        [] => Err(SystError::Configuration(
            ErrorInfo::new(codes::HOOK_RESOLUTION, "no processor implements hook")
                .with_context("hook", hook),
        )),
        many => Err(SystError::Configuration(
            ErrorInfo::new(codes::HOOK_RESOLUTION, "multiple processors implement hook")
                .with_context("hook", hook)
                .with_context(
                    "processors",
                    many.iter().map(|(name, _)| *name).collect::<Vec<_>>().join(", "),
                ),
        )),
    }
}

/// The one processor implementing the cross-section hook.
pub fn cross_section_hook<'a>(
    processors: &'a [&'a dyn AnalysisProcessor],
    dataset: &str,
) -> Result<&'a dyn CrossSectionHook, SystError> {
    single("cross_section", dataset, processors, |proc| proc.cross_section())
}

/// The one processor implementing the denominator hook.
pub fn denominator_hook<'a>(
    processors: &'a [&'a dyn AnalysisProcessor],
    dataset: &str,
) -> Result<&'a dyn DenominatorHook, SystError> {
    single("denominator", dataset, processors, |proc| proc.denominator())
}

/// Processor with fixed cross-section and per-systematic denominators.
///
/// Sources without an explicit denominator reuse the Central one.
#[derive(Debug, Clone, PartialEq)]
pub struct FixedNormalisation {
    name: String,
    cross_section: f64,
    denominators: BTreeMap<String, f64>,
}

impl FixedNormalisation {
    /// Processor with a constant cross-section and a Central denominator.
    pub fn new(name: impl Into<String>, cross_section: f64, central_denominator: f64) -> Self {
        let mut denominators = BTreeMap::new();
        denominators.insert(syst_core::CENTRAL.to_string(), central_denominator);
        Self {
            name: name.into(),
            cross_section,
            denominators,
        }
    }

    /// Dedicated denominator for one systematic name.
    pub fn with_denominator(mut self, syst: &SystName, value: f64) -> Self {
        self.denominators.insert(syst.as_str().to_string(), value);
        self
    }
}

impl AnalysisProcessor for FixedNormalisation {
    fn name(&self) -> &str {
        &self.name
    }

    fn cross_section(&self) -> Option<&dyn CrossSectionHook> {
        Some(self)
    }

    fn denominator(&self) -> Option<&dyn DenominatorHook> {
        Some(self)
    }
}

impl CrossSectionHook for FixedNormalisation {
    fn define_cross_section(
        &self,
        store: &mut dyn ColumnStore,
        column: &str,
        _dataset: &str,
    ) -> Result<(), SystError> {
        store.define(column, Formula::constant(self.cross_section))
    }
}

impl DenominatorHook for FixedNormalisation {
    fn has_dedicated(&self, source: &Source) -> bool {
        source.is_central()
            || [Scale::Up, Scale::Down].iter().any(|scale| {
                SystName::new(source, *scale)
                    .map(|syst| self.denominators.contains_key(syst.as_str()))
                    .unwrap_or(false)
            })
    }

    fn define_denominator(
        &self,
        store: &mut dyn ColumnStore,
        column: &str,
        source: &Source,
        scale: Scale,
        _caches: &AnaCaches,
    ) -> Result<(), SystError> {
        let syst = SystName::new(source, scale)?;
        let value = self
            .denominators
            .get(syst.as_str())
            .or_else(|| self.denominators.get(syst_core::CENTRAL))
            .copied()
            .unwrap_or(1.0);
        store.define(column, Formula::constant(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct XsOnly;

    impl AnalysisProcessor for XsOnly {
        fn name(&self) -> &str {
            "xs_only"
        }

        fn cross_section(&self) -> Option<&dyn CrossSectionHook> {
            Some(self)
        }
    }

    impl CrossSectionHook for XsOnly {
        fn define_cross_section(
            &self,
            store: &mut dyn ColumnStore,
            column: &str,
            _dataset: &str,
        ) -> Result<(), SystError> {
            store.define(column, Formula::constant(1.0))
        }
    }

    #[test]
    fn exactly_one_processor_per_hook() {
        let fixed = FixedNormalisation::new("fixed", 2.0, 1.0);
        let xs = XsOnly;

        let processors: [&dyn AnalysisProcessor; 1] = [&xs];
        assert!(cross_section_hook(&processors, "DY").is_ok());
        let err = denominator_hook(&processors, "DY").err().expect("no denominator hook");
        assert_eq!(err.code(), codes::HOOK_RESOLUTION);

        let processors: [&dyn AnalysisProcessor; 2] = [&xs, &fixed];
        let err = cross_section_hook(&processors, "DY").err().expect("two cross-section hooks");
        assert_eq!(err.code(), codes::HOOK_RESOLUTION);
        assert_eq!(err.info().context["processors"], "xs_only, fixed");
        assert!(denominator_hook(&processors, "DY").is_ok());
    }

    #[test]
    fn dedicated_denominators_are_per_source() {
        let up = SystName::parse("puUp").unwrap();
        let fixed = FixedNormalisation::new("fixed", 2.0, 1.0).with_denominator(&up, 3.0);
        assert!(fixed.has_dedicated(&Source::central()));
        assert!(fixed.has_dedicated(&Source::new("pu")));
        assert!(!fixed.has_dedicated(&Source::new("tauID")));
    }
}
