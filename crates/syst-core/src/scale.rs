//! Scale taxonomy: the {Central, Up, Down} vocabulary and the canonical
//! naming rules for (source, scale) pairs.
//!
//! A systematic name is `Central` for the nominal pair and `source + scale`
//! otherwise. [`systematic_name`] and [`split_systematic_name`] are exact
//! inverses over every pair accepted by the taxonomy.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{codes, ErrorInfo, SystError};
use crate::era::Era;

/// Literal used for the central source, the central scale and the central
/// systematic name.
pub const CENTRAL: &str = "Central";

/// Direction of a one-sigma shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scale {
    /// No variation.
    Central,
    /// One-sigma upward shift.
    Up,
    /// One-sigma downward shift.
    Down,
}

impl Scale {
    /// Canonical spelling, also used as the systematic-name suffix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scale::Central => CENTRAL,
            Scale::Up => "Up",
            Scale::Down => "Down",
        }
    }

    /// Signed direction (-1, 0, +1) used by shift formulas.
    pub fn sign(&self) -> f64 {
        match self {
            Scale::Central => 0.0,
            Scale::Up => 1.0,
            Scale::Down => -1.0,
        }
    }
}

impl Display for Scale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scale {
    type Err = SystError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            CENTRAL => Ok(Scale::Central),
            "Up" => Ok(Scale::Up),
            "Down" => Ok(Scale::Down),
            other => Err(SystError::Naming(
                ErrorInfo::new(codes::UNPARSABLE_SCALE, "unparsable scale")
                    .with_context("scale", other),
            )),
        }
    }
}

const VARIED: [Scale; 2] = [Scale::Up, Scale::Down];
const NOMINAL: [Scale; 1] = [Scale::Central];

/// Name of an independent origin of systematic uncertainty.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Source(String);

impl Source {
    /// Wraps a raw source name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The distinguished no-variation source.
    pub fn central() -> Self {
        Self(CENTRAL.to_string())
    }

    /// Returns the raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the central source.
    pub fn is_central(&self) -> bool {
        self.0 == CENTRAL
    }

    /// Whether the name is a per-period template (trailing `_`).
    pub fn is_templated(&self) -> bool {
        self.0.len() > 1 && self.0.ends_with('_')
    }

    /// Effective name for the given era: templated sources get the era year
    /// appended, every other source is returned unchanged.
    pub fn resolve(&self, era: &Era) -> Source {
        if self.is_templated() {
            Source(format!("{}{}", self.0, era.year()))
        } else {
            self.clone()
        }
    }

    /// Returns a copy of the source with `prefix` prepended; central stays central.
    pub fn prefixed(&self, prefix: &str) -> Source {
        if self.is_central() || prefix.is_empty() {
            self.clone()
        } else {
            Source(format!("{prefix}{}", self.0))
        }
    }
}

impl Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Source {
    fn from(value: &str) -> Self {
        Source::new(value)
    }
}

impl From<String> for Source {
    fn from(value: String) -> Self {
        Source::new(value)
    }
}

/// Scales that are meaningful for `source`: `[Central]` for the central
/// source and `[Up, Down]` otherwise.
pub fn scales_for(source: &Source) -> &'static [Scale] {
    if source.is_central() {
        &NOMINAL
    } else {
        &VARIED
    }
}

/// Checks that `scale` is valid for `source`.
pub fn check_pair(source: &Source, scale: Scale) -> Result<(), SystError> {
    if source.as_str().is_empty() {
        return Err(SystError::Naming(
            ErrorInfo::new(codes::INCONSISTENT_VARIATION, "empty source name")
                .with_context("scale", scale.as_str()),
        ));
    }
    if scales_for(source).contains(&scale) {
        Ok(())
    } else {
        Err(SystError::Naming(
            ErrorInfo::new(
                codes::INCONSISTENT_VARIATION,
                "inconsistent source:scale combination",
            )
            .with_context("source", source.as_str())
            .with_context("scale", scale.as_str()),
        ))
    }
}

/// Derives the canonical systematic name for `(source, scale)`.
pub fn systematic_name(source: &Source, scale: Scale) -> Result<String, SystError> {
    check_pair(source, scale)?;
    if source.is_central() {
        Ok(CENTRAL.to_string())
    } else {
        Ok(format!("{}{}", source.as_str(), scale.as_str()))
    }
}

/// Splits a systematic name back into its `(source, scale)` pair.
pub fn split_systematic_name(name: &str) -> Result<(Source, Scale), SystError> {
    if name == CENTRAL {
        return Ok((Source::central(), Scale::Central));
    }
    for scale in VARIED {
        if let Some(source) = name.strip_suffix(scale.as_str()) {
            if source.is_empty() {
                break;
            }
            let source = Source::new(source);
            check_pair(&source, scale)?;
            return Ok((source, scale));
        }
    }
    Err(SystError::Naming(
        ErrorInfo::new(
            codes::UNPARSABLE_SYSTEMATIC_NAME,
            "cannot split systematic name",
        )
        .with_context("name", name)
        .with_hint("expected `Central` or a source name followed by `Up`/`Down`"),
    ))
}

/// Validated systematic name carrying its decomposition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SystName {
    name: String,
    source: Source,
    scale: Scale,
}

impl SystName {
    /// The central systematic.
    pub fn central() -> Self {
        Self {
            name: CENTRAL.to_string(),
            source: Source::central(),
            scale: Scale::Central,
        }
    }

    /// Builds the name for a validated pair.
    pub fn new(source: &Source, scale: Scale) -> Result<Self, SystError> {
        let name = systematic_name(source, scale)?;
        Ok(Self {
            name,
            source: source.clone(),
            scale,
        })
    }

    /// Parses and validates an existing name.
    pub fn parse(name: &str) -> Result<Self, SystError> {
        let (source, scale) = split_systematic_name(name)?;
        Ok(Self {
            name: name.to_string(),
            source,
            scale,
        })
    }

    /// The canonical string.
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Source half of the pair.
    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Scale half of the pair.
    pub fn scale(&self) -> Scale {
        self.scale
    }

    /// Whether this is the central systematic.
    pub fn is_central(&self) -> bool {
        self.scale == Scale::Central
    }
}

impl Display for SystName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

impl TryFrom<String> for SystName {
    type Error = SystError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        SystName::parse(&value)
    }
}

impl From<SystName> for String {
    fn from(value: SystName) -> Self {
        value.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn central_pair_names_central() {
        let name = systematic_name(&Source::central(), Scale::Central).unwrap();
        assert_eq!(name, "Central");
        assert_eq!(
            split_systematic_name(&name).unwrap(),
            (Source::central(), Scale::Central)
        );
    }

    #[test]
    fn source_ending_in_scale_suffix_splits_once() {
        let source = Source::new("fooUp");
        let name = systematic_name(&source, Scale::Down).unwrap();
        assert_eq!(name, "fooUpDown");
        assert_eq!(split_systematic_name(&name).unwrap(), (source, Scale::Down));
    }

    #[test]
    fn scale_strings_parse_strictly() {
        assert_eq!("Down".parse::<Scale>().unwrap(), Scale::Down);
        let err = "Sideways".parse::<Scale>().unwrap_err();
        assert_eq!(err.code(), codes::UNPARSABLE_SCALE);
        assert_eq!(err.info().context["scale"], "Sideways");
    }

    #[test]
    fn bare_suffix_is_unparsable() {
        let err = split_systematic_name("Up").unwrap_err();
        assert_eq!(err.code(), codes::UNPARSABLE_SYSTEMATIC_NAME);
    }

    #[test]
    fn central_with_suffix_is_inconsistent() {
        let err = split_systematic_name("CentralUp").unwrap_err();
        assert_eq!(err.code(), codes::INCONSISTENT_VARIATION);
    }

    #[test]
    fn prefixed_keeps_central() {
        assert!(Source::central().prefixed("JES_").is_central());
        assert_eq!(Source::new("Total").prefixed("JES_").as_str(), "JES_Total");
    }
}
