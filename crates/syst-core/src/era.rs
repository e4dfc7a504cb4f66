//! Data-taking periods and their calibration campaigns.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{codes, ErrorInfo, SystError};

/// One row of the era table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EraRow {
    name: &'static str,
    campaign: &'static str,
    year: &'static str,
    run3: bool,
}

const ERA_TABLE: &[EraRow] = &[
    EraRow {
        name: "Run2_2016_HIPM",
        campaign: "2016preVFP_UL",
        year: "2016",
        run3: false,
    },
    EraRow {
        name: "Run2_2016",
        campaign: "2016postVFP_UL",
        year: "2016",
        run3: false,
    },
    EraRow {
        name: "Run2_2017",
        campaign: "2017_UL",
        year: "2017",
        run3: false,
    },
    EraRow {
        name: "Run2_2018",
        campaign: "2018_UL",
        year: "2018",
        run3: false,
    },
    EraRow {
        name: "Run3_2022",
        campaign: "2022_Summer22",
        year: "2022",
        run3: true,
    },
    EraRow {
        name: "Run3_2022EE",
        campaign: "2022_Summer22EE",
        year: "2022",
        run3: true,
    },
    EraRow {
        name: "Run3_2023",
        campaign: "2023_Summer23",
        year: "2023",
        run3: true,
    },
    EraRow {
        name: "Run3_2023BPix",
        campaign: "2023_Summer23BPix",
        year: "2023",
        run3: true,
    },
    EraRow {
        name: "Run4_2024",
        campaign: "2024_Summer24",
        year: "2024",
        run3: true,
    },
];

/// Analysis era looked up from the static era table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Era {
    row: &'static EraRow,
}

impl Era {
    /// Looks up an era by its identifier, e.g. `Run2_2018`.
    pub fn parse(name: &str) -> Result<Self, SystError> {
        ERA_TABLE
            .iter()
            .find(|row| row.name == name)
            .map(|row| Era { row })
            .ok_or_else(|| {
                SystError::Configuration(
                    ErrorInfo::new(codes::UNKNOWN_ERA, "era not present in era table")
                        .with_context("era", name)
                        .with_hint(format!("known eras: {}", Era::known().join(", "))),
                )
            })
    }

    /// Identifiers of every known era, in table order.
    pub fn known() -> Vec<&'static str> {
        ERA_TABLE.iter().map(|row| row.name).collect()
    }

    /// Era identifier, e.g. `Run2_2018`.
    pub fn name(&self) -> &'static str {
        self.row.name
    }

    /// Calibration campaign tag used by the providers.
    pub fn campaign(&self) -> &'static str {
        self.row.campaign
    }

    /// Year appended to templated sources.
    pub fn year(&self) -> &'static str {
        self.row.year
    }

    /// Whether the era belongs to LHC Run 3 or later.
    pub fn is_run3(&self) -> bool {
        self.row.run3
    }
}

impl Display for Era {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.row.name)
    }
}

impl FromStr for Era {
    type Err = SystError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Era::parse(s)
    }
}

impl TryFrom<String> for Era {
    type Error = SystError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Era::parse(&value)
    }
}

impl From<Era> for String {
    fn from(value: Era) -> Self {
        value.row.name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::Source;

    #[test]
    fn templated_source_takes_era_year() {
        let era = Era::parse("Run2_2018").unwrap();
        assert_eq!(era.campaign(), "2018_UL");
        let source = Source::new("BBEC1_");
        assert_eq!(source.resolve(&era).as_str(), "BBEC1_2018");
        assert_eq!(Source::new("Total").resolve(&era).as_str(), "Total");
    }

    #[test]
    fn unknown_era_is_configuration_error() {
        let err = Era::parse("Run1_2012").unwrap_err();
        assert_eq!(err.code(), codes::UNKNOWN_ERA);
    }

    #[test]
    fn run3_flag_follows_table() {
        assert!(!Era::parse("Run2_2016_HIPM").unwrap().is_run3());
        assert!(Era::parse("Run3_2022EE").unwrap().is_run3());
    }
}
