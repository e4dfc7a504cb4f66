#![deny(missing_docs)]
#![doc = "Core vocabulary for systematic-variation bookkeeping: scale taxonomy, era table, error surface and the column-store contract."]

/// Column-store contract and formulas.
pub mod column;
/// Era table.
pub mod era;
/// Error surface and stable codes.
pub mod errors;
/// Canonical hashing helpers.
pub mod hash;
/// In-memory column store.
pub mod memory;
/// Scale taxonomy and systematic names.
pub mod scale;
/// Canonical JSON and YAML helpers.
pub mod serde;

pub use column::{ColumnStore, Formula, FormulaOp, MapFn, Value, P4};
pub use era::Era;
pub use errors::{codes, ErrorInfo, SystError};
pub use hash::stable_hash_string;
pub use memory::MemoryFrame;
pub use scale::{
    scales_for, split_systematic_name, systematic_name, Scale, Source, SystName, CENTRAL,
};

/// Column holding the unmodified input momenta of `collection`.
pub fn nano_p4_column(collection: &str) -> String {
    p4_column(collection, "nano")
}

/// Column holding the momenta of `collection` under `variant`.
pub fn p4_column(collection: &str, variant: &str) -> String {
    format!("{collection}_p4_{variant}")
}
