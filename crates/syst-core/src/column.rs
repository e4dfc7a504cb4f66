//! Column-store contract: typed per-event values, lazily evaluated formulas
//! and the minimal define/redefine surface the engine relies on.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::{codes, ErrorInfo, SystError};

/// Four-momentum in collider coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct P4 {
    /// Transverse momentum.
    pub pt: f64,
    /// Pseudorapidity.
    pub eta: f64,
    /// Azimuthal angle.
    pub phi: f64,
    /// Invariant mass.
    pub mass: f64,
}

impl P4 {
    /// Four-momentum from (pt, eta, phi, mass).
    pub fn new(pt: f64, eta: f64, phi: f64, mass: f64) -> Self {
        Self { pt, eta, phi, mass }
    }

    /// Transverse vector with the given components; eta and mass are zero.
    pub fn from_transverse(px: f64, py: f64) -> Self {
        Self {
            pt: px.hypot(py),
            eta: 0.0,
            phi: py.atan2(px),
            mass: 0.0,
        }
    }

    /// Transverse x component.
    pub fn px(&self) -> f64 {
        self.pt * self.phi.cos()
    }

    /// Transverse y component.
    pub fn py(&self) -> f64 {
        self.pt * self.phi.sin()
    }

    /// Scales the full four-vector, leaving direction untouched.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            pt: self.pt * factor,
            eta: self.eta,
            phi: self.phi,
            mass: self.mass * factor,
        }
    }
}

/// Per-event cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Value {
    /// Double precision scalar.
    Scalar(f64),
    /// Single precision scalar, produced only for final output branches.
    Narrow(f32),
    /// Momenta of every object of one collection in the event.
    Momenta(Vec<P4>),
}

impl Value {
    /// Reads a scalar cell as `f64`.
    pub fn as_f64(&self) -> Result<f64, SystError> {
        match self {
            Value::Scalar(v) => Ok(*v),
            Value::Narrow(v) => Ok(f64::from(*v)),
            Value::Momenta(_) => Err(type_mismatch("scalar", "momenta")),
        }
    }

    /// Reads a momenta cell.
    pub fn as_momenta(&self) -> Result<&[P4], SystError> {
        match self {
            Value::Momenta(objects) => Ok(objects),
            Value::Scalar(_) | Value::Narrow(_) => Err(type_mismatch("momenta", "scalar")),
        }
    }
}

fn type_mismatch(expected: &str, found: &str) -> SystError {
    SystError::Column(
        ErrorInfo::new(codes::COLUMN_TYPE, "unexpected value kind")
            .with_context("expected", expected)
            .with_context("found", found),
    )
}

/// Opaque per-event mapping supplied by providers.
pub type MapFn = Arc<dyn Fn(&[Value]) -> Result<Value, SystError> + Send + Sync>;

/// Operation applied to the inputs of a [`Formula`].
#[derive(Clone)]
pub enum FormulaOp {
    /// Copy of the single input.
    Alias,
    /// Fixed scalar, no inputs.
    Constant(f64),
    /// `constant * prod(inputs[..numerators]) / prod(inputs[numerators..])`.
    Monomial {
        /// Scalar factor applied to the quotient.
        constant: f64,
        /// How many leading inputs are numerators.
        numerators: usize,
    },
    /// Sign of the single scalar input (`copysign(1, x)`).
    Sign,
    /// Provider supplied mapping.
    Map {
        /// Name shown in debug output.
        label: String,
        /// Per-event mapping over the evaluated inputs.
        func: MapFn,
    },
}

impl fmt::Debug for FormulaOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaOp::Alias => f.write_str("Alias"),
            FormulaOp::Constant(v) => f.debug_tuple("Constant").field(v).finish(),
            FormulaOp::Monomial {
                constant,
                numerators,
            } => f
                .debug_struct("Monomial")
                .field("constant", constant)
                .field("numerators", numerators)
                .finish(),
            FormulaOp::Sign => f.write_str("Sign"),
            FormulaOp::Map { label, .. } => f.debug_struct("Map").field("label", label).finish(),
        }
    }
}

/// Lazy column definition: named inputs plus the operation combining them.
///
/// A narrowed formula stores its scalar result as `f32`; everything upstream
/// of it is computed in `f64`.
#[derive(Debug, Clone)]
pub struct Formula {
    inputs: Vec<String>,
    op: FormulaOp,
    narrow: bool,
}

impl Formula {
    /// Copy of `source`.
    pub fn alias(source: impl Into<String>) -> Self {
        Self {
            inputs: vec![source.into()],
            op: FormulaOp::Alias,
            narrow: false,
        }
    }

    /// Column holding `value` in every event.
    pub fn constant(value: f64) -> Self {
        Self {
            inputs: Vec::new(),
            op: FormulaOp::Constant(value),
            narrow: false,
        }
    }

    /// Product of `numerators` divided by the product of `denominators`.
    pub fn ratio<N, D>(numerators: N, denominators: D) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        Self::monomial(1.0, numerators, denominators)
    }

    /// Product of `factors`.
    pub fn product<N>(factors: N) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
    {
        Self::monomial(1.0, factors, Vec::<String>::new())
    }

    /// `constant` times the product of `numerators` over the product of `denominators`.
    /// Division by a zero denominator fails at evaluation time.
    pub fn monomial<N, D>(constant: f64, numerators: N, denominators: D) -> Self
    where
        N: IntoIterator,
        N::Item: Into<String>,
        D: IntoIterator,
        D::Item: Into<String>,
    {
        let mut inputs: Vec<String> = numerators.into_iter().map(Into::into).collect();
        let numerators = inputs.len();
        inputs.extend(denominators.into_iter().map(Into::into));
        Self {
            inputs,
            op: FormulaOp::Monomial {
                constant,
                numerators,
            },
            narrow: false,
        }
    }

    /// `f32` copy of a scalar column.
    pub fn narrow(source: impl Into<String>) -> Self {
        Self::alias(source).narrowed()
    }

    /// Marks the result for narrowing to `f32`.
    pub fn narrowed(mut self) -> Self {
        self.narrow = true;
        self
    }

    /// Sign of `source`, keeping the sign of negative zero.
    pub fn sign(source: impl Into<String>) -> Self {
        Self {
            inputs: vec![source.into()],
            op: FormulaOp::Sign,
            narrow: false,
        }
    }

    /// Provider mapping over `inputs`, identified by `label` in debug output.
    pub fn map<I>(label: impl Into<String>, inputs: I, func: MapFn) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            inputs: inputs.into_iter().map(Into::into).collect(),
            op: FormulaOp::Map {
                label: label.into(),
                func,
            },
            narrow: false,
        }
    }

    /// Input column names in evaluation order.
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Operation combining the inputs.
    pub fn op(&self) -> &FormulaOp {
        &self.op
    }

    /// Whether the result is stored as `f32`.
    pub fn is_narrowed(&self) -> bool {
        self.narrow
    }

    /// Whether this formula is a plain alias of `source`.
    pub fn is_alias_of(&self, source: &str) -> bool {
        matches!(self.op, FormulaOp::Alias)
            && !self.narrow
            && self.inputs.first().map(String::as_str) == Some(source)
    }

    /// Applies the operation to already evaluated inputs, in input order.
    pub fn evaluate(&self, values: &[Value]) -> Result<Value, SystError> {
        if values.len() != self.inputs.len() {
            return Err(SystError::Column(
                ErrorInfo::new(codes::COLUMN_TYPE, "input arity mismatch")
                    .with_context("expected", self.inputs.len().to_string())
                    .with_context("found", values.len().to_string()),
            ));
        }
        let value = self.apply(values)?;
        if self.narrow {
            Ok(Value::Narrow(value.as_f64()? as f32))
        } else {
            Ok(value)
        }
    }

    fn apply(&self, values: &[Value]) -> Result<Value, SystError> {
        match &self.op {
            FormulaOp::Alias => first(values).cloned(),
            FormulaOp::Constant(v) => Ok(Value::Scalar(*v)),
            FormulaOp::Monomial {
                constant,
                numerators,
            } => {
                let mut acc = *constant;
                for value in &values[..*numerators] {
                    acc *= value.as_f64()?;
                }
                for (idx, value) in values[*numerators..].iter().enumerate() {
                    let divisor = value.as_f64()?;
                    if divisor == 0.0 {
                        let column = self
                            .inputs
                            .get(*numerators + idx)
                            .cloned()
                            .unwrap_or_default();
                        return Err(SystError::Column(
                            ErrorInfo::new(codes::DIVISION_BY_ZERO, "division by zero")
                                .with_context("column", column),
                        ));
                    }
                    acc /= divisor;
                }
                Ok(Value::Scalar(acc))
            }
            FormulaOp::Sign => Ok(Value::Scalar(1f64.copysign(first(values)?.as_f64()?))),
            FormulaOp::Map { func, .. } => func(values),
        }
    }
}

fn first(values: &[Value]) -> Result<&Value, SystError> {
    values.first().ok_or_else(|| {
        SystError::Column(ErrorInfo::new(
            codes::COLUMN_MISSING,
            "formula evaluated without its input",
        ))
    })
}

/// Columnar execution engine as seen by the engine: columns are only ever
/// added or replaced, never deleted.
pub trait ColumnStore {
    /// Whether a column (input or defined) exists.
    fn has_column(&self, name: &str) -> bool;

    /// Defines a new column. Fails if the name already exists or any input
    /// is unknown.
    fn define(&mut self, name: &str, formula: Formula) -> Result<(), SystError>;

    /// Replaces an existing column's definition.
    fn redefine(&mut self, name: &str, formula: Formula) -> Result<(), SystError>;

    /// Every column name, inputs first then definitions in definition order.
    fn column_names(&self) -> Vec<String>;
}

pub(crate) fn column_missing(name: &str) -> SystError {
    SystError::Column(
        ErrorInfo::new(codes::COLUMN_MISSING, "column not defined").with_context("column", name),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monomial_rejects_zero_divisor() {
        let formula = Formula::ratio(["a"], ["b"]);
        let err = formula
            .evaluate(&[Value::Scalar(1.0), Value::Scalar(0.0)])
            .unwrap_err();
        assert_eq!(err.code(), codes::DIVISION_BY_ZERO);
        assert_eq!(err.info().context.get("column").map(String::as_str), Some("b"));
    }

    #[test]
    fn sign_keeps_negative_zero_sign() {
        let formula = Formula::sign("genWeight");
        assert!(!formula.is_alias_of("genWeight"));
        assert_eq!(
            formula.evaluate(&[Value::Scalar(-0.0)]).unwrap(),
            Value::Scalar(-1.0)
        );
        assert_eq!(
            formula.evaluate(&[Value::Scalar(3.5)]).unwrap(),
            Value::Scalar(1.0)
        );
    }

    #[test]
    fn transverse_roundtrip() {
        let p = P4::from_transverse(3.0, 4.0);
        assert!((p.pt - 5.0).abs() < 1e-12);
        assert!((p.px() - 3.0).abs() < 1e-12);
        assert!((p.py() - 4.0).abs() < 1e-12);
    }
}
