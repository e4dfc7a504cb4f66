//! In-memory reference column store.
//!
//! Input columns hold materialized per-event values; defined columns hold
//! [`Formula`]s that are evaluated on demand. Definitions are validated when
//! issued: every input must already exist and a redefinition may not make a
//! column reachable from its own inputs.

use std::collections::{BTreeMap, BTreeSet};

use crate::column::{column_missing, ColumnStore, Formula, Value, P4};
use crate::errors::{codes, ErrorInfo, SystError};

/// Column store backed by in-memory vectors, evaluated lazily per event.
#[derive(Debug, Clone, Default)]
pub struct MemoryFrame {
    events: usize,
    inputs: BTreeMap<String, Vec<Value>>,
    input_order: Vec<String>,
    defined: BTreeMap<String, Formula>,
    definition_order: Vec<String>,
}

impl MemoryFrame {
    /// Creates an empty frame holding `events` rows.
    pub fn new(events: usize) -> Self {
        Self {
            events,
            ..Self::default()
        }
    }

    /// Number of rows.
    pub fn events(&self) -> usize {
        self.events
    }

    /// Adds a materialized input column.
    pub fn insert_input(&mut self, name: &str, values: Vec<Value>) -> Result<(), SystError> {
        if self.has_column(name) {
            return Err(column_exists(name));
        }
        if values.len() != self.events {
            return Err(SystError::Column(
                ErrorInfo::new(codes::EVENT_RANGE, "input length differs from event count")
                    .with_context("column", name)
                    .with_context("events", self.events.to_string())
                    .with_context("rows", values.len().to_string()),
            ));
        }
        self.inputs.insert(name.to_string(), values);
        self.input_order.push(name.to_string());
        Ok(())
    }

    /// Adds an `f64` input column.
    pub fn insert_scalars(&mut self, name: &str, values: Vec<f64>) -> Result<(), SystError> {
        self.insert_input(name, values.into_iter().map(Value::Scalar).collect())
    }

    /// Adds a momenta input column.
    pub fn insert_momenta(&mut self, name: &str, values: Vec<Vec<P4>>) -> Result<(), SystError> {
        self.insert_input(name, values.into_iter().map(Value::Momenta).collect())
    }

    /// Builder form of [`MemoryFrame::insert_scalars`].
    pub fn with_scalars(mut self, name: &str, values: Vec<f64>) -> Result<Self, SystError> {
        self.insert_scalars(name, values)?;
        Ok(self)
    }

    /// Builder form of [`MemoryFrame::insert_momenta`].
    pub fn with_momenta(mut self, name: &str, values: Vec<Vec<P4>>) -> Result<Self, SystError> {
        self.insert_momenta(name, values)?;
        Ok(self)
    }

    /// Definition of a derived column, if any.
    pub fn formula(&self, name: &str) -> Option<&Formula> {
        self.defined.get(name)
    }

    /// Derived column names in definition order.
    pub fn defined_columns(&self) -> &[String] {
        &self.definition_order
    }

    /// Evaluates one cell.
    pub fn evaluate(&self, name: &str, event: usize) -> Result<Value, SystError> {
        if event >= self.events {
            return Err(SystError::Column(
                ErrorInfo::new(codes::EVENT_RANGE, "event index out of range")
                    .with_context("column", name)
                    .with_context("event", event.to_string()),
            ));
        }
        if let Some(values) = self.inputs.get(name) {
            return Ok(values[event].clone());
        }
        let formula = self.defined.get(name).ok_or_else(|| column_missing(name))?;
        let values = formula
            .inputs()
            .iter()
            .map(|input| self.evaluate(input, event))
            .collect::<Result<Vec<_>, _>>()?;
        formula.evaluate(&values)
    }

    /// Evaluates one scalar cell as `f64`.
    pub fn scalar(&self, name: &str, event: usize) -> Result<f64, SystError> {
        self.evaluate(name, event)?.as_f64()
    }

    /// Evaluates one momenta cell.
    pub fn momenta(&self, name: &str, event: usize) -> Result<Vec<P4>, SystError> {
        Ok(self.evaluate(name, event)?.as_momenta()?.to_vec())
    }

    /// Evaluates a column for every event.
    pub fn materialize(&self, name: &str) -> Result<Vec<Value>, SystError> {
        (0..self.events)
            .map(|event| self.evaluate(name, event))
            .collect()
    }

    fn check_inputs(&self, name: &str, formula: &Formula) -> Result<(), SystError> {
        for input in formula.inputs() {
            if !self.has_column(input) {
                return Err(SystError::Column(
                    ErrorInfo::new(codes::COLUMN_MISSING, "formula references unknown column")
                        .with_context("column", name)
                        .with_context("input", input.as_str()),
                ));
            }
        }
        Ok(())
    }

    /// Whether `target` is reachable from any of `roots` through definitions.
    fn reaches(&self, roots: &[String], target: &str) -> bool {
        let mut stack: Vec<&str> = roots.iter().map(String::as_str).collect();
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if current == target {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            if let Some(formula) = self.defined.get(current) {
                stack.extend(formula.inputs().iter().map(String::as_str));
            }
        }
        false
    }
}

fn column_exists(name: &str) -> SystError {
    SystError::Column(
        ErrorInfo::new(codes::COLUMN_EXISTS, "column already defined").with_context("column", name),
    )
}

impl ColumnStore for MemoryFrame {
    fn has_column(&self, name: &str) -> bool {
        self.inputs.contains_key(name) || self.defined.contains_key(name)
    }

    fn define(&mut self, name: &str, formula: Formula) -> Result<(), SystError> {
        if self.has_column(name) {
            return Err(column_exists(name));
        }
        self.check_inputs(name, &formula)?;
        self.defined.insert(name.to_string(), formula);
        self.definition_order.push(name.to_string());
        Ok(())
    }

    fn redefine(&mut self, name: &str, formula: Formula) -> Result<(), SystError> {
        if !self.has_column(name) {
            return Err(column_missing(name));
        }
        self.check_inputs(name, &formula)?;
        if self.reaches(formula.inputs(), name) {
            return Err(SystError::Column(
                ErrorInfo::new(codes::COLUMN_CYCLE, "redefinition would create a cycle")
                    .with_context("column", name),
            ));
        }
        if self.inputs.remove(name).is_some() {
            self.input_order.retain(|existing| existing != name);
            self.definition_order.push(name.to_string());
        }
        self.defined.insert(name.to_string(), formula);
        Ok(())
    }

    fn column_names(&self) -> Vec<String> {
        self.input_order
            .iter()
            .chain(self.definition_order.iter())
            .cloned()
            .collect()
    }
}
