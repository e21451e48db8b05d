use std::collections::BTreeMap;

use crate::{VariableHandle, GRAD_SUFFIX};

/// Named slots of variables, e.g. `X`, `Y` and `Out`.
pub type VariableHandleMap = BTreeMap<String, Vec<VariableHandle>>;

pub type AttributeMap = BTreeMap<String, Attribute>;

/// Name of the gradient slot for `slot`, e.g. `X@GRAD` for `X`.
#[inline]
pub fn grad_slot(slot: &str) -> String {
    format!("{}{}", slot, GRAD_SUFFIX)
}

// -----------------------------------------------------------------------------
// Attribute
// -----------------------------------------------------------------------------
/// Operator configuration value.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Attribute {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
}

impl From<bool> for Attribute {
    #[inline]
    fn from(v: bool) -> Self {
        Attribute::Bool(v)
    }
}

impl From<i64> for Attribute {
    #[inline]
    fn from(v: i64) -> Self {
        Attribute::Int(v)
    }
}

impl From<f64> for Attribute {
    #[inline]
    fn from(v: f64) -> Self {
        Attribute::Float(v)
    }
}

impl From<&str> for Attribute {
    #[inline]
    fn from(v: &str) -> Self {
        Attribute::Str(v.to_string())
    }
}

impl From<Vec<i64>> for Attribute {
    #[inline]
    fn from(v: Vec<i64>) -> Self {
        Attribute::Ints(v)
    }
}

impl From<Vec<f64>> for Attribute {
    #[inline]
    fn from(v: Vec<f64>) -> Self {
        Attribute::Floats(v)
    }
}

// -----------------------------------------------------------------------------
// OpRecord
// -----------------------------------------------------------------------------
/// Record of one operator invocation.
///
/// A record is never modified after it is appended to a tape.
/// It is used to run the operator in [`crate::Tape::forward`]
/// and to derive gradient operators in [`crate::Tape::backward`].
#[derive(Debug, Clone)]
pub struct OpRecord {
    op_type: String,
    inputs: VariableHandleMap,
    outputs: VariableHandleMap,
    attrs: AttributeMap,
}

impl OpRecord {
    #[inline]
    pub fn new(
        op_type: impl Into<String>,
        inputs: VariableHandleMap,
        outputs: VariableHandleMap,
        attrs: AttributeMap,
    ) -> Self {
        Self {
            op_type: op_type.into(),
            inputs,
            outputs,
            attrs,
        }
    }

    #[inline]
    pub fn op_type(&self) -> &str {
        &self.op_type
    }

    #[inline]
    pub fn inputs(&self) -> &VariableHandleMap {
        &self.inputs
    }

    #[inline]
    pub fn outputs(&self) -> &VariableHandleMap {
        &self.outputs
    }

    #[inline]
    pub fn attrs(&self) -> &AttributeMap {
        &self.attrs
    }

    #[inline]
    pub fn input(&self, slot: &str) -> &[VariableHandle] {
        self.inputs.get(slot).map(Vec::as_slice).unwrap_or_default()
    }

    #[inline]
    pub fn output(&self, slot: &str) -> &[VariableHandle] {
        self.outputs.get(slot).map(Vec::as_slice).unwrap_or_default()
    }

    /// Gradient variables of the variables in the input `slot`.
    #[inline]
    pub fn input_grad(&self, slot: &str) -> Vec<VariableHandle> {
        self.input(slot).iter().map(|v| v.grad()).collect()
    }

    /// Gradient variables of the variables in the output `slot`.
    #[inline]
    pub fn output_grad(&self, slot: &str) -> Vec<VariableHandle> {
        self.output(slot).iter().map(|v| v.grad()).collect()
    }

    pub(crate) fn into_parts(self) -> (String, VariableHandleMap, VariableHandleMap, AttributeMap) {
        (self.op_type, self.inputs, self.outputs, self.attrs)
    }
}
