use std::{
    cell::Ref,
    collections::HashMap,
    sync::{Arc, OnceLock},
};

use strum::IntoEnumIterator;

use crate::{
    kernels::BuiltinOp, Attribute, AttributeMap, Error, OpRecord, Result, Tensor,
    VariableHandle, VariableHandleMap,
};

/// Forward execution of an operator.
pub type Kernel = fn(&OpContext<'_>) -> Result<()>;

/// Derivation of gradient operators from a forward record.
///
/// Gradient records read the gradients of the forward outputs via [`crate::Variable::grad`]
/// and write the gradients of the forward inputs into their `grad()` handles.
pub type GradMaker = fn(&OpRecord) -> Vec<OpRecord>;

// -----------------------------------------------------------------------------
// OpInfo
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy)]
pub struct OpInfo {
    pub kernel: Kernel,
    /// `None` if the operator is not differentiable.
    pub grad_maker: Option<GradMaker>,
}

// -----------------------------------------------------------------------------
// OpContext
// -----------------------------------------------------------------------------
/// Variables and attributes bound to one kernel invocation.
///
/// Kernels must finish reading their inputs before they write outputs
/// because an output variable may also appear as an input.
#[derive(Debug)]
pub struct OpContext<'a> {
    op_type: &'a str,
    inputs: &'a VariableHandleMap,
    outputs: &'a VariableHandleMap,
    attrs: &'a AttributeMap,
}

impl<'a> OpContext<'a> {
    #[inline]
    pub fn op_type(&self) -> &'a str {
        self.op_type
    }

    /// All the variables in the input `slot`.
    pub fn inputs(&self, slot: &str) -> Result<&'a [VariableHandle]> {
        match self.inputs.get(slot) {
            Some(vars) if !vars.is_empty() => Ok(vars),
            _ => Err(self._missing(slot)),
        }
    }

    /// Value of the first variable in the input `slot`.
    #[inline]
    pub fn input(&self, slot: &str) -> Result<Ref<'a, Tensor>> {
        self.read(&self.inputs(slot)?[0])
    }

    /// Borrow the value of `var`, failing if it has never been written.
    pub fn read(&self, var: &'a VariableHandle) -> Result<Ref<'a, Tensor>> {
        let value = var.get();
        if !value.is_initialized() {
            return Err(Error::Uninitialized(var.name().to_string()));
        }
        Ok(value)
    }

    /// Write `value` into the first variable of the output `slot`.
    pub fn set_output(&self, slot: &str, value: Tensor) -> Result<()> {
        match self.outputs.get(slot).and_then(|vars| vars.first()) {
            Some(var) => {
                var.set(value);
                Ok(())
            }
            None => Err(self._missing(slot)),
        }
    }

    #[inline]
    pub fn attr(&self, name: &str) -> Option<&'a Attribute> {
        self.attrs.get(name)
    }

    pub fn attr_f64(&self, name: &str, default: f64) -> Result<f64> {
        match self.attr(name) {
            None => Ok(default),
            Some(Attribute::Float(v)) => Ok(*v),
            Some(Attribute::Int(v)) => Ok(*v as f64),
            Some(_) => Err(self._invalid_attr(name, "float")),
        }
    }

    pub fn attr_i64(&self, name: &str, default: i64) -> Result<i64> {
        match self.attr(name) {
            None => Ok(default),
            Some(Attribute::Int(v)) => Ok(*v),
            Some(_) => Err(self._invalid_attr(name, "int")),
        }
    }

    /// Required shape-like attribute.
    pub fn attr_shape(&self, name: &str) -> Result<Vec<usize>> {
        match self.attr(name) {
            Some(Attribute::Ints(dims)) if dims.iter().all(|d| 0 < *d) => {
                Ok(dims.iter().map(|d| *d as usize).collect())
            }
            _ => Err(self._invalid_attr(name, "positive ints")),
        }
    }

    #[inline]
    fn _missing(&self, slot: &str) -> Error {
        Error::MissingSlot {
            op: self.op_type.to_string(),
            slot: slot.to_string(),
        }
    }

    #[inline]
    fn _invalid_attr(&self, name: &str, expected: &'static str) -> Error {
        Error::InvalidAttr {
            op: self.op_type.to_string(),
            name: name.to_string(),
            expected,
        }
    }
}

// -----------------------------------------------------------------------------
// OpRegistry
// -----------------------------------------------------------------------------
/// Operator types and their forward/gradient implementations.
#[derive(Debug, Clone, Default)]
pub struct OpRegistry {
    ops: HashMap<String, OpInfo>,
}

//
// ctor
//
impl OpRegistry {
    /// Empty registry.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with all the [`BuiltinOp`]s.
    pub fn builtin() -> Self {
        let ops = BuiltinOp::iter()
            .map(|op| (op.to_string(), op.info()))
            .collect();
        Self { ops }
    }

    /// Process-wide registry of the builtin operators.
    pub fn shared() -> Arc<Self> {
        static SHARED: OnceLock<Arc<OpRegistry>> = OnceLock::new();
        SHARED.get_or_init(|| Arc::new(Self::builtin())).clone()
    }
}

//
// methods
//
impl OpRegistry {
    pub fn register(&mut self, op_type: &str, info: OpInfo) -> Result<()> {
        if self.ops.contains_key(op_type) {
            return Err(Error::OpAlreadyRegistered(op_type.to_string()));
        }
        self.ops.insert(op_type.to_string(), info);
        Ok(())
    }

    #[inline]
    pub fn contains(&self, op_type: &str) -> bool {
        self.ops.contains_key(op_type)
    }

    #[inline]
    pub fn get(&self, op_type: &str) -> Result<&OpInfo> {
        self.ops
            .get(op_type)
            .ok_or_else(|| Error::UnregisteredOp(op_type.to_string()))
    }

    /// Execute `op_type` against the bound variables, writing into the outputs.
    pub fn run(
        &self,
        op_type: &str,
        inputs: &VariableHandleMap,
        outputs: &VariableHandleMap,
        attrs: &AttributeMap,
    ) -> Result<()> {
        let info = self.get(op_type)?;
        log::trace!("Running {}", op_type);
        (info.kernel)(&OpContext {
            op_type,
            inputs,
            outputs,
            attrs,
        })
    }

    #[inline]
    pub fn run_record(&self, op: &OpRecord) -> Result<()> {
        self.run(op.op_type(), op.inputs(), op.outputs(), op.attrs())
    }
}

/// Execute `op_type` with the process-wide builtin registry.
#[inline]
pub fn run_operator(
    op_type: &str,
    inputs: &VariableHandleMap,
    outputs: &VariableHandleMap,
    attrs: &AttributeMap,
) -> Result<()> {
    OpRegistry::shared().run(op_type, inputs, outputs, attrs)
}

#[cfg(test)]
mod tests {
    use maplit::btreemap;

    use crate::Variable;

    use super::*;

    fn noop(_: &OpContext<'_>) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_builtin_contains() {
        let reg = OpRegistry::builtin();

        assert!(reg.contains("elementwise_add"));
        assert!(reg.contains("elementwise_add_grad"));
        assert!(reg.contains("mul"));
        assert!(reg.contains("fill_ones_like"));
        assert!(!reg.contains("conv2d"));
    }

    #[test]
    fn test_register() {
        let mut reg = OpRegistry::new();
        let info = OpInfo {
            kernel: noop,
            grad_maker: None,
        };

        reg.register("noop", info).unwrap();
        let err = reg.register("noop", info);

        assert!(reg.contains("noop"));
        assert_eq!(err, Err(Error::OpAlreadyRegistered("noop".to_string())));
    }

    #[test]
    fn test_run_unregistered() {
        let err = run_operator(
            "conv2d",
            &VariableHandleMap::new(),
            &VariableHandleMap::new(),
            &AttributeMap::new(),
        );

        assert_eq!(err, Err(Error::UnregisteredOp("conv2d".to_string())));
    }

    #[test]
    fn test_run_uninitialized_input() {
        let x = Variable::new("x");
        let out = Variable::new("out");

        let err = run_operator(
            "tanh",
            &btreemap! { "X".to_string() => vec![x.clone()] },
            &btreemap! { "Out".to_string() => vec![out] },
            &AttributeMap::new(),
        );

        assert_eq!(err, Err(Error::Uninitialized(x.name().to_string())));
    }

    #[test]
    fn test_run_missing_slot() {
        let out = Variable::new("out");

        let err = run_operator(
            "tanh",
            &VariableHandleMap::new(),
            &btreemap! { "Out".to_string() => vec![out] },
            &AttributeMap::new(),
        );

        assert_eq!(
            err,
            Err(Error::MissingSlot {
                op: "tanh".to_string(),
                slot: "X".to_string()
            })
        );
    }
}
