use maplit::btreemap;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::{
    context::get_global_tape,
    kernels::{BuiltinOp, OUT, X, Y},
    Attribute, AttributeMap, Result, Tensor, Variable, VariableHandle, VariableHandleMap,
};

/// Record `op` on the current tape with a fresh `Out` variable named after the operator.
fn _record(
    op: BuiltinOp,
    inputs: VariableHandleMap,
    attrs: AttributeMap,
) -> Result<VariableHandle> {
    let out = Variable::new(op.as_str());
    get_global_tape().borrow_mut().add_op(
        op.as_str(),
        inputs,
        btreemap! { OUT.to_string() => vec![out.clone()] },
        attrs,
    )?;
    Ok(out)
}

#[inline]
fn _unary(op: BuiltinOp, x: &VariableHandle) -> Result<VariableHandle> {
    _record(op, btreemap! { X.to_string() => vec![x.clone()] }, AttributeMap::new())
}

#[inline]
fn _binary(
    op: BuiltinOp,
    x: &VariableHandle,
    y: &VariableHandle,
    axis: i64,
) -> Result<VariableHandle> {
    _record(
        op,
        btreemap! {
            X.to_string() => vec![x.clone()],
            Y.to_string() => vec![y.clone()],
        },
        btreemap! { "axis".to_string() => Attribute::Int(axis) },
    )
}

// -----------------------------------------------------------------------------
// functions
// -----------------------------------------------------------------------------
/// Variable of `shape` filled with `value`.
pub fn fill_constant(shape: &[usize], value: f64) -> Result<VariableHandle> {
    _record(
        BuiltinOp::FillConstant,
        VariableHandleMap::new(),
        btreemap! {
            "shape".to_string() => Attribute::Ints(shape.iter().map(|d| *d as i64).collect()),
            "value".to_string() => Attribute::Float(value),
        },
    )
}

#[inline]
pub fn assign(x: &VariableHandle) -> Result<VariableHandle> {
    _unary(BuiltinOp::Assign, x)
}

pub fn scale(x: &VariableHandle, scale: f64) -> Result<VariableHandle> {
    _record(
        BuiltinOp::Scale,
        btreemap! { X.to_string() => vec![x.clone()] },
        btreemap! { "scale".to_string() => Attribute::Float(scale) },
    )
}

/// Elementwise `x + y`. `y` is broadcast onto the trailing dimensions of `x`.
#[inline]
pub fn add(x: &VariableHandle, y: &VariableHandle) -> Result<VariableHandle> {
    _binary(BuiltinOp::ElementwiseAdd, x, y, -1)
}

/// Elementwise `x - y`. `y` is broadcast onto the trailing dimensions of `x`.
#[inline]
pub fn sub(x: &VariableHandle, y: &VariableHandle) -> Result<VariableHandle> {
    _binary(BuiltinOp::ElementwiseSub, x, y, -1)
}

/// Elementwise `x * y`. `y` is broadcast onto the trailing dimensions of `x`.
#[inline]
pub fn mul(x: &VariableHandle, y: &VariableHandle) -> Result<VariableHandle> {
    _binary(BuiltinOp::ElementwiseMul, x, y, -1)
}

/// Matrix product `[m, k] x [k, n] -> [m, n]`.
pub fn matmul(x: &VariableHandle, y: &VariableHandle) -> Result<VariableHandle> {
    _record(
        BuiltinOp::Mul,
        btreemap! {
            X.to_string() => vec![x.clone()],
            Y.to_string() => vec![y.clone()],
        },
        AttributeMap::new(),
    )
}

/// Add the `[n]`-shaped `bias` to every row of the `[m, n]`-shaped `x`.
#[inline]
pub fn add_bias(x: &VariableHandle, bias: &VariableHandle) -> Result<VariableHandle> {
    _binary(BuiltinOp::ElementwiseAdd, x, bias, 1)
}

#[inline]
pub fn square(x: &VariableHandle) -> Result<VariableHandle> {
    _unary(BuiltinOp::Square, x)
}

/// Mean of all the elements as a `[1]`-shaped variable.
#[inline]
pub fn mean(x: &VariableHandle) -> Result<VariableHandle> {
    _unary(BuiltinOp::Mean, x)
}

/// Elementwise sum of same-shaped variables.
pub fn sum(xs: &[VariableHandle]) -> Result<VariableHandle> {
    _record(
        BuiltinOp::Sum,
        btreemap! { X.to_string() => xs.to_vec() },
        AttributeMap::new(),
    )
}

#[inline]
pub fn tanh(x: &VariableHandle) -> Result<VariableHandle> {
    _unary(BuiltinOp::Tanh, x)
}

#[inline]
pub fn sigmoid(x: &VariableHandle) -> Result<VariableHandle> {
    _unary(BuiltinOp::Sigmoid, x)
}

#[inline]
pub fn relu(x: &VariableHandle) -> Result<VariableHandle> {
    _unary(BuiltinOp::Relu, x)
}

/// `mean((pred - target)^2)`
pub fn mse_loss(pred: &VariableHandle, target: &VariableHandle) -> Result<VariableHandle> {
    mean(&square(&sub(pred, target)?)?)
}

// -----------------------------------------------------------------------------
// Activation
// -----------------------------------------------------------------------------
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter,
)]
#[strum(serialize_all = "snake_case")]
pub enum Activation {
    Tanh,
    Sigmoid,
    Relu,
}

impl Activation {
    pub fn apply(self, x: &VariableHandle) -> Result<VariableHandle> {
        match self {
            Activation::Tanh => tanh(x),
            Activation::Sigmoid => sigmoid(x),
            Activation::Relu => relu(x),
        }
    }
}

// -----------------------------------------------------------------------------
// Linear
// -----------------------------------------------------------------------------
/// Fully connected layer `act(x * weight + bias)`.
///
/// The parameters are plain variables, so the same layer can be used
/// on any number of tapes.
#[derive(Debug, Clone)]
pub struct Linear {
    weight: VariableHandle,
    bias: VariableHandle,
    act: Option<Activation>,
}

//
// ctor
//
impl Linear {
    /// Layer whose weight is drawn uniformly from `[-1/sqrt(in_dim), 1/sqrt(in_dim)]`
    /// and whose bias is zero.
    pub fn with_rng<R: Rng>(
        in_dim: usize,
        out_dim: usize,
        act: Option<Activation>,
        rng: &mut R,
    ) -> Self {
        let bound = 1.0 / (in_dim as f64).sqrt();
        let mut weight = Tensor::zeros(&[in_dim, out_dim]);
        for w in weight.data_mut() {
            *w = rng.random_range(-bound..bound);
        }
        Self {
            weight: Variable::from_tensor("linear_weight", weight),
            bias: Variable::from_tensor("linear_bias", Tensor::zeros(&[out_dim])),
            act,
        }
    }

    #[inline]
    pub fn new(in_dim: usize, out_dim: usize, act: Option<Activation>, seed: u64) -> Self {
        Self::with_rng(in_dim, out_dim, act, &mut StdRng::seed_from_u64(seed))
    }
}

//
// methods
//
impl Linear {
    #[inline]
    pub fn weight(&self) -> &VariableHandle {
        &self.weight
    }

    #[inline]
    pub fn bias(&self) -> &VariableHandle {
        &self.bias
    }

    #[inline]
    pub fn act(&self) -> Option<Activation> {
        self.act
    }

    #[inline]
    pub fn params(&self) -> Vec<VariableHandle> {
        vec![self.weight.clone(), self.bias.clone()]
    }

    /// Record the layer on the current tape for the `[batch, in_dim]`-shaped `x`.
    pub fn forward(&self, x: &VariableHandle) -> Result<VariableHandle> {
        let out = add_bias(&matmul(x, &self.weight)?, &self.bias)?;
        match self.act {
            Some(act) => act.apply(&out),
            None => Ok(out),
        }
    }
}
