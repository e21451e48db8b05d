use maplit::btreemap;

use crate::{
    grad_slot,
    registry::{GradMaker, Kernel, OpContext, OpInfo},
    AttributeMap, OpRecord, Result, Tensor, VariableHandleMap,
};

pub(crate) const X: &str = "X";
pub(crate) const Y: &str = "Y";
pub(crate) const OUT: &str = "Out";

// -----------------------------------------------------------------------------
// BuiltinOp
// -----------------------------------------------------------------------------
/// Operators registered by [`crate::OpRegistry::builtin`].
///
/// The registered type name is the snake case of the variant, e.g. `elementwise_add`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "snake_case")]
pub enum BuiltinOp {
    // sources
    FillConstant,
    FillOnesLike,
    FillZerosLike,

    // differentiable
    Assign,
    Scale,
    Sum,
    ElementwiseAdd,
    ElementwiseSub,
    ElementwiseMul,
    Mul,
    Square,
    Mean,
    Tanh,
    Sigmoid,
    Relu,

    // gradients
    ElementwiseAddGrad,
    ElementwiseSubGrad,
    ElementwiseMulGrad,
    MulGrad,
    SquareGrad,
    MeanGrad,
    TanhGrad,
    SigmoidGrad,
    ReluGrad,

    // optimizers
    Sgd,
    Adam,
}

impl BuiltinOp {
    #[inline]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    pub fn info(self) -> OpInfo {
        match self {
            BuiltinOp::FillConstant => _info(fill_constant, Some(no_grad)),
            BuiltinOp::FillOnesLike => _info(fill_ones_like, Some(no_grad)),
            BuiltinOp::FillZerosLike => _info(fill_zeros_like, Some(no_grad)),

            BuiltinOp::Assign => _info(assign, Some(grad_of_assign)),
            BuiltinOp::Scale => _info(scale, Some(grad_of_scale)),
            BuiltinOp::Sum => _info(sum, Some(grad_of_sum)),
            BuiltinOp::ElementwiseAdd => _info(elementwise_add, Some(grad_of_elementwise_add)),
            BuiltinOp::ElementwiseSub => _info(elementwise_sub, Some(grad_of_elementwise_sub)),
            BuiltinOp::ElementwiseMul => _info(elementwise_mul, Some(grad_of_elementwise_mul)),
            BuiltinOp::Mul => _info(mul, Some(grad_of_mul)),
            BuiltinOp::Square => _info(square, Some(grad_of_square)),
            BuiltinOp::Mean => _info(mean, Some(grad_of_mean)),
            BuiltinOp::Tanh => _info(tanh, Some(grad_of_tanh)),
            BuiltinOp::Sigmoid => _info(sigmoid, Some(grad_of_sigmoid)),
            BuiltinOp::Relu => _info(relu, Some(grad_of_relu)),

            BuiltinOp::ElementwiseAddGrad => _info(elementwise_add_grad, None),
            BuiltinOp::ElementwiseSubGrad => _info(elementwise_sub_grad, None),
            BuiltinOp::ElementwiseMulGrad => _info(elementwise_mul_grad, None),
            BuiltinOp::MulGrad => _info(mul_grad, None),
            BuiltinOp::SquareGrad => _info(square_grad, None),
            BuiltinOp::MeanGrad => _info(mean_grad, None),
            BuiltinOp::TanhGrad => _info(tanh_grad, None),
            BuiltinOp::SigmoidGrad => _info(sigmoid_grad, None),
            BuiltinOp::ReluGrad => _info(relu_grad, None),

            BuiltinOp::Sgd => _info(sgd, None),
            BuiltinOp::Adam => _info(adam, None),
        }
    }
}

#[inline]
fn _info(kernel: Kernel, grad_maker: Option<GradMaker>) -> OpInfo {
    OpInfo { kernel, grad_maker }
}

// -----------------------------------------------------------------------------
// kernels
// -----------------------------------------------------------------------------
fn fill_constant(ctx: &OpContext<'_>) -> Result<()> {
    let shape = ctx.attr_shape("shape")?;
    let value = ctx.attr_f64("value", 0.0)?;
    ctx.set_output(OUT, Tensor::full(&shape, value))
}

fn fill_ones_like(ctx: &OpContext<'_>) -> Result<()> {
    let out = Tensor::ones(ctx.input(X)?.shape());
    ctx.set_output(OUT, out)
}

fn fill_zeros_like(ctx: &OpContext<'_>) -> Result<()> {
    let out = Tensor::zeros(ctx.input(X)?.shape());
    ctx.set_output(OUT, out)
}

fn assign(ctx: &OpContext<'_>) -> Result<()> {
    let out = ctx.input(X)?.clone();
    ctx.set_output(OUT, out)
}

fn scale(ctx: &OpContext<'_>) -> Result<()> {
    let scale = ctx.attr_f64("scale", 1.0)?;
    let out = ctx.input(X)?.map(|v| scale * v);
    ctx.set_output(OUT, out)
}

fn sum(ctx: &OpContext<'_>) -> Result<()> {
    let vars = ctx.inputs(X)?;
    let mut acc = ctx.read(&vars[0])?.clone();
    for var in &vars[1..] {
        acc = acc.zip_map(&*ctx.read(var)?, ctx.op_type(), |l, r| l + r)?;
    }
    ctx.set_output(OUT, acc)
}

fn _elementwise(ctx: &OpContext<'_>, f: impl Fn(f64, f64) -> f64) -> Result<()> {
    let axis = ctx.attr_i64("axis", -1)?;
    let out = ctx
        .input(X)?
        .broadcast_map(&*ctx.input(Y)?, axis, ctx.op_type(), f)?;
    ctx.set_output(OUT, out)
}

fn elementwise_add(ctx: &OpContext<'_>) -> Result<()> {
    _elementwise(ctx, |l, r| l + r)
}

fn elementwise_sub(ctx: &OpContext<'_>) -> Result<()> {
    _elementwise(ctx, |l, r| l - r)
}

fn elementwise_mul(ctx: &OpContext<'_>) -> Result<()> {
    _elementwise(ctx, |l, r| l * r)
}

fn mul(ctx: &OpContext<'_>) -> Result<()> {
    let out = ctx.input(X)?.matmul(&*ctx.input(Y)?, ctx.op_type())?;
    ctx.set_output(OUT, out)
}

fn square(ctx: &OpContext<'_>) -> Result<()> {
    let out = ctx.input(X)?.map(|v| v * v);
    ctx.set_output(OUT, out)
}

fn mean(ctx: &OpContext<'_>) -> Result<()> {
    let out = Tensor::scalar(ctx.input(X)?.mean());
    ctx.set_output(OUT, out)
}

fn tanh(ctx: &OpContext<'_>) -> Result<()> {
    let out = ctx.input(X)?.map(f64::tanh);
    ctx.set_output(OUT, out)
}

fn sigmoid(ctx: &OpContext<'_>) -> Result<()> {
    let out = ctx.input(X)?.map(|v| 1.0 / (1.0 + (-v).exp()));
    ctx.set_output(OUT, out)
}

fn relu(ctx: &OpContext<'_>) -> Result<()> {
    let out = ctx.input(X)?.map(|v| v.max(0.0));
    ctx.set_output(OUT, out)
}

//
// gradient kernels
//
fn _elementwise_add_sub_grad(ctx: &OpContext<'_>, sign: f64) -> Result<()> {
    let axis = ctx.attr_i64("axis", -1)?;
    let (dx, dy) = {
        let dout = ctx.input(&grad_slot(OUT))?;
        let y = ctx.input(Y)?;
        let dy = dout
            .reduce_like(y.shape(), axis, ctx.op_type())?
            .map(|v| sign * v);
        (dout.clone(), dy)
    };
    ctx.set_output(&grad_slot(X), dx)?;
    ctx.set_output(&grad_slot(Y), dy)
}

fn elementwise_add_grad(ctx: &OpContext<'_>) -> Result<()> {
    _elementwise_add_sub_grad(ctx, 1.0)
}

fn elementwise_sub_grad(ctx: &OpContext<'_>) -> Result<()> {
    _elementwise_add_sub_grad(ctx, -1.0)
}

fn elementwise_mul_grad(ctx: &OpContext<'_>) -> Result<()> {
    let axis = ctx.attr_i64("axis", -1)?;
    let op = ctx.op_type();
    let (dx, dy) = {
        let dout = ctx.input(&grad_slot(OUT))?;
        let x = ctx.input(X)?;
        let y = ctx.input(Y)?;
        let dx = dout.broadcast_map(&y, axis, op, |g, r| g * r)?;
        let dy = dout
            .zip_map(&x, op, |g, l| g * l)?
            .reduce_like(y.shape(), axis, op)?;
        (dx, dy)
    };
    ctx.set_output(&grad_slot(X), dx)?;
    ctx.set_output(&grad_slot(Y), dy)
}

fn mul_grad(ctx: &OpContext<'_>) -> Result<()> {
    let op = ctx.op_type();
    let (dx, dy) = {
        let dout = ctx.input(&grad_slot(OUT))?;
        let x = ctx.input(X)?;
        let y = ctx.input(Y)?;
        let dx = dout.matmul(&y.transpose(op)?, op)?;
        let dy = x.transpose(op)?.matmul(&dout, op)?;
        (dx, dy)
    };
    ctx.set_output(&grad_slot(X), dx)?;
    ctx.set_output(&grad_slot(Y), dy)
}

fn square_grad(ctx: &OpContext<'_>) -> Result<()> {
    let dx = ctx
        .input(&grad_slot(OUT))?
        .zip_map(&*ctx.input(X)?, ctx.op_type(), |g, v| 2.0 * v * g)?;
    ctx.set_output(&grad_slot(X), dx)
}

fn mean_grad(ctx: &OpContext<'_>) -> Result<()> {
    let dx = {
        let x = ctx.input(X)?;
        let g = ctx.input(&grad_slot(OUT))?.data()[0];
        Tensor::full(x.shape(), g / x.numel() as f64)
    };
    ctx.set_output(&grad_slot(X), dx)
}

fn _activation_grad(ctx: &OpContext<'_>, f: impl Fn(f64, f64) -> f64) -> Result<()> {
    let dx = ctx
        .input(&grad_slot(OUT))?
        .zip_map(&*ctx.input(OUT)?, ctx.op_type(), f)?;
    ctx.set_output(&grad_slot(X), dx)
}

fn tanh_grad(ctx: &OpContext<'_>) -> Result<()> {
    _activation_grad(ctx, |g, o| g * (1.0 - o * o))
}

fn sigmoid_grad(ctx: &OpContext<'_>) -> Result<()> {
    _activation_grad(ctx, |g, o| g * o * (1.0 - o))
}

fn relu_grad(ctx: &OpContext<'_>) -> Result<()> {
    _activation_grad(ctx, |g, o| if 0.0 < o { g } else { 0.0 })
}

//
// optimizer kernels
//
fn sgd(ctx: &OpContext<'_>) -> Result<()> {
    let lr = ctx.attr_f64("learning_rate", 0.01)?;
    let out = ctx
        .input("Param")?
        .zip_map(&*ctx.input("Grad")?, ctx.op_type(), |p, g| p - lr * g)?;
    ctx.set_output("ParamOut", out)
}

fn adam(ctx: &OpContext<'_>) -> Result<()> {
    let lr = ctx.attr_f64("learning_rate", 0.001)?;
    let beta1 = ctx.attr_f64("beta1", 0.9)?;
    let beta2 = ctx.attr_f64("beta2", 0.999)?;
    let epsilon = ctx.attr_f64("epsilon", 1e-8)?;
    let step = ctx.attr_i64("step", 1)?.max(1) as i32;
    let op = ctx.op_type();

    let (param, m1, m2) = {
        let param = ctx.input("Param")?;
        let grad = ctx.input("Grad")?;
        let m1 = ctx
            .input("Moment1")?
            .zip_map(&grad, op, |m, g| beta1 * m + (1.0 - beta1) * g)?;
        let m2 = ctx
            .input("Moment2")?
            .zip_map(&grad, op, |v, g| beta2 * v + (1.0 - beta2) * g * g)?;

        let lr_t = lr * (1.0 - beta2.powi(step)).sqrt() / (1.0 - beta1.powi(step));
        let update = m1.zip_map(&m2, op, |m, v| lr_t * m / (v.sqrt() + epsilon))?;
        let param = param.zip_map(&update, op, |p, u| p - u)?;
        (param, m1, m2)
    };
    ctx.set_output("ParamOut", param)?;
    ctx.set_output("Moment1Out", m1)?;
    ctx.set_output("Moment2Out", m2)
}

// -----------------------------------------------------------------------------
// grad makers
// -----------------------------------------------------------------------------
fn no_grad(_: &OpRecord) -> Vec<OpRecord> {
    Vec::new()
}

/// Single gradient record of type `grad_op`.
///
/// It reads the forward slots `reads` and `Out@GRAD`,
/// and writes the gradients of all the forward inputs into `<slot>@GRAD`.
fn _grad_record(fwd: &OpRecord, grad_op: BuiltinOp, reads: &[&str]) -> Vec<OpRecord> {
    let mut inputs = VariableHandleMap::new();
    for slot in reads {
        let vars = if fwd.inputs().contains_key(*slot) {
            fwd.input(slot)
        } else {
            fwd.output(slot)
        };
        inputs.insert(slot.to_string(), vars.to_vec());
    }
    inputs.insert(grad_slot(OUT), fwd.output_grad(OUT));

    let outputs = fwd
        .inputs()
        .keys()
        .map(|slot| (grad_slot(slot), fwd.input_grad(slot)))
        .collect();
    vec![OpRecord::new(
        grad_op.as_str(),
        inputs,
        outputs,
        fwd.attrs().clone(),
    )]
}

fn grad_of_assign(fwd: &OpRecord) -> Vec<OpRecord> {
    vec![OpRecord::new(
        BuiltinOp::Assign.as_str(),
        btreemap! { X.to_string() => fwd.output_grad(OUT) },
        btreemap! { OUT.to_string() => fwd.input_grad(X) },
        AttributeMap::new(),
    )]
}

fn grad_of_scale(fwd: &OpRecord) -> Vec<OpRecord> {
    vec![OpRecord::new(
        BuiltinOp::Scale.as_str(),
        btreemap! { X.to_string() => fwd.output_grad(OUT) },
        btreemap! { OUT.to_string() => fwd.input_grad(X) },
        fwd.attrs().clone(),
    )]
}

fn grad_of_sum(fwd: &OpRecord) -> Vec<OpRecord> {
    fwd.input(X)
        .iter()
        .map(|x| {
            OpRecord::new(
                BuiltinOp::Assign.as_str(),
                btreemap! { X.to_string() => fwd.output_grad(OUT) },
                btreemap! { OUT.to_string() => vec![x.grad()] },
                AttributeMap::new(),
            )
        })
        .collect()
}

fn grad_of_elementwise_add(fwd: &OpRecord) -> Vec<OpRecord> {
    _grad_record(fwd, BuiltinOp::ElementwiseAddGrad, &[X, Y])
}

fn grad_of_elementwise_sub(fwd: &OpRecord) -> Vec<OpRecord> {
    _grad_record(fwd, BuiltinOp::ElementwiseSubGrad, &[X, Y])
}

fn grad_of_elementwise_mul(fwd: &OpRecord) -> Vec<OpRecord> {
    _grad_record(fwd, BuiltinOp::ElementwiseMulGrad, &[X, Y])
}

fn grad_of_mul(fwd: &OpRecord) -> Vec<OpRecord> {
    _grad_record(fwd, BuiltinOp::MulGrad, &[X, Y])
}

fn grad_of_square(fwd: &OpRecord) -> Vec<OpRecord> {
    _grad_record(fwd, BuiltinOp::SquareGrad, &[X])
}

fn grad_of_mean(fwd: &OpRecord) -> Vec<OpRecord> {
    _grad_record(fwd, BuiltinOp::MeanGrad, &[X])
}

fn grad_of_tanh(fwd: &OpRecord) -> Vec<OpRecord> {
    _grad_record(fwd, BuiltinOp::TanhGrad, &[OUT])
}

fn grad_of_sigmoid(fwd: &OpRecord) -> Vec<OpRecord> {
    _grad_record(fwd, BuiltinOp::SigmoidGrad, &[OUT])
}

fn grad_of_relu(fwd: &OpRecord) -> Vec<OpRecord> {
    _grad_record(fwd, BuiltinOp::ReluGrad, &[OUT])
}
