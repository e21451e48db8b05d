use std::{
    collections::{hash_map::Entry, HashMap},
    rc::{Rc, Weak},
};

use maplit::btreemap;

use crate::{
    context::get_global_tape, kernels::BuiltinOp, run_operator, Attribute, Result, Tensor,
    Variable, VariableHandle,
};

// -----------------------------------------------------------------------------
// Optimizer
// -----------------------------------------------------------------------------
/// Update rule applied to a parameter whose gradient has been computed.
///
/// Updates are dispatched directly and are never recorded on a tape.
pub trait Optimizer {
    fn update(&mut self, param: &VariableHandle) -> Result<()>;
}

// -----------------------------------------------------------------------------
// Sgd
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sgd {
    lr: f64,
}

impl Sgd {
    #[inline]
    pub fn new(lr: f64) -> Self {
        Self { lr }
    }

    #[inline]
    pub fn lr(&self) -> f64 {
        self.lr
    }
}

impl Optimizer for Sgd {
    fn update(&mut self, param: &VariableHandle) -> Result<()> {
        run_operator(
            BuiltinOp::Sgd.as_str(),
            &btreemap! {
                "Param".to_string() => vec![param.clone()],
                "Grad".to_string() => vec![param.grad()],
            },
            &btreemap! { "ParamOut".to_string() => vec![param.clone()] },
            &btreemap! { "learning_rate".to_string() => Attribute::Float(self.lr) },
        )
    }
}

// -----------------------------------------------------------------------------
// Adam
// -----------------------------------------------------------------------------
#[derive(Debug)]
struct _Moments {
    param: Weak<Variable>,
    moment1: VariableHandle,
    moment2: VariableHandle,
    step: i64,
}

impl _Moments {
    fn new(param: &VariableHandle) -> Self {
        let shape = param.get().shape().to_vec();
        Self {
            param: Rc::downgrade(param),
            moment1: Variable::from_tensor("moment1", Tensor::zeros(&shape)),
            moment2: Variable::from_tensor("moment2", Tensor::zeros(&shape)),
            step: 0,
        }
    }

    /// Whether this state still belongs to `param` and fits its shape.
    fn fits(&self, param: &VariableHandle) -> bool {
        0 < self.param.strong_count() && self.moment1.get().shape() == param.get().shape()
    }
}

/// Adam with bias-corrected moments kept per parameter.
///
/// Parameters are told apart by identity, not by name. State is reset when the
/// parameter changes shape or when a dropped parameter's address is reused.
#[derive(Debug)]
pub struct Adam {
    lr: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    moments: HashMap<*const Variable, _Moments>,
}

//
// ctor
//
impl Adam {
    #[inline]
    pub fn new(lr: f64) -> Self {
        Self::with_params(lr, 0.9, 0.999, 1e-8)
    }

    pub fn with_params(lr: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            moments: HashMap::new(),
        }
    }
}

//
// methods
//
impl Adam {
    #[inline]
    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// Number of updates applied to `param` so far.
    #[inline]
    pub fn step(&self, param: &VariableHandle) -> i64 {
        self.moments
            .get(&Rc::as_ptr(param))
            .filter(|m| m.param.strong_count() > 0)
            .map_or(0, |m| m.step)
    }
}

impl Optimizer for Adam {
    fn update(&mut self, param: &VariableHandle) -> Result<()> {
        let moments = match self.moments.entry(Rc::as_ptr(param)) {
            Entry::Occupied(e) if e.get().fits(param) => e.into_mut(),
            Entry::Occupied(mut e) => {
                e.insert(_Moments::new(param));
                e.into_mut()
            }
            Entry::Vacant(e) => e.insert(_Moments::new(param)),
        };
        let step = moments.step + 1;

        run_operator(
            BuiltinOp::Adam.as_str(),
            &btreemap! {
                "Param".to_string() => vec![param.clone()],
                "Grad".to_string() => vec![param.grad()],
                "Moment1".to_string() => vec![moments.moment1.clone()],
                "Moment2".to_string() => vec![moments.moment2.clone()],
            },
            &btreemap! {
                "ParamOut".to_string() => vec![param.clone()],
                "Moment1Out".to_string() => vec![moments.moment1.clone()],
                "Moment2Out".to_string() => vec![moments.moment2.clone()],
            },
            &btreemap! {
                "learning_rate".to_string() => Attribute::Float(self.lr),
                "beta1".to_string() => Attribute::Float(self.beta1),
                "beta2".to_string() => Attribute::Float(self.beta2),
                "epsilon".to_string() => Attribute::Float(self.epsilon),
                "step".to_string() => Attribute::Int(step),
            },
        )?;
        moments.step = step;
        Ok(())
    }
}

/// Run backward from `loss` on the current tape and update `params`.
///
/// Parameters which do not contribute to `loss` keep their values.
pub fn backward_and_update<O: Optimizer + ?Sized>(
    loss: &VariableHandle,
    optimizer: &mut O,
    params: &[VariableHandle],
) -> Result<()> {
    let tape = get_global_tape();
    tape.borrow_mut().backward(loss)?;

    let reached: Vec<_> = {
        let tape = tape.borrow();
        params
            .iter()
            .filter(|param| {
                let reached = tape.has_gradient(param);
                if !reached {
                    log::debug!("Skip updating {} which has no gradient", param.name());
                }
                reached
            })
            .collect()
    };
    for param in reached {
        optimizer.update(param)?;
    }
    Ok(())
}
