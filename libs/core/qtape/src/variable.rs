use std::{
    cell::{Ref, RefCell, RefMut},
    fmt::Display,
    rc::Rc,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::{context::get_global_tape, Result, Tensor};

/// Suffix appended to the name of a gradient variable.
pub const GRAD_SUFFIX: &str = "@GRAD";

pub type VariableHandle = Rc<Variable>;

static COUNTER: AtomicU64 = AtomicU64::new(0);

// -----------------------------------------------------------------------------
// Suffix
// -----------------------------------------------------------------------------
/// How the name of a [`Variable`] is derived from its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    /// `prefix` followed by a process-unique counter
    Count,
    /// `prefix` followed by [`GRAD_SUFFIX`]
    Grad,
    /// `prefix` as it is
    None,
}

// -----------------------------------------------------------------------------
// Variable
// -----------------------------------------------------------------------------
/// Named handle to a single tensor and its lazily created gradient.
///
/// The gradient variable is owned by this variable once it has been created,
/// so [`Variable::grad`] returns the same handle for the whole lifetime of the variable.
#[derive(Debug)]
pub struct Variable {
    name: String,
    var: RefCell<Tensor>,
    grad: RefCell<Option<VariableHandle>>,
}

impl Drop for Variable {
    #[inline]
    fn drop(&mut self) {
        log::trace!("Deleting {}", self.name);
    }
}

impl Display for Variable {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let var = self.var.borrow();
        write!(f, "{} {:?} {:?}", self.name, var.shape(), var.data())
    }
}

//
// ctor
//
impl Variable {
    /// Create an uninitialized variable named `prefix` followed by a fresh counter.
    #[inline]
    pub fn new(prefix: &str) -> VariableHandle {
        Self::with_suffix(prefix, Suffix::Count)
    }

    pub fn with_suffix(prefix: &str, suffix: Suffix) -> VariableHandle {
        let name = match suffix {
            Suffix::Count => format!("{}{}", prefix, COUNTER.fetch_add(1, Ordering::Relaxed)),
            Suffix::Grad => format!("{}{}", prefix, GRAD_SUFFIX),
            Suffix::None => prefix.to_string(),
        };
        Rc::new(Self {
            name,
            var: RefCell::new(Tensor::default()),
            grad: RefCell::new(None),
        })
    }

    /// Create a variable which already holds `value`.
    #[inline]
    pub fn from_tensor(prefix: &str, value: Tensor) -> VariableHandle {
        let var = Self::new(prefix);
        var.set(value);
        var
    }
}

//
// methods
//
impl Variable {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Return the gradient variable, creating it on the first request.
    pub fn grad(&self) -> VariableHandle {
        self.grad
            .borrow_mut()
            .get_or_insert_with(|| Self::with_suffix(&self.name, Suffix::Grad))
            .clone()
    }

    #[inline]
    pub fn grad_exist(&self) -> bool {
        self.grad.borrow().is_some()
    }

    /// Evaluate this variable by running the pending operators of the current tape.
    pub fn value(&self) -> Result<Ref<'_, Tensor>> {
        get_global_tape().borrow_mut().forward()?;
        Ok(self.get())
    }

    /// Evaluate this variable and copy its data into a detached variable.
    pub fn fetch_value(&self) -> Result<VariableHandle> {
        let value = self.value()?.clone();
        Ok(Self::from_tensor(&format!("{}_fetched", self.name), value))
    }

    #[inline]
    pub fn get(&self) -> Ref<'_, Tensor> {
        self.var.borrow()
    }

    #[inline]
    pub fn get_mut(&self) -> RefMut<'_, Tensor> {
        self.var.borrow_mut()
    }

    #[inline]
    pub fn set(&self, value: Tensor) {
        *self.var.borrow_mut() = value;
    }
}
