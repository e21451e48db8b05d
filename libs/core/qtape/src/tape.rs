use std::{collections::HashSet, rc::Rc, sync::Arc};

use maplit::btreemap;

use crate::{
    graphviz::GraphvizBuilder,
    kernels::{BuiltinOp, OUT, X},
    AttributeMap, Error, OpRecord, OpRegistry, Place, Result, Suffix, Variable, VariableHandle,
    VariableHandleMap,
};

// -----------------------------------------------------------------------------
// TapeState
// -----------------------------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapeState {
    /// Operators can be appended and replayed.
    Recording,
    /// [`Tape::backward`] has been called. Nothing can be appended anymore.
    Backwarded,
}

// -----------------------------------------------------------------------------
// _GradAccum
// -----------------------------------------------------------------------------
/// Tracks which gradient variables have been written during one backward pass.
///
/// The first write into a gradient overwrites it.
/// Later writes go to a renamed variable which is then summed into the gradient.
#[derive(Debug, Default)]
struct _GradAccum {
    written: HashSet<*const Variable>,
}

impl _GradAccum {
    #[inline]
    fn _is_written(&self, var: &VariableHandle) -> bool {
        var.grad_exist() && self.written.contains(&Rc::as_ptr(&var.grad()))
    }

    fn _record(&mut self, tape: &mut Tape, op: OpRecord) -> Result<()> {
        let (op_type, inputs, mut outputs, attrs) = op.into_parts();

        let mut renamed = Vec::new();
        for var in outputs.values_mut().flatten() {
            if self.written.insert(Rc::as_ptr(var)) {
                continue;
            }
            let tmp = Variable::with_suffix(&format!("{}@RENAME@", var.name()), Suffix::Count);
            renamed.push((std::mem::replace(var, tmp.clone()), tmp));
        }

        tape.add_op(&op_type, inputs, outputs, attrs)?;
        for (grad, tmp) in renamed {
            tape.add_op(
                BuiltinOp::Sum.as_str(),
                btreemap! { X.to_string() => vec![grad.clone(), tmp] },
                btreemap! { OUT.to_string() => vec![grad] },
                AttributeMap::new(),
            )?;
        }
        Ok(())
    }
}

// -----------------------------------------------------------------------------
// Tape
// -----------------------------------------------------------------------------
/// Ordered log of operator invocations.
///
/// Recording and execution are decoupled.
/// [`Tape::add_op`] only appends a record and [`Tape::forward`] runs the records
/// which have not been run yet.
#[derive(Debug)]
pub struct Tape {
    state: TapeState,
    cursor: usize,
    place: Place,
    ops: Vec<OpRecord>,
    registry: Arc<OpRegistry>,
    backward_tape: Option<Box<Tape>>,
    grads: _GradAccum,
}

//
// ctor
//
impl Default for Tape {
    #[inline]
    fn default() -> Self {
        Self::new(Place::default())
    }
}

impl Tape {
    /// Empty tape dispatching to the builtin operators.
    #[inline]
    pub fn new(place: Place) -> Self {
        Self::with_registry(place, OpRegistry::shared())
    }

    pub fn with_registry(place: Place, registry: Arc<OpRegistry>) -> Self {
        Self {
            state: TapeState::Recording,
            cursor: 0,
            place,
            ops: Vec::new(),
            registry,
            backward_tape: None,
            grads: _GradAccum::default(),
        }
    }
}

//
// methods
//
impl Tape {
    #[inline]
    pub fn place(&self) -> Place {
        self.place
    }

    #[inline]
    pub fn state(&self) -> TapeState {
        self.state
    }

    #[inline]
    pub fn has_been_backwarded(&self) -> bool {
        self.state == TapeState::Backwarded
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    #[inline]
    pub fn ops(&self) -> &[OpRecord] {
        &self.ops
    }

    /// Number of records which have been run.
    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Tape of the gradient operators, available after [`Tape::backward`].
    #[inline]
    pub fn backward_tape(&self) -> Option<&Tape> {
        self.backward_tape.as_deref()
    }

    /// Whether the backward pass of this tape has written the gradient of `var`.
    #[inline]
    pub fn has_gradient(&self, var: &VariableHandle) -> bool {
        self.grads._is_written(var)
    }

    /// Append a record. Nothing is executed until [`Tape::forward`].
    pub fn add_op(
        &mut self,
        op_type: &str,
        inputs: VariableHandleMap,
        outputs: VariableHandleMap,
        attrs: AttributeMap,
    ) -> Result<()> {
        if self.has_been_backwarded() {
            return Err(Error::TapeBackwarded(op_type.to_string()));
        }
        self.ops.push(OpRecord::new(op_type, inputs, outputs, attrs));
        Ok(())
    }

    /// Run every record appended since the last call.
    pub fn forward(&mut self) -> Result<()> {
        if self.cursor < self.ops.len() {
            log::debug!(
                "Forward {} operators from position {}",
                self.ops.len() - self.cursor,
                self.cursor
            );
        }
        while let Some(op) = self.ops.get(self.cursor) {
            self.registry.run_record(op)?;
            self.cursor += 1;
        }
        Ok(())
    }

    /// Compute the gradients of `target` with respect to every variable on this tape.
    ///
    /// Gradient operators are recorded on a new tape, which is run and kept
    /// as [`Tape::backward_tape`]. This can be called at most once per tape.
    pub fn backward(&mut self, target: &VariableHandle) -> Result<()> {
        if self.has_been_backwarded() {
            return Err(Error::AlreadyBackwarded);
        }
        self.forward()?;
        log::debug!(
            "Backward from {} over {} operators",
            target.name(),
            self.ops.len()
        );

        let mut bwd = Tape::with_registry(self.place, self.registry.clone());
        let mut grads = _GradAccum::default();
        grads._record(&mut bwd, _fill_like(BuiltinOp::FillOnesLike, target))?;

        for op in self.ops.iter().rev() {
            let outputs: Vec<_> = op.outputs().values().flatten().collect();
            if !outputs.iter().any(|var| grads._is_written(var)) {
                // not on any path to the target
                continue;
            }
            let grad_maker = self
                .registry
                .get(op.op_type())?
                .grad_maker
                .ok_or_else(|| Error::NoGradient(op.op_type().to_string()))?;

            for var in outputs {
                if !grads._is_written(var) {
                    grads._record(&mut bwd, _fill_like(BuiltinOp::FillZerosLike, var))?;
                }
            }
            for grad_op in grad_maker(op) {
                grads._record(&mut bwd, grad_op)?;
            }
        }

        self.state = TapeState::Backwarded;
        self.grads = grads;
        self.backward_tape.insert(Box::new(bwd)).forward()
    }

    /// Render the forward log, and optionally the backward log, in DOT format.
    pub fn graphviz_string(&self, print_backward: bool) -> String {
        let mut builder = GraphvizBuilder::new("Tape");
        builder
            .with_graph_setting("rankdir", "LR")
            .with_node_setting("fontname", "Helvetica")
            .add_ops(&self.ops, "shape=box");
        if print_backward {
            if let Some(bwd) = &self.backward_tape {
                builder.add_ops(&bwd.ops, "shape=box, color=red");
            }
        }
        builder.gen_dot()
    }
}

#[inline]
fn _fill_like(op: BuiltinOp, var: &VariableHandle) -> OpRecord {
    OpRecord::new(
        op.as_str(),
        btreemap! { X.to_string() => vec![var.clone()] },
        btreemap! { OUT.to_string() => vec![var.grad()] },
        AttributeMap::new(),
    )
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use approx::assert_abs_diff_eq;
    use rstest::rstest;

    use crate::{
        registry::{OpContext, OpInfo},
        Attribute, Tensor,
    };

    use super::*;

    fn var(data: &[f64]) -> VariableHandle {
        Variable::from_tensor("x", Tensor::new(vec![data.len()], data.to_vec()).unwrap())
    }

    fn record(tape: &mut Tape, op: &str, inputs: &[(&str, &VariableHandle)]) -> VariableHandle {
        record_with(tape, op, inputs, AttributeMap::new())
    }

    fn record_with(
        tape: &mut Tape,
        op: &str,
        inputs: &[(&str, &VariableHandle)],
        attrs: AttributeMap,
    ) -> VariableHandle {
        let out = Variable::new(op);
        let mut ins = VariableHandleMap::new();
        for (slot, v) in inputs {
            ins.entry(slot.to_string()).or_default().push((*v).clone());
        }
        tape.add_op(op, ins, btreemap! { OUT.to_string() => vec![out.clone()] }, attrs)
            .unwrap();
        out
    }

    fn data(var: &VariableHandle) -> Vec<f64> {
        var.get().data().to_vec()
    }

    thread_local! {
        static CALLS: Cell<usize> = const { Cell::new(0) };
    }

    fn counting(ctx: &OpContext<'_>) -> Result<()> {
        CALLS.with(|c| c.set(c.get() + 1));
        let out = ctx.input(X)?.map(|v| v + 1.0);
        ctx.set_output(OUT, out)
    }

    fn counting_registry() -> Arc<OpRegistry> {
        let mut reg = OpRegistry::builtin();
        reg.register(
            "count",
            OpInfo {
                kernel: counting,
                grad_maker: None,
            },
        )
        .unwrap();
        Arc::new(reg)
    }

    #[test]
    fn test_add_op_does_not_run() {
        let mut tape = Tape::default();
        let x = var(&[1., 2.]);

        let y = record(&mut tape, "square", &[("X", &x)]);

        assert_eq!(tape.len(), 1);
        assert_eq!(tape.cursor(), 0);
        assert!(!y.get().is_initialized());
    }

    #[test]
    fn test_forward_idempotent() {
        let mut tape = Tape::default();
        let x = var(&[1., -2.]);
        let y = record(&mut tape, "square", &[("X", &x)]);
        let z = record(&mut tape, "tanh", &[("X", &y)]);

        tape.forward().unwrap();
        let first = data(&z);
        tape.forward().unwrap();

        assert_eq!(data(&z), first);
        assert_eq!(tape.cursor(), 2);
    }

    #[test]
    fn test_forward_resumes_suffix() {
        CALLS.with(|c| c.set(0));
        let mut tape = Tape::with_registry(Place::Cpu, counting_registry());
        let x = var(&[0.]);

        let y = record(&mut tape, "count", &[("X", &x)]);
        tape.forward().unwrap();
        tape.forward().unwrap();
        let z = record(&mut tape, "count", &[("X", &y)]);
        tape.forward().unwrap();

        assert_eq!(CALLS.with(Cell::get), 2);
        assert_eq!(data(&z), vec![2.]);
    }

    #[test]
    fn test_forward_error_propagates() {
        let mut tape = Tape::default();
        let x = Variable::new("x");
        record(&mut tape, "square", &[("X", &x)]);

        let err = tape.forward();

        assert_eq!(err, Err(Error::Uninitialized(x.name().to_string())));
    }

    #[test]
    fn test_unregistered_op() {
        let mut tape = Tape::default();
        let x = var(&[1.]);
        record(&mut tape, "conv2d", &[("X", &x)]);

        assert_eq!(
            tape.forward(),
            Err(Error::UnregisteredOp("conv2d".to_string()))
        );
    }

    #[test]
    fn test_backward_single_consumer() {
        let mut tape = Tape::default();
        let x = var(&[1., -2., 3.]);
        let y = record(&mut tape, "square", &[("X", &x)]);
        let loss = record(&mut tape, "mean", &[("X", &y)]);

        tape.backward(&loss).unwrap();

        let grad = data(&x.grad());
        for (g, v) in grad.iter().zip([1., -2., 3.]) {
            assert_abs_diff_eq!(*g, 2.0 * v / 3.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_backward_fan_out() {
        let xs = [0.5, -1.0, 2.0];
        let mut tape = Tape::default();
        let x = var(&xs);
        let f = record(&mut tape, "square", &[("X", &x)]);
        let g = record(&mut tape, "tanh", &[("X", &x)]);
        let s = record(&mut tape, "elementwise_add", &[("X", &f), ("Y", &g)]);
        let loss = record(&mut tape, "mean", &[("X", &s)]);

        tape.backward(&loss).unwrap();

        let grad = data(&x.grad());
        for (g, v) in grad.iter().zip(xs) {
            let grad_f = 2.0 * v / 3.0;
            let grad_g = (1.0 - v.tanh().powi(2)) / 3.0;
            assert_abs_diff_eq!(*g, grad_f + grad_g, epsilon = 1e-12);
        }
        let bwd = tape.backward_tape().unwrap();
        assert_eq!(
            bwd.ops().iter().filter(|op| op.op_type() == "sum").count(),
            1
        );
        assert!(bwd
            .ops()
            .iter()
            .flat_map(|op| op.outputs().values().flatten())
            .any(|v| v.name().contains("@RENAME@")));
    }

    #[test]
    fn test_backward_same_var_in_two_slots() {
        let mut tape = Tape::default();
        let x = var(&[3., -4.]);
        let y = record(&mut tape, "elementwise_mul", &[("X", &x), ("Y", &x)]);
        let loss = record(&mut tape, "mean", &[("X", &y)]);

        tape.backward(&loss).unwrap();

        assert_eq!(data(&x.grad()), vec![3., -4.]);
    }

    #[test]
    fn test_backward_skips_unrelated_ops() {
        let mut tape = Tape::default();
        let x = var(&[1.]);
        let w = var(&[2.]);
        let loss = record(&mut tape, "square", &[("X", &x)]);
        let _unused = record(&mut tape, "tanh", &[("X", &w)]);

        tape.backward(&loss).unwrap();

        assert!(tape.has_gradient(&x));
        assert!(!tape.has_gradient(&w));
        assert!(!w.grad_exist() || !w.grad().get().is_initialized());
    }

    #[test]
    fn test_backward_twice_fails() {
        let mut tape = Tape::default();
        let x = var(&[1.]);
        let loss = record(&mut tape, "square", &[("X", &x)]);

        tape.backward(&loss).unwrap();
        let err = tape.backward(&loss);

        assert_eq!(err, Err(Error::AlreadyBackwarded));
        assert_eq!(data(&x.grad()), vec![2.]);
    }

    #[test]
    fn test_add_op_after_backward_fails() {
        let mut tape = Tape::default();
        let x = var(&[1.]);
        let loss = record(&mut tape, "square", &[("X", &x)]);
        tape.backward(&loss).unwrap();

        let err = tape.add_op(
            "tanh",
            btreemap! { X.to_string() => vec![x.clone()] },
            btreemap! { OUT.to_string() => vec![Variable::new("y")] },
            AttributeMap::new(),
        );

        assert_eq!(err, Err(Error::TapeBackwarded("tanh".to_string())));
        assert_eq!(tape.state(), TapeState::Backwarded);
        assert!(tape.forward().is_ok());
    }

    #[test]
    fn test_backward_no_gradient() {
        let mut tape = Tape::with_registry(Place::Cpu, counting_registry());
        let x = var(&[1.]);
        let y = record(&mut tape, "count", &[("X", &x)]);
        let loss = record(&mut tape, "square", &[("X", &y)]);

        let err = tape.backward(&loss);

        assert_eq!(err, Err(Error::NoGradient("count".to_string())));
    }

    #[test]
    fn test_gradients_do_not_leak_across_tapes() {
        let x = var(&[2.]);
        for _ in 0..2 {
            let mut tape = Tape::default();
            let loss = record(&mut tape, "square", &[("X", &x)]);
            tape.backward(&loss).unwrap();

            assert_eq!(data(&x.grad()), vec![4.]);
        }
    }

    #[test]
    fn test_grad_handle_stable_through_backward() {
        let mut tape = Tape::default();
        let x = var(&[2.]);
        let before = x.grad();
        let loss = record(&mut tape, "square", &[("X", &x)]);

        tape.backward(&loss).unwrap();

        assert!(Rc::ptr_eq(&before, &x.grad()));
    }

    #[rstest]
    #[case("tanh")]
    #[case("sigmoid")]
    #[case("relu")]
    #[case("square")]
    fn test_backward_matches_finite_difference(#[case] act: &str) {
        let xs = vec![0.3, -0.7, 1.1, 0.4, -0.2, 0.9];
        let ws = vec![0.5, -0.25, 0.75, 0.1, -0.6, 0.2];
        let w2s = vec![0.4, -0.3, 0.8, 0.15, -0.5, 0.25];
        let bs = vec![0.05, -0.1];
        let eval = |ws: Vec<f64>, grads: bool| -> (f64, Vec<f64>) {
            let mut tape = Tape::default();
            let x = Variable::from_tensor("x", Tensor::new(vec![3, 2], xs.clone()).unwrap());
            let w = Variable::from_tensor("w", Tensor::new(vec![2, 3], ws).unwrap());
            let b = Variable::from_tensor("b", Tensor::new(vec![3], vec![0.0; 3]).unwrap());
            let c = Variable::from_tensor("c", Tensor::new(vec![2], bs.clone()).unwrap());
            let h = record(&mut tape, "mul", &[("X", &x), ("Y", &w)]);
            let h = record(&mut tape, "elementwise_add", &[("X", &h), ("Y", &b)]);
            let h = record(&mut tape, act, &[("X", &h)]);
            let w2 = Variable::from_tensor("w2", Tensor::new(vec![3, 2], w2s.clone()).unwrap());
            let o = record(&mut tape, "mul", &[("X", &h), ("Y", &w2)]);
            let o = record(&mut tape, "elementwise_sub", &[("X", &o), ("Y", &c)]);
            let o = record_with(
                &mut tape,
                "scale",
                &[("X", &o)],
                btreemap! { "scale".to_string() => Attribute::Float(1.5) },
            );
            let o = record(&mut tape, "square", &[("X", &o)]);
            let loss = record(&mut tape, "mean", &[("X", &o)]);
            if grads {
                tape.backward(&loss).unwrap();
                (data(&loss)[0], data(&w.grad()))
            } else {
                tape.forward().unwrap();
                (data(&loss)[0], Vec::new())
            }
        };

        let (_, grads) = eval(ws.clone(), true);
        let eps = 1e-6;
        for i in 0..ws.len() {
            let mut plus = ws.clone();
            plus[i] += eps;
            let mut minus = ws.clone();
            minus[i] -= eps;
            let numeric = (eval(plus, false).0 - eval(minus, false).0) / (2.0 * eps);
            assert_abs_diff_eq!(grads[i], numeric, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_graphviz_string() {
        let mut tape = Tape::default();
        let x = var(&[1.]);
        let loss = record(&mut tape, "square", &[("X", &x)]);
        tape.backward(&loss).unwrap();

        let fwd_only = tape.graphviz_string(false);
        let both = tape.graphviz_string(true);

        assert!(fwd_only.starts_with("digraph Tape {\n  graph [rankdir=LR];\n"));
        assert!(fwd_only.contains("  node [fontname=Helvetica];\n"));
        assert!(fwd_only.contains("label=\"square\""));
        assert!(!fwd_only.contains("square_grad"));
        assert!(both.contains("label=\"square_grad\""));
        assert!(both.contains("label=\"fill_ones_like\""));
        assert!(both.contains(&format!("{}@GRAD", x.name())));
    }
}
