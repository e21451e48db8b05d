mod context;
mod error;
mod graphviz;
mod kernels;
mod op;
mod registry;
mod tape;
mod tensor;
mod variable;

pub mod function;
pub mod optim;

pub use context::{
    backward, get_global_tape, reset_global_tape, scoped_tape, with_tape, TapeGuard, TapeHandle,
};
pub use error::{Error, Result};
pub use graphviz::GraphvizBuilder;
pub use kernels::BuiltinOp;
pub use op::{grad_slot, Attribute, AttributeMap, OpRecord, VariableHandleMap};
pub use registry::{run_operator, GradMaker, Kernel, OpContext, OpInfo, OpRegistry};
pub use tape::{Tape, TapeState};
pub use tensor::{Place, Tensor};
pub use variable::{Suffix, Variable, VariableHandle, GRAD_SUFFIX};
