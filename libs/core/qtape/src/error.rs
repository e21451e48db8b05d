// -----------------------------------------------------------------------------
// Error
// -----------------------------------------------------------------------------
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum Error {
    #[error("Tape has already been backwarded")]
    AlreadyBackwarded,
    #[error("Cannot record operator '{0}' on a tape which has been backwarded")]
    TapeBackwarded(String),
    #[error("Operator '{0}' is not registered")]
    UnregisteredOp(String),
    #[error("Operator '{0}' is already registered")]
    OpAlreadyRegistered(String),
    #[error("Operator '{0}' has no gradient operator")]
    NoGradient(String),
    #[error("Operator '{op}' requires slot '{slot}'")]
    MissingSlot { op: String, slot: String },
    #[error("Operator '{op}' requires attribute '{name}' of type {expected}")]
    InvalidAttr {
        op: String,
        name: String,
        expected: &'static str,
    },
    #[error("Variable '{0}' is not initialized")]
    Uninitialized(String),
    #[error("Shape mismatch in '{op}': {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: String,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },
    #[error("Shape {shape:?} cannot hold {len} elements")]
    InvalidShape { shape: Vec<usize>, len: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
