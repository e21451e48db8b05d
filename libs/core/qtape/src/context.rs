use std::{cell::RefCell, rc::Rc};

use crate::{Place, Result, Tape, VariableHandle};

pub type TapeHandle = Rc<RefCell<Tape>>;

thread_local! {
    static TAPES: RefCell<Vec<TapeHandle>> = const { RefCell::new(Vec::new()) };
}

/// Current tape of this thread, creating a CPU tape on first use.
///
/// Every recording function appends to the tape returned here at call time.
pub fn get_global_tape() -> TapeHandle {
    TAPES.with(|tapes| {
        let mut tapes = tapes.borrow_mut();
        match tapes.last() {
            Some(tape) => tape.clone(),
            None => {
                let tape = Rc::new(RefCell::new(Tape::default()));
                tapes.push(tape.clone());
                tape
            }
        }
    })
}

/// Replace the current tape with an empty one bound to `place`.
///
/// The replaced tape stays alive as long as someone holds it.
pub fn reset_global_tape(place: Place) -> TapeHandle {
    log::debug!("Reset global tape on {}", place);
    let tape = Rc::new(RefCell::new(Tape::new(place)));
    TAPES.with(|tapes| {
        let mut tapes = tapes.borrow_mut();
        match tapes.last_mut() {
            Some(top) => *top = tape.clone(),
            None => tapes.push(tape.clone()),
        }
    });
    tape
}

/// Run backward on the current tape.
#[inline]
pub fn backward(target: &VariableHandle) -> Result<()> {
    get_global_tape().borrow_mut().backward(target)
}

// -----------------------------------------------------------------------------
// TapeGuard
// -----------------------------------------------------------------------------
/// Makes a tape current until dropped.
///
/// On drop the tape which was current before is restored,
/// including any tape installed by [`reset_global_tape`] in the meantime.
#[must_use = "the tape is current only while the guard is alive"]
#[derive(Debug)]
pub struct TapeGuard {
    tape: TapeHandle,
    depth: usize,
}

impl TapeGuard {
    #[inline]
    pub fn tape(&self) -> &TapeHandle {
        &self.tape
    }
}

impl Drop for TapeGuard {
    fn drop(&mut self) {
        // the thread local may already be gone on thread exit
        let _ = TAPES.try_with(|tapes| tapes.borrow_mut().truncate(self.depth - 1));
    }
}

/// Push `tape` as the current tape of this thread.
pub fn scoped_tape(tape: TapeHandle) -> TapeGuard {
    let depth = TAPES.with(|tapes| {
        let mut tapes = tapes.borrow_mut();
        tapes.push(tape.clone());
        tapes.len()
    });
    TapeGuard { tape, depth }
}

/// Run `f` with `tape` as the current tape.
#[inline]
pub fn with_tape<R>(tape: TapeHandle, f: impl FnOnce() -> R) -> R {
    let _guard = scoped_tape(tape);
    f()
}
