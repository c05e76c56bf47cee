use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use crate::error::ProcError;
use crate::error::ProcResult;
use crate::proc::Proc;

// -----------------------------------------------------------------------------
// Body
// -----------------------------------------------------------------------------

/// The main body of a proc.
///
/// Implemented for every `FnOnce(&mut Proc) -> ProcResult` closure, so the
/// common spawn looks like:
///
/// ```ignore
/// node.spawn(|proc: &mut Proc| {
///   proc.receive(any(|_message| Ok(())))
/// });
/// ```
///
/// Types carrying their own construction-time state implement `Body`
/// directly; [`Recur`] adapts a step function into a state-machine body.
pub trait Body: Send + 'static {
  /// Runs the proc to completion.
  fn run(self, proc: &mut Proc) -> ProcResult;
}

impl<F> Body for F
where
  F: FnOnce(&mut Proc) -> ProcResult + Send + 'static,
{
  #[inline]
  fn run(self, proc: &mut Proc) -> ProcResult {
    (self)(proc)
  }
}

// -----------------------------------------------------------------------------
// Recur
// -----------------------------------------------------------------------------

/// A recursive proc body: a step function folded over a state value.
///
/// The proc loops, feeding each state into `step`, until the step returns
/// `None`.
pub struct Recur<F, S> {
  step: F,
  seed: S,
}

impl<F, S> Recur<F, S> {
  /// Creates a recursive body from a step function and an initial state.
  #[inline]
  pub fn new(step: F, seed: S) -> Self {
    Self { step, seed }
  }
}

impl<F, S> Body for Recur<F, S>
where
  F: FnMut(&mut Proc, S) -> Result<Option<S>, ProcError> + Send + 'static,
  S: Send + 'static,
{
  fn run(self, proc: &mut Proc) -> ProcResult {
    let Self { mut step, seed } = self;
    let mut state: S = seed;

    'recur: loop {
      match step(proc, state)? {
        Some(next) => state = next,
        None => break 'recur Ok(()),
      }
    }
  }
}

impl<F, S> Debug for Recur<F, S> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("Recur(..)")
  }
}
