use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use crate::error::Fault;
use crate::mailbox::Interrupted;

/// The result type returned by proc bodies and receive operations.
pub type ProcResult = Result<(), ProcError>;

/// Reasons a proc body stops short of completing normally.
#[derive(Debug)]
pub enum ProcError {
  /// The proc was interrupted while waiting for mail, or was asked to
  /// terminate by a linked partner.
  ///
  /// This is an abnormal exit, but it is *not* recorded in the node's
  /// uncaught-fault sink.
  Interrupted,
  /// The proc body failed with a fault.
  ///
  /// This is an abnormal exit and the fault is recorded in the node's
  /// uncaught-fault sink.
  Fault(Fault),
}

impl Display for ProcError {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    match self {
      Self::Interrupted => f.write_str("proc interrupted"),
      Self::Fault(fault) => Display::fmt(fault, f),
    }
  }
}

impl Error for ProcError {}

impl From<Interrupted> for ProcError {
  #[inline]
  fn from(_: Interrupted) -> Self {
    Self::Interrupted
  }
}

impl From<Fault> for ProcError {
  #[inline]
  fn from(other: Fault) -> Self {
    Self::Fault(other)
  }
}
