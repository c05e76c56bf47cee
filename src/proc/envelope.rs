use std::any::Any;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;

use crate::proc::ProcId;

/// A user message in flight between procs.
pub type Message = Box<dyn Any + Send>;

// -----------------------------------------------------------------------------
// Envelope
// -----------------------------------------------------------------------------

/// One slot of a proc mailbox: user mail or control mail.
///
/// Control mail travels the same queue as user mail so it stays ordered
/// with prior messages from the same sender. The receive engine dispatches
/// on the tag before anything reaches a user handler.
pub(crate) enum Envelope {
  /// Ordinary mail, delivered to the user handler.
  User(Message),
  /// The sender has linked itself to the recipient.
  Link(ProcId),
  /// The sender has dropped its link to the recipient.
  Unlink(ProcId),
  /// A linked partner exited abnormally; the recipient is asked to
  /// terminate.
  LinkExit(ProcId),
}

impl Debug for Envelope {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    match self {
      Self::User(_) => f.write_str("User(..)"),
      Self::Link(pid) => write!(f, "Link({pid})"),
      Self::Unlink(pid) => write!(f, "Unlink({pid})"),
      Self::LinkExit(pid) => write!(f, "LinkExit({pid})"),
    }
  }
}
