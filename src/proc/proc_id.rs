use std::any::Any;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::hash::Hash;
use std::hash::Hasher;
use std::sync::Weak;

use crate::node::Node;
use crate::node::NodeInner;
use crate::proc::Envelope;

/// An opaque, comparable, printable handle addressing a proc.
///
/// A `ProcId` names a proc on the node that spawned it. Two ids compare
/// equal iff they name the same proc; ids are never reused within a node.
///
/// The id holds a non-owning back-reference to its node, so stray ids do
/// not keep a torn-down node alive.
///
/// # Display Format
///
/// Ids format as `"<node-name>-><seq>"` for debugging; an id whose node is
/// gone formats as `"?-><seq>"`.
#[derive(Clone)]
pub struct ProcId {
  node: Weak<NodeInner>,
  seq: u64,
}

impl ProcId {
  /// Creates an id for the proc registered under `seq` on `node`.
  #[inline]
  pub(crate) fn new(node: Weak<NodeInner>, seq: u64) -> Self {
    Self { node, seq }
  }

  /// Returns the opaque per-node sequence number of the proc.
  #[inline]
  pub fn seq(&self) -> u64 {
    self.seq
  }

  /// Returns a handle to the node that spawned the proc, or `None` once
  /// the node has been torn down.
  #[inline]
  pub fn node(&self) -> Option<Node> {
    self.node.upgrade().map(Node::from_inner)
  }

  /// Sends a message to the proc this id points to.
  ///
  /// Delivery is asynchronous and best-effort: if the proc (or its node)
  /// no longer exists, the message is dropped silently. Messages from a
  /// single sender to a single receiver are delivered in the order they
  /// were sent.
  #[inline]
  pub fn send<M>(&self, message: M)
  where
    M: Any + Send,
  {
    self.dispatch(Envelope::User(Box::new(message)));
  }

  /// Routes an envelope to the proc's mailbox through the owning node.
  pub(crate) fn dispatch(&self, envelope: Envelope) {
    let Some(node) = self.node.upgrade() else {
      tracing::debug!(to = %self, "dead letter: node is gone");
      return;
    };

    node.dispatch(self.seq, envelope);
  }

  /// Returns `true` if this id names a proc spawned by `inner`.
  #[inline]
  pub(crate) fn is_local(&self, inner: &NodeInner) -> bool {
    std::ptr::eq(self.node.as_ptr(), inner)
  }
}

impl PartialEq for ProcId {
  #[inline]
  fn eq(&self, other: &Self) -> bool {
    self.seq == other.seq && Weak::ptr_eq(&self.node, &other.node)
  }
}

impl Eq for ProcId {}

impl Hash for ProcId {
  fn hash<H: Hasher>(&self, state: &mut H) {
    state.write_usize(self.node.as_ptr() as usize);
    state.write_u64(self.seq);
  }
}

impl Debug for ProcId {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    Display::fmt(self, f)
  }
}

impl Display for ProcId {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    match self.node.upgrade() {
      Some(node) => write!(f, "{}->{}", node.name(), self.seq),
      None => write!(f, "?->{}", self.seq),
    }
  }
}
