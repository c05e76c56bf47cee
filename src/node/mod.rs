//! Nodes: per-host registries of live procs.

use hashbrown::HashMap;
use parking_lot::Mutex;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::panic;
use std::panic::AssertUnwindSafe;
use std::sync::Arc as StdArc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering::Relaxed;
use std::thread;
use triomphe::Arc;

use crate::consts;
use crate::error::fatal;
use crate::error::Fault;
use crate::error::ProcError;
use crate::mailbox::MailSender;
use crate::mailbox::Mailbox;
use crate::proc::Body;
use crate::proc::Envelope;
use crate::proc::ExitReason;
use crate::proc::ExitSentinel;
use crate::proc::Proc;
use crate::proc::ProcData;
use crate::proc::ProcId;
use crate::proc::ProcState;
use crate::proc::Recur;

// -----------------------------------------------------------------------------
// Node Inner
// -----------------------------------------------------------------------------

/// Shared node state.
///
/// The registry maps proc sequence numbers to live proc data. Every live
/// proc is in the map; the exit protocol removes a proc before releasing
/// its join latch, so a proc absent from the map has terminated (or is a
/// few instructions away from it).
pub(crate) struct NodeInner {
  /// Human-readable node name, used in proc id formatting.
  name: String,
  /// Live procs by sequence number.
  procs: RwLock<HashMap<u64, Arc<ProcData>>>,
  /// Monotonic proc sequence; values are never reused.
  sequence: AtomicU64,
  /// Faults collected from abnormally exited procs.
  faults: Mutex<Vec<StdArc<Fault>>>,
}

impl NodeInner {
  /// Returns the node's name.
  #[inline]
  pub(crate) fn name(&self) -> &str {
    self.name.as_str()
  }

  /// Routes an envelope to the mailbox of the proc registered under `seq`,
  /// or drops it if no such proc is live.
  pub(crate) fn dispatch(&self, seq: u64, envelope: Envelope) {
    let procs = self.procs.read();

    match procs.get(&seq) {
      Some(proc) => proc.sender.offer(envelope),
      None => tracing::debug!(node = %self.name, seq, "dead letter: no such proc"),
    }
  }
}

// -----------------------------------------------------------------------------
// Node
// -----------------------------------------------------------------------------

/// A registry of live procs on this host.
///
/// Nodes spawn procs, route messages to their mailboxes, and collect the
/// faults of procs that die abnormally. The handle is cheap to clone;
/// clones share one registry.
///
/// There is no shutdown operation: procs exit individually and
/// [`join_all`] waits for the ones currently alive.
///
/// [`join_all`]: Self::join_all
#[derive(Clone)]
pub struct Node {
  inner: StdArc<NodeInner>,
}

impl Node {
  /// Creates a new, empty node.
  pub fn new<T>(name: T) -> Self
  where
    T: Into<String>,
  {
    let name: String = name.into();

    tracing::debug!(node = %name, "node starting");

    Self {
      inner: StdArc::new(NodeInner {
        name,
        procs: RwLock::new(HashMap::with_capacity(consts::CAP_NODE_PROCS)),
        sequence: AtomicU64::new(0),
        faults: Mutex::new(Vec::with_capacity(consts::CAP_NODE_FAULTS)),
      }),
    }
  }

  #[inline]
  pub(crate) fn from_inner(inner: StdArc<NodeInner>) -> Self {
    Self { inner }
  }

  /// Returns the node's name.
  #[inline]
  pub fn name(&self) -> &str {
    self.inner.name()
  }

  /// Returns the number of currently live procs.
  #[inline]
  pub fn proc_count(&self) -> usize {
    self.inner.procs.read().len()
  }

  // ---------------------------------------------------------------------------
  // Spawning
  // ---------------------------------------------------------------------------

  /// Spawns a proc running `body` on a dedicated thread.
  ///
  /// The proc is registered under a freshly minted sequence number before
  /// its thread starts, so its id is routable from the moment this
  /// returns.
  pub fn spawn<B>(&self, body: B) -> ProcId
  where
    B: Body,
  {
    let seq: u64 = self.inner.sequence.fetch_add(1, Relaxed);
    let pid: ProcId = ProcId::new(StdArc::downgrade(&self.inner), seq);

    let (sender, mailbox): (MailSender<Envelope>, Mailbox<Envelope>) = Mailbox::new();
    let data: Arc<ProcData> = Arc::new(ProcData::new(pid.clone(), sender));

    self.inner.procs.write().insert(seq, Arc::clone(&data));
    data.set_state(ProcState::Runnable);

    tracing::debug!(pid = %pid, "proc spawn");

    let context: Proc = Proc::new(StdArc::clone(&self.inner), data, mailbox);
    let builder: thread::Builder = thread::Builder::new().name(pid.to_string());

    match builder.spawn(move || run_proc(context, body)) {
      Ok(_handle) => {}
      Err(error) => fatal!(format_args!("failed to start proc thread: {error}")),
    }

    pid
  }

  /// Spawns a recursive proc: `step` is folded over a state value until it
  /// returns `None`.
  pub fn spawn_rec<F, S>(&self, step: F, seed: S) -> ProcId
  where
    F: FnMut(&mut Proc, S) -> Result<Option<S>, ProcError> + Send + 'static,
    S: Send + 'static,
  {
    self.spawn(Recur::new(step, seed))
  }

  // ---------------------------------------------------------------------------
  // Messaging
  // ---------------------------------------------------------------------------

  /// Sends a message to a proc on this node.
  ///
  /// If the target is live, the message is enqueued exactly once; if the
  /// target is gone, or names a proc of a different node, the message is
  /// dropped silently.
  pub fn send<M>(&self, to: &ProcId, message: M)
  where
    M: Any + Send,
  {
    if to.is_local(&self.inner) {
      self.inner.dispatch(to.seq(), Envelope::User(Box::new(message)));
    } else {
      tracing::debug!(node = %self.inner.name, to = %to, "dead letter: foreign proc");
    }
  }

  // ---------------------------------------------------------------------------
  // Supervision
  // ---------------------------------------------------------------------------

  /// Blocks until every currently live proc has terminated.
  ///
  /// Procs spawned after the call begins are not waited for.
  pub fn join_all(&self) {
    let snapshot: Vec<Arc<ProcData>> = self.inner.procs.read().values().cloned().collect();

    for proc in snapshot {
      proc.done.wait();
    }
  }

  /// Returns a snapshot of the faults collected from procs that exited
  /// abnormally with an error.
  ///
  /// Interrupted procs and normal exits never appear here.
  pub fn uncaught_faults(&self) -> Vec<StdArc<Fault>> {
    self.inner.faults.lock().clone()
  }
}

impl Debug for Node {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.debug_struct("Node")
      .field("name", &self.inner.name)
      .field("procs", &self.proc_count())
      .finish_non_exhaustive()
  }
}

// -----------------------------------------------------------------------------
// Proc Runner
// -----------------------------------------------------------------------------

/// Runs a proc body on its dedicated thread and executes the exit
/// protocol.
fn run_proc<B>(mut context: Proc, body: B)
where
  B: Body,
{
  context.data.set_state(ProcState::Running);

  let outcome = panic::catch_unwind(AssertUnwindSafe(|| body.run(&mut context)));

  let reason: ExitReason = match outcome {
    Ok(Ok(())) => ExitReason::Normal,
    Ok(Err(ProcError::Interrupted)) => ExitReason::Interrupted,
    Ok(Err(ProcError::Fault(fault))) => ExitReason::Fault(StdArc::new(fault)),
    Err(payload) if payload.is::<ExitSentinel>() => ExitReason::Normal,
    Err(payload) => ExitReason::Fault(StdArc::new(Fault::from_panic(payload))),
  };

  finish(context, reason);
}

/// The exit protocol, in order: notify links (abnormal exits only),
/// deregister, sink the fault (faulted exits only), publish the reason,
/// release joiners.
fn finish(context: Proc, reason: ExitReason) {
  let Proc { node, data, mailbox } = context;
  let pid: ProcId = data.pid.clone();

  if reason.is_abnormal() {
    let links: Vec<ProcId> = data.links.lock().drain().collect();

    for partner in links {
      partner.dispatch(Envelope::LinkExit(pid.clone()));
    }
  }

  if node.procs.write().remove(&pid.seq()).is_none() {
    tracing::error!(pid = %pid, "dangling proc registration");
  }

  if let ExitReason::Fault(ref fault) = reason {
    tracing::error!(pid = %pid, %fault, "uncaught fault");

    node.faults.lock().push(StdArc::clone(fault));
  }

  tracing::debug!(pid = %pid, ?reason, "proc exit");

  if data.exit.set(reason).is_err() {
    tracing::error!(pid = %pid, "duplicate exit reason");
  }

  data.set_state(ProcState::Terminated);
  data.done.release();

  drop(mailbox);
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(all(test, not(loom)))]
mod tests {
  use std::sync::mpsc;
  use std::time::Duration;

  use crate::error::Fault;
  use crate::proc::any;
  use crate::proc::exit;
  use crate::proc::Proc;
  use crate::proc::ProcId;

  use super::*;

  #[test]
  fn test_spawn_runs_body() {
    let node: Node = Node::new("spawn");
    let (done, outcome): (mpsc::Sender<u32>, mpsc::Receiver<u32>) = mpsc::channel();

    node.spawn(move |_proc: &mut Proc| {
      done.send(42).ok();
      Ok(())
    });

    assert_eq!(outcome.recv_timeout(Duration::from_secs(5)), Ok(42));

    node.join_all();
  }

  #[test]
  fn test_sequence_is_monotonic() {
    let node: Node = Node::new("seq");

    let first: ProcId = node.spawn(|_proc: &mut Proc| Ok(()));
    let second: ProcId = node.spawn(|_proc: &mut Proc| Ok(()));
    let third: ProcId = node.spawn(|_proc: &mut Proc| Ok(()));

    assert!(first.seq() < second.seq());
    assert!(second.seq() < third.seq());

    node.join_all();
  }

  #[test]
  fn test_pid_display() {
    let node: Node = Node::new("fmt");
    let pid: ProcId = node.spawn(|_proc: &mut Proc| Ok(()));

    assert_eq!(pid.to_string(), format!("fmt->{}", pid.seq()));
    assert_eq!(pid.node().map(|home| home.name().to_string()), Some(String::from("fmt")));

    node.join_all();
  }

  #[test]
  fn test_pid_equality() {
    let node: Node = Node::new("eq");
    let other: Node = Node::new("eq");

    let a: ProcId = node.spawn(|_proc: &mut Proc| Ok(()));
    let b: ProcId = node.spawn(|_proc: &mut Proc| Ok(()));
    let c: ProcId = other.spawn(|_proc: &mut Proc| Ok(()));

    assert_eq!(a, a.clone());
    assert_ne!(a, b);

    // Same sequence number on a different node is a different proc.
    assert_eq!(a.seq(), c.seq());
    assert_ne!(a, c);

    node.join_all();
    other.join_all();
  }

  #[test]
  fn test_registry_empties_after_join() {
    let node: Node = Node::new("registry");

    for _ in 0..8 {
      node.spawn(|proc: &mut Proc| proc.sleep(Duration::from_millis(50)));
    }

    node.join_all();

    assert_eq!(node.proc_count(), 0);
  }

  #[test]
  fn test_run_state_and_exit_reason() {
    let node: Node = Node::new("state");
    let (gate, held): (mpsc::Sender<()>, mpsc::Receiver<()>) = mpsc::channel();

    let pid: ProcId = node.spawn(move |_proc: &mut Proc| {
      held.recv().ok();
      Ok(())
    });

    // The proc is registered before its thread starts and is held open by
    // the gate, so it must still be in the map.
    let data: Arc<ProcData> = node
      .inner
      .procs
      .read()
      .get(&pid.seq())
      .cloned()
      .expect("gated proc missing from registry");

    assert!(matches!(data.state(), ProcState::Runnable | ProcState::Running));
    assert!(data.exit.get().is_none());

    gate.send(()).ok();
    data.done.wait();

    assert_eq!(data.state(), ProcState::Terminated);
    assert!(matches!(data.exit.get(), Some(ExitReason::Normal)));
    assert_eq!(node.proc_count(), 0);
  }

  #[test]
  fn test_send_to_dead_proc_is_dropped() {
    let node: Node = Node::new("dead");
    let pid: ProcId = node.spawn(|_proc: &mut Proc| Ok(()));

    node.join_all();

    // Both routes drop silently.
    pid.send(1_u32);
    node.send(&pid, 1_u32);
  }

  #[test]
  fn test_send_to_foreign_proc_is_dropped() {
    let node: Node = Node::new("local");
    let other: Node = Node::new("foreign");

    let (done, outcome): (mpsc::Sender<bool>, mpsc::Receiver<bool>) = mpsc::channel();

    let pid: ProcId = node.spawn(move |proc: &mut Proc| {
      let handled: bool = proc.receive_timeout(any(|_message| Ok(())), Duration::from_millis(200))?;

      done.send(handled).ok();

      Ok(())
    });

    other.send(&pid, 1_u32);

    assert_eq!(outcome.recv_timeout(Duration::from_secs(5)), Ok(false));

    node.join_all();
    other.join_all();
  }

  #[test]
  fn test_fault_reaches_sink() {
    let node: Node = Node::new("sink");

    node.spawn(|_proc: &mut Proc| Err(Fault::new("boom").into()));
    node.join_all();

    let faults: Vec<StdArc<Fault>> = node.uncaught_faults();

    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].error(), "boom");
  }

  #[test]
  fn test_panic_reaches_sink() {
    let node: Node = Node::new("panic");

    node.spawn(|_proc: &mut Proc| panic!("kaboom"));
    node.join_all();

    let faults: Vec<StdArc<Fault>> = node.uncaught_faults();

    assert_eq!(faults.len(), 1);
    assert_eq!(faults[0].error(), "kaboom");
  }

  #[test]
  fn test_exit_is_normal() {
    let node: Node = Node::new("exit");

    node.spawn(|_proc: &mut Proc| exit());
    node.join_all();

    assert!(node.uncaught_faults().is_empty());
  }

  #[test]
  fn test_spawn_rec_counts_down() {
    let node: Node = Node::new("rec");
    let (done, outcome): (mpsc::Sender<u32>, mpsc::Receiver<u32>) = mpsc::channel();

    node.spawn_rec(
      move |_proc: &mut Proc, count: u32| {
        if count == 0 {
          return Ok(None);
        }

        done.send(count).ok();

        Ok(Some(count - 1))
      },
      3_u32,
    );

    node.join_all();

    let seen: Vec<u32> = outcome.try_iter().collect();
    assert_eq!(seen, [3, 2, 1]);
  }
}
