use hashbrown::HashSet;
use parking_lot::Condvar;
use parking_lot::Mutex;
use std::sync::Arc as StdArc;
use std::sync::OnceLock;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::Ordering;

use crate::consts;
use crate::error::fatal;
use crate::error::Fault;
use crate::mailbox::MailSender;
use crate::proc::Envelope;
use crate::proc::ProcId;

// -----------------------------------------------------------------------------
// Proc State
// -----------------------------------------------------------------------------

/// Coarse run-state of a proc.
///
/// States advance strictly forwards: `New → Runnable → Running →
/// Terminated`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum ProcState {
  /// Created, not yet registered.
  New = 0,
  /// Registered with the node; the OS has not scheduled the thread yet.
  Runnable = 1,
  /// The proc thread is executing the body.
  Running = 2,
  /// The body completed and the exit protocol ran.
  Terminated = 3,
}

impl ProcState {
  #[inline]
  fn from_bits(bits: u8) -> Self {
    match bits {
      0 => Self::New,
      1 => Self::Runnable,
      2 => Self::Running,
      3 => Self::Terminated,
      _ => fatal!("invalid proc state"),
    }
  }
}

// -----------------------------------------------------------------------------
// Exit Reason
// -----------------------------------------------------------------------------

/// Why a proc terminated.
#[derive(Debug)]
pub(crate) enum ExitReason {
  /// The body returned, or unwound with the exit sentinel. Linked partners
  /// are not notified.
  Normal,
  /// The proc was interrupted, usually by a linked partner's exit. Linked
  /// partners are notified; nothing reaches the fault sink.
  Interrupted,
  /// The body failed. Linked partners are notified and the fault lands in
  /// the node's uncaught-fault sink.
  Fault(StdArc<Fault>),
}

impl ExitReason {
  /// Returns `true` for the exits that notify linked partners.
  #[inline]
  pub(crate) fn is_abnormal(&self) -> bool {
    !matches!(self, Self::Normal)
  }
}

// -----------------------------------------------------------------------------
// Done Latch
// -----------------------------------------------------------------------------

/// One-shot completion latch released at the end of the exit protocol.
///
/// Any number of threads may wait; `join_all` waits on the latch of every
/// proc in its snapshot.
#[derive(Debug)]
pub(crate) struct DoneLatch {
  state: Mutex<bool>,
  signal: Condvar,
}

impl DoneLatch {
  #[inline]
  pub(crate) fn new() -> Self {
    Self {
      state: Mutex::new(false),
      signal: Condvar::new(),
    }
  }

  /// Releases every current and future waiter.
  pub(crate) fn release(&self) {
    let mut done: parking_lot::MutexGuard<'_, bool> = self.state.lock();

    *done = true;

    self.signal.notify_all();
  }

  /// Blocks until the latch is released.
  pub(crate) fn wait(&self) {
    let mut done: parking_lot::MutexGuard<'_, bool> = self.state.lock();

    while !*done {
      self.signal.wait(&mut done);
    }
  }
}

// -----------------------------------------------------------------------------
// Proc Data
// -----------------------------------------------------------------------------

/// Shared per-proc state, reachable from the node registry and from the
/// proc's own thread.
///
/// The consumer half of the mailbox is *not* here: it lives in the proc
/// context owned by the proc thread, so the single-consumer discipline is
/// structural.
#[derive(Debug)]
pub(crate) struct ProcData {
  /// The id this proc answers to.
  pub(crate) pid: ProcId,
  /// Producer half of the proc mailbox.
  pub(crate) sender: MailSender<Envelope>,
  /// Linked partner procs.
  ///
  /// Mutated by the owner thread (receive engine, link/unlink calls) and
  /// drained by the exit protocol; guarded because partners' ids arrive
  /// from other threads through control mail.
  pub(crate) links: Mutex<HashSet<ProcId>>,
  /// Coarse run-state ladder.
  state: AtomicU8,
  /// Exit reason, published once by the exit protocol.
  pub(crate) exit: OnceLock<ExitReason>,
  /// Completion latch for `join_all`.
  pub(crate) done: DoneLatch,
}

impl ProcData {
  /// Creates the shared state for a freshly spawned proc.
  pub(crate) fn new(pid: ProcId, sender: MailSender<Envelope>) -> Self {
    Self {
      pid,
      sender,
      links: Mutex::new(HashSet::with_capacity(consts::CAP_PROC_LINKS)),
      state: AtomicU8::new(ProcState::New as u8),
      exit: OnceLock::new(),
      done: DoneLatch::new(),
    }
  }

  /// Returns the current run-state.
  #[inline]
  pub(crate) fn state(&self) -> ProcState {
    ProcState::from_bits(self.state.load(Ordering::Acquire))
  }

  /// Advances the run-state ladder.
  #[inline]
  pub(crate) fn set_state(&self, state: ProcState) {
    self.state.store(state as u8, Ordering::Release);
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(all(test, not(loom)))]
mod tests {
  use std::sync::Arc;
  use std::thread;
  use std::time::Duration;

  use super::*;

  #[test]
  fn test_latch_released_before_wait() {
    let latch: DoneLatch = DoneLatch::new();

    latch.release();
    latch.wait();
  }

  #[test]
  fn test_latch_releases_parked_waiters() {
    let latch: Arc<DoneLatch> = Arc::new(DoneLatch::new());

    let waiters: Vec<thread::JoinHandle<()>> = (0..3)
      .map(|_| {
        let latch: Arc<DoneLatch> = Arc::clone(&latch);

        thread::spawn(move || latch.wait())
      })
      .collect();

    thread::sleep(Duration::from_millis(50));
    latch.release();

    for waiter in waiters {
      waiter.join().unwrap();
    }
  }
}
