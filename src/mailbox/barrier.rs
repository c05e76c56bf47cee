use std::error::Error;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::ptr;
use std::thread;
use std::thread::Thread;
use std::time::Duration;
use std::time::Instant;

use crate::loom::sync::atomic::AtomicBool;
use crate::loom::sync::atomic::AtomicPtr;
use crate::loom::sync::atomic::Ordering::AcqRel;
use crate::loom::sync::atomic::Ordering::Acquire;
use crate::loom::sync::atomic::Ordering::Relaxed;
use crate::loom::sync::atomic::Ordering::Release;

/// Sentinel address stored in the owner slot when a signal arrived with no
/// waiter installed. Never dereferenced.
static BANKED: u8 = 0;

#[inline]
fn banked() -> *mut Thread {
  &raw const BANKED as *mut Thread
}

// -----------------------------------------------------------------------------
// Wait Error
// -----------------------------------------------------------------------------

/// Error returned by [`SignalBarrier::wait`] and [`SignalBarrier::wait_timeout`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WaitError {
  /// A different thread already owns the barrier.
  ///
  /// The barrier admits exactly one waiter at a time; a second concurrent
  /// waiter is a bug in the caller.
  Busy,
  /// The waiter was interrupted before or during the wait.
  ///
  /// The interrupt flag is consumed by the observation.
  Interrupted,
}

impl Display for WaitError {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    match self {
      Self::Busy => f.write_str("barrier already owned by another waiter"),
      Self::Interrupted => f.write_str("interrupted while waiting for a signal"),
    }
  }
}

impl Error for WaitError {}

// -----------------------------------------------------------------------------
// Signal Barrier
// -----------------------------------------------------------------------------

/// A single-waiter park/unpark coupling device.
///
/// One consumer blocks in [`wait`]/[`wait_timeout`]; any number of
/// producers call [`signal`]. The owner slot holds either nothing, the
/// parked waiter, or a banked signal token.
///
/// A signal that arrives while no waiter is installed is *banked*: the
/// next wait consumes it and returns immediately. To the caller this is
/// indistinguishable from a spurious wakeup, and callers must re-check
/// their wait condition after every return anyway. Without the token, a
/// signal landing between a consumer's empty poll and its park would be
/// lost.
///
/// # Interruption
///
/// [`interrupt`] sets a flag and signals. The flag is observed (and
/// consumed) by the waiter before parking and after waking, surfacing as
/// [`WaitError::Interrupted`].
///
/// [`wait`]: Self::wait
/// [`wait_timeout`]: Self::wait_timeout
/// [`signal`]: Self::signal
/// [`interrupt`]: Self::interrupt
pub struct SignalBarrier {
  /// Null, the banked-signal sentinel, or a leaked `Box<Thread>` naming the
  /// parked waiter.
  owner: AtomicPtr<Thread>,
  /// Pending interrupt request for the waiter.
  interrupt: AtomicBool,
}

impl SignalBarrier {
  /// Creates a new barrier with no owner.
  #[inline]
  pub fn new() -> Self {
    Self {
      owner: AtomicPtr::new(ptr::null_mut()),
      interrupt: AtomicBool::new(false),
    }
  }

  /// Claims the barrier and blocks until signaled.
  ///
  /// Returns as soon as a signal is consumed, which may have been banked
  /// before this call, or on a spurious wakeup. Callers must loop on their
  /// wait condition.
  ///
  /// # Errors
  ///
  /// - [`WaitError::Busy`] if another thread already owns the barrier.
  /// - [`WaitError::Interrupted`] if the interrupt flag was set before or
  ///   during the wait.
  pub fn wait(&self) -> Result<(), WaitError> {
    if self.interrupt.swap(false, AcqRel) {
      return Err(WaitError::Interrupted);
    }

    let waiter: *mut Thread = Box::into_raw(Box::new(thread::current()));

    match self.owner.compare_exchange(ptr::null_mut(), waiter, AcqRel, Acquire) {
      Ok(_) => {
        thread::park();
        self.retire(waiter)
      }
      Err(found) => self.bounce(waiter, found),
    }
  }

  /// Claims the barrier and blocks until signaled or the timeout expires.
  ///
  /// Returns the portion of `timeout` that was not spent waiting, clamped
  /// at zero. As with [`wait`], the return may be spurious.
  ///
  /// # Errors
  ///
  /// Same as [`wait`].
  ///
  /// [`wait`]: Self::wait
  pub fn wait_timeout(&self, timeout: Duration) -> Result<Duration, WaitError> {
    if self.interrupt.swap(false, AcqRel) {
      return Err(WaitError::Interrupted);
    }

    let waiter: *mut Thread = Box::into_raw(Box::new(thread::current()));

    match self.owner.compare_exchange(ptr::null_mut(), waiter, AcqRel, Acquire) {
      Ok(_) => {
        let start: Instant = Instant::now();

        thread::park_timeout(timeout);

        let spent: Duration = start.elapsed();

        self.retire(waiter).map(|_| timeout.saturating_sub(spent))
      }
      Err(found) => self.bounce(waiter, found).map(|_| timeout),
    }
  }

  /// Signals the owner that the barrier is ready.
  ///
  /// If a waiter is installed it is unparked; otherwise the signal is
  /// banked for the next waiter. Signaling an already-signaled barrier is
  /// a no-op.
  pub fn signal(&self) {
    let prev: *mut Thread = self.owner.swap(banked(), AcqRel);

    if prev.is_null() || prev == banked() {
      return;
    }

    // SAFETY: The swap removed the waiter pointer from the slot, which
    //         transfers ownership of the box to us. The waiter observes
    //         the slot change and will not reclaim it.
    let waiter: Thread = *unsafe { Box::from_raw(prev) };

    waiter.unpark();
  }

  /// Interrupts the current (or next) waiter.
  ///
  /// The flag persists until a wait observes it.
  pub fn interrupt(&self) {
    self.interrupt.store(true, Release);
    self.signal();
  }

  /// Releases the owner slot after a park and classifies the wakeup.
  fn retire(&self, waiter: *mut Thread) -> Result<(), WaitError> {
    match self.owner.compare_exchange(waiter, ptr::null_mut(), AcqRel, Acquire) {
      Ok(_) => {
        // Not signaled: spurious wakeup or interrupt. We still own the box.
        //
        // SAFETY: The pointer was never removed from the slot by a
        //         signaler, so ownership never left this thread.
        drop(unsafe { Box::from_raw(waiter) });
      }
      Err(_) => {
        // A signaler consumed (and freed) the waiter, leaving its token
        // behind; clear it so the signal is not observed twice.
        let _ = self
          .owner
          .compare_exchange(banked(), ptr::null_mut(), AcqRel, Relaxed);
      }
    }

    if self.interrupt.swap(false, AcqRel) {
      Err(WaitError::Interrupted)
    } else {
      Ok(())
    }
  }

  /// Resolves a failed owner installation: consume a banked signal or
  /// report the barrier as busy.
  fn bounce(&self, waiter: *mut Thread, found: *mut Thread) -> Result<(), WaitError> {
    // SAFETY: The pointer was never published; ownership never left us.
    drop(unsafe { Box::from_raw(waiter) });

    if found != banked() {
      return Err(WaitError::Busy);
    }

    let _ = self
      .owner
      .compare_exchange(banked(), ptr::null_mut(), AcqRel, Relaxed);

    if self.interrupt.swap(false, AcqRel) {
      Err(WaitError::Interrupted)
    } else {
      Ok(())
    }
  }
}

impl Debug for SignalBarrier {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("SignalBarrier(..)")
  }
}

impl Default for SignalBarrier {
  #[inline]
  fn default() -> Self {
    Self::new()
  }
}

impl Drop for SignalBarrier {
  fn drop(&mut self) {
    let owner: *mut Thread = self.owner.load(Relaxed);

    if !owner.is_null() && owner != banked() {
      // SAFETY: Exclusive access during drop; no waiter can be parked on a
      //         barrier that is being dropped, so the box is simply stale.
      drop(unsafe { Box::from_raw(owner) });
    }
  }
}

// SAFETY: All accesses to the shared state are atomic.
unsafe impl Send for SignalBarrier {}

// SAFETY: All accesses to the shared state are atomic.
unsafe impl Sync for SignalBarrier {}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
