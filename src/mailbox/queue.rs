use crossbeam_utils::CachePadded;
use std::error::Error;
use std::fmt::Debug;
use std::fmt::Display;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::marker::PhantomData;
use std::ptr;
use std::time::Duration;
use triomphe::Arc;

use crate::error::fatal;
use crate::loom::hint::spin_loop;
use crate::loom::sync::atomic::AtomicPtr;
use crate::loom::sync::atomic::Ordering::AcqRel;
use crate::loom::sync::atomic::Ordering::Acquire;
use crate::loom::sync::atomic::Ordering::Relaxed;
use crate::loom::sync::atomic::Ordering::Release;
use crate::mailbox::SignalBarrier;
use crate::mailbox::WaitError;

// -----------------------------------------------------------------------------
// Interrupted Error
// -----------------------------------------------------------------------------

/// Error returned by blocking mailbox operations whose waiter was
/// interrupted.
///
/// The interrupt flag is consumed by the observation; no mail is lost.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interrupted;

impl Display for Interrupted {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("interrupted while waiting for mail")
  }
}

impl Error for Interrupted {}

// -----------------------------------------------------------------------------
// Mail Node
// -----------------------------------------------------------------------------

/// One link in the mailbox chain, holding one element or acting as the
/// consumer sentinel (`item == None`).
struct MailNode<E> {
  next: AtomicPtr<MailNode<E>>,
  item: Option<E>,
}

impl<E> MailNode<E> {
  /// Allocates a new node on the heap and leaks it to a raw pointer.
  #[inline]
  fn alloc(item: Option<E>) -> *mut Self {
    Box::into_raw(Box::new(Self {
      next: AtomicPtr::new(ptr::null_mut()),
      item,
    }))
  }
}

// -----------------------------------------------------------------------------
// Mail Shared
// -----------------------------------------------------------------------------

/// State shared between the producer and consumer halves of a mailbox.
///
/// The queue is a non-intrusive MPSC linked list: `tail` is the producers'
/// insertion anchor, `head` is the consumer's sentinel. The two pointers
/// live on separate cache lines so producer traffic does not bounce the
/// consumer's line.
///
/// # Invariants
///
/// - `head` always points to a node whose item has been consumed (or the
///   original sentinel). The first unconsumed element is `head.next.item`.
/// - Producers only ever touch `tail` and the `next` field of the node
///   they swapped out of `tail`. The interior of the chain is under
///   exclusive consumer control.
/// - There is a transient window after a producer's tail swap and before
///   its `next` store in which the new node is unreachable from `head`;
///   consumers observe `next == null` and treat the chain as ending there.
#[repr(C)]
struct MailShared<E> {
  tail: CachePadded<AtomicPtr<MailNode<E>>>,
  head: CachePadded<AtomicPtr<MailNode<E>>>,
  barrier: SignalBarrier,
}

impl<E> Drop for MailShared<E> {
  fn drop(&mut self) {
    let mut node: *mut MailNode<E> = self.head.load(Relaxed);

    while !node.is_null() {
      // SAFETY: Both handles are gone, so we have exclusive access to the
      //         whole chain, including any node still in the transient
      //         window (its producer completed before dropping its handle).
      let boxed: Box<MailNode<E>> = unsafe { Box::from_raw(node) };

      node = boxed.next.load(Relaxed);
    }
  }
}

// SAFETY: `MailShared<E>` transfers elements between threads.
unsafe impl<E: Send> Send for MailShared<E> {}

// SAFETY: Producer operations are lock-free atomics; consumer operations
//         require `&mut Mailbox<E>` and are therefore serialized.
unsafe impl<E: Send> Sync for MailShared<E> {}

// -----------------------------------------------------------------------------
// Mail Sender
// -----------------------------------------------------------------------------

/// The producer half of a [`Mailbox`].
///
/// Cloneable; any number of threads may enqueue concurrently.
pub struct MailSender<E> {
  shared: Arc<MailShared<E>>,
}

impl<E> MailSender<E> {
  /// Enqueues an element at the tail of the mailbox.
  ///
  /// Never blocks and never fails: the mailbox is unbounded. Elements from
  /// a single sender are observed by the consumer in the order they were
  /// offered.
  pub fn offer(&self, item: E) {
    let node: *mut MailNode<E> = MailNode::alloc(Some(item));
    let prev: *mut MailNode<E> = self.shared.tail.swap(node, AcqRel);

    // SAFETY: The swap made `prev` unreachable for every other producer,
    //         and the consumer stops at its null `next`, so the plain
    //         store below is the only access.
    unsafe { (*prev).next.store(node, Release) };

    self.shared.barrier.signal();
  }

  /// Interrupts the consumer's current (or next) blocking wait.
  pub fn interrupt(&self) {
    self.shared.barrier.interrupt();
  }
}

impl<E> Clone for MailSender<E> {
  #[inline]
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<E> Debug for MailSender<E> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("MailSender(..)")
  }
}

// -----------------------------------------------------------------------------
// Mailbox
// -----------------------------------------------------------------------------

/// The consumer half of an unbounded MPSC mailbox with selective receive.
///
/// Exactly one consumer exists per mailbox: this type is not [`Clone`] and
/// every consumer operation takes `&mut self`, so single-consumer
/// discipline is enforced by the type system rather than at runtime.
///
/// # Selective receive
///
/// [`poll_match`] and friends scan the chain in FIFO order and unlink the
/// first element satisfying a predicate, leaving every other element in
/// place in its original order. Blocking variants park on the internal
/// [`SignalBarrier`] when the scan exhausts the chain and resume from the
/// last scanned node once a producer extends it.
///
/// [`poll_match`]: Self::poll_match
pub struct Mailbox<E> {
  shared: Arc<MailShared<E>>,
}

impl<E> Mailbox<E> {
  /// Creates an empty mailbox, returning the producer and consumer halves.
  pub fn new() -> (MailSender<E>, Mailbox<E>) {
    let sentinel: *mut MailNode<E> = MailNode::alloc(None);

    let shared: Arc<MailShared<E>> = Arc::new(MailShared {
      tail: CachePadded::new(AtomicPtr::new(sentinel)),
      head: CachePadded::new(AtomicPtr::new(sentinel)),
      barrier: SignalBarrier::new(),
    });

    (
      MailSender {
        shared: Arc::clone(&shared),
      },
      Mailbox { shared },
    )
  }

  // ---------------------------------------------------------------------------
  // FIFO Dequeue
  // ---------------------------------------------------------------------------

  /// Dequeues the head element, or returns `None` if the mailbox appears
  /// empty. Never blocks.
  pub fn poll(&mut self) -> Option<E> {
    let head: *mut MailNode<E> = self.shared.head.load(Relaxed);

    // SAFETY: `head` is always a valid node owned by the consumer.
    let next: *mut MailNode<E> = unsafe { (*head).next.load(Acquire) };

    if next.is_null() {
      return None;
    }

    self.shared.head.store(next, Relaxed);

    // SAFETY: `next` is linked into the chain and unconsumed; producers
    //         never touch the `item` of a linked node.
    let item: Option<E> = unsafe { (*next).item.take() };

    // SAFETY: The old sentinel is no longer reachable: the consumer moved
    //         past it and the producer that linked `next` finished its
    //         store (we just read it).
    drop(unsafe { Box::from_raw(head) });

    debug_assert!(item.is_some());

    item
  }

  /// Dequeues the head element, blocking until one is available.
  ///
  /// # Errors
  ///
  /// Returns [`Interrupted`] if the wait is interrupted; any element
  /// already enqueued stays in the mailbox.
  pub fn take(&mut self) -> Result<E, Interrupted> {
    'take: loop {
      if let Some(item) = self.poll() {
        break 'take Ok(item);
      }

      self.wait()?;
    }
  }

  /// Dequeues the head element, blocking for at most `timeout`.
  ///
  /// A zero timeout behaves exactly like [`poll`].
  ///
  /// # Errors
  ///
  /// Returns [`Interrupted`] if the wait is interrupted.
  ///
  /// [`poll`]: Self::poll
  pub fn poll_timeout(&mut self, timeout: Duration) -> Result<Option<E>, Interrupted> {
    if let Some(item) = self.poll() {
      return Ok(Some(item));
    }

    let mut remaining: Duration = timeout;

    while !remaining.is_zero() {
      remaining = self.wait_timeout(remaining)?;

      if let Some(item) = self.poll() {
        return Ok(Some(item));
      }
    }

    Ok(None)
  }

  // ---------------------------------------------------------------------------
  // Selective Dequeue
  // ---------------------------------------------------------------------------

  /// Scans the mailbox once in FIFO order and unlinks the first element
  /// satisfying `pred`. Never blocks.
  ///
  /// Elements that do not match are left in place in their original
  /// relative order.
  pub fn poll_match<P>(&mut self, pred: P) -> Option<E>
  where
    P: Fn(&E) -> bool,
  {
    let mut cursor: *mut MailNode<E> = self.shared.head.load(Relaxed);

    self.scan(&pred, &mut cursor)
  }

  /// As [`poll_match`], but when the scan exhausts the chain, parks until
  /// a producer extends it and resumes from the last scanned node, for at
  /// most `timeout` in total.
  ///
  /// A zero timeout scans once and does not block.
  ///
  /// # Errors
  ///
  /// Returns [`Interrupted`] if the wait is interrupted.
  ///
  /// [`poll_match`]: Self::poll_match
  pub fn poll_match_timeout<P>(&mut self, pred: P, timeout: Duration) -> Result<Option<E>, Interrupted>
  where
    P: Fn(&E) -> bool,
  {
    let mut cursor: *mut MailNode<E> = self.shared.head.load(Relaxed);

    if let Some(item) = self.scan(&pred, &mut cursor) {
      return Ok(Some(item));
    }

    let mut remaining: Duration = timeout;

    while !remaining.is_zero() {
      remaining = self.wait_timeout(remaining)?;

      if let Some(item) = self.scan(&pred, &mut cursor) {
        return Ok(Some(item));
      }
    }

    Ok(None)
  }

  /// As [`poll_match`], but blocks until a matching element arrives.
  ///
  /// # Errors
  ///
  /// Returns [`Interrupted`] if the wait is interrupted.
  ///
  /// [`poll_match`]: Self::poll_match
  pub fn take_match<P>(&mut self, pred: P) -> Result<E, Interrupted>
  where
    P: Fn(&E) -> bool,
  {
    let mut cursor: *mut MailNode<E> = self.shared.head.load(Relaxed);

    'take: loop {
      if let Some(item) = self.scan(&pred, &mut cursor) {
        break 'take Ok(item);
      }

      self.wait()?;
    }
  }

  // ---------------------------------------------------------------------------
  // Bulk Dequeue
  // ---------------------------------------------------------------------------

  /// Repeatedly polls up to `max` elements into `sink`, returning the
  /// number moved. Never blocks.
  pub fn drain_to(&mut self, sink: &mut Vec<E>, max: usize) -> usize {
    let mut count: usize = 0;

    while count < max {
      let Some(item) = self.poll() else {
        break;
      };

      sink.push(item);
      count += 1;
    }

    count
  }

  /// Returns an iterator over the queued elements in FIFO order without
  /// consuming them.
  ///
  /// The iterator borrows the consumer half, so no element it yields can
  /// be unlinked or freed while it is alive.
  pub fn iter(&mut self) -> MailIter<'_, E> {
    MailIter {
      node: self.shared.head.load(Relaxed),
      marker: PhantomData,
    }
  }

  // ---------------------------------------------------------------------------
  // Internals
  // ---------------------------------------------------------------------------

  /// Walks the chain from `*cursor`, unlinking and returning the first
  /// element satisfying `pred`. On a miss, leaves `*cursor` at the last
  /// scanned node so a later call resumes where this one stopped.
  fn scan<P>(&mut self, pred: &P, cursor: &mut *mut MailNode<E>) -> Option<E>
  where
    P: Fn(&E) -> bool,
  {
    let mut prev: *mut MailNode<E> = *cursor;

    'scan: loop {
      // SAFETY: `prev` is the sentinel or a previously scanned node; the
      //         consumer has not unlinked anything since, so it is live.
      let node: *mut MailNode<E> = unsafe { (*prev).next.load(Acquire) };

      if node.is_null() {
        break 'scan;
      }

      // SAFETY: `node` is linked and unconsumed; only the consumer reads
      //         or takes items of linked nodes.
      let matched: bool = unsafe { (*node).item.as_ref() }.is_some_and(pred);

      if matched {
        return Some(self.remove_node(prev, node));
      }

      prev = node;
    }

    *cursor = prev;

    None
  }

  /// Unlinks `node` (whose predecessor is `prev`) from the chain and
  /// returns its element, moving the head and tail pointers as necessary.
  ///
  /// Producers mutate `tail` concurrently, so the position of `node`
  /// decides the strategy:
  ///
  /// 1. `node` is the tail: retreat `tail` to `prev` with a CAS, then
  ///    clear `prev.next` so later scans do not descend into the dead
  ///    node. A failed tail CAS means producers appended after `node`;
  ///    fall through to the interior case.
  /// 2. `prev` is the head sentinel: advance `head` to `node`, which
  ///    becomes the new sentinel (its item was just taken out).
  /// 3. Interior: stitch `prev.next` past `node` with a plain store. The
  ///    interior is under exclusive consumer control, producers only ever
  ///    touch the tail.
  fn remove_node(&mut self, prev: *mut MailNode<E>, node: *mut MailNode<E>) -> E {
    if prev == node {
      fatal!("corrupt mailbox: node linked to itself");
    }

    // SAFETY: Item extraction is a consumer-exclusive operation.
    let Some(item) = (unsafe { &mut *node }).item.take() else {
      fatal!("corrupt mailbox: matched a consumed node");
    };

    if self.shared.tail.compare_exchange(node, prev, AcqRel, Acquire).is_ok() {
      // (1) No producer ever observed `node` as its insertion point, so
      // nothing can be linked after it. The CAS on `prev.next` tolerates
      // an offer that grabbed `prev` as the new tail in the meantime.

      // SAFETY: `prev` stays reachable; only this thread and at most one
      //         producer (which would make the CAS fail, as intended)
      //         touch its `next` field.
      let _ = unsafe {
        (*prev).next.compare_exchange(node, ptr::null_mut(), AcqRel, Acquire)
      };

      // SAFETY: Unreachable from the chain and from every producer.
      drop(unsafe { Box::from_raw(node) });

      return item;
    }

    if self.shared.head.compare_exchange(prev, node, AcqRel, Acquire).is_ok() {
      // (2) `node` is the new sentinel; its item slot is already empty.

      // SAFETY: The old sentinel is no longer reachable (same argument as
      //         in `poll`).
      drop(unsafe { Box::from_raw(prev) });

      return item;
    }

    // (3) The tail moved past `node`, so some producer swapped it out and
    // is about to link its successor. Wait out that transient window;
    // stitching early would orphan the successor.
    //
    // SAFETY: `node` is still linked; the producer that swapped the tail
    //         away from it owns the pending `next` store.
    let mut next: *mut MailNode<E> = unsafe { (*node).next.load(Acquire) };

    while next.is_null() {
      spin_loop();

      // SAFETY: As above.
      next = unsafe { (*node).next.load(Acquire) };
    }

    // SAFETY: `prev` is interior (the head CAS above failed), so no
    //         producer can touch its `next` field anymore.
    unsafe { (*prev).next.store(next, Release) };

    // SAFETY: Unreachable: the chain now skips `node` and the producer
    //         that linked its successor is done with it.
    drop(unsafe { Box::from_raw(node) });

    item
  }

  /// Parks on the insertion barrier.
  fn wait(&mut self) -> Result<(), Interrupted> {
    match self.shared.barrier.wait() {
      Ok(()) => Ok(()),
      Err(WaitError::Interrupted) => Err(Interrupted),
      Err(WaitError::Busy) => fatal!("mailbox consumed from two threads"),
    }
  }

  /// Parks on the insertion barrier for at most `timeout`, returning the
  /// unused remainder.
  fn wait_timeout(&mut self, timeout: Duration) -> Result<Duration, Interrupted> {
    match self.shared.barrier.wait_timeout(timeout) {
      Ok(left) => Ok(left),
      Err(WaitError::Interrupted) => Err(Interrupted),
      Err(WaitError::Busy) => fatal!("mailbox consumed from two threads"),
    }
  }
}

impl<E> Debug for Mailbox<E> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("Mailbox(..)")
  }
}

// -----------------------------------------------------------------------------
// Mail Iterator
// -----------------------------------------------------------------------------

/// Iterator over the elements of a [`Mailbox`] in FIFO order.
pub struct MailIter<'mail, E> {
  node: *mut MailNode<E>,
  marker: PhantomData<&'mail mut Mailbox<E>>,
}

impl<'mail, E> Iterator for MailIter<'mail, E> {
  type Item = &'mail E;

  fn next(&mut self) -> Option<Self::Item> {
    // SAFETY: `self.node` is the sentinel or a linked node; the borrow on
    //         the consumer half keeps the chain intact.
    let next: *mut MailNode<E> = unsafe { (*self.node).next.load(Acquire) };

    if next.is_null() {
      return None;
    }

    self.node = next;

    // SAFETY: Linked, unconsumed node; producers never touch its item.
    unsafe { (*next).item.as_ref() }
  }
}

impl<E> Debug for MailIter<'_, E> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("MailIter(..)")
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
