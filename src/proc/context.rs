use std::panic;
use std::sync::Arc as StdArc;
use std::time::Duration;
use std::time::Instant;
use triomphe::Arc;

use crate::error::fatal;
use crate::error::ProcError;
use crate::error::ProcResult;
use crate::mailbox::Mailbox;
use crate::node::Node;
use crate::node::NodeInner;
use crate::proc::Envelope;
use crate::proc::MailHandler;
use crate::proc::Message;
use crate::proc::ProcData;
use crate::proc::ProcId;

// -----------------------------------------------------------------------------
// Exit Sentinel
// -----------------------------------------------------------------------------

/// A distinguished unwind payload marking a voluntary proc exit.
pub(crate) struct ExitSentinel;

/// Exits the calling proc immediately.
///
/// Unwinds with a sentinel the proc runner classifies as a *normal* exit,
/// so linked partners are not notified. Useful for stopping from deep
/// inside a handler; at the top level of a body it is equivalent to
/// returning `Ok(())`.
pub fn exit() -> ! {
  panic::panic_any(ExitSentinel);
}

// -----------------------------------------------------------------------------
// Proc Context
// -----------------------------------------------------------------------------

/// The running proc's own view of itself, handed `&mut` to its body.
///
/// The context owns the consumer half of the proc's mailbox, which is why
/// every receive operation takes `&mut self`: only the proc thread ever
/// consumes its own mail.
pub struct Proc {
  pub(crate) node: StdArc<NodeInner>,
  pub(crate) data: Arc<ProcData>,
  pub(crate) mailbox: Mailbox<Envelope>,
}

impl Proc {
  #[inline]
  pub(crate) fn new(node: StdArc<NodeInner>, data: Arc<ProcData>, mailbox: Mailbox<Envelope>) -> Self {
    Self { node, data, mailbox }
  }

  /// Returns the id of this proc.
  #[inline]
  pub fn pid(&self) -> ProcId {
    self.data.pid.clone()
  }

  /// Returns a handle to the node this proc runs on.
  #[inline]
  pub fn node(&self) -> Node {
    Node::from_inner(StdArc::clone(&self.node))
  }

  // ---------------------------------------------------------------------------
  // Receive
  // ---------------------------------------------------------------------------

  /// Blocks until a message the handler is defined at arrives, then
  /// delivers it.
  ///
  /// Messages the handler is not defined at are skipped and stay queued in
  /// their original order. Control mail is applied transparently and the
  /// receive keeps waiting for user mail.
  ///
  /// # Errors
  ///
  /// - [`ProcError::Interrupted`] if the wait is interrupted or a linked
  ///   partner asks this proc to exit.
  /// - Whatever the handler itself returns.
  pub fn receive<H>(&mut self, handler: H) -> ProcResult
  where
    H: MailHandler,
  {
    let mut handler: H = handler;
    let _handled: bool = self.receive_inner(&mut handler, None)?;

    Ok(())
  }

  /// As [`receive`], but waits at most `timeout`.
  ///
  /// Returns `Ok(false)` on expiry; the handler is only invoked when a
  /// message was actually dequeued. A zero timeout scans the mailbox once
  /// without blocking.
  ///
  /// [`receive`]: Self::receive
  pub fn receive_timeout<H>(&mut self, handler: H, timeout: Duration) -> Result<bool, ProcError>
  where
    H: MailHandler,
  {
    let mut handler: H = handler;

    self.receive_inner(&mut handler, Some(timeout))
  }

  /// As [`receive_timeout`], but runs `on_timeout` exactly once if the
  /// timeout expires without a delivery.
  ///
  /// [`receive_timeout`]: Self::receive_timeout
  pub fn receive_timeout_or<H, F>(&mut self, handler: H, timeout: Duration, on_timeout: F) -> ProcResult
  where
    H: MailHandler,
    F: FnOnce(),
  {
    let mut handler: H = handler;

    if self.receive_inner(&mut handler, Some(timeout))? {
      return Ok(());
    }

    on_timeout();

    Ok(())
  }

  /// Suspends the proc for `timeout`.
  ///
  /// Implemented as a timed receive with a handler defined at no message:
  /// user mail is left queued untouched, while control mail keeps working,
  /// so a sleeping proc can still be terminated by a linked partner's
  /// exit.
  ///
  /// # Errors
  ///
  /// [`ProcError::Interrupted`] if the sleep is cut short by an interrupt
  /// or a link exit.
  pub fn sleep(&mut self, timeout: Duration) -> ProcResult {
    let _expired: bool = self.receive_inner(&mut Asleep, Some(timeout))?;

    Ok(())
  }

  // ---------------------------------------------------------------------------
  // Links
  // ---------------------------------------------------------------------------

  /// Creates a link between this proc and `other`.
  ///
  /// The local side takes effect immediately; the remote side is
  /// established by a control message and becomes visible once `other`
  /// next receives. Linking an already-linked proc has no effect. A link
  /// raced with the target's exit is allowed: the control mail lands in a
  /// doomed mailbox and is discarded with it.
  pub fn link(&self, other: &ProcId) {
    self.data.links.lock().insert(other.clone());

    other.dispatch(Envelope::Link(self.data.pid.clone()));
  }

  /// Destroys any link between this proc and `other`.
  ///
  /// If no link exists, this has no effect.
  pub fn unlink(&self, other: &ProcId) {
    self.data.links.lock().remove(other);

    other.dispatch(Envelope::Unlink(self.data.pid.clone()));
  }

  // ---------------------------------------------------------------------------
  // Receive Engine
  // ---------------------------------------------------------------------------

  /// Scans the mailbox for the first envelope that is either control mail
  /// or user mail the handler is defined at.
  ///
  /// Control mail is applied and the scan continues; user mail is handed
  /// to the handler and ends the receive. Returns `Ok(false)` only when a
  /// deadline expired first.
  fn receive_inner<H>(&mut self, handler: &mut H, timeout: Option<Duration>) -> Result<bool, ProcError>
  where
    H: MailHandler,
  {
    // A timeout too large to represent is an unbounded wait.
    let deadline: Option<Instant> = timeout.and_then(|d| Instant::now().checked_add(d));

    'receive: loop {
      let envelope: Option<Envelope> = match deadline {
        None => Some(self.mailbox.take_match(|envelope| defined(envelope, &*handler))?),
        Some(at) => {
          let remaining: Duration = at.saturating_duration_since(Instant::now());

          self
            .mailbox
            .poll_match_timeout(|envelope| defined(envelope, &*handler), remaining)?
        }
      };

      match envelope {
        None => break 'receive Ok(false),
        Some(Envelope::User(message)) => {
          handler.accept(message)?;

          break 'receive Ok(true);
        }
        Some(control) => self.apply_system(control)?,
      }
    }
  }

  /// Applies the effect of a dequeued control message.
  fn apply_system(&self, envelope: Envelope) -> Result<(), ProcError> {
    match envelope {
      Envelope::Link(from) => {
        tracing::trace!(pid = %self.data.pid, %from, "link established");

        self.data.links.lock().insert(from);

        Ok(())
      }
      Envelope::Unlink(from) => {
        tracing::trace!(pid = %self.data.pid, %from, "link removed");

        self.data.links.lock().remove(&from);

        Ok(())
      }
      Envelope::LinkExit(from) => {
        tracing::debug!(pid = %self.data.pid, %from, "exit requested by linked proc");

        Err(ProcError::Interrupted)
      }
      Envelope::User(_) => fatal!("user mail routed as a control message"),
    }
  }
}

impl std::fmt::Debug for Proc {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Proc({})", self.data.pid)
  }
}

/// Returns `true` if the engine should extract this envelope: control mail
/// always, user mail when the handler is defined at it.
fn defined<H>(envelope: &Envelope, handler: &H) -> bool
where
  H: MailHandler,
{
  match envelope {
    Envelope::User(message) => handler.is_defined_at(message),
    _ => true,
  }
}

/// Handler defined at no message, used to implement [`Proc::sleep`].
struct Asleep;

impl MailHandler for Asleep {
  #[inline]
  fn is_defined_at(&self, _message: &Message) -> bool {
    false
  }

  #[inline]
  fn accept(&mut self, _message: Message) -> ProcResult {
    Ok(())
  }
}
