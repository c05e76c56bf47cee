use std::any::Any;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::fmt::Result as FmtResult;
use std::marker::PhantomData;

use crate::error::fatal;
use crate::error::ProcResult;
use crate::proc::Message;

// -----------------------------------------------------------------------------
// Mail Handler
// -----------------------------------------------------------------------------

/// A receiver for incoming mail, possibly defined for only some messages.
///
/// The receive engine consults [`is_defined_at`] while scanning the
/// mailbox: the message handed to [`accept`] is the first one *in arrival
/// order* the handler is defined at, and earlier messages the handler is
/// not defined at stay queued in their original order.
///
/// Use [`any`] for a handler defined at every message and [`on`] for a
/// handler defined at one payload type.
///
/// [`is_defined_at`]: Self::is_defined_at
/// [`accept`]: Self::accept
pub trait MailHandler {
  /// Returns `true` if the handler accepts this message.
  fn is_defined_at(&self, message: &Message) -> bool;

  /// Consumes a message the handler is defined at.
  fn accept(&mut self, message: Message) -> ProcResult;
}

// -----------------------------------------------------------------------------
// Any Mail
// -----------------------------------------------------------------------------

/// Wraps `body` as a handler defined at every message.
#[inline]
pub fn any<F>(body: F) -> AnyMail<F>
where
  F: FnMut(Message) -> ProcResult,
{
  AnyMail { body }
}

/// A [`MailHandler`] defined at every message. See [`any`].
pub struct AnyMail<F> {
  body: F,
}

impl<F> MailHandler for AnyMail<F>
where
  F: FnMut(Message) -> ProcResult,
{
  #[inline]
  fn is_defined_at(&self, _message: &Message) -> bool {
    true
  }

  #[inline]
  fn accept(&mut self, message: Message) -> ProcResult {
    (self.body)(message)
  }
}

impl<F> Debug for AnyMail<F> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("AnyMail(..)")
  }
}

// -----------------------------------------------------------------------------
// On Mail
// -----------------------------------------------------------------------------

/// Wraps `body` as a handler defined at messages of payload type `T`.
///
/// # Examples
///
/// ```ignore
/// proc.receive(on(|count: u32| {
///   println!("got {count}");
///   Ok(())
/// }))?;
/// ```
#[inline]
pub fn on<T, F>(body: F) -> OnMail<T, F>
where
  T: Any,
  F: FnMut(T) -> ProcResult,
{
  OnMail {
    body,
    marker: PhantomData,
  }
}

/// A [`MailHandler`] defined at one payload type. See [`on`].
pub struct OnMail<T, F> {
  body: F,
  marker: PhantomData<fn(T)>,
}

impl<T, F> MailHandler for OnMail<T, F>
where
  T: Any,
  F: FnMut(T) -> ProcResult,
{
  #[inline]
  fn is_defined_at(&self, message: &Message) -> bool {
    message.is::<T>()
  }

  fn accept(&mut self, message: Message) -> ProcResult {
    match message.downcast::<T>() {
      Ok(payload) => (self.body)(*payload),
      Err(_) => fatal!("handler accepted a message it is not defined at"),
    }
  }
}

impl<T, F> Debug for OnMail<T, F> {
  fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
    f.write_str("OnMail(..)")
  }
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------
