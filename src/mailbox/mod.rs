//! Unbounded MPSC mailboxes with selective receive.

mod barrier;
mod queue;

pub use self::barrier::SignalBarrier;
pub use self::barrier::WaitError;
pub use self::queue::Interrupted;
pub use self::queue::MailIter;
pub use self::queue::MailSender;
pub use self::queue::Mailbox;
