//! Procs: lightweight actors on dedicated OS threads.

mod body;
mod context;
mod envelope;
mod handler;
mod proc_data;
mod proc_id;

pub(crate) use self::context::ExitSentinel;
pub(crate) use self::envelope::Envelope;
pub(crate) use self::proc_data::ExitReason;
pub(crate) use self::proc_data::ProcData;
pub(crate) use self::proc_data::ProcState;

pub use self::body::Body;
pub use self::body::Recur;
pub use self::context::exit;
pub use self::context::Proc;
pub use self::envelope::Message;
pub use self::handler::any;
pub use self::handler::on;
pub use self::handler::AnyMail;
pub use self::handler::MailHandler;
pub use self::handler::OnMail;
pub use self::proc_id::ProcId;
