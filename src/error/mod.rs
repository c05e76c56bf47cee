//! Alcor errors.

mod fault;
mod macros;
mod proc_error;

pub(crate) use self::macros::fatal;

pub use self::fault::Fault;
pub use self::proc_error::ProcError;
pub use self::proc_error::ProcResult;
