//! Alcor - A BEAM-inspired actor core on plain OS threads.
//!
//! Alcor lets a host process spawn lightweight *procs*, address them by
//! opaque [`ProcId`]s, send them asynchronous messages, and receive those
//! messages with optional selective receive, timeouts, and fall-through
//! handlers. Procs may be linked: when a linked proc exits abnormally,
//! its partners are asked to exit as well.
//!
//! Every proc runs on a dedicated OS thread and owns an unbounded
//! lock-free MPSC [`Mailbox`]; a single-waiter [`SignalBarrier`] couples
//! producers' enqueues to the consumer's park.
//!
//! ```no_run
//! use alcor::node::Node;
//! use alcor::proc::on;
//!
//! let node: Node = Node::new("demo");
//!
//! let echo = node.spawn(|proc: &mut alcor::proc::Proc| {
//!   let pid = proc.pid();
//!   proc.receive(on(move |text: String| {
//!     println!("{pid} got: {text}");
//!     Ok(())
//!   }))
//! });
//!
//! echo.send(String::from("hello"));
//! node.join_all();
//! ```
//!
//! [`ProcId`]: crate::proc::ProcId
//! [`Mailbox`]: crate::mailbox::Mailbox
//! [`SignalBarrier`]: crate::mailbox::SignalBarrier

mod loom;

pub mod consts;
pub mod error;
pub mod mailbox;
pub mod node;
pub mod proc;
