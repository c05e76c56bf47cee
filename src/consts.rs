//! Runtime configuration constants and default values.
//!
//! These constants control the initial sizing of the per-proc and per-node
//! data structures. None of them are hard limits; every container in the
//! runtime grows on demand.

// -----------------------------------------------------------------------------
// Memory Allocation
// -----------------------------------------------------------------------------

/// Initial capacity of a proc's link set.
///
/// Most procs link to a handful of partners at most; the set grows on
/// demand past this size.
pub const CAP_PROC_LINKS: usize = 8;

/// Initial capacity of a node's live-proc registry.
pub const CAP_NODE_PROCS: usize = 64;

/// Initial capacity of a node's uncaught-fault sink.
pub const CAP_NODE_FAULTS: usize = 4;
