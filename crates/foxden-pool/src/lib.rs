//! Worker pool lifecycle management.
//!
//! The pool launches a fixed number of browser-engine subprocesses, discovers
//! the connection endpoint each one advertises on its output stream, and
//! republishes those endpoints on stable external ports. The registry is the
//! single source of truth the status service reads from.

pub mod discovery;
pub mod forward;
pub mod manager;
pub mod registry;
pub mod worker;

pub use manager::{PoolManager, PoolState};
pub use registry::{PoolCounts, PoolRegistry, SlotStatus, WorkerSlot};
