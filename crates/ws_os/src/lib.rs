//! The platform layer consumed by the rest of the workspace.
//!
//! The runtime above this crate only ever asks the operating system for a
//! handful of things: threads with join, thread-local storage, a counting
//! semaphore, a monotonic clock, a socketpair-like byte channel, and a
//! readiness multiplexer over file descriptors. Everything OS-specific lives
//! here, behind small portable signatures.
//!
//! - [`sync`] : the counting [`Semaphore`](sync::Semaphore)
//! - [`time`] : monotonic milliseconds
//! - [`net`] : the bidirectional nonblocking byte channel
//! - [`poll`] : the readiness multiplexer (Unix only)
//! - [`utils`] : small lock-free helpers shared by the lock-free code above

// -----------------------------------------------------------------------------
// Modules

pub mod net;
#[cfg(unix)]
pub mod poll;
pub mod sync;
pub mod time;
pub mod utils;
