//! A single-threaded I/O proactor feeding a work-stealing scheduler.
//!
//! The proactor owns a sorted timer table and a `poll(2)` readiness set,
//! and runs as one ordinary task on the scheduler — blocking one worker in
//! the multiplexer and never touching shared state. Producers drive it
//! exclusively through a framed command channel (a socket pair), so every
//! mutation of loop state happens on the loop itself.
//!
//! When a timer expires or a descriptor becomes ready, the proactor spawns
//! the registered task into the scheduler, optionally under a parent in the
//! completion tree. Timed watchers pair an I/O task with a timeout task;
//! whichever fires first neutralises the other.
//!
//! ```no_run
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use ws_proactor::Proactor;
//! use ws_task::Scheduler;
//!
//! static FIRED: AtomicU64 = AtomicU64::new(0);
//!
//! let scheduler = Scheduler::new(4);
//! let proactor = Proactor::new(&scheduler, None).unwrap();
//!
//! proactor
//!     .add_timer(50, 0, None, |_, _: &()| {
//!         FIRED.store(1, Ordering::Relaxed);
//!     }, ())
//!     .unwrap();
//! # drop(proactor);
//! ```

// -----------------------------------------------------------------------------
// Modules

#[cfg(unix)]
mod channel;
#[cfg(unix)]
mod proactor;
#[cfg(unix)]
mod reactor;
#[cfg(unix)]
mod timer;
#[cfg(unix)]
mod watcher;

// -----------------------------------------------------------------------------
// Exports

#[cfg(unix)]
pub use proactor::{Proactor, TimerId};
