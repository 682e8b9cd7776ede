//! A work-stealing scheduler for fine-grained, short-lived tasks.
//!
//! A task is a plain function plus a small, inline, byte-copyable parameter.
//! Tasks may name a parent, which forms an implicit completion tree:
//! [`join`] returns only once the joined task *and every descendant* have
//! finished. Joining never puts the caller to sleep — it executes other
//! tasks until the subtree drains, so a task can always join its own
//! children.
//!
//! # Overview
//!
//! Each worker thread owns a fixed slab of task slots and a bounded
//! [Chase–Lev] deque of scheduled tasks. Spawning pushes onto the calling
//! worker's deque; idle workers pop their own deque or steal from a random
//! victim. Producers and sleepers rendezvous through a signed counter and a
//! counting semaphore that banks at most one wakeup, so bursts of spawns do
//! not inflate the semaphore.
//!
//! Task handles pack `(worker, generation, offset)` into a single word.
//! Slots are recycled, but each allocation refreshes the generation, so a
//! handle held past its task's completion is *stale* rather than dangerous:
//! dereferencing it fails and [`join`] returns immediately.
//!
//! ```
//! use std::sync::atomic::{AtomicU32, Ordering};
//! use ws_task::Scheduler;
//!
//! static HITS: AtomicU32 = AtomicU32::new(0);
//!
//! let scheduler = Scheduler::new(4);
//! let root = scheduler
//!     .spawn(None, |cx, n: &u32| {
//!         for _ in 0..*n {
//!             cx.spawn(Some(cx.id()), |_, _: &()| {
//!                 HITS.fetch_add(1, Ordering::Relaxed);
//!             }, ())
//!             .unwrap();
//!         }
//!     }, 16u32)
//!     .unwrap();
//! scheduler.join(root);
//! assert_eq!(HITS.load(Ordering::Relaxed), 16);
//! ```
//!
//! [Chase–Lev]: https://www.di.ens.fr/~zappa/readings/ppopp13.pdf
//! [`join`]: Scheduler::join

// -----------------------------------------------------------------------------
// Modules

mod deque;
mod erased;
mod error;
mod handle;
mod idle;
mod scheduler;
mod slot;
mod xor_shift;

// -----------------------------------------------------------------------------
// Exports

pub use erased::ErasedTask;
pub use error::SpawnError;
pub use handle::{MAX_WORKERS, TaskId};
pub use scheduler::{Scheduler, SchedulerBuilder, SchedulerHandle, TaskContext, TaskFn};
pub use slot::PARAM_MAX;
