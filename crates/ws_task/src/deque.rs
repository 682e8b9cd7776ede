//! The bounded work-stealing deque, after Chase and Lev, with the memory
//! orderings of Lê, Pop, Cohen and Nardelli (PPoPP'13,
//! <https://www.di.ens.fr/~zappa/readings/ppopp13.pdf>).
//!
//! The owning worker pushes and pops at the bottom; any other worker steals
//! from the top with a CAS. The fence discipline below is load-bearing —
//! every ordering is the paper's, none is an accident.
//!
//! Elements are task handle words ([`TaskId::to_bits`]), so the buffer is an
//! array of atomics and a stale read on a lost steal race is merely a value
//! to discard, never a dangling pointer.

use core::sync::atomic::{AtomicI64, AtomicU64, Ordering, fence};

use ws_os::utils::CachePadded;

use crate::handle::TaskId;
use crate::slot::SLOT_COUNT;

// -----------------------------------------------------------------------------
// Deque

const MASK: i64 = SLOT_COUNT as i64 - 1;
const _: () = assert!(SLOT_COUNT.is_power_of_two());

/// A bounded single-owner, multi-thief deque of task handles.
pub(crate) struct Deque {
    top: CachePadded<AtomicI64>,
    bottom: CachePadded<AtomicI64>,
    buffer: Box<[AtomicU64]>,
}

/// The deque is full; the caller must drain a task and retry.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct Full;

impl Deque {
    pub(crate) fn new() -> Self {
        Self {
            top: CachePadded::new(AtomicI64::new(0)),
            bottom: CachePadded::new(AtomicI64::new(0)),
            buffer: (0..SLOT_COUNT).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// Pushes at the bottom. Owner-only.
    pub(crate) fn push(&self, id: TaskId) -> Result<(), Full> {
        let b = self.bottom.load(Ordering::Relaxed);
        let t = self.top.load(Ordering::Acquire);

        if b - t >= SLOT_COUNT as i64 {
            return Err(Full);
        }

        self.buffer[(b & MASK) as usize].store(id.to_bits(), Ordering::Relaxed);

        // Publish the element before the new bottom becomes visible.
        fence(Ordering::Release);
        self.bottom.store(b + 1, Ordering::Relaxed);
        Ok(())
    }

    /// Pops at the bottom. Owner-only.
    pub(crate) fn pop(&self) -> Option<TaskId> {
        let b = self.bottom.load(Ordering::Relaxed) - 1;
        self.bottom.store(b, Ordering::Relaxed);

        fence(Ordering::SeqCst);

        let t = self.top.load(Ordering::Relaxed);
        if t > b {
            // Empty; undo the reservation.
            self.bottom.store(b + 1, Ordering::Relaxed);
            return None;
        }

        let bits = self.buffer[(b & MASK) as usize].load(Ordering::Relaxed);
        if t == b {
            // Last element: race the thieves for it.
            let won = self
                .top
                .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            self.bottom.store(b + 1, Ordering::Relaxed);
            if !won {
                return None;
            }
        }
        TaskId::from_bits(bits)
    }

    /// Steals from the top. Any thread.
    pub(crate) fn steal(&self) -> Option<TaskId> {
        let t = self.top.load(Ordering::Acquire);

        fence(Ordering::SeqCst);

        let b = self.bottom.load(Ordering::Acquire);
        if t >= b {
            return None;
        }

        // Read before the CAS; on CAS failure the value may be stale and
        // must be discarded.
        let bits = self.buffer[(t & MASK) as usize].load(Ordering::Relaxed);
        if self
            .top
            .compare_exchange(t, t + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return None;
        }
        TaskId::from_bits(bits)
    }
}

// -----------------------------------------------------------------------------
// Tests
