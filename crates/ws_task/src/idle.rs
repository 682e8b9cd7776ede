//! The rendezvous between task producers and idle workers.
//!
//! A signed counter pairs with a counting semaphore. The counter tracks,
//! loosely, "signals minus sleepers": a positive value is a prepaid wakeup
//! the next sleeper consumes without touching the semaphore, and it is
//! capped at `+1` so a burst of spawns banks at most one wakeup. Every
//! transition that crosses zero downward is paired with exactly one
//! semaphore wait, and every signal that observes a negative value posts
//! exactly one permit.
//!
//! Do not "simplify" this to always-post (permits accrue without bound) or
//! to a condition variable (the predicate would need the producer's lock).

use core::sync::atomic::{AtomicI32, Ordering};

use ws_os::sync::Semaphore;
use ws_os::utils::CachePadded;

// -----------------------------------------------------------------------------
// IdleGate

pub(crate) struct IdleGate {
    status: CachePadded<AtomicI32>,
    sleepers: Semaphore,
}

impl IdleGate {
    pub(crate) fn new() -> Self {
        Self {
            status: CachePadded::new(AtomicI32::new(0)),
            sleepers: Semaphore::new(0),
        }
    }

    /// Announces one unit of new work.
    ///
    /// Raises `status` toward the `+1` cap; if the previous value was
    /// negative, a worker is actually asleep and gets a permit.
    pub(crate) fn signal(&self) {
        let mut old = self.status.load(Ordering::Relaxed);
        loop {
            let new = if old < 1 { old + 1 } else { 1 };
            match self.status.compare_exchange_weak(
                old,
                new,
                Ordering::Release,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(current) => old = current,
            }
        }

        if old < 0 {
            self.sleepers.post(1);
        }
    }

    /// Parks the calling worker until signalled.
    ///
    /// Consumes a banked signal if one is present; otherwise blocks on the
    /// semaphore.
    pub(crate) fn wait(&self) {
        if self.status.fetch_sub(1, Ordering::Acquire) < 1 {
            self.sleepers.wait();
        }
    }

    /// Posts `n` raw permits, bypassing the counter. Shutdown only: flushes
    /// every sleeper regardless of banked state.
    pub(crate) fn flush(&self, n: usize) {
        self.sleepers.post(n);
    }

    #[cfg(test)]
    pub(crate) fn status(&self) -> i32 {
        self.status.load(Ordering::Relaxed)
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::IdleGate;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn signal_caps_at_one() {
        let gate = IdleGate::new();
        for _ in 0..100 {
            gate.signal();
        }
        assert_eq!(gate.status(), 1);

        // The single banked signal lets one wait through without blocking.
        gate.wait();
        assert_eq!(gate.status(), 0);
    }

    #[test]
    fn sleeper_is_woken_by_signal() {
        let gate = Arc::new(IdleGate::new());
        let sleeper = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || gate.wait())
        };

        // The sleeper will cross zero downward and block; one signal frees it.
        gate.signal();
        sleeper.join().unwrap();
    }

    #[test]
    fn each_negative_crossing_gets_one_permit() {
        let gate = Arc::new(IdleGate::new());
        let sleepers: Vec<_> = (0..4)
            .map(|_| {
                let gate = Arc::clone(&gate);
                thread::spawn(move || gate.wait())
            })
            .collect();

        for _ in 0..4 {
            gate.signal();
        }
        for sleeper in sleepers {
            sleeper.join().unwrap();
        }
    }
}
