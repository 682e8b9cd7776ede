use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};

use std::hash::{BuildHasher, RandomState};

// -----------------------------------------------------------------------------
// XorShift64Star

const FIXED_STATE: u64 = 0xd6e8_fecc_17d1_5b63;

/// [xorshift*] is a fast pseudorandom number generator which tolerates weak
/// seeding, as long as the state is not zero. Victim selection does not need
/// anything better.
///
/// [xorshift*]: https://en.wikipedia.org/wiki/Xorshift#xorshift*
pub(crate) struct XorShift64Star {
    state: Cell<u64>,
}

impl XorShift64Star {
    /// Returns a generator with a fixed seed, for constant contexts; call
    /// [`reseed`](Self::reseed) before use.
    #[inline(always)]
    pub(crate) const fn fixed() -> Self {
        Self { state: Cell::new(FIXED_STATE) }
    }

    /// Moves the state to a per-instance random value.
    pub(crate) fn reseed(&self) {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);

        // Any non-zero seed will do; hash a global counter.
        let mut seed = 0;
        let rs = RandomState::new();
        while seed == 0 {
            seed = rs.hash_one(COUNTER.fetch_add(1, Ordering::Relaxed));
        }

        self.state.set(seed);
    }

    fn next(&self) -> u64 {
        let mut x = self.state.get();
        debug_assert_ne!(x, 0);
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state.set(x);
        x.wrapping_mul(0x2545_f491_4f6c_dd1d)
    }

    /// Returns a value from `0..n`.
    pub(crate) fn next_usize(&self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}
