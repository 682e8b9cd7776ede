//! Monotonic time in milliseconds.
//!
//! The proactor stores absolute deadlines as `u64` milliseconds and reserves
//! the value `0` as a tombstone, so the clock here is anchored at the first
//! call and starts at `1`.

use std::sync::OnceLock;
use std::time::Instant;

// -----------------------------------------------------------------------------
// now_ms

/// Returns the monotonic clock in milliseconds.
///
/// The epoch is the first call in the process; the result is always `>= 1`
/// and never decreases.
///
/// # Examples
///
/// ```
/// let a = ws_os::time::now_ms();
/// let b = ws_os::time::now_ms();
/// assert!(a >= 1);
/// assert!(b >= a);
/// ```
pub fn now_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let epoch = *EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64 + 1
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::now_ms;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn nonzero_and_monotonic() {
        let a = now_ms();
        assert!(a >= 1);
        thread::sleep(Duration::from_millis(5));
        let b = now_ms();
        assert!(b > a);
    }
}
