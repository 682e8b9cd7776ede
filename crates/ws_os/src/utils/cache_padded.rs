//! See <https://docs.rs/crate/crossbeam-utils/latest>
//!
//! - Version: 0.8.21

use core::fmt;
use core::ops::{Deref, DerefMut};

// -----------------------------------------------------------------------------
// CachePadded

/// Pads and aligns a value to the length of a cache line.
///
/// Two values that sit in the same cache line but are written by different
/// threads invalidate each other's caches on every write (false sharing).
/// Wrapping hot, independently-written fields in `CachePadded` keeps each in
/// its own line.
///
/// The alignment is 128 bytes on x86-64 and aarch64, where the prefetcher
/// pulls cache lines in pairs, and 64 bytes elsewhere.
///
/// # Examples
///
/// ```
/// use core::sync::atomic::AtomicUsize;
/// use ws_os::utils::CachePadded;
///
/// struct Indices {
///     top: CachePadded<AtomicUsize>,
///     bottom: CachePadded<AtomicUsize>,
/// }
/// ```
#[derive(Clone, Copy, Default, Hash, PartialEq, Eq)]
#[cfg_attr(
    any(target_arch = "x86_64", target_arch = "aarch64"),
    repr(align(128))
)]
#[cfg_attr(
    not(any(target_arch = "x86_64", target_arch = "aarch64")),
    repr(align(64))
)]
pub struct CachePadded<T> {
    value: T,
}

impl<T> CachePadded<T> {
    /// Pads and aligns a value to the length of a cache line.
    #[inline(always)]
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    /// Returns the inner value.
    #[inline(always)]
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    #[inline(always)]
    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> From<T> for CachePadded<T> {
    #[inline(always)]
    fn from(value: T) -> Self {
        Self::new(value)
    }
}

impl<T: fmt::Debug> fmt::Debug for CachePadded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachePadded").field("value", &self.value).finish()
    }
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::CachePadded;

    #[test]
    fn distinct_lines() {
        let pair = [CachePadded::new(0u8), CachePadded::new(0u8)];
        let a = &*pair[0] as *const u8 as usize;
        let b = &*pair[1] as *const u8 as usize;
        assert!(b - a >= 64);
    }
}
