#![expect(unsafe_code, reason = "FFI to the platform poll interface")]

//! A thin wrapper over the `poll(2)` readiness multiplexer.
//!
//! The caller owns the `[PollFd]` array and its retry policy; this module
//! only performs the system call and maps the error. [`PollFd`] is
//! layout-compatible with `struct pollfd`, so the array is handed to the
//! kernel without copying.

use std::io;
use std::os::fd::RawFd;

use bitflags::bitflags;

// -----------------------------------------------------------------------------
// Events

bitflags! {
    /// Readiness event bits for [`PollFd`].
    #[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
    pub struct Events: i16 {
        /// Readable (or a peer hangup pending read).
        const IN = libc::POLLIN;
        /// Writable.
        const OUT = libc::POLLOUT;
        /// Error condition (only valid in `revents`).
        const ERR = libc::POLLERR;
        /// Peer hung up (only valid in `revents`).
        const HUP = libc::POLLHUP;
    }
}

// -----------------------------------------------------------------------------
// PollFd

/// One entry of the poll set: a descriptor, the events it is armed for, and
/// the events the last [`poll`] reported.
#[repr(transparent)]
#[derive(Clone, Copy)]
pub struct PollFd(libc::pollfd);

impl core::fmt::Debug for PollFd {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PollFd")
            .field("fd", &self.0.fd)
            .field("events", &self.events())
            .field("revents", &self.revents())
            .finish()
    }
}

impl PollFd {
    /// Creates an entry armed for `events`.
    pub const fn new(fd: RawFd, events: Events) -> Self {
        Self(libc::pollfd {
            fd,
            events: events.bits(),
            revents: 0,
        })
    }

    /// The watched descriptor.
    #[inline(always)]
    pub const fn fd(&self) -> RawFd {
        self.0.fd
    }

    /// The events this entry is armed for.
    #[inline(always)]
    pub const fn events(&self) -> Events {
        Events::from_bits_retain(self.0.events)
    }

    /// Rearms the entry for exactly `events`.
    #[inline(always)]
    pub const fn set_events(&mut self, events: Events) {
        self.0.events = events.bits();
    }

    /// The events reported by the last poll. Bits outside [`Events`] (such
    /// as `POLLNVAL`) are retained.
    #[inline(always)]
    pub const fn revents(&self) -> Events {
        Events::from_bits_retain(self.0.revents)
    }

    /// Forgets the last poll's report. The kernel only rewrites `revents`
    /// for entries it was actually handed, so a caller polling a subrange
    /// clears the rest.
    #[inline(always)]
    pub const fn clear_revents(&mut self) {
        self.0.revents = 0;
    }
}

// -----------------------------------------------------------------------------
// poll

/// Polls `fds` once. `timeout_ms < 0` means wait forever.
///
/// Returns the number of entries with nonzero `revents`. All errors,
/// including `EINTR`, are returned to the caller.
pub fn poll(fds: &mut [PollFd], timeout_ms: i32) -> io::Result<usize> {
    // SAFETY: `PollFd` is `repr(transparent)` over `libc::pollfd`, so the
    // slice is a valid pollfd array of `fds.len()` entries.
    let rc = unsafe {
        libc::poll(
            fds.as_mut_ptr().cast::<libc::pollfd>(),
            fds.len() as libc::nfds_t,
            timeout_ms,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::{Events, PollFd, poll};
    use crate::net::socket_pair;
    use std::os::fd::AsRawFd;

    #[test]
    fn reports_readable_endpoint() {
        let (producer, consumer) = socket_pair().unwrap();
        let mut fds = [PollFd::new(consumer.as_raw_fd(), Events::IN)];

        assert_eq!(poll(&mut fds, 0).unwrap(), 0);

        producer.send_all(b"!").unwrap();
        assert_eq!(poll(&mut fds, 1000).unwrap(), 1);
        assert!(fds[0].revents().contains(Events::IN));
    }

    #[test]
    fn times_out_on_quiet_set() {
        let (_producer, consumer) = socket_pair().unwrap();
        let mut fds = [PollFd::new(consumer.as_raw_fd(), Events::IN)];
        assert_eq!(poll(&mut fds, 10).unwrap(), 0);
    }
}
