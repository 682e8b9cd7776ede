//! The socketpair-like byte channel.
//!
//! [`socket_pair`] returns two connected [`Stream`] endpoints: a blocking
//! one for producers and a nonblocking one for the consumer that sits in the
//! readiness multiplexer. On Unix this is `socketpair(2)` over `AF_UNIX`;
//! elsewhere a loopback TCP connection stands in, which behaves identically
//! for this purpose (bidirectional bytes, EOF on close).

// -----------------------------------------------------------------------------
// Platform selection

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use unix::{Stream, socket_pair};

#[cfg(windows)]
mod loopback;
#[cfg(windows)]
pub use loopback::{Stream, socket_pair};
