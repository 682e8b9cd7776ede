#![expect(unsafe_code, reason = "FFI to the platform socket interface")]

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

// -----------------------------------------------------------------------------
// Stream

/// One endpoint of a connected byte channel.
///
/// The descriptor is closed on drop; the peer then observes EOF.
#[derive(Debug)]
pub struct Stream {
    fd: OwnedFd,
}

impl Stream {
    /// Writes the whole of `buf`, retrying on `EINTR` and short writes.
    pub fn send_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut sent = 0;
        while sent < buf.len() {
            let rest = &buf[sent..];
            // SAFETY: `rest` is a valid buffer of `rest.len()` bytes and the
            // descriptor is owned by `self`.
            let n = unsafe {
                libc::send(
                    self.fd.as_raw_fd(),
                    rest.as_ptr().cast(),
                    rest.len(),
                    0,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            sent += n as usize;
        }
        Ok(())
    }

    /// Reads into `buf`, retrying on `EINTR`.
    ///
    /// Returns `Ok(0)` at EOF. On a nonblocking endpoint an empty channel
    /// surfaces as [`io::ErrorKind::WouldBlock`].
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            // SAFETY: `buf` is a valid buffer of `buf.len()` bytes and the
            // descriptor is owned by `self`.
            let n = unsafe {
                libc::recv(
                    self.fd.as_raw_fd(),
                    buf.as_mut_ptr().cast(),
                    buf.len(),
                    0,
                )
            };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            return Ok(n as usize);
        }
    }
}

impl AsRawFd for Stream {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

// -----------------------------------------------------------------------------
// socket_pair

/// Creates a connected pair of streams.
///
/// The first endpoint is blocking (for producers), the second is
/// nonblocking (for the consumer in the poll loop). Both are
/// close-on-exec.
pub fn socket_pair() -> io::Result<(Stream, Stream)> {
    let mut fds = [-1 as RawFd; 2];
    // SAFETY: `fds` is a valid out-array of two descriptors.
    let rc = unsafe { libc::socketpair(libc::AF_UNIX, libc::SOCK_STREAM, 0, fds.as_mut_ptr()) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: `socketpair` succeeded, so both descriptors are open and owned
    // by nobody else.
    let (producer, consumer) = unsafe {
        (
            Stream { fd: OwnedFd::from_raw_fd(fds[0]) },
            Stream { fd: OwnedFd::from_raw_fd(fds[1]) },
        )
    };

    set_cloexec(producer.as_raw_fd())?;
    set_cloexec(consumer.as_raw_fd())?;
    set_nonblocking(consumer.as_raw_fd())?;

    Ok((producer, consumer))
}

fn set_cloexec(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl on a descriptor we own.
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFD, libc::FD_CLOEXEC) };
    if rc == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: plain fcntl on a descriptor we own.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL, 0);
        if flags == -1 {
            return Err(io::Error::last_os_error());
        }
        if libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) == -1 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

// -----------------------------------------------------------------------------
// Tests

#[cfg(test)]
mod tests {
    use super::socket_pair;
    use std::io;

    #[test]
    fn round_trip() {
        let (producer, consumer) = socket_pair().unwrap();
        producer.send_all(b"hello").unwrap();

        let mut buf = [0u8; 16];
        let n = consumer.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn consumer_is_nonblocking() {
        let (_producer, consumer) = socket_pair().unwrap();
        let mut buf = [0u8; 16];
        let err = consumer.recv(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn eof_after_producer_drop() {
        let (producer, consumer) = socket_pair().unwrap();
        producer.send_all(b"x").unwrap();
        drop(producer);

        let mut buf = [0u8; 16];
        assert_eq!(consumer.recv(&mut buf).unwrap(), 1);
        // Drained and closed: EOF, not WouldBlock.
        assert_eq!(consumer.recv(&mut buf).unwrap(), 0);
    }
}
