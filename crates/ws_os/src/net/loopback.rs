use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, TcpListener, TcpStream};
use std::sync::Mutex;

// -----------------------------------------------------------------------------
// Stream

/// One endpoint of a connected byte channel, carried over loopback TCP on
/// platforms without `socketpair(2)`.
#[derive(Debug)]
pub struct Stream {
    inner: Mutex<TcpStream>,
}

impl Stream {
    /// Writes the whole of `buf`.
    pub fn send_all(&self, buf: &[u8]) -> io::Result<()> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.write_all(buf)
    }

    /// Reads into `buf`. Returns `Ok(0)` at EOF; an empty nonblocking
    /// endpoint surfaces as [`io::ErrorKind::WouldBlock`].
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.read(buf)
    }
}

// -----------------------------------------------------------------------------
// socket_pair

/// Creates a connected pair of streams over a loopback TCP connection.
///
/// The first endpoint is blocking (for producers), the second is
/// nonblocking (for the consumer in the poll loop).
pub fn socket_pair() -> io::Result<(Stream, Stream)> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let addr = listener.local_addr()?;

    let producer = TcpStream::connect(addr)?;
    let (consumer, _) = listener.accept()?;

    producer.set_nodelay(true)?;
    consumer.set_nodelay(true)?;
    consumer.set_nonblocking(true)?;

    Ok((
        Stream { inner: Mutex::new(producer) },
        Stream { inner: Mutex::new(consumer) },
    ))
}
