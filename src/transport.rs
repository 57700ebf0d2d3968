//! Byte-stream transport owned by exactly one session or connection
//! handler. Partial reads and writes are retried at the byte level; a
//! peer close or hard error mid-transfer is a Network failure, never a
//! silent truncation.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::error::NetCloudError;
use crate::protocol::timeouts;

pub trait Transport: Send {
    /// Send the whole buffer or fail.
    fn send_all(&mut self, buf: &[u8]) -> io::Result<()>;
    /// Receive up to `buf.len()` bytes; `Ok(0)` means the peer closed.
    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Release the underlying connection. Safe to call more than once.
    fn close(&mut self);
}

/// Read/write deadlines applied to a TCP connection. The wire protocol
/// has no liveness signal, so these are the only guard against a stalled
/// peer.
#[derive(Clone, Copy, Debug)]
pub struct Deadlines {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            connect: Duration::from_millis(timeouts::CONNECT_MS),
            read: Duration::from_millis(timeouts::READ_MS),
            write: Duration::from_millis(timeouts::WRITE_MS),
        }
    }
}

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn connect(addr: &str) -> io::Result<Self> {
        Self::connect_with(addr, Deadlines::default())
    }

    /// Resolve and connect, trying each candidate address in turn.
    pub fn connect_with(addr: &str, deadlines: Deadlines) -> io::Result<Self> {
        let mut last_err = None;
        for candidate in addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&candidate, deadlines.connect) {
                Ok(stream) => {
                    let _ = stream.set_nodelay(true);
                    let _ = stream.set_read_timeout(Some(deadlines.read));
                    let _ = stream.set_write_timeout(Some(deadlines.write));
                    return Ok(Self { stream });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, format!("{addr}: no addresses"))
        }))
    }

    /// Wrap an accepted connection on the server side.
    pub fn from_stream(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let deadlines = Deadlines::default();
        let _ = stream.set_read_timeout(Some(deadlines.read));
        let _ = stream.set_write_timeout(Some(deadlines.write));
        Self { stream }
    }
}

impl Transport for TcpTransport {
    fn send_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.stream.write_all(buf)
    }

    fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Receive exactly `buf.len()` bytes. The caller never sees a partially
/// filled buffer as success: a close or error mid-loop fails the whole
/// operation.
pub fn recv_exact(t: &mut dyn Transport, buf: &mut [u8]) -> Result<(), NetCloudError> {
    let mut filled = 0;
    while filled < buf.len() {
        match t.recv(&mut buf[filled..]) {
            Ok(0) => {
                return Err(NetCloudError::Network(format!(
                    "connection closed after {filled} of {} bytes",
                    buf.len()
                )))
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Hands out inbound bytes in fixed-size dribbles to exercise the
    /// retry loop.
    struct Dribble {
        data: VecDeque<u8>,
        chunk: usize,
    }

    impl Transport for Dribble {
        fn send_all(&mut self, _buf: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            for b in buf.iter_mut().take(n) {
                *b = self.data.pop_front().unwrap();
            }
            Ok(n)
        }
        fn close(&mut self) {}
    }

    #[test]
    fn recv_exact_reassembles_short_reads() {
        let mut t = Dribble {
            data: (0u8..100).collect(),
            chunk: 7,
        };
        let mut buf = [0u8; 100];
        recv_exact(&mut t, &mut buf).unwrap();
        assert_eq!(buf.to_vec(), (0u8..100).collect::<Vec<_>>());
    }

    #[test]
    fn recv_exact_fails_on_early_close() {
        let mut t = Dribble {
            data: (0u8..10).collect(),
            chunk: 4,
        };
        let mut buf = [0u8; 20];
        let err = recv_exact(&mut t, &mut buf).unwrap_err();
        assert!(matches!(err, NetCloudError::Network(_)));
    }
}
