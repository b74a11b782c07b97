//! Socket capability layer: deadlines, teardown, cooperative cancellation.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::{Error, Result};

/// Capability set required of a wire transport.
///
/// The protocol engine is generic over this trait with concrete types
/// everywhere; mocks in tests implement the same capabilities. Real traffic
/// goes through [`TcpWire`].
pub trait WireStream: Read + Write {
    /// Arms (or clears) the whole-operation deadline. Reads and writes past
    /// the deadline fail, and the stream is then poisoned.
    fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<()>;

    /// Tears the stream down in both directions. Idempotent.
    fn shutdown(&mut self);

    /// True once the stream was torn down by a [`CancelToken`].
    fn is_canceled(&self) -> bool {
        false
    }
}

/// Blocking TCP transport to the adb host server.
///
/// The deadline is absolute: it is re-armed as a socket timeout before
/// every read and write, so a slowly dripping peer cannot extend an
/// operation past it.
#[derive(Debug)]
pub struct TcpWire {
    stream: TcpStream,
    deadline: Option<Instant>,
    canceled: Arc<AtomicBool>,
}

impl TcpWire {
    /// Dials `addr` (`host:port`), failing with
    /// [`Error::ServerNotAvailable`] if nothing is listening there.
    pub fn dial(addr: &str, timeout: Duration) -> Result<Self> {
        let not_available = |source: io::Error| Error::ServerNotAvailable {
            addr: addr.to_owned(),
            source,
        };

        let mut last_err = None;
        for sockaddr in addr.to_socket_addrs().map_err(not_available)? {
            match TcpStream::connect_timeout(&sockaddr, timeout) {
                Ok(stream) => {
                    debug!(%addr, "connected to adb server");
                    let _ = stream.set_nodelay(true);
                    return Ok(Self {
                        stream,
                        deadline: None,
                        canceled: Arc::new(AtomicBool::new(false)),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        Err(not_available(last_err.unwrap_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
        })))
    }

    /// Returns a handle that can cancel in-flight operations on this stream
    /// from another thread.
    pub fn cancel_token(&self) -> Result<CancelToken> {
        let stream = self.stream.try_clone().map_err(|e| Error::Network {
            request: "clone socket for cancellation".to_owned(),
            source: e,
        })?;
        Ok(CancelToken {
            stream,
            canceled: Arc::clone(&self.canceled),
        })
    }

    /// Re-arms the socket timeout with the time left until the deadline.
    fn arm(&self) -> io::Result<()> {
        let Some(deadline) = self.deadline else {
            return Ok(());
        };
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "operation deadline elapsed",
            ));
        }
        self.stream.set_read_timeout(Some(remaining))?;
        self.stream.set_write_timeout(Some(remaining))
    }
}

impl Read for TcpWire {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.arm()?;
        self.stream.read(buf)
    }
}

impl Write for TcpWire {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.arm()?;
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}

impl WireStream for TcpWire {
    fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.deadline = deadline;
        if deadline.is_none() {
            let clear = |e: io::Error| Error::Network {
                request: "clear socket deadline".to_owned(),
                source: e,
            };
            self.stream.set_read_timeout(None).map_err(clear)?;
            self.stream.set_write_timeout(None).map_err(clear)?;
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }
}

/// Cancels an in-flight operation by tearing down its socket.
///
/// Cancellation is cooperative: the blocked read or write observes the
/// teardown and surfaces [`Error::Canceled`].
#[derive(Debug)]
pub struct CancelToken {
    stream: TcpStream,
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Flags the operation as canceled and shuts the socket down.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Reads exactly `buf.len()` bytes, reporting a short read as
/// [`Error::ConnectionReset`] with the byte counts.
pub(crate) fn read_full<S: WireStream>(
    stream: &mut S,
    buf: &mut [u8],
    what: &'static str,
    request: &str,
) -> Result<()> {
    let mut read = 0;
    while read < buf.len() {
        match stream.read(&mut buf[read..]) {
            Ok(0) => {
                if stream.is_canceled() {
                    return Err(Error::Canceled);
                }
                return Err(Error::ConnectionReset {
                    what,
                    read,
                    expected: buf.len(),
                });
            }
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(io_error(stream, e, request)),
        }
    }
    Ok(())
}

/// Maps a raw socket error onto the taxonomy: canceled streams surface
/// [`Error::Canceled`], elapsed deadlines [`Error::Timeout`], everything
/// else [`Error::Network`].
pub(crate) fn io_error<S: WireStream>(stream: &S, e: io::Error, request: &str) -> Error {
    if stream.is_canceled() {
        return Error::Canceled;
    }
    match e.kind() {
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => Error::Timeout {
            request: request.to_owned(),
        },
        io::ErrorKind::UnexpectedEof => Error::ConnectionReset {
            what: "message",
            read: 0,
            expected: 0,
        },
        _ => Error::Network {
            request: request.to_owned(),
            source: e,
        },
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Scripted in-memory stream: serves the bytes it was built with and
    /// records everything written to it.
    pub(crate) struct MockStream {
        input: io::Cursor<Vec<u8>>,
        pub(crate) written: Vec<u8>,
        pub(crate) canceled: bool,
    }

    impl MockStream {
        pub(crate) fn serve(input: impl Into<Vec<u8>>) -> Self {
            Self {
                input: io::Cursor::new(input.into()),
                written: Vec::new(),
                canceled: false,
            }
        }

        pub(crate) fn empty() -> Self {
            Self::serve(Vec::new())
        }
    }

    impl Read for MockStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for MockStream {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl WireStream for MockStream {
        fn set_deadline(&mut self, _deadline: Option<Instant>) -> Result<()> {
            Ok(())
        }

        fn shutdown(&mut self) {}

        fn is_canceled(&self) -> bool {
            self.canceled
        }
    }
}
