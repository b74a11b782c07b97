//! Framed connection to the adb host server.
//!
//! In framed mode every payload travels behind 4 ASCII hex digits giving
//! its length, and every response opens with a 4-byte `OKAY`/`FAIL`
//! status. A successful mode-changing request (`host:transport-*`,
//! `sync:`, `shell:…`, a forward target) leaves framed mode permanently;
//! [`Conn::into_sync`] and [`Conn::into_stream`] encode those one-way
//! transitions by consuming the connection.

use std::time::Instant;

use tracing::trace;

use crate::error::{Error, Result};
use crate::stream::{self, WireStream};
use crate::sync::SyncConn;

/// The server imposes an undocumented 255-byte limit on framed messages.
pub const MAX_MESSAGE_LENGTH: usize = 255;

const STATUS_OKAY: &[u8; 4] = b"OKAY";
const STATUS_FAIL: &[u8; 4] = b"FAIL";

/// A connection to the adb server in framed (host protocol) mode.
///
/// One operation at a time; the server closes most connections after a
/// single round trip, so usage generally looks like:
///
/// ```ignore
/// let mut conn = Conn::new(TcpWire::dial("127.0.0.1:5037", timeout)?);
/// conn.send_message(b"host:version")?;
/// conn.read_status("host:version")?;
/// let payload = conn.read_message("host:version")?;
/// ```
#[derive(Debug)]
pub struct Conn<S> {
    stream: S,
}

impl<S: WireStream> Conn<S> {
    /// Wraps a freshly-dialed stream.
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Arms (or clears) the whole-operation deadline.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.stream.set_deadline(deadline)
    }

    /// Sends one framed message: 4 lowercase hex digits of the payload
    /// length, then the payload.
    ///
    /// Payloads over [`MAX_MESSAGE_LENGTH`] fail before anything is
    /// written.
    pub fn send_message(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_MESSAGE_LENGTH {
            return Err(Error::Assertion(format!(
                "message length {} exceeds the {MAX_MESSAGE_LENGTH}-byte limit",
                payload.len()
            )));
        }

        let mut frame = Vec::with_capacity(4 + payload.len());
        frame.extend_from_slice(format!("{:04x}", payload.len()).as_bytes());
        frame.extend_from_slice(payload);

        trace!(request = %String::from_utf8_lossy(payload), "send framed message");
        if let Err(e) = self.stream.write_all(&frame) {
            let request = String::from_utf8_lossy(payload).into_owned();
            return Err(stream::io_error(&self.stream, e, &request));
        }
        Ok(())
    }

    /// Reads the 4-byte status for `request`.
    ///
    /// `FAIL` consumes the trailing error message and surfaces it through
    /// [`Error::server`]; any other status is a protocol violation.
    pub fn read_status(&mut self, request: &str) -> Result<()> {
        let mut status = [0u8; 4];
        stream::read_full(&mut self.stream, &mut status, "status", request)?;

        match &status {
            STATUS_OKAY => {
                trace!(%request, "server OKAY");
                Ok(())
            }
            STATUS_FAIL => {
                let message = self.read_message(request)?;
                Err(Error::server(
                    request,
                    String::from_utf8_lossy(&message).into_owned(),
                ))
            }
            other => Err(Error::Assertion(format!(
                "unexpected status {:?} for '{request}'",
                String::from_utf8_lossy(other)
            ))),
        }
    }

    /// Reads one framed message: 4 ASCII hex digits, then that many bytes.
    pub fn read_message(&mut self, request: &str) -> Result<Vec<u8>> {
        let mut hex = [0u8; 4];
        stream::read_full(&mut self.stream, &mut hex, "length", request)?;

        let text = std::str::from_utf8(&hex)
            .map_err(|_| Error::Parse(format!("non-ASCII length header {hex:?} for '{request}'")))?;
        let length = usize::from_str_radix(text, 16)
            .map_err(|_| Error::Parse(format!("bad hex length '{text}' for '{request}'")))?;

        let mut payload = vec![0u8; length];
        stream::read_full(&mut self.stream, &mut payload, "message data", request)?;
        Ok(payload)
    }

    /// Drains the stream until the server closes it (shell v1 output).
    pub fn read_until_eof(&mut self, request: &str) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self.stream.read_to_end(&mut out) {
            // A canceled socket reports EOF; don't pass that off as output.
            Ok(_) if self.stream.is_canceled() => Err(Error::Canceled),
            Ok(_) => Ok(out),
            Err(e) => Err(stream::io_error(&self.stream, e, request)),
        }
    }

    /// Send + read-status + read-one-message, for host queries that return
    /// a single payload. The caller drops the connection afterwards.
    pub fn round_trip_single_response(&mut self, request: &str) -> Result<Vec<u8>> {
        self.send_message(request.as_bytes())?;
        self.read_status(request)?;
        self.read_message(request)
    }

    /// Borrows the underlying stream.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    /// Switches to sync mode. The `sync:` request must already have been
    /// acknowledged with `OKAY`; framed mode is left permanently.
    pub fn into_sync(self) -> SyncConn<S> {
        SyncConn::new(self.stream)
    }

    /// Unwraps the raw stream after a mode-changing request (a shell or a
    /// forward target) was acknowledged; no further framing applies.
    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Tears the connection down. Idempotent.
    pub fn shutdown(&mut self) {
        self.stream.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::testing::MockStream;

    #[test]
    fn send_message_frames_payload() {
        let mut conn = Conn::new(MockStream::empty());
        conn.send_message(b"host:version").unwrap();
        assert_eq!(conn.stream().written, b"000chost:version");
    }

    #[test]
    fn send_message_allows_empty_payload() {
        let mut conn = Conn::new(MockStream::empty());
        conn.send_message(b"").unwrap();
        assert_eq!(conn.stream().written, b"0000");
    }

    #[test]
    fn send_message_rejects_oversize_before_writing() {
        let mut conn = Conn::new(MockStream::empty());
        let payload = vec![b'x'; MAX_MESSAGE_LENGTH + 1];
        let err = conn.send_message(&payload).unwrap_err();
        assert!(matches!(err, Error::Assertion(_)));
        assert!(conn.stream().written.is_empty());
    }

    #[test]
    fn send_message_accepts_maximum_payload() {
        let mut conn = Conn::new(MockStream::empty());
        let payload = vec![b'x'; MAX_MESSAGE_LENGTH];
        conn.send_message(&payload).unwrap();
        assert_eq!(&conn.stream().written[..4], b"00ff");
        assert_eq!(conn.stream().written.len(), 4 + MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn read_message_empty() {
        let mut conn = Conn::new(MockStream::serve(&b"0000"[..]));
        assert_eq!(conn.read_message("req").unwrap(), b"");
    }

    #[test]
    fn read_message_bad_hex_is_parse_error() {
        let mut conn = Conn::new(MockStream::serve(&b"zzzz"[..]));
        assert!(matches!(conn.read_message("req"), Err(Error::Parse(_))));
    }

    #[test]
    fn read_message_short_payload_is_connection_reset() {
        let mut conn = Conn::new(MockStream::serve(&b"0004ab"[..]));
        match conn.read_message("req") {
            Err(Error::ConnectionReset { read, expected, .. }) => {
                assert_eq!((read, expected), (2, 4));
            }
            other => panic!("expected ConnectionReset, got {other:?}"),
        }
    }

    #[test]
    fn read_status_okay() {
        let mut conn = Conn::new(MockStream::serve(&b"OKAY"[..]));
        conn.read_status("host:devices").unwrap();
    }

    #[test]
    fn read_status_fail_carries_server_message() {
        let mut conn = Conn::new(MockStream::serve(&b"FAIL0014unknown host service"[..]));
        match conn.read_status("host:bogus") {
            Err(Error::Adb { request, message }) => {
                assert_eq!(request, "host:bogus");
                assert_eq!(message, "unknown host service");
            }
            other => panic!("expected Adb error, got {other:?}"),
        }
    }

    #[test]
    fn read_status_garbage_is_assertion() {
        let mut conn = Conn::new(MockStream::serve(&b"WHAT"[..]));
        assert!(matches!(conn.read_status("req"), Err(Error::Assertion(_))));
    }

    #[test]
    fn read_status_short_read_is_connection_reset() {
        let mut conn = Conn::new(MockStream::serve(&b"OK"[..]));
        assert!(matches!(
            conn.read_status("req"),
            Err(Error::ConnectionReset { .. })
        ));
    }

    #[test]
    fn round_trip_reads_version_payload() {
        // OKAY + "0004" + "0030".
        let mut conn = Conn::new(MockStream::serve(&b"OKAY00040030"[..]));
        let resp = conn.round_trip_single_response("host:version").unwrap();
        assert_eq!(resp, b"0030");
        assert_eq!(conn.stream().written, b"000chost:version");
    }

    #[test]
    fn transport_fail_demotes_to_device_not_found() {
        // The server rejects an unknown serial.
        let mut conn = Conn::new(MockStream::serve(
            &b"FAIL0023device 'ABCDEF0123456789' not found"[..],
        ));
        let request = "host:transport:ABCDEF0123456789";
        conn.send_message(request.as_bytes()).unwrap();
        match conn.read_status(request) {
            Err(Error::DeviceNotFound { message, .. }) => {
                assert!(message.contains("ABCDEF0123456789"));
            }
            other => panic!("expected DeviceNotFound, got {other:?}"),
        }
    }

    mod properties {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            // The framing law: every payload up to the limit frames as
            // exactly %04x + payload.
            #[test]
            fn framing_law(payload in proptest::collection::vec(any::<u8>(), 0..=255)) {
                let mut conn = Conn::new(MockStream::empty());
                conn.send_message(&payload).unwrap();

                let mut expected = format!("{:04x}", payload.len()).into_bytes();
                expected.extend_from_slice(&payload);
                prop_assert_eq!(&conn.stream().written, &expected);
            }

            // And frames round-trip through the reader.
            #[test]
            fn framed_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..=255)) {
                let mut sender = Conn::new(MockStream::empty());
                sender.send_message(&payload).unwrap();
                let written = sender.into_stream().written;

                let mut receiver = Conn::new(MockStream::serve(written));
                prop_assert_eq!(receiver.read_message("req").unwrap(), payload);
            }
        }
    }
}
