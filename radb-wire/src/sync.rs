//! The binary sync sub-protocol for filesystem operations.
//!
//! Entered by sending `sync:` on a transport-bound connection. Every packet
//! opens with an 8-byte header: a 4-byte ASCII identifier and a 32-bit
//! little-endian integer whose meaning depends on the identifier (a length
//! for most packets, the mtime for `DONE`). Unlike the host protocol,
//! nothing here is hex or text framed.

use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{Error, Result};
use crate::mode::FileMode;
use crate::stream::{self, WireStream};

/// Sync payloads and `DATA` chunks cannot exceed 64 KiB.
pub const SYNC_MAX_CHUNK: usize = 64 * 1024;

/// The 4-byte packet identifiers of the sync sub-protocol.
///
/// The v2 identifiers are part of the wire vocabulary but are never
/// negotiated by this library; the v1 set is the implemented core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncId {
    /// `STAT` — lstat(2) request/reply (v1).
    StatV1,
    /// `STA2` — stat(2) reply (v2).
    StatV2,
    /// `LST2` — lstat(2) reply (v2).
    LstatV2,
    /// `LIST` — directory enumeration request (v1).
    ListV1,
    /// `LIS2` — directory enumeration request (v2).
    ListV2,
    /// `DENT` — one directory entry (v1).
    DentV1,
    /// `DNT2` — one directory entry (v2).
    DentV2,
    /// `SEND` — open a push stream.
    Send,
    /// `RECV` — open a pull stream.
    Recv,
    /// `DONE` — end of stream; carries the mtime on a push.
    Done,
    /// `DATA` — one file chunk.
    Data,
    /// `OKAY` — terminal success.
    Okay,
    /// `FAIL` — error; carries a message.
    Fail,
    /// `QUIT` — graceful close.
    Quit,
}

impl SyncId {
    /// The identifier's wire bytes.
    pub const fn code(self) -> [u8; 4] {
        match self {
            SyncId::StatV1 => *b"STAT",
            SyncId::StatV2 => *b"STA2",
            SyncId::LstatV2 => *b"LST2",
            SyncId::ListV1 => *b"LIST",
            SyncId::ListV2 => *b"LIS2",
            SyncId::DentV1 => *b"DENT",
            SyncId::DentV2 => *b"DNT2",
            SyncId::Send => *b"SEND",
            SyncId::Recv => *b"RECV",
            SyncId::Done => *b"DONE",
            SyncId::Data => *b"DATA",
            SyncId::Okay => *b"OKAY",
            SyncId::Fail => *b"FAIL",
            SyncId::Quit => *b"QUIT",
        }
    }

    /// Decodes wire bytes back into an identifier.
    pub fn from_code(code: [u8; 4]) -> Option<Self> {
        Some(match &code {
            b"STAT" => SyncId::StatV1,
            b"STA2" => SyncId::StatV2,
            b"LST2" => SyncId::LstatV2,
            b"LIST" => SyncId::ListV1,
            b"LIS2" => SyncId::ListV2,
            b"DENT" => SyncId::DentV1,
            b"DNT2" => SyncId::DentV2,
            b"SEND" => SyncId::Send,
            b"RECV" => SyncId::Recv,
            b"DONE" => SyncId::Done,
            b"DATA" => SyncId::Data,
            b"OKAY" => SyncId::Okay,
            b"FAIL" => SyncId::Fail,
            b"QUIT" => SyncId::Quit,
            _ => return None,
        })
    }
}

impl fmt::Display for SyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(std::str::from_utf8(&self.code()).unwrap_or("????"))
    }
}

/// Metadata of a remote file or directory entry.
///
/// `name` is empty for a `STAT` reply (the daemon does not echo the path).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteDirEntry {
    /// Entry name relative to the listed directory; empty for stat results.
    pub name: String,
    /// The raw `st_mode`, type and permission bits both preserved.
    pub mode: FileMode,
    /// File size in bytes, truncated to 32 bits by the protocol.
    pub size: u32,
    /// Modification time (seconds granularity).
    pub mtime: SystemTime,
}

impl fmt::Display for RemoteDirEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self
            .mtime
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        write!(f, "{} {:>12} {:>10} {}", self.mode, self.size, secs, self.name)
    }
}

/// The next event on a pull stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkEvent {
    /// A `DATA` header: this many payload bytes follow.
    Data(u32),
    /// `DONE` — the transfer is complete.
    Done,
}

/// A connection to the adb server in sync mode.
///
/// Assumes `sync:` has already been acknowledged on a transport-bound
/// connection (see [`Conn::into_sync`](crate::Conn::into_sync)). After any
/// sync-level `FAIL` the connection is unusable; close it and re-dial.
#[derive(Debug)]
pub struct SyncConn<S> {
    stream: S,
}

impl<S: WireStream> SyncConn<S> {
    pub(crate) fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Arms (or clears) the whole-operation deadline.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.stream.set_deadline(deadline)
    }

    /// Sends `id` + LE length + `payload` as one packet.
    ///
    /// Payloads over [`SYNC_MAX_CHUNK`] fail before anything is written.
    pub fn send_request(&mut self, id: SyncId, payload: &[u8]) -> Result<()> {
        if payload.len() > SYNC_MAX_CHUNK {
            return Err(Error::Assertion(format!(
                "sync payload of {} bytes exceeds the {SYNC_MAX_CHUNK}-byte limit",
                payload.len()
            )));
        }

        let mut packet = Vec::with_capacity(8 + payload.len());
        packet.extend_from_slice(&id.code());
        packet.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        packet.extend_from_slice(payload);

        trace!(%id, len = payload.len(), "send sync packet");
        self.write_all(&packet, "sync request")
    }

    /// Sends one `DATA` chunk. The caller is responsible for splitting
    /// larger buffers; oversize chunks are rejected like any other payload.
    pub fn send_data(&mut self, chunk: &[u8]) -> Result<()> {
        self.send_request(SyncId::Data, chunk)
    }

    /// Sends the terminal `DONE` packet of a push, committing the file with
    /// the given modification time.
    pub fn send_done(&mut self, mtime_secs: u32) -> Result<()> {
        let mut packet = [0u8; 8];
        packet[..4].copy_from_slice(&SyncId::Done.code());
        packet[4..].copy_from_slice(&mtime_secs.to_le_bytes());
        self.write_all(&packet, "sync DONE")
    }

    /// Sends `QUIT` for a graceful close.
    pub fn send_quit(&mut self) -> Result<()> {
        let mut packet = [0u8; 8];
        packet[..4].copy_from_slice(&SyncId::Quit.code());
        self.write_all(&packet, "sync QUIT")
    }

    /// Reads a `STAT` reply: the 4 ASCII bytes `STAT` followed by mode,
    /// size and mtime as LE u32s.
    ///
    /// The daemon reports a missing path as an all-zero triple, which is
    /// surfaced as [`Error::FileNotFound`] rather than as an entry.
    pub fn read_stat_reply(&mut self, path: &str) -> Result<RemoteDirEntry> {
        let mut reply = [0u8; 16];
        stream::read_full(&mut self.stream, &mut reply, "stat reply", path)?;

        if reply[..4] != SyncId::StatV1.code() {
            return Err(Error::Assertion(format!(
                "expected STAT reply, got '{}'",
                String::from_utf8_lossy(&reply[..4])
            )));
        }

        let mode = le_u32(&reply[4..8]);
        let size = le_u32(&reply[8..12]);
        let mtime = le_u32(&reply[12..16]);

        // The daemon has no explicit not-found reply; it sends all zeros.
        // A real file with that exact shape would be a zero-byte file from
        // the epoch, which cannot be distinguished on the wire.
        if mode == 0 && size == 0 && mtime == 0 {
            return Err(Error::FileNotFound {
                request: format!("STAT {path}"),
                message: "no such file or directory".to_owned(),
            });
        }

        Ok(RemoteDirEntry {
            name: String::new(),
            mode: FileMode::new(mode),
            size,
            mtime: time_from_secs(mtime),
        })
    }

    /// Reads the next `DENT` of a directory listing, or `None` once the
    /// daemon terminates the stream.
    ///
    /// The daemon ends a listing with a full dent-sized `DONE` record
    /// (zeroed fields, no name).
    pub fn read_dent(&mut self, request: &str) -> Result<Option<RemoteDirEntry>> {
        let mut header = [0u8; 20];
        stream::read_full(&mut self.stream, &mut header, "dir entry", request)?;

        let id: [u8; 4] = header[..4].try_into().expect("4 bytes");
        let mode = le_u32(&header[4..8]);
        let size = le_u32(&header[8..12]);
        let mtime = le_u32(&header[12..16]);
        let name_len = le_u32(&header[16..20]);

        match SyncId::from_code(id) {
            Some(SyncId::Done) => Ok(None),
            Some(SyncId::DentV1) => {
                let mut name = vec![0u8; name_len as usize];
                stream::read_full(&mut self.stream, &mut name, "dir entry name", request)?;
                Ok(Some(RemoteDirEntry {
                    name: String::from_utf8_lossy(&name).into_owned(),
                    mode: FileMode::new(mode),
                    size,
                    mtime: time_from_secs(mtime),
                }))
            }
            _ => Err(Error::Assertion(format!(
                "expected DENT or DONE, got '{}'",
                String::from_utf8_lossy(&id)
            ))),
        }
    }

    /// Reads the next event of a pull stream: a `DATA` header, `DONE`, or a
    /// `FAIL` (surfaced as an error, with missing paths demoted to
    /// [`Error::FileNotFound`]).
    pub fn read_chunk_header(&mut self, request: &str) -> Result<ChunkEvent> {
        let (id, value) = self.read_header(request)?;
        match SyncId::from_code(id) {
            Some(SyncId::Data) => {
                if value as usize > SYNC_MAX_CHUNK {
                    return Err(Error::Parse(format!(
                        "DATA chunk of {value} bytes exceeds the {SYNC_MAX_CHUNK}-byte limit"
                    )));
                }
                Ok(ChunkEvent::Data(value))
            }
            Some(SyncId::Done) => Ok(ChunkEvent::Done),
            Some(SyncId::Fail) => Err(self.read_fail_message(value, request)?),
            _ => Err(Error::Assertion(format!(
                "expected DATA or DONE, got '{}'",
                String::from_utf8_lossy(&id)
            ))),
        }
    }

    /// Reads `len` bytes of chunk payload into `buf`.
    pub fn read_chunk_data(&mut self, buf: &mut [u8], request: &str) -> Result<()> {
        stream::read_full(&mut self.stream, buf, "chunk data", request)
    }

    /// Reads the terminal status of a push: `OKAY` or `FAIL` + message.
    pub fn read_sync_status(&mut self, request: &str) -> Result<()> {
        let (id, value) = self.read_header(request)?;
        match SyncId::from_code(id) {
            Some(SyncId::Okay) => {
                trace!(%request, "sync OKAY");
                Ok(())
            }
            Some(SyncId::Fail) => Err(self.read_fail_message(value, request)?),
            _ => Err(Error::Assertion(format!(
                "expected OKAY or FAIL, got '{}'",
                String::from_utf8_lossy(&id)
            ))),
        }
    }

    /// Unwraps the raw stream.
    pub fn into_stream(self) -> S {
        self.stream
    }

    /// Tears the connection down. Idempotent.
    pub fn shutdown(&mut self) {
        self.stream.shutdown();
    }

    /// Borrows the underlying stream.
    pub fn stream(&self) -> &S {
        &self.stream
    }

    fn read_header(&mut self, request: &str) -> Result<([u8; 4], u32)> {
        let mut header = [0u8; 8];
        stream::read_full(&mut self.stream, &mut header, "sync header", request)?;
        let id: [u8; 4] = header[..4].try_into().expect("4 bytes");
        Ok((id, le_u32(&header[4..8])))
    }

    fn read_fail_message(&mut self, len: u32, request: &str) -> Result<Error> {
        let mut message = vec![0u8; len as usize];
        stream::read_full(&mut self.stream, &mut message, "failure message", request)?;
        Ok(Error::server(
            request,
            String::from_utf8_lossy(&message).into_owned(),
        ))
    }

    fn write_all(&mut self, bytes: &[u8], request: &str) -> Result<()> {
        if let Err(e) = self.stream.write_all(bytes) {
            return Err(stream::io_error(&self.stream, e, request));
        }
        Ok(())
    }
}

fn le_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes(bytes.try_into().expect("4 bytes"))
}

fn time_from_secs(secs: u32) -> SystemTime {
    UNIX_EPOCH + Duration::from_secs(secs.into())
}
