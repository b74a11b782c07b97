//! Shell protocol v2 framing.
//!
//! Advertised by the `shell_v2` feature and requested with
//! `shell,v2:<cmdline>`. The stream carries typed chunks — a kind byte,
//! a 32-bit little-endian length, then the payload — so stdout and stderr
//! stay separate and the exit code arrives in-band.

use std::io::Read;

use crate::error::{Error, Result};
use crate::stream::{self, WireStream};

/// The kind byte of a shell-v2 chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellChunkKind {
    /// Reserved on the response channel; never emitted by the daemon.
    Stdin,
    Stdout,
    Stderr,
    /// Carries exactly one byte, the exit code, and ends the stream.
    Exit,
}

impl ShellChunkKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(ShellChunkKind::Stdin),
            1 => Some(ShellChunkKind::Stdout),
            2 => Some(ShellChunkKind::Stderr),
            3 => Some(ShellChunkKind::Exit),
            _ => None,
        }
    }

    const fn as_byte(self) -> u8 {
        match self {
            ShellChunkKind::Stdin => 0,
            ShellChunkKind::Stdout => 1,
            ShellChunkKind::Stderr => 2,
            ShellChunkKind::Exit => 3,
        }
    }
}

/// One decoded shell-v2 chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellChunk {
    pub kind: ShellChunkKind,
    pub payload: Vec<u8>,
}

/// Lazy decoder over a transport-bound stream that has had its
/// `shell,v2:` request acknowledged.
#[derive(Debug)]
pub struct ShellV2Reader<S> {
    stream: S,
    request: String,
    finished: bool,
}

impl<S: WireStream> ShellV2Reader<S> {
    /// Wraps a stream positioned at the first chunk. `request` is kept for
    /// error diagnostics only.
    pub fn new(stream: S, request: impl Into<String>) -> Self {
        Self {
            stream,
            request: request.into(),
            finished: false,
        }
    }

    /// Returns the next stdout/stderr/exit chunk, or `None` once the
    /// stream is over.
    ///
    /// Reserved `stdin` chunks on the response channel are skipped. An
    /// `exit` chunk must carry exactly one byte (the exit code); it ends
    /// the stream.
    pub fn next_chunk(&mut self) -> Result<Option<ShellChunk>> {
        loop {
            if self.finished {
                return Ok(None);
            }

            let mut kind_byte = [0u8; 1];
            match self.stream.read(&mut kind_byte) {
                // Clean close without an exit frame: the stream is over.
                Ok(0) => {
                    self.finished = true;
                    return Ok(None);
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(stream::io_error(&self.stream, e, &self.request)),
            }

            let kind = ShellChunkKind::from_byte(kind_byte[0]).ok_or_else(|| {
                Error::Parse(format!(
                    "unknown shell-v2 chunk kind {} for '{}'",
                    kind_byte[0], self.request
                ))
            })?;

            let mut len_bytes = [0u8; 4];
            stream::read_full(&mut self.stream, &mut len_bytes, "chunk length", &self.request)?;
            let len = u32::from_le_bytes(len_bytes) as usize;

            let mut payload = vec![0u8; len];
            stream::read_full(&mut self.stream, &mut payload, "chunk payload", &self.request)?;

            match kind {
                ShellChunkKind::Stdin => continue,
                ShellChunkKind::Exit => {
                    if payload.len() != 1 {
                        return Err(Error::Parse(format!(
                            "exit chunk carries {} bytes, expected 1",
                            payload.len()
                        )));
                    }
                    self.finished = true;
                    return Ok(Some(ShellChunk { kind, payload }));
                }
                _ => return Ok(Some(ShellChunk { kind, payload })),
            }
        }
    }

    /// Unwraps the raw stream.
    pub fn into_stream(self) -> S {
        self.stream
    }
}

/// Encodes one shell-v2 chunk; the counterpart of the reader, used by
/// tests and mock servers.
pub fn encode_chunk(kind: ShellChunkKind, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + payload.len());
    out.push(kind.as_byte());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}
