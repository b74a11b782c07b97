//! Wire protocol engine for the Android Debug Bridge host server.
//!
//! The adb host server multiplexes two protocols over one TCP socket:
//!
//! - the **host protocol** — ASCII-hex length-framed messages with 4-byte
//!   `OKAY`/`FAIL` statuses ([`Conn`]);
//! - the **sync sub-protocol** — 4-byte packet identifiers with 32-bit
//!   little-endian fields, entered by a successful `sync:` request
//!   ([`SyncConn`]).
//!
//! On top of those, `shell,v2:` streams carry their own typed chunk
//! framing ([`ShellV2Reader`]).
//!
//! This crate owns the framing, the mode transitions, deadlines, and the
//! error taxonomy. It knows nothing about devices or host-query semantics;
//! that lives in the `radb` crate.

mod conn;
mod error;
mod mode;
mod shellv2;
mod stream;
mod sync;

pub use conn::{Conn, MAX_MESSAGE_LENGTH};
pub use error::{Error, Result};
pub use mode::{FileMode, FileType};
pub use shellv2::{ShellChunk, ShellChunkKind, ShellV2Reader, encode_chunk};
pub use stream::{CancelToken, TcpWire, WireStream};
pub use sync::{ChunkEvent, RemoteDirEntry, SYNC_MAX_CHUNK, SyncConn, SyncId};
