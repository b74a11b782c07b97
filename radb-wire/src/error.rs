//! Error types for wire-level operations.

use std::io;
use std::sync::LazyLock;

use regex::Regex;

/// Alias for `Result<T, radb_wire::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Old servers answer "device not found", newer ones "device 'serial' not found".
static DEVICE_NOT_FOUND: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"device( '.*')? not found").expect("valid pattern"));

/// Errors surfaced by the wire engine and the client built on top of it.
///
/// A server that answered `FAIL` is distinguishable from a socket that died:
/// the former produces [`Error::Adb`] (or one of its demoted kinds), the
/// latter [`Error::ConnectionReset`] or [`Error::Network`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The adb host server could not be reached at all.
    #[error("adb server not available at {addr}: {source}")]
    ServerNotAvailable {
        /// Address the dial was attempted against.
        addr: String,
        /// The underlying connect error.
        #[source]
        source: io::Error,
    },

    /// The stream ended in the middle of a message. The server probably died.
    #[error("connection reset: incomplete {what}, read {read} of {expected} bytes")]
    ConnectionReset {
        /// What was being read when the stream ended.
        what: &'static str,
        /// Bytes actually read.
        read: usize,
        /// Bytes expected.
        expected: usize,
    },

    /// Any other socket-level failure.
    #[error("network error during '{request}': {source}")]
    Network {
        /// The request in flight when the error occurred.
        request: String,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The server answered `FAIL`, with its message preserved verbatim.
    #[error("adb server error for '{request}': {message}")]
    Adb {
        /// The request the server rejected.
        request: String,
        /// The server's error message.
        message: String,
    },

    /// A `FAIL` whose message matches the "device ... not found" pattern.
    #[error("device not found for '{request}': {message}")]
    DeviceNotFound {
        /// The request the server rejected.
        request: String,
        /// The server's error message, including the serial.
        message: String,
    },

    /// A missing remote path: a sync `FAIL` naming it, or an all-zero
    /// `STAT` reply.
    #[error("remote path not found for '{request}': {message}")]
    FileNotFound {
        /// The request the server rejected.
        request: String,
        /// The server's error message.
        message: String,
    },

    /// A `FAIL` reporting an EACCES-style refusal on the device.
    #[error("permission denied for '{request}': {message}")]
    PermissionDenied {
        /// The request the server rejected.
        request: String,
        /// The server's error message.
        message: String,
    },

    /// A local precondition was violated before anything hit the wire.
    #[error("assertion: {0}")]
    Assertion(String),

    /// The server sent a payload this library cannot make sense of.
    #[error("parse error: {0}")]
    Parse(String),

    /// The operation deadline elapsed. The connection is poisoned and must
    /// be closed.
    #[error("deadline exceeded during '{request}'")]
    Timeout {
        /// The request in flight when the deadline elapsed.
        request: String,
    },

    /// The operation was canceled by tearing down its socket.
    #[error("operation canceled")]
    Canceled,

    /// A shell-v2 command completed with a non-zero exit code.
    #[error("command exited with code {code}")]
    CommandFailed {
        /// The remote process exit code.
        code: u8,
    },

    /// A local filesystem error while staging a push or pull.
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    /// Wraps a server `FAIL` message, demoting the well-known patterns to
    /// their dedicated kinds so callers can match on them.
    pub fn server(request: impl Into<String>, message: impl Into<String>) -> Self {
        let request = request.into();
        let message = message.into();
        if DEVICE_NOT_FOUND.is_match(&message) {
            Error::DeviceNotFound { request, message }
        } else if message.contains("No such file or directory") {
            Error::FileNotFound { request, message }
        } else if message.contains("Permission denied") {
            Error::PermissionDenied { request, message }
        } else {
            Error::Adb { request, message }
        }
    }

    /// True if the server spoke and said no, in any of its spellings.
    pub fn is_server_error(&self) -> bool {
        matches!(
            self,
            Error::Adb { .. }
                | Error::DeviceNotFound { .. }
                | Error::FileNotFound { .. }
                | Error::PermissionDenied { .. }
        )
    }

    /// True for [`Error::DeviceNotFound`].
    pub fn is_device_not_found(&self) -> bool {
        matches!(self, Error::DeviceNotFound { .. })
    }

    /// True for [`Error::FileNotFound`].
    pub fn is_file_not_found(&self) -> bool {
        matches!(self, Error::FileNotFound { .. })
    }
}
