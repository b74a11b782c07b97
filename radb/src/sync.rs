//! The file service: stat, list, pull and push over a `sync:` connection.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use radb_wire::{
    ChunkEvent, Error, RemoteDirEntry, Result, SYNC_MAX_CHUNK, SyncConn, SyncId, TcpWire,
};
use tracing::debug;

use crate::device::Device;

impl Device {
    /// Opens a file service connection: transport switch plus `sync:`.
    ///
    /// The connection handles one operation at a time and stays usable
    /// across operations until an error poisons it or it is dropped.
    pub fn sync(&self) -> Result<FileService> {
        let request = "sync:";
        let deadline = Instant::now() + crate::client::SHORT_COMMAND_TIMEOUT;
        let mut conn = self.dial_transport(deadline)?;
        conn.send_message(request.as_bytes())?;
        conn.read_status(request)?;

        let mut conn = conn.into_sync();
        // Transfers have no per-byte deadline; callers arm one if needed.
        conn.set_deadline(None)?;
        Ok(FileService {
            conn,
            quit_sent: false,
        })
    }
}

/// Filesystem operations on a device over one sync-mode connection.
pub struct FileService {
    conn: SyncConn<TcpWire>,
    quit_sent: bool,
}

impl FileService {
    /// Arms (or clears) a whole-operation deadline on the connection.
    ///
    /// Transfers carry no deadline by default; a connection that hits an
    /// armed deadline is poisoned and must be dropped.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.conn.set_deadline(deadline)
    }

    /// Stats a remote path (lstat: symlinks are not followed).
    ///
    /// A missing path surfaces as [`Error::FileNotFound`]; the daemon's
    /// all-zero reply is never returned as an entry.
    pub fn stat(&mut self, path: &str) -> Result<RemoteDirEntry> {
        self.conn.send_request(SyncId::StatV1, path.as_bytes())?;
        self.conn.read_stat_reply(path)
    }

    /// Streams the entries of a remote directory.
    ///
    /// An empty directory and a nonexistent one both yield zero entries;
    /// callers that need the distinction should [`stat`](Self::stat)
    /// first.
    pub fn list_dir(&mut self, path: &str) -> Result<DirEntries<'_>> {
        let request = format!("LIST {path}");
        self.conn.send_request(SyncId::ListV1, path.as_bytes())?;
        Ok(DirEntries {
            conn: &mut self.conn,
            request,
            done: false,
        })
    }

    /// [`list_dir`](Self::list_dir), collected into a vector.
    pub fn read_dir(&mut self, path: &str) -> Result<Vec<RemoteDirEntry>> {
        self.list_dir(path)?.collect()
    }

    /// Opens a remote file for reading; the returned reader yields the
    /// daemon's `DATA` chunks as one contiguous byte stream.
    pub fn open_read(&mut self, path: &str) -> Result<FileReader<'_>> {
        let request = format!("RECV {path}");
        self.conn.send_request(SyncId::Recv, path.as_bytes())?;
        Ok(FileReader {
            conn: &mut self.conn,
            request,
            remaining: 0,
            done: false,
        })
    }

    /// Opens a remote file for writing.
    ///
    /// The file is created with the permission bits of `mode` (the type is
    /// implied by the transfer). Writes are chunked at 64 KiB; the file
    /// only exists once [`FileWriter::commit`] has run the terminal
    /// handshake. `mtime` of `None` stamps the commit time.
    pub fn open_write(
        &mut self,
        path: &str,
        mode: u32,
        mtime: Option<SystemTime>,
    ) -> Result<FileWriter<'_>> {
        // The remote name is the path and a decimal permission mode,
        // separated by the last comma.
        let path_and_mode = format!("{path},{}", mode & 0o777);
        self.conn
            .send_request(SyncId::Send, path_and_mode.as_bytes())?;
        Ok(FileWriter {
            conn: &mut self.conn,
            request: format!("SEND {path_and_mode}"),
            mtime,
        })
    }

    /// Copies a local file to the device, preserving permissions and
    /// mtime. Returns the number of bytes sent.
    pub fn push(&mut self, local: &Path, remote: &str) -> Result<u64> {
        self.push_with_progress(local, remote, |_, _| {})
    }

    /// [`push`](Self::push), reporting `(sent, total)` after every chunk.
    pub fn push_with_progress(
        &mut self,
        local: &Path,
        remote: &str,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<u64> {
        let meta = fs::symlink_metadata(local)?;
        let total = meta.len();
        let mtime = meta.modified().ok();
        let mut file = fs::File::open(local)?;

        // Pushing onto an existing directory means pushing into it.
        let remote = match self.stat(remote) {
            Ok(entry) if entry.mode.is_dir() => match local.file_name() {
                Some(name) => format!("{remote}/{}", name.to_string_lossy()),
                None => remote.to_owned(),
            },
            _ => remote.to_owned(),
        };

        debug!(local = %local.display(), %remote, total, "push");
        let mut writer = self.open_write(&remote, permissions_of(&meta), mtime)?;
        let mut chunk = vec![0u8; SYNC_MAX_CHUNK];
        let mut sent = 0u64;
        loop {
            let n = file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            writer.write_chunks(&chunk[..n])?;
            sent += n as u64;
            progress(sent, total);
        }
        writer.commit()?;
        Ok(sent)
    }

    /// Copies a remote file into a local one. Returns the number of bytes
    /// received.
    pub fn pull(&mut self, remote: &str, local: &Path) -> Result<u64> {
        self.pull_with_progress(remote, local, |_, _| {})
    }

    /// [`pull`](Self::pull), reporting `(received, total)` after every
    /// chunk. `total` comes from a preceding stat, so a missing remote
    /// path fails before the local file is created.
    pub fn pull_with_progress(
        &mut self,
        remote: &str,
        local: &Path,
        mut progress: impl FnMut(u64, u64),
    ) -> Result<u64> {
        let total = u64::from(self.stat(remote)?.size);
        debug!(%remote, local = %local.display(), total, "pull");

        let mut file = fs::File::create(local)?;
        let mut reader = self.open_read(remote)?;
        let mut chunk = vec![0u8; SYNC_MAX_CHUNK];
        let mut received = 0u64;
        loop {
            let n = match reader.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(unwrap_wire_error(e)),
            };
            file.write_all(&chunk[..n])?;
            received += n as u64;
            progress(received, total);
        }
        Ok(received)
    }

    /// Ends the session gracefully with `QUIT`. Also sent on drop.
    pub fn quit(mut self) -> Result<()> {
        self.quit_sent = true;
        self.conn.send_quit()
    }
}

impl Drop for FileService {
    fn drop(&mut self) {
        if !self.quit_sent {
            let _ = self.conn.send_quit();
        }
    }
}

/// Streaming iterator over a directory listing.
///
/// Borrows the service; collect or drop it before issuing the next
/// operation. Dropping mid-stream leaves unread entries on the socket, so
/// the connection should then be discarded.
pub struct DirEntries<'a> {
    conn: &'a mut SyncConn<TcpWire>,
    request: String,
    done: bool,
}

impl Iterator for DirEntries<'_> {
    type Item = Result<RemoteDirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.conn.read_dent(&self.request) {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Reader over a pull stream.
///
/// Tracks the bytes remaining in the current `DATA` chunk and refills by
/// reading the next chunk header; `DONE` ends the stream, `FAIL` surfaces
/// as an error.
pub struct FileReader<'a> {
    conn: &'a mut SyncConn<TcpWire>,
    request: String,
    remaining: usize,
    done: bool,
}

impl Read for FileReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done || buf.is_empty() {
            return Ok(0);
        }

        while self.remaining == 0 {
            match self.conn.read_chunk_header(&self.request) {
                Ok(ChunkEvent::Data(0)) => {}
                Ok(ChunkEvent::Data(n)) => self.remaining = n as usize,
                Ok(ChunkEvent::Done) => {
                    self.done = true;
                    return Ok(0);
                }
                Err(e) => return Err(io::Error::other(e)),
            }
        }

        let n = buf.len().min(self.remaining);
        self.conn
            .read_chunk_data(&mut buf[..n], &self.request)
            .map_err(io::Error::other)?;
        self.remaining -= n;
        Ok(n)
    }
}

/// Writer over a push stream.
///
/// Splits caller writes into `DATA` chunks of at most 64 KiB. The
/// transfer is only committed once [`commit`](Self::commit) has sent
/// `DONE, mtime` and consumed the terminal status; dropping the writer
/// without committing abandons the file.
pub struct FileWriter<'a> {
    conn: &'a mut SyncConn<TcpWire>,
    request: String,
    mtime: Option<SystemTime>,
}

impl FileWriter<'_> {
    /// Sends `DONE` with the modification time and reads the terminal
    /// `OKAY`/`FAIL`.
    pub fn commit(self) -> Result<()> {
        let mtime = self.mtime.unwrap_or_else(SystemTime::now);
        let secs = mtime
            .duration_since(UNIX_EPOCH)
            .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
            .unwrap_or(0);
        self.conn.send_done(secs)?;
        self.conn.read_sync_status(&self.request)
    }

    fn write_chunks(&mut self, mut buf: &[u8]) -> Result<()> {
        while !buf.is_empty() {
            let n = buf.len().min(SYNC_MAX_CHUNK);
            self.conn.send_data(&buf[..n])?;
            buf = &buf[n..];
        }
        Ok(())
    }
}

impl Write for FileWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_chunks(buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn permissions_of(meta: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    meta.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn permissions_of(_meta: &fs::Metadata) -> u32 {
    0o644
}

/// Recovers the wire error a [`FileReader`] stashed inside an `io::Error`.
fn unwrap_wire_error(e: io::Error) -> Error {
    match e.downcast::<Error>() {
        Ok(wire) => wire,
        Err(e) => Error::Io(e),
    }
}
