//! The `host:track-devices` boundary.
//!
//! The server pushes a full device-list snapshot (one framed message) on
//! every state change, starting with the current state right after the
//! `OKAY`. This module only surfaces the raw snapshots and a close handle;
//! diffing consecutive snapshots into per-device events is a concern for
//! the watcher built on top.

use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Instant;

use radb_wire::{CancelToken, Error, Result};
use tracing::{debug, trace};

use crate::client::{Client, SHORT_COMMAND_TIMEOUT};

const TRACK_REQUEST: &str = "host:track-devices";

impl Client {
    /// Opens a long-lived tracking connection.
    ///
    /// The returned tracker owns a background reader thread; drop it (or
    /// call [`DeviceTracker::close`]) to tear the connection down.
    pub fn track_devices(&self) -> Result<DeviceTracker> {
        let mut conn = self.dial(Instant::now() + SHORT_COMMAND_TIMEOUT)?;
        conn.send_message(TRACK_REQUEST.as_bytes())?;
        conn.read_status(TRACK_REQUEST)?;
        // Snapshots arrive whenever the next state change happens.
        conn.set_deadline(None)?;
        let token = conn.stream().cancel_token()?;
        debug!("device tracking started");

        let (tx, rx) = mpsc::channel();
        let reader = std::thread::spawn(move || {
            loop {
                match conn.read_message(TRACK_REQUEST) {
                    Ok(payload) => {
                        trace!(len = payload.len(), "device snapshot");
                        let snapshot = String::from_utf8_lossy(&payload).into_owned();
                        if tx.send(Ok(snapshot)).is_err() {
                            break;
                        }
                    }
                    Err(Error::Canceled) => break,
                    Err(e) => {
                        let _ = tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        Ok(DeviceTracker {
            rx,
            token,
            reader: Some(reader),
        })
    }
}

/// A stream of raw device-list snapshots from `host:track-devices`.
///
/// Each snapshot is the complete payload the server framed: `serial\tstate`
/// lines, parseable with the same parser as `host:devices`.
pub struct DeviceTracker {
    rx: mpsc::Receiver<Result<String>>,
    token: CancelToken,
    reader: Option<JoinHandle<()>>,
}

impl DeviceTracker {
    /// Blocks until the next snapshot.
    ///
    /// Returns `None` once the connection is gone (closed, canceled, or the
    /// server died — the final `Err` carries the reason before that).
    pub fn next_snapshot(&self) -> Option<Result<String>> {
        self.rx.recv().ok()
    }

    /// Returns a snapshot only if one is already queued.
    pub fn try_next_snapshot(&self) -> Option<Result<String>> {
        self.rx.try_recv().ok()
    }

    /// Tears the connection down and joins the reader thread.
    pub fn close(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        self.token.cancel();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl Drop for DeviceTracker {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{DeviceState, parse_device_list_short};
    use crate::testutil::{self, fake_server};

    #[test]
    fn tracker_streams_snapshots() {
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            assert_eq!(testutil::read_request(&mut stream), "host:track-devices");
            testutil::write_okay(&mut stream);
            testutil::write_message(&mut stream, b"");
            testutil::write_message(&mut stream, b"emulator-5554\tdevice\n");
        });

        let tracker = client.track_devices().unwrap();
        assert_eq!(tracker.next_snapshot().unwrap().unwrap(), "");

        let snapshot = tracker.next_snapshot().unwrap().unwrap();
        let devices = parse_device_list_short(&snapshot).unwrap();
        assert_eq!(devices[0].serial, "emulator-5554");
        assert_eq!(devices[0].state, DeviceState::Online);

        server.join().unwrap();
        tracker.close();
    }

    #[test]
    fn tracker_close_is_clean_while_server_still_streams() {
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            testutil::read_request(&mut stream);
            testutil::write_okay(&mut stream);
            testutil::write_message(&mut stream, b"serial\tdevice\n");
            // Keep the connection open until the client hangs up.
            let mut buf = [0u8; 1];
            use std::io::Read;
            let _ = stream.read(&mut buf);
        });

        let tracker = client.track_devices().unwrap();
        assert!(tracker.next_snapshot().is_some());
        tracker.close();
        server.join().unwrap();
    }
}
