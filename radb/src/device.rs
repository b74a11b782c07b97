//! Device handles: transport switches and device-scoped operations.

use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use radb_wire::{CancelToken, Conn, Error, Result, TcpWire, WireStream};
use tracing::debug;

use crate::client::{Client, LONG_COMMAND_TIMEOUT, SHORT_COMMAND_TIMEOUT};
use crate::features::FeatureSet;
use crate::info::{DeviceInfo, DeviceState};
use crate::selector::DeviceSelector;

/// Operations against one device.
///
/// Built with [`Client::device`]. Like the client, a `Device` holds no
/// connection of its own; every operation dials, runs the transport
/// switch, and hands the bound socket to the requested service.
#[derive(Debug, Clone)]
pub struct Device {
    client: Client,
    selector: DeviceSelector,
    timeout_short: Duration,
    timeout_long: Duration,
}

impl Device {
    pub(crate) fn new(client: Client, selector: DeviceSelector) -> Self {
        Self {
            client,
            selector,
            timeout_short: SHORT_COMMAND_TIMEOUT,
            timeout_long: LONG_COMMAND_TIMEOUT,
        }
    }

    /// The selector this handle targets.
    pub fn selector(&self) -> &DeviceSelector {
        &self.selector
    }

    /// Overrides the default 2 s / 30 s command deadlines.
    pub fn set_command_timeouts(&mut self, short: Duration, long: Duration) {
        self.timeout_short = short;
        self.timeout_long = long;
    }

    pub(crate) fn timeout_long(&self) -> Duration {
        self.timeout_long
    }

    /// The device serial number, via `<host-prefix>:get-serialno`.
    pub fn serial(&self) -> Result<String> {
        self.attribute("get-serialno")
    }

    /// The device path, via `<host-prefix>:get-devpath`.
    pub fn device_path(&self) -> Result<String> {
        self.attribute("get-devpath")
    }

    /// The device state, via `<host-prefix>:get-state`.
    ///
    /// An unauthorized device makes the server reject the query; that
    /// rejection is folded back into [`DeviceState::Unauthorized`].
    pub fn state(&self) -> Result<DeviceState> {
        match self.attribute("get-state") {
            Ok(attr) => attr.parse(),
            Err(Error::Adb { message, .. }) if message.contains("unauthorized") => {
                Ok(DeviceState::Unauthorized)
            }
            Err(e) => Err(e),
        }
    }

    /// The features this device's daemon advertises, via
    /// `<host-prefix>:features`.
    pub fn features(&self) -> Result<FeatureSet> {
        Ok(FeatureSet::parse(&self.attribute("features")?))
    }

    /// The device's entry in the long device list.
    ///
    /// The server has no per-device info query, so this lists all devices
    /// and finds our own serial.
    pub fn info(&self) -> Result<DeviceInfo> {
        let serial = self.serial()?;
        let devices = self.client.list_devices()?;
        devices
            .into_iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| Error::DeviceNotFound {
                request: "host:devices-l".to_owned(),
                message: format!("device list doesn't contain serial {serial}"),
            })
    }

    /// Asks adbd to remount the device's filesystem read-write; returns
    /// the daemon's textual reply.
    pub fn remount(&self) -> Result<String> {
        let deadline = Instant::now() + self.timeout_long;
        let mut conn = self.dial_transport(deadline)?;
        let reply = conn.round_trip_single_response("remount")?;
        Ok(String::from_utf8_lossy(&reply).into_owned())
    }

    /// Opens a raw full-duplex pipe to a device-side endpoint.
    ///
    /// `target` is one of `tcp:<port>`, `localabstract:<name>`,
    /// `localreserved:<name>`, `localfilesystem:<name>`, `dev:<node>`,
    /// `jdwp:<pid>`, `vsock:<cid>:<port>`. After the acknowledgment this
    /// library imposes no further framing; the returned stream is plain
    /// bytes both ways.
    pub fn open_transport(&self, target: &str) -> Result<DeviceSocket> {
        let deadline = Instant::now() + self.timeout_short;
        let mut conn = self.dial_transport(deadline)?;
        conn.send_message(target.as_bytes())?;
        conn.read_status(target)?;
        debug!(device = %self.selector, %target, "opened device pipe");

        let mut stream = conn.into_stream();
        // The pipe outlives the setup deadline; the caller owns pacing now.
        stream.set_deadline(None)?;
        Ok(DeviceSocket { stream })
    }

    /// [`open_transport`](Self::open_transport) for `tcp:<port>`.
    pub fn forward_port(&self, port: u16) -> Result<DeviceSocket> {
        self.open_transport(&format!("tcp:{port}"))
    }

    /// [`open_transport`](Self::open_transport) for `localabstract:<name>`.
    pub fn forward_abstract(&self, name: &str) -> Result<DeviceSocket> {
        self.open_transport(&format!("localabstract:{name}"))
    }

    /// One device-scoped host query via `<host-prefix>:<attr>`.
    fn attribute(&self, attr: &str) -> Result<String> {
        let request = format!("{}:{attr}", self.selector.host_prefix());
        let resp = self.client.round_trip(&request, self.timeout_short)?;
        Ok(String::from_utf8_lossy(&resp).into_owned())
    }

    /// Dials a fresh connection and binds it to this device's transport.
    ///
    /// After the `OKAY` the socket has permanently left framed mode: the
    /// next message must be a service request, whose reply framing belongs
    /// to that service.
    pub(crate) fn dial_transport(&self, deadline: Instant) -> Result<Conn<TcpWire>> {
        let mut conn = self.client.dial(deadline)?;
        let request = self.selector.transport_request();
        conn.send_message(request.as_bytes())?;
        conn.read_status(&request)?;
        debug!(device = %self.selector, "transport bound");
        Ok(conn)
    }
}

/// A raw byte pipe to a device-side endpoint (or a shell stream).
///
/// Reads return what the device writes until the peer closes; writes go
/// to the device unframed. Dropping the socket closes it.
#[derive(Debug)]
pub struct DeviceSocket {
    stream: TcpWire,
}

impl DeviceSocket {
    /// Arms (or clears) a read/write deadline on the pipe.
    pub fn set_deadline(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.stream.set_deadline(deadline)
    }

    /// A handle that cancels in-flight reads and writes from another
    /// thread by tearing the socket down.
    pub fn cancel_token(&self) -> Result<CancelToken> {
        self.stream.cancel_token()
    }

    /// Tears the pipe down. Idempotent.
    pub fn shutdown(&mut self) {
        self.stream.shutdown();
    }

    /// Drains the pipe to EOF, returning everything the device wrote.
    pub fn read_to_end_vec(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        match self.stream.read_to_end(&mut out) {
            Ok(_) if self.stream.is_canceled() => Err(Error::Canceled),
            Ok(_) => Ok(out),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
                Err(Error::Timeout {
                    request: "read device pipe".to_owned(),
                })
            }
            Err(e) => Err(Error::Network {
                request: "read device pipe".to_owned(),
                source: e,
            }),
        }
    }

    pub(crate) fn new(stream: TcpWire) -> Self {
        Self { stream }
    }
}

impl Read for DeviceSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for DeviceSocket {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stream.flush()
    }
}
