//! The host-mode client: queries against the adb server itself.

use std::time::{Duration, Instant};

use radb_wire::{Conn, Error, Result, TcpWire};
use tracing::debug;

use crate::device::Device;
use crate::features::FeatureSet;
use crate::info::{self, DeviceInfo, ForwardEntry};
use crate::selector::DeviceSelector;

/// Default address of the adb host server.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Default port the adb host server listens on.
pub const DEFAULT_PORT: u16 = 5037;

/// Deadline for state queries and other small getters.
pub const SHORT_COMMAND_TIMEOUT: Duration = Duration::from_secs(2);
/// Deadline for shell output collection and other long commands.
pub const LONG_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// `host:connect` may block on DNS and a remote TCP handshake.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A client of the adb host server.
///
/// Cheap to create and to clone; holds no connection. Every operation
/// dials its own short-lived socket, which is what the official client
/// does too — the server closes most connections after one response.
///
/// ```no_run
/// use radb::{Client, DeviceSelector};
///
/// # fn main() -> radb::Result<()> {
/// let client = Client::new();
/// println!("server version {}", client.server_version()?);
///
/// let device = client.device(DeviceSelector::Any);
/// let output = device.shell_output("getprop", &["ro.product.model"])?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    addr: String,
}

impl Default for Client {
    fn default() -> Self {
        Self::new()
    }
}

impl Client {
    /// A client for the default server address, `127.0.0.1:5037`.
    pub fn new() -> Self {
        Self::with_addr(DEFAULT_HOST, DEFAULT_PORT)
    }

    /// A client for a server listening elsewhere.
    pub fn with_addr(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }

    /// The `host:port` this client dials.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Builds a handle for device-scoped operations.
    pub fn device(&self, selector: DeviceSelector) -> Device {
        Device::new(self.clone(), selector)
    }

    /// Asks the server for its internal version number via `host:version`.
    pub fn server_version(&self) -> Result<u32> {
        let resp = self.round_trip("host:version", SHORT_COMMAND_TIMEOUT)?;
        let text = String::from_utf8_lossy(&resp);
        u32::from_str_radix(&text, 16)
            .map_err(|_| Error::Parse(format!("bad server version: {text}")))
    }

    /// The features supported by the server itself, via
    /// `host:host-features`.
    pub fn host_features(&self) -> Result<FeatureSet> {
        let resp = self.round_trip("host:host-features", SHORT_COMMAND_TIMEOUT)?;
        Ok(FeatureSet::parse(&String::from_utf8_lossy(&resp)))
    }

    /// The short device list (`host:devices`): serial and state only.
    pub fn list_devices_short(&self) -> Result<Vec<DeviceInfo>> {
        let resp = self.round_trip("host:devices", SHORT_COMMAND_TIMEOUT)?;
        info::parse_device_list_short(&String::from_utf8_lossy(&resp))
    }

    /// The long device list (`host:devices-l`), attributes included.
    pub fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let resp = self.round_trip("host:devices-l", SHORT_COMMAND_TIMEOUT)?;
        info::parse_device_list_long(&String::from_utf8_lossy(&resp))
    }

    /// Asks the server to connect to a device over TCP/IP
    /// (`host:connect:<addr>`).
    pub fn connect(&self, device_addr: &str) -> Result<()> {
        self.round_trip(&format!("host:connect:{device_addr}"), CONNECT_TIMEOUT)?;
        Ok(())
    }

    /// Drops one TCP/IP device (`host:disconnect:<addr>`).
    pub fn disconnect(&self, device_addr: &str) -> Result<()> {
        self.round_trip(
            &format!("host:disconnect:{device_addr}"),
            SHORT_COMMAND_TIMEOUT,
        )?;
        Ok(())
    }

    /// Drops every TCP/IP device (`host:disconnect:`).
    pub fn disconnect_all(&self) -> Result<()> {
        self.round_trip("host:disconnect:", SHORT_COMMAND_TIMEOUT)?;
        Ok(())
    }

    /// Lists the server's port forwards via `host:list-forward`.
    pub fn list_forward(&self) -> Result<Vec<ForwardEntry>> {
        let resp = self.round_trip("host:list-forward", SHORT_COMMAND_TIMEOUT)?;
        info::parse_forward_list(&String::from_utf8_lossy(&resp))
    }

    /// Tells the server to quit immediately (`host:kill`).
    ///
    /// Fire-and-forget: the server exits without replying.
    pub fn kill_server(&self) -> Result<()> {
        let deadline = Instant::now() + SHORT_COMMAND_TIMEOUT;
        let mut conn = self.dial(deadline)?;
        conn.send_message(b"host:kill")
    }

    /// Removes every forward via `host:killforward-all`.
    ///
    /// This command acknowledges twice — one `OKAY` for accepting the
    /// request and a second for the operation — so both statuses are
    /// consumed here rather than going through the one-message helper.
    pub fn kill_forward_all(&self) -> Result<()> {
        let request = "host:killforward-all";
        let deadline = Instant::now() + SHORT_COMMAND_TIMEOUT;
        let mut conn = self.dial(deadline)?;
        conn.send_message(request.as_bytes())?;
        conn.read_status(request)?;
        conn.read_status(request)
    }

    /// Dials a fresh framed connection with the given whole-operation
    /// deadline armed.
    pub(crate) fn dial(&self, deadline: Instant) -> Result<Conn<TcpWire>> {
        // connect_timeout rejects a zero duration.
        let remaining = deadline
            .saturating_duration_since(Instant::now())
            .max(Duration::from_millis(1));
        let stream = TcpWire::dial(&self.addr, remaining)?;
        let mut conn = Conn::new(stream);
        conn.set_deadline(Some(deadline))?;
        Ok(conn)
    }

    /// One-shot host query: dial, send, read status and a single payload.
    pub(crate) fn round_trip(&self, request: &str, timeout: Duration) -> Result<Vec<u8>> {
        debug!(%request, "host query");
        let mut conn = self.dial(Instant::now() + timeout)?;
        conn.round_trip_single_response(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::DeviceState;
    use crate::testutil::{self, fake_server};

    #[test]
    fn server_version_parses_hex_payload() {
        // Request `000chost:version`, response `OKAY` + `0004` + `0030`.
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            assert_eq!(testutil::read_request(&mut stream), "host:version");
            testutil::write_raw(&mut stream, b"OKAY00040030");
        });

        assert_eq!(client.server_version().unwrap(), 0x30);
        server.join().unwrap();
    }

    #[test]
    fn server_not_available_when_nothing_listens() {
        // Dial a port that was just released.
        let client = testutil::client_for_dead_port();
        assert!(matches!(
            client.server_version(),
            Err(Error::ServerNotAvailable { .. })
        ));
    }

    #[test]
    fn list_devices_parses_long_form() {
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            assert_eq!(testutil::read_request(&mut stream), "host:devices-l");
            testutil::write_okay(&mut stream);
            testutil::write_message(
                &mut stream,
                b"emulator-5554 device product:sdk model:Android SDK device:generic transport_id:1\n",
            );
        });

        let devices = client.list_devices().unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].model.as_deref(), Some("Android SDK"));
        assert_eq!(devices[0].state, DeviceState::Online);
        server.join().unwrap();
    }

    #[test]
    fn kill_forward_all_consumes_both_statuses() {
        // The server answers `OKAYOKAY` back to back.
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            assert_eq!(testutil::read_request(&mut stream), "host:killforward-all");
            testutil::write_raw(&mut stream, b"OKAYOKAY");
        });

        client.kill_forward_all().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn kill_server_sends_without_waiting_for_a_reply() {
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            assert_eq!(testutil::read_request(&mut stream), "host:kill");
            // Server exits without replying.
        });

        client.kill_server().unwrap();
        server.join().unwrap();
    }

    #[test]
    fn host_query_fail_surfaces_server_message() {
        let (client, server) = fake_server(|listener| {
            let mut stream = testutil::accept(&listener);
            testutil::read_request(&mut stream);
            testutil::write_fail(&mut stream, "unknown host service");
        });

        match client.host_features() {
            Err(Error::Adb { request, message }) => {
                assert_eq!(request, "host:host-features");
                assert_eq!(message, "unknown host service");
            }
            other => panic!("expected Adb error, got {other:?}"),
        }
        server.join().unwrap();
    }
}
