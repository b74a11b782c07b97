//! Device selection for host-scoped queries and transport switches.

use std::fmt;

/// Selects which device a host-scoped query or a transport switch targets.
///
/// The selector determines two request spellings: the `host-*` prefix used
/// for device-scoped host queries (`get-serialno`, `get-state`, `features`,
/// …) and the `host:transport-*` request used to bind a connection to the
/// device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    /// The single connected device, whatever its transport.
    Any,
    /// The single device connected over USB.
    AnyUsb,
    /// The single device connected over TCP (an emulator, usually).
    AnyLocal,
    /// The device with this serial number.
    Serial(String),
    /// The device with this server-assigned transport id.
    TransportId(u32),
}

impl DeviceSelector {
    /// Convenience constructor for [`DeviceSelector::Serial`].
    pub fn serial(serial: impl Into<String>) -> Self {
        DeviceSelector::Serial(serial.into())
    }

    /// The prefix for device-scoped host queries, without the trailing
    /// attribute name.
    pub(crate) fn host_prefix(&self) -> String {
        match self {
            DeviceSelector::Any => "host".to_owned(),
            DeviceSelector::AnyUsb => "host-usb".to_owned(),
            DeviceSelector::AnyLocal => "host-local".to_owned(),
            DeviceSelector::Serial(serial) => format!("host-serial:{serial}"),
            DeviceSelector::TransportId(id) => format!("host-transport-id:{id}"),
        }
    }

    /// The request that switches a fresh connection to this device's
    /// transport.
    pub(crate) fn transport_request(&self) -> String {
        match self {
            DeviceSelector::Any => "host:transport-any".to_owned(),
            DeviceSelector::AnyUsb => "host:transport-usb".to_owned(),
            DeviceSelector::AnyLocal => "host:transport-local".to_owned(),
            DeviceSelector::Serial(serial) => format!("host:transport:{serial}"),
            DeviceSelector::TransportId(id) => format!("host:transport-id:{id}"),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::Any => f.write_str("any"),
            DeviceSelector::AnyUsb => f.write_str("usb"),
            DeviceSelector::AnyLocal => f.write_str("local"),
            DeviceSelector::Serial(serial) => f.write_str(serial),
            DeviceSelector::TransportId(id) => write!(f, "transport-id:{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_prefixes() {
        assert_eq!(DeviceSelector::Any.host_prefix(), "host");
        assert_eq!(DeviceSelector::AnyUsb.host_prefix(), "host-usb");
        assert_eq!(DeviceSelector::AnyLocal.host_prefix(), "host-local");
        assert_eq!(
            DeviceSelector::serial("emulator-5554").host_prefix(),
            "host-serial:emulator-5554"
        );
        assert_eq!(
            DeviceSelector::TransportId(3).host_prefix(),
            "host-transport-id:3"
        );
    }

    #[test]
    fn transport_requests() {
        assert_eq!(DeviceSelector::Any.transport_request(), "host:transport-any");
        assert_eq!(DeviceSelector::AnyUsb.transport_request(), "host:transport-usb");
        assert_eq!(
            DeviceSelector::AnyLocal.transport_request(),
            "host:transport-local"
        );
        assert_eq!(
            DeviceSelector::serial("ABCDEF0123456789").transport_request(),
            "host:transport:ABCDEF0123456789"
        );
        assert_eq!(
            DeviceSelector::TransportId(7).transport_request(),
            "host:transport-id:7"
        );
    }
}
