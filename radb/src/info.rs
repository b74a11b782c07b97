//! Device and forward listings: types and line parsers.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use radb_wire::{Error, Result};
use serde::{Deserialize, Serialize};

/// The states the server reports devices in.
///
/// Only [`DeviceState::Online`] devices accept transports. A USB device
/// typically transitions `Disconnected → Offline → Online` when plugged in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceState {
    Offline,
    /// Reported as `device`: the device is online and usable.
    Online,
    Unauthorized,
    Authorizing,
    Disconnected,
    Host,
    Invalid,
}

impl FromStr for DeviceState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "" => Ok(DeviceState::Disconnected),
            "offline" => Ok(DeviceState::Offline),
            "device" => Ok(DeviceState::Online),
            "unauthorized" => Ok(DeviceState::Unauthorized),
            "authorizing" => Ok(DeviceState::Authorizing),
            "host" => Ok(DeviceState::Host),
            other => Err(Error::Parse(format!("invalid device state: {other}"))),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DeviceState::Offline => "offline",
            DeviceState::Online => "device",
            DeviceState::Unauthorized => "unauthorized",
            DeviceState::Authorizing => "authorizing",
            DeviceState::Disconnected => "disconnected",
            DeviceState::Host => "host",
            DeviceState::Invalid => "invalid",
        })
    }
}

/// One device as reported by `host:devices` or `host:devices-l`.
///
/// The attribute fields are only populated by the long form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Always set.
    pub serial: String,
    pub state: DeviceState,
    pub product: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
    /// Only set for devices connected via USB.
    pub usb: Option<String>,
    pub transport_id: Option<u32>,
}

impl DeviceInfo {
    /// True if the device is connected via USB.
    pub fn is_usb(&self) -> bool {
        self.usb.is_some()
    }

    fn from_attrs(serial: &str, state: DeviceState, mut attrs: HashMap<&str, String>) -> Result<Self> {
        if serial.is_empty() {
            return Err(Error::Assertion("device serial cannot be blank".to_owned()));
        }
        let transport_id = attrs
            .remove("transport_id")
            .and_then(|v| v.parse().ok());
        Ok(DeviceInfo {
            serial: serial.to_owned(),
            state,
            product: attrs.remove("product"),
            model: attrs.remove("model"),
            device: attrs.remove("device"),
            usb: attrs.remove("usb"),
            transport_id,
        })
    }
}

/// One entry of `host:list-forward`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardEntry {
    pub serial: String,
    pub local: String,
    pub remote: String,
}

/// Parses the payload of `host:devices`: one `<serial>\t<state>` per line.
pub(crate) fn parse_device_list_short(payload: &str) -> Result<Vec<DeviceInfo>> {
    payload
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_short_line)
        .collect()
}

/// Parses the payload of `host:devices-l`.
pub(crate) fn parse_device_list_long(payload: &str) -> Result<Vec<DeviceInfo>> {
    payload
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_long_line)
        .collect()
}

fn parse_short_line(line: &str) -> Result<DeviceInfo> {
    let mut fields = line.split_whitespace();
    let (Some(serial), Some(state), None) = (fields.next(), fields.next(), fields.next()) else {
        return Err(Error::Parse(format!(
            "malformed device line, expected 2 fields: {line}"
        )));
    };
    DeviceInfo::from_attrs(serial, state.parse()?, HashMap::new())
}

/// Parses one `devices-l` line:
///
/// ```text
/// <serial>  <state>  key1:value1 key2:value2 …
/// ```
///
/// Attribute values may contain internal whitespace (`model:ALP AL00`), so
/// a value runs up to the last space before the next `key:` candidate.
fn parse_long_line(line: &str) -> Result<DeviceInfo> {
    let invalid = || Error::Parse(format!("invalid devices-l line: {line}"));
    let line = line.trim();

    let (serial, rest) = split_token(line).ok_or_else(invalid)?;
    let (state, rest) = split_token(rest).ok_or_else(invalid)?;

    let mut attrs = HashMap::new();
    if !rest.is_empty() {
        let mut rest = rest;
        let Some(colon) = rest.find(':') else {
            return Err(invalid());
        };
        let mut key = &rest[..colon];
        rest = &rest[colon + 1..];
        loop {
            match rest.find(':') {
                None => {
                    attrs.insert(key, rest.trim_end().to_owned());
                    break;
                }
                Some(next_colon) => {
                    let segment = &rest[..next_colon];
                    let space = segment.rfind(' ').ok_or_else(invalid)?;
                    attrs.insert(key, segment[..space].trim_end().to_owned());
                    key = &segment[space + 1..];
                    rest = &rest[next_colon + 1..];
                }
            }
        }
    }

    DeviceInfo::from_attrs(serial, state.parse()?, attrs)
}

/// Splits off the first whitespace-delimited token, returning it and the
/// remainder with leading whitespace stripped.
fn split_token(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    match s.find(char::is_whitespace) {
        Some(end) => Some((&s[..end], s[end..].trim_start())),
        None => Some((s, "")),
    }
}

/// Parses the payload of `host:list-forward`: `serial local remote` lines.
pub(crate) fn parse_forward_list(payload: &str) -> Result<Vec<ForwardEntry>> {
    payload
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            let mut fields = line.split_whitespace();
            let (Some(serial), Some(local), Some(remote)) =
                (fields.next(), fields.next(), fields.next())
            else {
                return Err(Error::Parse(format!(
                    "malformed forward line, expected 3 fields: {line}"
                )));
            };
            Ok(ForwardEntry {
                serial: serial.to_owned(),
                local: local.to_owned(),
                remote: remote.to_owned(),
            })
        })
        .collect()
}
