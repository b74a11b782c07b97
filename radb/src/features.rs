//! Feature sets negotiated with the server and its devices.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// `shell,v2:` with typed stdout/stderr chunks and in-band exit codes.
pub const SHELL_V2: &str = "shell_v2";
/// `cmd` is available on the device.
pub const CMD: &str = "cmd";
pub const STAT_V2: &str = "stat_v2";
pub const LS_V2: &str = "ls_v2";
pub const LIBUSB: &str = "libusb";
pub const PUSH_SYNC: &str = "push_sync";
pub const APEX: &str = "apex";
pub const FIXED_PUSH_MKDIR: &str = "fixed_push_mkdir";
pub const ABB: &str = "abb";
pub const FIXED_PUSH_SYMLINK_TIMESTAMP: &str = "fixed_push_symlink_timestamp";
pub const ABB_EXEC: &str = "abb_exec";
pub const REMOUNT_SHELL: &str = "remount_shell";
pub const SENDRECV_V2_ZSTD: &str = "sendrecv_v2_zstd";

/// A read-only set of feature strings, as negotiated per device
/// (`<host-prefix>:features`) or for the server itself
/// (`host:host-features`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSet(BTreeSet<String>);

impl FeatureSet {
    /// Parses the comma-separated wire form.
    pub fn parse(payload: &str) -> Self {
        Self(
            payload
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    /// True if `feature` was advertised.
    pub fn contains(&self, feature: &str) -> bool {
        self.0.contains(feature)
    }

    /// True if the device supports the shell-v2 protocol.
    pub fn supports_shell_v2(&self) -> bool {
        self.contains(SHELL_V2)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for FeatureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for feature in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            f.write_str(feature)?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_comma_separated_payload() {
        let features = FeatureSet::parse("shell_v2,cmd,stat_v2,ls_v2,fixed_push_mkdir");
        assert_eq!(features.len(), 5);
        assert!(features.supports_shell_v2());
        assert!(features.contains(CMD));
        assert!(!features.contains(ABB));
    }

    #[test]
    fn empty_payload_is_empty_set() {
        assert!(FeatureSet::parse("").is_empty());
        assert!(FeatureSet::parse(",,").is_empty());
    }
}
