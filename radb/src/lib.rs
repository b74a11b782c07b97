//! Client library for the Android Debug Bridge host server.
//!
//! Speaks the adb host protocol over TCP to a local adb server (typically
//! `127.0.0.1:5037`): device discovery and tracking, per-device
//! transports, shell execution, socket forwarding, and file sync.
//!
//! # Quick start
//!
//! ```no_run
//! use radb::{Client, DeviceSelector};
//!
//! # fn main() -> radb::Result<()> {
//! let client = Client::new();
//! for device in client.list_devices()? {
//!     println!("{} ({})", device.serial, device.state);
//! }
//!
//! let device = client.device(DeviceSelector::Any);
//! let output = device.shell_output("ls", &["/sdcard"])?;
//!
//! let mut sync = device.sync()?;
//! sync.push("local.txt".as_ref(), "/data/local/tmp/remote.txt")?;
//! # Ok(())
//! # }
//! ```
//!
//! The wire protocol engine itself (framing, the sync codec, shell-v2
//! chunking, the error taxonomy) lives in the `radb-wire` crate; its
//! public types are re-exported here.

mod client;
mod device;
pub mod features;
mod info;
mod selector;
mod shell;
mod sync;
#[cfg(test)]
mod testutil;
mod tracker;

pub use client::{
    Client, DEFAULT_HOST, DEFAULT_PORT, LONG_COMMAND_TIMEOUT, SHORT_COMMAND_TIMEOUT,
};
pub use device::{Device, DeviceSocket};
pub use features::FeatureSet;
pub use info::{DeviceInfo, DeviceState, ForwardEntry};
pub use selector::DeviceSelector;
pub use shell::ShellOutput;
pub use sync::{DirEntries, FileReader, FileService, FileWriter};
pub use tracker::DeviceTracker;

pub use radb_wire::{
    CancelToken, Error, FileMode, FileType, RemoteDirEntry, Result, ShellChunk, ShellChunkKind,
    ShellV2Reader,
};
