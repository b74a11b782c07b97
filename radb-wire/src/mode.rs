//! POSIX file modes as sent by the adb daemon.

use std::fmt;

use serde::{Deserialize, Serialize};

const S_IFMT: u32 = 0o170000;
const S_IFSOCK: u32 = 0o140000;
const S_IFLNK: u32 = 0o120000;
const S_IFREG: u32 = 0o100000;
const S_IFBLK: u32 = 0o060000;
const S_IFDIR: u32 = 0o040000;
const S_IFCHR: u32 = 0o020000;
const S_IFIFO: u32 = 0o010000;

/// A raw `st_mode` from the device, with both the type bits and the
/// permission bits preserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMode(u32);

impl FileMode {
    /// Wraps a raw `st_mode` value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw `st_mode` as sent on the wire.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The permission bits (the low 9).
    pub const fn permissions(self) -> u32 {
        self.0 & 0o777
    }

    /// The file type encoded in the `S_IFMT` bits.
    pub const fn file_type(self) -> FileType {
        match self.0 & S_IFMT {
            S_IFREG => FileType::Regular,
            S_IFDIR => FileType::Directory,
            S_IFLNK => FileType::Symlink,
            S_IFIFO => FileType::Fifo,
            S_IFSOCK => FileType::Socket,
            S_IFCHR => FileType::CharDevice,
            S_IFBLK => FileType::BlockDevice,
            _ => FileType::Unknown,
        }
    }

    /// True for directories.
    pub const fn is_dir(self) -> bool {
        matches!(self.file_type(), FileType::Directory)
    }

    /// True for regular files.
    pub const fn is_regular(self) -> bool {
        matches!(self.file_type(), FileType::Regular)
    }

    /// True for symbolic links.
    pub const fn is_symlink(self) -> bool {
        matches!(self.file_type(), FileType::Symlink)
    }
}

impl From<u32> for FileMode {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl fmt::Display for FileMode {
    /// Renders the `ls -l` style mode string, e.g. `drwxr-xr-x`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let type_char = match self.file_type() {
            FileType::Regular => '-',
            FileType::Directory => 'd',
            FileType::Symlink => 'l',
            FileType::Fifo => 'p',
            FileType::Socket => 's',
            FileType::CharDevice => 'c',
            FileType::BlockDevice => 'b',
            FileType::Unknown => '?',
        };
        write!(f, "{type_char}")?;
        for shift in [6u32, 3, 0] {
            let bits = (self.0 >> shift) & 0o7;
            write!(
                f,
                "{}{}{}",
                if bits & 0o4 != 0 { 'r' } else { '-' },
                if bits & 0o2 != 0 { 'w' } else { '-' },
                if bits & 0o1 != 0 { 'x' } else { '-' },
            )?;
        }
        Ok(())
    }
}

/// The file type half of an `st_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    Fifo,
    Socket,
    CharDevice,
    BlockDevice,
    Unknown,
}
