//! Types shared by the FAT engine, the facade and the shell.

use crate::fs::fat::FatTimestamp;
use alloc::string::String;
use bitflags::bitflags;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
}

/// Result of an existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Existence {
    None,
    File,
    Directory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub kind: FileType,
    pub size: u32,
    pub modified: FatTimestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub kind: FileType,
    pub size: u32,
    pub modified: FatTimestamp,
}

impl DirEntry {
    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }
}

/// One node of a depth-first listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Drive-qualified path, e.g. `"0:/docs/a.txt"`.
    pub path: String,
    /// 0 for direct children of the listed directory.
    pub depth: usize,
    pub kind: FileType,
    pub size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl DiskUsage {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes - self.free_bytes
    }
}

/// Returned by paged-listing callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageControl {
    Continue,
    Stop,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u8 {
        const READ      = 0x01;
        const WRITE     = 0x02;
        /// Create the file if missing. Requires `WRITE`.
        const CREATE    = 0x04;
        /// Cut an existing file to zero length. Requires `WRITE`.
        const TRUNCATE  = 0x08;
        /// With `CREATE`: fail if the file already exists.
        const EXCLUSIVE = 0x10;

        const CREATE_ALWAYS = Self::WRITE.bits() | Self::CREATE.bits() | Self::TRUNCATE.bits();
        const OPEN_APPEND   = Self::WRITE.bits() | Self::CREATE.bits();
    }
}
