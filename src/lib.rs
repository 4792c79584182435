//! Disk storage for SarOS: an ATA PIO driver, FAT16/FAT32 volumes on up to
//! four logical drives, path-based file operations and the shell commands
//! built on them.
//!
//! Everything hangs off a [`StorageManager`] owned by the kernel. The port
//! I/O backend is a type parameter so the whole stack runs against an
//! emulated bus in tests.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod config;
pub mod drivers;
pub mod error;
pub mod fs;
pub mod shell;
pub mod sync;

#[cfg(test)]
mod testing;

pub use config::{AtaTiming, StorageConfig};
pub use error::{Error, Result};
pub use fs::fat::{FatTimestamp, FatType, FormatOptions};
pub use fs::{DriveInfo, StorageManager};
pub use shell::{Console, Shell};
