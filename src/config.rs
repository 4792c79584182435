//! Tunables for the storage stack.
//!
//! Timing values are the settle delays and polling budgets the ATA protocol
//! needs on real hardware. Emulators tolerate much smaller values, but the
//! delays must never be zero: a command issued before the drive-select or
//! reset has settled fails intermittently on physical disks.

use crate::fs::fat::FatTimestamp;

/// Number of logical drives exposed as `"0:"`..`"3:"`.
pub const MAX_LOGICAL_DRIVES: usize = 4;

/// Default bound on canonical path length, including the `"n:"` prefix.
pub const DEFAULT_MAX_PATH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtaTiming {
    /// Wait after writing the drive/head register, before the next command.
    pub select_settle_us: u32,
    /// Wait after toggling SRST in the device control register.
    pub reset_settle_us: u32,
    /// Status reads allowed while waiting for BSY to clear.
    pub busy_poll_budget: u32,
    /// Status reads allowed while waiting for DRQ.
    pub drq_poll_budget: u32,
}

impl Default for AtaTiming {
    fn default() -> Self {
        Self {
            select_settle_us: 400,
            reset_settle_us: 2_000,
            busy_poll_budget: 100_000,
            drq_poll_budget: 100_000,
        }
    }
}

impl AtaTiming {
    /// Smallest values that still honour the settle/poll contract. Useful
    /// under QEMU/Bochs where register writes take effect immediately.
    pub const fn emulated() -> Self {
        Self {
            select_settle_us: 1,
            reset_settle_us: 5,
            busy_poll_budget: 10_000,
            drq_poll_budget: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StorageConfig {
    pub timing: AtaTiming,
    /// Canonical paths longer than this fail with `InvalidPath`.
    pub max_path_len: usize,
    /// Buffer size used by `copy`.
    pub copy_chunk: usize,
    /// Entries shown per page by the `ls` command.
    pub list_page_size: usize,
    /// Timestamp source for directory entries.
    pub clock: fn() -> FatTimestamp,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timing: AtaTiming::default(),
            max_path_len: DEFAULT_MAX_PATH,
            copy_chunk: 512,
            list_page_size: 20,
            clock: FatTimestamp::epoch,
        }
    }
}
