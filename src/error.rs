use core::fmt;

use crate::drivers::ide::DiskError;

/// Failure of a storage operation, as seen above the physical driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Physical slot absent, or logical drive has no mounted volume.
    NotReady,
    /// Logical drive index is out of range or not mapped to a disk.
    NotInitialized,
    /// A hardware polling budget ran out.
    Timeout,
    /// The device reported an error, or a transfer came up short.
    Io,
    NotFound,
    AlreadyExists,
    NoSpace,
    /// Malformed, over-length, or unrepresentable path.
    InvalidPath,
    InvalidArgument,
    /// A destructive operation was requested without confirmation.
    NotConfirmed,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    /// The disk does not hold a FAT16/FAT32 volume.
    NoFilesystem,
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    /// Errno-style code for a syscall boundary.
    pub fn as_neg_i64(self) -> i64 {
        let errno = match self {
            Error::NotFound => 2,
            Error::Io => 5,
            Error::NotInitialized => 6,
            Error::AlreadyExists => 17,
            Error::NotADirectory => 20,
            Error::IsADirectory => 21,
            Error::InvalidArgument => 22,
            Error::NoSpace => 28,
            Error::InvalidPath => 36,
            Error::DirectoryNotEmpty => 39,
            Error::NoFilesystem => 43,
            Error::NotReady => 123,
            Error::NotConfirmed => 125,
            Error::Timeout => 110,
        };
        -errno
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Error::NotReady => "drive not ready",
            Error::NotInitialized => "drive not initialized",
            Error::Timeout => "device timeout",
            Error::Io => "I/O error",
            Error::NotFound => "no such file or directory",
            Error::AlreadyExists => "already exists",
            Error::NoSpace => "no space left on drive",
            Error::InvalidPath => "invalid path",
            Error::InvalidArgument => "invalid argument",
            Error::NotConfirmed => "not confirmed",
            Error::NotADirectory => "not a directory",
            Error::IsADirectory => "is a directory",
            Error::DirectoryNotEmpty => "directory not empty",
            Error::NoFilesystem => "no FAT filesystem",
        };
        f.write_str(msg)
    }
}

impl From<DiskError> for Error {
    fn from(e: DiskError) -> Self {
        match e {
            DiskError::NotReady => Error::NotReady,
            DiskError::InvalidArgument => Error::InvalidArgument,
            DiskError::Timeout { .. } => Error::Timeout,
            DiskError::Device { .. } => Error::Io,
        }
    }
}
