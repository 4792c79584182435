pub mod block;
pub mod drives;
pub mod fat;
pub mod mount;
mod ops;
pub mod path;
pub mod vfs;

pub use block::{BlockDevice, LogicalDisk};
pub use drives::DriveMap;
pub use mount::{DriveInfo, StorageManager};
pub use vfs::{DirEntry, DiskUsage, Existence, FileType, OpenMode, PageControl, Stat, TreeEntry};
