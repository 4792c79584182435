pub mod ide;
pub mod logger;
pub mod ramdisk;
