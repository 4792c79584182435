//! Memory-backed block device.
//!
//! Used to build and inspect FAT images without an IDE controller, e.g. to
//! prepare an image before writing it out to a physical disk.

use crate::error::{Error, Result};
use crate::fs::block::{BlockDevice, SECTOR_SIZE};
use crate::sync::spinlock::SpinLock;
use alloc::vec;
use alloc::vec::Vec;

pub struct RamDisk {
    data: SpinLock<Vec<u8>>,
    sectors: u32,
}

impl RamDisk {
    pub fn new(sectors: u32) -> Self {
        Self {
            data: SpinLock::new(vec![0u8; sectors as usize * SECTOR_SIZE]),
            sectors,
        }
    }

    /// Wrap an existing image. A trailing partial sector is ignored.
    pub fn from_image(image: Vec<u8>) -> Self {
        let sectors = (image.len() / SECTOR_SIZE) as u32;
        Self { data: SpinLock::new(image), sectors }
    }

    pub fn into_image(self) -> Vec<u8> {
        self.data.into_inner()
    }

    fn span(&self, lba: u32, count: u32, buf_len: usize) -> Result<(usize, usize)> {
        let end = lba.checked_add(count).ok_or(Error::InvalidArgument)?;
        let len = count as usize * SECTOR_SIZE;
        if count == 0 || end > self.sectors || buf_len < len {
            return Err(Error::InvalidArgument);
        }
        let start = lba as usize * SECTOR_SIZE;
        Ok((start, start + len))
    }
}

impl BlockDevice for RamDisk {
    fn read_sectors(&self, lba: u32, buf: &mut [u8], count: u32) -> Result<()> {
        let (start, end) = self.span(lba, count, buf.len())?;
        buf[..end - start].copy_from_slice(&self.data.lock()[start..end]);
        Ok(())
    }

    fn write_sectors(&self, lba: u32, buf: &[u8], count: u32) -> Result<()> {
        let (start, end) = self.span(lba, count, buf.len())?;
        self.data.lock()[start..end].copy_from_slice(&buf[..end - start]);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sectors
    }
}
