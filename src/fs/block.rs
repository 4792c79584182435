//! Sector-addressed storage as seen by the FAT engine.

use crate::arch::x86_64::io::PortIo;
use crate::drivers::ide::{IdeController, IoctlReply, IoctlRequest};
use crate::error::{Error, Result};
use alloc::sync::Arc;

pub const SECTOR_SIZE: usize = 512;

/// A disk of fixed 512-byte sectors.
///
/// Methods take `&self`: devices that need mutable state keep it behind a
/// lock, so a mounted volume and its open handles can share one device.
pub trait BlockDevice {
    fn read_sectors(&self, lba: u32, buf: &mut [u8], count: u32) -> Result<()>;
    fn write_sectors(&self, lba: u32, buf: &[u8], count: u32) -> Result<()>;
    fn sector_count(&self) -> u32;

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

/// One mapped slot of a shared IDE controller.
pub struct LogicalDisk<P: PortIo> {
    controller: Arc<IdeController<P>>,
    slot: usize,
    sectors: u32,
}

impl<P: PortIo> LogicalDisk<P> {
    pub fn new(controller: Arc<IdeController<P>>, slot: usize) -> Result<Self> {
        let sectors = match controller.query(slot, IoctlRequest::SectorCount)? {
            IoctlReply::SectorCount(n) => n,
            _ => return Err(Error::Io),
        };
        Ok(Self { controller, slot, sectors })
    }

    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<P: PortIo> BlockDevice for LogicalDisk<P> {
    fn read_sectors(&self, lba: u32, buf: &mut [u8], count: u32) -> Result<()> {
        Ok(self.controller.read_sectors(self.slot, buf, lba, count)?)
    }

    fn write_sectors(&self, lba: u32, buf: &[u8], count: u32) -> Result<()> {
        Ok(self.controller.write_sectors(self.slot, buf, lba, count)?)
    }

    fn sector_count(&self) -> u32 {
        self.sectors
    }

    fn sync(&self) -> Result<()> {
        self.controller.query(self.slot, IoctlRequest::Sync)?;
        Ok(())
    }
}
