//! FAT16/FAT32 volumes on top of a [`BlockDevice`].
//!
//! A [`Volume`] owns its device and hands out [`File`] and [`Dir`] handles
//! that borrow it, so a volume cannot be unmounted or reformatted while a
//! handle is alive.

mod bpb;
mod dir;
mod file;
pub mod format;
mod name;
mod table;

pub use bpb::{FatType, Geometry};
pub use dir::{Attributes, Dir};
pub use file::File;
pub use format::{FatKind, FormatOptions};

use crate::error::Result;
use crate::fs::block::{BlockDevice, SECTOR_SIZE};
use crate::sync::SpinLock;
use bpb::{BiosParameterBlock, FsInfo};
use core::fmt;
use table::FatState;

/// Date and time as stored in directory entries (two-second resolution).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FatTimestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl FatTimestamp {
    /// 1980-01-01 00:00:00, the earliest representable time.
    pub const fn epoch() -> Self {
        Self { year: 1980, month: 1, day: 1, hour: 0, minute: 0, second: 0 }
    }

    /// Packed `(date, time)` words.
    pub fn to_fat(self) -> (u16, u16) {
        let year = self.year.clamp(1980, 2107) - 1980;
        let date = (year << 9) | ((self.month.clamp(1, 12) as u16) << 5) | self.day.clamp(1, 31) as u16;
        let time = ((self.hour.min(23) as u16) << 11)
            | ((self.minute.min(59) as u16) << 5)
            | (self.second.min(59) / 2) as u16;
        (date, time)
    }

    pub fn from_fat(date: u16, time: u16) -> Self {
        Self {
            year: 1980 + (date >> 9),
            month: ((date >> 5) & 0x0F) as u8,
            day: (date & 0x1F) as u8,
            hour: (time >> 11) as u8,
            minute: ((time >> 5) & 0x3F) as u8,
            second: ((time & 0x1F) * 2) as u8,
        }
    }
}

impl fmt::Display for FatTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )
    }
}

/// A mounted FAT volume.
pub struct Volume<D: BlockDevice> {
    dev: D,
    geo: Geometry,
    bpb: BiosParameterBlock,
    fat: SpinLock<FatState>,
    clock: fn() -> FatTimestamp,
}

impl<D: BlockDevice> Volume<D> {
    /// Read the boot sector of `dev` and mount the filesystem on it.
    ///
    /// Fails with `NoFilesystem` when the device carries no valid FAT16 or
    /// FAT32 boot sector.
    pub fn mount(dev: D, clock: fn() -> FatTimestamp) -> Result<Self> {
        let mut sector = [0u8; SECTOR_SIZE];
        dev.read_sectors(0, &mut sector, 1)?;
        let bpb = BiosParameterBlock::parse(&sector)?;
        let geo = Geometry::from_bpb(&bpb, dev.sector_count())?;

        let mut free_count = None;
        let mut next_free = 2;
        if let Some(lba) = geo.fsinfo_sector {
            dev.read_sectors(lba, &mut sector, 1)?;
            if let Some(info) = FsInfo::parse(&sector) {
                free_count = info.free_count.filter(|&n| n <= geo.cluster_count);
                next_free = info
                    .next_free
                    .filter(|n| (2..=geo.max_cluster()).contains(n))
                    .unwrap_or(2);
            } else {
                log::warn!("FAT: FSInfo sector {} is invalid, free count will be rescanned", lba);
            }
        }

        log::info!(
            "FAT: mounted {} volume, {} clusters of {} bytes",
            geo.fat_type.name(),
            geo.cluster_count,
            geo.cluster_bytes()
        );

        Ok(Self {
            dev,
            geo,
            bpb,
            fat: SpinLock::new(FatState::new(free_count, next_free)),
            clock,
        })
    }

    /// Unmount, returning the device. Pending FAT updates are written first;
    /// a failure there is logged and the device is returned regardless.
    pub fn into_device(self) -> D {
        if let Err(e) = self.sync() {
            log::warn!("FAT: flush on unmount failed: {}", e);
        }
        self.dev
    }

    pub fn fat_type(&self) -> FatType {
        self.geo.fat_type
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geo
    }

    pub fn total_bytes(&self) -> u64 {
        self.geo.cluster_count as u64 * self.geo.cluster_bytes() as u64
    }

    pub fn free_space(&self) -> Result<u64> {
        Ok(self.free_clusters()? as u64 * self.geo.cluster_bytes() as u64)
    }

    /// Write cached FAT state to disk and flush the device.
    pub fn sync(&self) -> Result<()> {
        self.flush_fat()?;
        self.dev.sync()
    }

    /// Volume serial number from the boot sector.
    pub fn serial(&self) -> u32 {
        self.bpb.volume_id
    }

    fn now(&self) -> FatTimestamp {
        (self.clock)()
    }
}

impl<D: BlockDevice> fmt::Debug for Volume<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Volume")
            .field("geometry", &self.geo)
            .field("serial", &self.bpb.volume_id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::ramdisk::RamDisk;
    use crate::error::Error;
    use crate::testing::fixed_clock;

    #[test]
    fn timestamps_pack_to_fat_words() {
        let t = fixed_clock();
        let (date, time) = t.to_fat();
        assert_eq!(FatTimestamp::from_fat(date, time), t);
        assert_eq!(FatTimestamp::epoch().to_fat(), (0x0021, 0));
        assert_eq!(t.to_string(), "2024-05-17 13:45:30");
    }

    #[test]
    fn blank_device_has_no_filesystem() {
        let disk = RamDisk::new(16_384);
        assert_eq!(Volume::mount(disk, fixed_clock).err(), Some(Error::NoFilesystem));
    }

    #[test]
    fn corrupt_fat_size_is_refused_at_mount() {
        let disk = RamDisk::new(70_000);
        let opts = FormatOptions { kind: FatKind::Fat32, ..FormatOptions::default() };
        format::format(&disk, &opts, fixed_clock()).unwrap();

        let mut boot = [0u8; SECTOR_SIZE];
        disk.read_sectors(0, &mut boot, 1).unwrap();
        boot[36..40].copy_from_slice(&0x8000_0000u32.to_le_bytes());
        disk.write_sectors(0, &boot, 1).unwrap();

        assert_eq!(Volume::mount(disk, fixed_clock).err(), Some(Error::NoFilesystem));
    }

    #[test]
    fn mount_reports_capacity() {
        let disk = RamDisk::new(16_384);
        format::format(&disk, &FormatOptions::default(), fixed_clock()).unwrap();
        let vol = Volume::mount(disk, fixed_clock).unwrap();
        assert_eq!(vol.fat_type(), FatType::Fat16);
        assert_eq!(vol.total_bytes(), vol.geometry().cluster_count as u64 * 512);
        assert_eq!(vol.free_space().unwrap(), vol.total_bytes());
    }
}
