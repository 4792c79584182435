//! Boot sector / BIOS parameter block and the geometry derived from it.

use crate::error::{Error, Result};
use crate::fs::block::SECTOR_SIZE;

pub const BOOT_SIGNATURE: [u8; 2] = [0x55, 0xAA];
pub const MEDIA_FIXED: u8 = 0xF8;

/// Volumes with fewer clusters are FAT12, which is not supported.
pub const FAT16_MIN_CLUSTERS: u32 = 4085;
/// Volumes with at least this many clusters are FAT32.
pub const FAT32_MIN_CLUSTERS: u32 = 65525;

const FSINFO_LEAD: u32 = 0x4161_5252;
const FSINFO_STRUCT: u32 = 0x6141_7272;
const FSINFO_TRAIL: u32 = 0xAA55_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatType {
    Fat16,
    Fat32,
}

impl FatType {
    pub fn name(self) -> &'static str {
        match self {
            FatType::Fat16 => "FAT16",
            FatType::Fat32 => "FAT32",
        }
    }
}

fn le16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

fn le32(b: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([b[off], b[off + 1], b[off + 2], b[off + 3]])
}

fn put16(b: &mut [u8], off: usize, v: u16) {
    b[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn put32(b: &mut [u8], off: usize, v: u32) {
    b[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BiosParameterBlock {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub root_entries: u16,
    pub total_sectors: u32,
    pub media: u8,
    /// Sectors per FAT copy.
    pub fat_size: u32,
    // FAT32 extension
    pub root_cluster: u32,
    pub fsinfo_sector: u16,
    pub backup_boot_sector: u16,
    // shared extended boot record
    pub volume_id: u32,
    pub label: [u8; 11],
}

impl BiosParameterBlock {
    pub fn parse(sector: &[u8]) -> Result<Self> {
        if sector[510..512] != BOOT_SIGNATURE {
            return Err(Error::NoFilesystem);
        }

        let fat_size_16 = le16(sector, 22) as u32;
        let total_16 = le16(sector, 19) as u32;
        let fat32_layout = fat_size_16 == 0;

        let mut bpb = Self {
            bytes_per_sector: le16(sector, 11),
            sectors_per_cluster: sector[13],
            reserved_sectors: le16(sector, 14),
            fat_count: sector[16],
            root_entries: le16(sector, 17),
            total_sectors: if total_16 != 0 { total_16 } else { le32(sector, 32) },
            media: sector[21],
            fat_size: if fat32_layout { le32(sector, 36) } else { fat_size_16 },
            root_cluster: 0,
            fsinfo_sector: 0,
            backup_boot_sector: 0,
            volume_id: 0,
            label: [b' '; 11],
        };

        // The extended boot record sits after the FAT32 extension when present.
        let ebr = if fat32_layout {
            bpb.root_cluster = le32(sector, 44);
            bpb.fsinfo_sector = le16(sector, 48);
            bpb.backup_boot_sector = le16(sector, 50);
            64
        } else {
            36
        };
        if sector[ebr + 2] == 0x29 {
            bpb.volume_id = le32(sector, ebr + 3);
            bpb.label.copy_from_slice(&sector[ebr + 7..ebr + 18]);
        }

        bpb.validate()?;
        Ok(bpb)
    }

    fn validate(&self) -> Result<()> {
        let spc = self.sectors_per_cluster;
        let sane = self.bytes_per_sector as usize == SECTOR_SIZE
            && spc != 0
            && spc.is_power_of_two()
            && self.reserved_sectors != 0
            && self.fat_count != 0
            && self.fat_size != 0
            && self.total_sectors != 0;
        if sane {
            Ok(())
        } else {
            log::debug!("FAT: rejecting boot sector {:?}", self);
            Err(Error::NoFilesystem)
        }
    }

    pub fn root_dir_sectors(&self) -> u32 {
        (self.root_entries as u32 * 32).div_ceil(SECTOR_SIZE as u32)
    }

    /// First sector after the FATs, or `None` when the fields read from disk
    /// overflow a 32-bit LBA.
    pub fn root_start(&self) -> Option<u32> {
        (self.fat_count as u32)
            .checked_mul(self.fat_size)?
            .checked_add(self.reserved_sectors as u32)
    }

    pub fn data_start(&self) -> Option<u32> {
        self.root_start()?.checked_add(self.root_dir_sectors())
    }

    pub fn cluster_count(&self) -> Option<u32> {
        let data_start = self.data_start()?;
        let spc = self.sectors_per_cluster as u32;
        (spc != 0).then(|| self.total_sectors.saturating_sub(data_start) / spc)
    }

    pub fn fat_type(&self) -> Result<FatType> {
        match self.cluster_count().ok_or(Error::NoFilesystem)? {
            n if n < FAT16_MIN_CLUSTERS => Err(Error::NoFilesystem),
            n if n < FAT32_MIN_CLUSTERS => Ok(FatType::Fat16),
            _ => Ok(FatType::Fat32),
        }
    }

    /// Serialize into a boot sector image.
    pub fn write(&self, fat_type: FatType, sector: &mut [u8; SECTOR_SIZE]) {
        sector.fill(0);
        let jump = match fat_type {
            FatType::Fat16 => [0xEB, 0x3C, 0x90],
            FatType::Fat32 => [0xEB, 0x58, 0x90],
        };
        sector[0..3].copy_from_slice(&jump);
        sector[3..11].copy_from_slice(b"SAROS   ");
        put16(sector, 11, self.bytes_per_sector);
        sector[13] = self.sectors_per_cluster;
        put16(sector, 14, self.reserved_sectors);
        sector[16] = self.fat_count;
        put16(sector, 17, self.root_entries);
        if fat_type == FatType::Fat16 && self.total_sectors < 0x1_0000 {
            put16(sector, 19, self.total_sectors as u16);
        } else {
            put32(sector, 32, self.total_sectors);
        }
        sector[21] = self.media;
        put16(sector, 24, 63); // sectors per track
        put16(sector, 26, 255); // heads

        let (ebr, fs_type): (usize, &[u8; 8]) = match fat_type {
            FatType::Fat16 => {
                put16(sector, 22, self.fat_size as u16);
                (36, b"FAT16   ")
            }
            FatType::Fat32 => {
                put32(sector, 36, self.fat_size);
                put32(sector, 44, self.root_cluster);
                put16(sector, 48, self.fsinfo_sector);
                put16(sector, 50, self.backup_boot_sector);
                (64, b"FAT32   ")
            }
        };
        sector[ebr] = 0x80; // drive number
        sector[ebr + 2] = 0x29;
        put32(sector, ebr + 3, self.volume_id);
        sector[ebr + 7..ebr + 18].copy_from_slice(&self.label);
        sector[ebr + 18..ebr + 26].copy_from_slice(fs_type);
        sector[510..512].copy_from_slice(&BOOT_SIGNATURE);
    }
}

/// Sector layout of a mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub fat_type: FatType,
    pub sectors_per_cluster: u32,
    pub fat_start: u32,
    pub fat_size: u32,
    pub fat_count: u32,
    /// FAT16 fixed root directory region.
    pub root_start: u32,
    pub root_sectors: u32,
    /// FAT32 root directory chain.
    pub root_cluster: u32,
    pub data_start: u32,
    pub cluster_count: u32,
    pub fsinfo_sector: Option<u32>,
}

impl Geometry {
    pub fn from_bpb(bpb: &BiosParameterBlock, device_sectors: u32) -> Result<Self> {
        let fat_type = bpb.fat_type()?;
        if bpb.total_sectors > device_sectors {
            log::warn!(
                "FAT: volume claims {} sectors, device has {}",
                bpb.total_sectors,
                device_sectors
            );
            return Err(Error::NoFilesystem);
        }
        match fat_type {
            FatType::Fat16 if bpb.root_entries == 0 => return Err(Error::NoFilesystem),
            FatType::Fat32 if bpb.root_entries != 0 || bpb.root_cluster < 2 => {
                return Err(Error::NoFilesystem)
            }
            _ => {}
        }

        let cluster_count = bpb.cluster_count().ok_or(Error::NoFilesystem)?;
        if fat_type == FatType::Fat32 && bpb.root_cluster > cluster_count + 1 {
            return Err(Error::NoFilesystem);
        }
        let root_start = bpb.root_start().ok_or(Error::NoFilesystem)?;
        let data_start = bpb.data_start().ok_or(Error::NoFilesystem)?;
        let fat_start = bpb.reserved_sectors as u32;
        let entry_bytes: u64 = match fat_type {
            FatType::Fat16 => 2,
            FatType::Fat32 => 4,
        };
        if (cluster_count as u64 + 2) * entry_bytes > bpb.fat_size as u64 * SECTOR_SIZE as u64 {
            return Err(Error::NoFilesystem);
        }

        let fsinfo_sector = match (fat_type, bpb.fsinfo_sector) {
            (FatType::Fat32, n) if n != 0 && n != 0xFFFF && n < bpb.reserved_sectors => Some(n as u32),
            _ => None,
        };

        Ok(Self {
            fat_type,
            sectors_per_cluster: bpb.sectors_per_cluster as u32,
            fat_start,
            fat_size: bpb.fat_size,
            fat_count: bpb.fat_count as u32,
            root_start,
            root_sectors: bpb.root_dir_sectors(),
            root_cluster: bpb.root_cluster,
            data_start,
            cluster_count,
            fsinfo_sector,
        })
    }

    pub fn cluster_lba(&self, cluster: u32) -> u32 {
        self.data_start + (cluster - 2) * self.sectors_per_cluster
    }

    pub fn cluster_bytes(&self) -> u32 {
        self.sectors_per_cluster * SECTOR_SIZE as u32
    }

    /// Highest valid cluster number.
    pub fn max_cluster(&self) -> u32 {
        self.cluster_count + 1
    }
}

/// FAT32 free-cluster bookkeeping sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsInfo {
    pub free_count: Option<u32>,
    pub next_free: Option<u32>,
}

impl FsInfo {
    pub fn parse(sector: &[u8]) -> Option<Self> {
        if le32(sector, 0) != FSINFO_LEAD
            || le32(sector, 484) != FSINFO_STRUCT
            || le32(sector, 508) != FSINFO_TRAIL
        {
            return None;
        }
        let known = |v: u32| (v != 0xFFFF_FFFF).then_some(v);
        Some(Self {
            free_count: known(le32(sector, 488)),
            next_free: known(le32(sector, 492)),
        })
    }

    pub fn write(&self, sector: &mut [u8; SECTOR_SIZE]) {
        sector.fill(0);
        put32(sector, 0, FSINFO_LEAD);
        put32(sector, 484, FSINFO_STRUCT);
        put32(sector, 488, self.free_count.unwrap_or(0xFFFF_FFFF));
        put32(sector, 492, self.next_free.unwrap_or(0xFFFF_FFFF));
        put32(sector, 508, FSINFO_TRAIL);
    }
}
