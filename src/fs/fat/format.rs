//! Creating an empty FAT16 or FAT32 filesystem.
//!
//! Layout choices:
//!
//! * FAT16: 1 reserved sector, 2 FATs, 512 root entries. Sectors per cluster
//!   start at 1 and double until the cluster count drops below the FAT32
//!   threshold.
//! * FAT32: 32 reserved sectors, FSInfo in sector 1, backup boot sector in
//!   sector 6, root directory in cluster 2. Sectors per cluster come from the
//!   size table in [`fat32_cluster_size`].

use super::bpb::{
    BiosParameterBlock, FatType, FsInfo, FAT16_MIN_CLUSTERS, FAT32_MIN_CLUSTERS, MEDIA_FIXED,
};
use super::dir::label_entry;
use super::FatTimestamp;
use crate::error::{Error, Result};
use crate::fs::block::{BlockDevice, SECTOR_SIZE};
use alloc::vec;

/// Devices smaller than this get FAT16 when the type is left to `Auto`.
pub const FAT16_AUTO_LIMIT: u32 = 1_048_576;

const FAT16_ROOT_ENTRIES: u32 = 512;
const FAT32_RESERVED: u32 = 32;
const FAT32_BACKUP_BOOT: u32 = 6;
const FAT_COPIES: u32 = 2;
const MAX_SECTORS_PER_CLUSTER: u32 = 128;
const ZERO_CHUNK: u32 = 64;
const NO_LABEL: [u8; 11] = *b"NO NAME    ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FatKind {
    #[default]
    Auto,
    Fat16,
    Fat32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    pub kind: FatKind,
    pub label: [u8; 11],
    /// 0 derives a serial number from the format time.
    pub volume_id: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self { kind: FatKind::Auto, label: NO_LABEL, volume_id: 0 }
    }
}

impl FormatOptions {
    /// Use `label` (upper-cased, cut to 11 bytes) as the volume label.
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = [b' '; 11];
        for (dst, b) in self.label.iter_mut().zip(label.bytes().filter(u8::is_ascii)) {
            *dst = b.to_ascii_uppercase();
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Layout {
    fat_type: FatType,
    sectors_per_cluster: u32,
    reserved: u32,
    root_entries: u32,
    fat_size: u32,
    clusters: u32,
}

impl Layout {
    fn compute(total: u32, fat_type: FatType, spc: u32) -> Self {
        let (reserved, root_entries, entry_bytes) = match fat_type {
            FatType::Fat16 => (1, FAT16_ROOT_ENTRIES, 2u64),
            FatType::Fat32 => (FAT32_RESERVED, 0, 4u64),
        };
        let root_sectors = root_entries * 32 / SECTOR_SIZE as u32;
        let avail = total.saturating_sub(reserved + root_sectors) as u64;
        let fat_size = ((avail / spc as u64 + 2) * entry_bytes).div_ceil(SECTOR_SIZE as u64) as u32;
        let data = (total as u64).saturating_sub((reserved + root_sectors) as u64 + FAT_COPIES as u64 * fat_size as u64);
        Self {
            fat_type,
            sectors_per_cluster: spc,
            reserved,
            root_entries,
            fat_size,
            clusters: (data / spc as u64) as u32,
        }
    }

    fn root_sectors(&self) -> u32 {
        self.root_entries * 32 / SECTOR_SIZE as u32
    }

    fn data_start(&self) -> u32 {
        self.reserved + FAT_COPIES * self.fat_size + self.root_sectors()
    }
}

/// Sectors per cluster for a FAT32 volume of `total` sectors.
pub fn fat32_cluster_size(total: u32) -> u32 {
    match total {
        0..=532_480 => 1,
        532_481..=16_777_216 => 8,
        16_777_217..=33_554_432 => 16,
        33_554_433..=67_108_864 => 32,
        _ => 64,
    }
}

fn plan(total: u32, kind: FatKind) -> Result<Layout> {
    let fat_type = match kind {
        FatKind::Auto if total < FAT16_AUTO_LIMIT => FatType::Fat16,
        FatKind::Auto => FatType::Fat32,
        FatKind::Fat16 => FatType::Fat16,
        FatKind::Fat32 => FatType::Fat32,
    };

    let layout = match fat_type {
        FatType::Fat16 => {
            let mut spc = 1;
            loop {
                let layout = Layout::compute(total, FatType::Fat16, spc);
                if layout.clusters < FAT32_MIN_CLUSTERS || spc == MAX_SECTORS_PER_CLUSTER {
                    break layout;
                }
                spc *= 2;
            }
        }
        FatType::Fat32 => Layout::compute(total, FatType::Fat32, fat32_cluster_size(total)),
    };

    let fits = match layout.fat_type {
        FatType::Fat16 => (FAT16_MIN_CLUSTERS..FAT32_MIN_CLUSTERS).contains(&layout.clusters),
        FatType::Fat32 => layout.clusters >= FAT32_MIN_CLUSTERS,
    };
    if !fits {
        log::warn!(
            "FAT: {} sectors cannot hold {} ({} clusters)",
            total,
            layout.fat_type.name(),
            layout.clusters
        );
        return Err(Error::InvalidArgument);
    }
    Ok(layout)
}

fn zero_range<D: BlockDevice>(dev: &D, start: u32, count: u32) -> Result<()> {
    let zeros = vec![0u8; ZERO_CHUNK as usize * SECTOR_SIZE];
    let mut lba = start;
    let end = start + count;
    while lba < end {
        let n = (end - lba).min(ZERO_CHUNK);
        dev.write_sectors(lba, &zeros[..n as usize * SECTOR_SIZE], n)?;
        lba += n;
    }
    Ok(())
}

/// Write an empty filesystem covering the whole of `dev`.
pub fn format<D: BlockDevice>(dev: &D, opts: &FormatOptions, now: FatTimestamp) -> Result<FatType> {
    let total = dev.sector_count();
    let layout = plan(total, opts.kind)?;
    let fat32 = layout.fat_type == FatType::Fat32;

    let volume_id = match opts.volume_id {
        0 => {
            let (date, time) = now.to_fat();
            (date as u32) << 16 | time as u32
        }
        id => id,
    };
    let bpb = BiosParameterBlock {
        bytes_per_sector: SECTOR_SIZE as u16,
        sectors_per_cluster: layout.sectors_per_cluster as u8,
        reserved_sectors: layout.reserved as u16,
        fat_count: FAT_COPIES as u8,
        root_entries: layout.root_entries as u16,
        total_sectors: total,
        media: MEDIA_FIXED,
        fat_size: layout.fat_size,
        root_cluster: if fat32 { 2 } else { 0 },
        fsinfo_sector: if fat32 { 1 } else { 0 },
        backup_boot_sector: if fat32 { FAT32_BACKUP_BOOT as u16 } else { 0 },
        volume_id,
        label: opts.label,
    };

    // Reserved area, FATs and the root directory (region or first cluster).
    let root_end = layout.data_start() + if fat32 { layout.sectors_per_cluster } else { 0 };
    zero_range(dev, 0, root_end)?;

    let mut sector = [0u8; SECTOR_SIZE];
    bpb.write(layout.fat_type, &mut sector);
    dev.write_sectors(0, &sector, 1)?;

    if fat32 {
        dev.write_sectors(FAT32_BACKUP_BOOT, &sector, 1)?;
        FsInfo { free_count: Some(layout.clusters - 1), next_free: Some(3) }.write(&mut sector);
        dev.write_sectors(1, &sector, 1)?;
        dev.write_sectors(FAT32_BACKUP_BOOT + 1, &sector, 1)?;
    }

    sector.fill(0);
    match layout.fat_type {
        FatType::Fat16 => {
            sector[0..2].copy_from_slice(&(0xFF00 | MEDIA_FIXED as u16).to_le_bytes());
            sector[2..4].copy_from_slice(&0xFFFFu16.to_le_bytes());
        }
        FatType::Fat32 => {
            sector[0..4].copy_from_slice(&(0x0FFF_FF00 | MEDIA_FIXED as u32).to_le_bytes());
            sector[4..8].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
            // root directory chain
            sector[8..12].copy_from_slice(&0x0FFF_FFFFu32.to_le_bytes());
        }
    }
    for copy in 0..FAT_COPIES {
        dev.write_sectors(layout.reserved + copy * layout.fat_size, &sector, 1)?;
    }

    if opts.label != NO_LABEL && opts.label != [b' '; 11] {
        sector.fill(0);
        sector[..32].copy_from_slice(&label_entry(&opts.label, now));
        let root_lba = layout.reserved + FAT_COPIES * layout.fat_size;
        dev.write_sectors(root_lba, &sector, 1)?;
    }

    dev.sync()?;
    log::info!(
        "FAT: formatted {} sectors as {}, {} clusters of {} sectors",
        total,
        layout.fat_type.name(),
        layout.clusters,
        layout.sectors_per_cluster
    );
    Ok(layout.fat_type)
}
