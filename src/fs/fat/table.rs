//! File allocation table access through a one-sector window.
//!
//! Writes land in the window and reach every FAT copy when the window moves
//! or on `flush_fat`. FAT32 free-cluster hints are kept here and written back
//! to the FSInfo sector on flush.

use super::bpb::{FatType, FsInfo};
use super::Volume;
use crate::error::{Error, Result};
use crate::fs::block::{BlockDevice, SECTOR_SIZE};
use alloc::vec;

pub(super) const FREE: u32 = 0;

pub(super) struct FatState {
    window_lba: Option<u32>,
    window: [u8; SECTOR_SIZE],
    dirty: bool,
    free_count: Option<u32>,
    next_free: u32,
    fsinfo_dirty: bool,
}

impl FatState {
    pub(super) fn new(free_count: Option<u32>, next_free: u32) -> Self {
        Self {
            window_lba: None,
            window: [0; SECTOR_SIZE],
            dirty: false,
            free_count,
            next_free,
            fsinfo_dirty: false,
        }
    }
}

impl<D: BlockDevice> Volume<D> {
    pub(super) fn end_of_chain(&self) -> u32 {
        match self.geo.fat_type {
            FatType::Fat16 => 0xFFFF,
            FatType::Fat32 => 0x0FFF_FFFF,
        }
    }

    fn entry_location(&self, cluster: u32) -> (u32, usize) {
        let width = match self.geo.fat_type {
            FatType::Fat16 => 2,
            FatType::Fat32 => 4,
        };
        let byte = cluster as usize * width;
        (self.geo.fat_start + (byte / SECTOR_SIZE) as u32, byte % SECTOR_SIZE)
    }

    fn flush_window(&self, st: &mut FatState) -> Result<()> {
        if !st.dirty {
            return Ok(());
        }
        if let Some(lba) = st.window_lba {
            for copy in 0..self.geo.fat_count {
                self.dev.write_sectors(lba + copy * self.geo.fat_size, &st.window, 1)?;
            }
        }
        st.dirty = false;
        Ok(())
    }

    fn load_window(&self, st: &mut FatState, lba: u32) -> Result<()> {
        if st.window_lba == Some(lba) {
            return Ok(());
        }
        self.flush_window(st)?;
        st.window_lba = None;
        self.dev.read_sectors(lba, &mut st.window, 1)?;
        st.window_lba = Some(lba);
        Ok(())
    }

    fn read_entry(&self, st: &mut FatState, cluster: u32) -> Result<u32> {
        let (lba, off) = self.entry_location(cluster);
        self.load_window(st, lba)?;
        let w = &st.window;
        Ok(match self.geo.fat_type {
            FatType::Fat16 => u16::from_le_bytes([w[off], w[off + 1]]) as u32,
            FatType::Fat32 => {
                u32::from_le_bytes([w[off], w[off + 1], w[off + 2], w[off + 3]]) & 0x0FFF_FFFF
            }
        })
    }

    fn write_entry(&self, st: &mut FatState, cluster: u32, value: u32) -> Result<()> {
        let (lba, off) = self.entry_location(cluster);
        self.load_window(st, lba)?;
        let w = &mut st.window;
        match self.geo.fat_type {
            FatType::Fat16 => w[off..off + 2].copy_from_slice(&(value as u16).to_le_bytes()),
            FatType::Fat32 => {
                // top nibble is reserved and must survive
                let old = u32::from_le_bytes([w[off], w[off + 1], w[off + 2], w[off + 3]]);
                let new = (old & 0xF000_0000) | (value & 0x0FFF_FFFF);
                w[off..off + 4].copy_from_slice(&new.to_le_bytes());
            }
        }
        st.dirty = true;
        Ok(())
    }

    fn is_data_cluster(&self, cluster: u32) -> bool {
        (2..=self.geo.max_cluster()).contains(&cluster)
    }

    /// Successor of `cluster`, or `None` at end of chain.
    pub(super) fn next_cluster(&self, cluster: u32) -> Result<Option<u32>> {
        if !self.is_data_cluster(cluster) {
            return Err(Error::Io);
        }
        let mut st = self.fat.lock();
        let next = self.read_entry(&mut st, cluster)?;
        Ok(self.is_data_cluster(next).then_some(next))
    }

    /// Allocate a cluster, marking it end-of-chain and linking it after
    /// `prev` when given.
    pub(super) fn alloc_cluster(&self, prev: Option<u32>) -> Result<u32> {
        let mut st = self.fat.lock();
        let max = self.geo.max_cluster();
        let start = if self.is_data_cluster(st.next_free) { st.next_free } else { 2 };

        let mut found = None;
        for i in 0..self.geo.cluster_count {
            let c = 2 + (start - 2 + i) % self.geo.cluster_count;
            if self.read_entry(&mut st, c)? == FREE {
                found = Some(c);
                break;
            }
        }
        let Some(cluster) = found else {
            st.free_count = Some(0);
            return Err(Error::NoSpace);
        };

        let eoc = self.end_of_chain();
        self.write_entry(&mut st, cluster, eoc)?;
        if let Some(p) = prev {
            self.write_entry(&mut st, p, cluster)?;
        }
        st.free_count = st.free_count.map(|n| n.saturating_sub(1));
        st.next_free = if cluster == max { 2 } else { cluster + 1 };
        st.fsinfo_dirty = true;
        log::trace!("FAT: allocated cluster {}", cluster);
        Ok(cluster)
    }

    fn release_from(&self, st: &mut FatState, start: u32) -> Result<()> {
        let mut cluster = start;
        let mut steps = 0;
        while self.is_data_cluster(cluster) {
            let next = self.read_entry(st, cluster)?;
            self.write_entry(st, cluster, FREE)?;
            st.free_count = st.free_count.map(|n| n + 1);
            steps += 1;
            if steps > self.geo.cluster_count {
                log::error!("FAT: cluster chain from {} loops", start);
                return Err(Error::Io);
            }
            cluster = next;
        }
        st.fsinfo_dirty = true;
        Ok(())
    }

    /// Return a whole chain to the free pool.
    pub(super) fn free_chain(&self, start: u32) -> Result<()> {
        let mut st = self.fat.lock();
        self.release_from(&mut st, start)
    }

    /// Make `last` the final cluster of its chain, freeing what followed.
    pub(super) fn truncate_chain(&self, last: u32) -> Result<()> {
        let mut st = self.fat.lock();
        let next = self.read_entry(&mut st, last)?;
        let eoc = self.end_of_chain();
        self.write_entry(&mut st, last, eoc)?;
        if self.is_data_cluster(next) {
            self.release_from(&mut st, next)?;
        }
        Ok(())
    }

    pub(super) fn free_clusters(&self) -> Result<u32> {
        let mut st = self.fat.lock();
        if let Some(n) = st.free_count {
            return Ok(n);
        }
        let mut free = 0;
        for c in 2..=self.geo.max_cluster() {
            if self.read_entry(&mut st, c)? == FREE {
                free += 1;
            }
        }
        st.free_count = Some(free);
        st.fsinfo_dirty = true;
        Ok(free)
    }

    pub(super) fn zero_cluster(&self, cluster: u32) -> Result<()> {
        let spc = self.geo.sectors_per_cluster;
        let zeros = vec![0u8; spc as usize * SECTOR_SIZE];
        self.dev.write_sectors(self.geo.cluster_lba(cluster), &zeros, spc)
    }

    /// Write the FAT window to all copies and update FSInfo.
    pub(super) fn flush_fat(&self) -> Result<()> {
        let mut st = self.fat.lock();
        self.flush_window(&mut st)?;
        if st.fsinfo_dirty {
            if let Some(lba) = self.geo.fsinfo_sector {
                let mut sector = [0u8; SECTOR_SIZE];
                FsInfo { free_count: st.free_count, next_free: Some(st.next_free) }.write(&mut sector);
                self.dev.write_sectors(lba, &sector, 1)?;
            }
            st.fsinfo_dirty = false;
        }
        Ok(())
    }
}
