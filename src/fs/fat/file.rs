//! Open file handles.

use super::dir::{Attributes, EntryMeta, Located, SlotPos};
use super::Volume;
use crate::error::{Error, Result};
use crate::fs::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::vfs::OpenMode;

/// A regular file opened on a [`Volume`].
///
/// Size and first-cluster changes are written to the directory entry by
/// [`File::flush`], [`File::close`], or when the handle is dropped.
pub struct File<'v, D: BlockDevice> {
    vol: &'v Volume<D>,
    entry: SlotPos,
    mode: OpenMode,
    first_cluster: u32,
    size: u32,
    pos: u32,
    /// Cluster index and number of the most recently visited cluster.
    cursor: Option<(u32, u32)>,
    dirty: bool,
    closed: bool,
}

impl<D: BlockDevice> Volume<D> {
    /// Open a regular file.
    ///
    /// `CREATE`, `TRUNCATE` and `EXCLUSIVE` need `WRITE`; opening a
    /// directory fails with `IsADirectory`.
    pub fn open(&self, path: &str, mode: OpenMode) -> Result<File<'_, D>> {
        let needs_write = OpenMode::CREATE | OpenMode::TRUNCATE | OpenMode::EXCLUSIVE;
        if (mode.intersects(needs_write) && !mode.contains(OpenMode::WRITE))
            || !mode.intersects(OpenMode::READ | OpenMode::WRITE)
        {
            return Err(Error::InvalidArgument);
        }

        let (entry, first_cluster, size) = match self.locate(path) {
            Ok(Located::Root) => return Err(Error::IsADirectory),
            Ok(Located::Entry { record, .. }) => {
                if record.is_dir() {
                    return Err(Error::IsADirectory);
                }
                if mode.contains(OpenMode::CREATE | OpenMode::EXCLUSIVE) {
                    return Err(Error::AlreadyExists);
                }
                (record.entry, record.meta.first_cluster, record.meta.size)
            }
            Err(Error::NotFound) if mode.contains(OpenMode::CREATE) => {
                let (parent, file_name) = self.parent_of(path)?;
                let now = self.now();
                let meta = EntryMeta {
                    attr: Attributes::ARCHIVE,
                    first_cluster: 0,
                    size: 0,
                    created: now,
                    modified: now,
                };
                let record = self.insert(parent, file_name, &meta)?;
                self.flush_fat()?;
                log::debug!("FAT: created {}", path);
                (record.entry, 0, 0)
            }
            Err(e) => return Err(e),
        };

        let mut file = File {
            vol: self,
            entry,
            mode,
            first_cluster,
            size,
            pos: 0,
            cursor: None,
            dirty: false,
            closed: false,
        };
        if mode.contains(OpenMode::TRUNCATE) && (size != 0 || first_cluster != 0) {
            file.truncate()?;
        }
        Ok(file)
    }
}

impl<'v, D: BlockDevice> File<'v, D> {
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn position(&self) -> u32 {
        self.pos
    }

    /// Move to `pos`, which may not lie past the end of the file.
    pub fn seek(&mut self, pos: u32) -> Result<()> {
        if pos > self.size {
            return Err(Error::InvalidArgument);
        }
        self.pos = pos;
        Ok(())
    }

    pub fn seek_to_end(&mut self) {
        self.pos = self.size;
    }

    /// Cluster number at `index` in the chain, optionally growing the chain.
    fn cluster_at(&mut self, index: u32, grow: bool) -> Result<Option<u32>> {
        let (mut i, mut cluster) = match self.cursor {
            Some((ci, c)) if ci <= index => (ci, c),
            _ => {
                if self.first_cluster == 0 {
                    if !grow {
                        return Ok(None);
                    }
                    self.first_cluster = self.vol.alloc_cluster(None)?;
                    self.dirty = true;
                }
                (0, self.first_cluster)
            }
        };
        while i < index {
            cluster = match self.vol.next_cluster(cluster)? {
                Some(next) => next,
                None if grow => {
                    self.dirty = true;
                    self.vol.alloc_cluster(Some(cluster))?
                }
                None => return Ok(None),
            };
            i += 1;
        }
        self.cursor = Some((index, cluster));
        Ok(Some(cluster))
    }

    /// Read from the current position. Returns 0 at end of file.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if !self.mode.contains(OpenMode::READ) {
            return Err(Error::InvalidArgument);
        }
        let cluster_bytes = self.vol.geo.cluster_bytes();
        let mut sector = [0u8; SECTOR_SIZE];
        let mut done = 0;

        while done < buf.len() && self.pos < self.size {
            let cluster = self.cluster_at(self.pos / cluster_bytes, false)?.ok_or(Error::Io)?;
            let within = self.pos % cluster_bytes;
            let lba = self.vol.geo.cluster_lba(cluster) + within / SECTOR_SIZE as u32;
            let offset = within as usize % SECTOR_SIZE;
            let n = (SECTOR_SIZE - offset)
                .min(buf.len() - done)
                .min((self.size - self.pos) as usize);

            self.vol.dev.read_sectors(lba, &mut sector, 1)?;
            buf[done..done + n].copy_from_slice(&sector[offset..offset + n]);
            done += n;
            self.pos += n as u32;
        }
        Ok(done)
    }

    /// Write at the current position, growing the file as needed.
    ///
    /// Running out of clusters after some bytes were written returns the
    /// short count; with nothing written it fails with `NoSpace`.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        if !self.mode.contains(OpenMode::WRITE) {
            return Err(Error::InvalidArgument);
        }
        let cluster_bytes = self.vol.geo.cluster_bytes();
        let mut sector = [0u8; SECTOR_SIZE];
        let mut done = 0;

        while done < buf.len() {
            let room = (u32::MAX - self.pos) as usize;
            if room == 0 {
                break;
            }
            let cluster = match self.cluster_at(self.pos / cluster_bytes, true) {
                Ok(Some(c)) => c,
                Ok(None) => return Err(Error::Io),
                Err(Error::NoSpace) if done > 0 => break,
                Err(e) => return Err(e),
            };
            let within = self.pos % cluster_bytes;
            let lba = self.vol.geo.cluster_lba(cluster) + within / SECTOR_SIZE as u32;
            let offset = within as usize % SECTOR_SIZE;
            let n = (SECTOR_SIZE - offset).min(buf.len() - done).min(room);

            if n < SECTOR_SIZE {
                self.vol.dev.read_sectors(lba, &mut sector, 1)?;
            }
            sector[offset..offset + n].copy_from_slice(&buf[done..done + n]);
            self.vol.dev.write_sectors(lba, &sector, 1)?;

            done += n;
            self.pos += n as u32;
            self.size = self.size.max(self.pos);
            self.dirty = true;
        }
        Ok(done)
    }

    /// Cut the file at the current position.
    pub fn truncate(&mut self) -> Result<()> {
        if !self.mode.contains(OpenMode::WRITE) {
            return Err(Error::InvalidArgument);
        }
        if self.pos == 0 {
            if self.first_cluster != 0 {
                self.vol.free_chain(self.first_cluster)?;
                self.first_cluster = 0;
            }
        } else {
            let last_index = (self.pos - 1) / self.vol.geo.cluster_bytes();
            let last = self.cluster_at(last_index, false)?.ok_or(Error::Io)?;
            self.vol.truncate_chain(last)?;
        }
        self.size = self.pos;
        self.cursor = None;
        self.dirty = true;
        Ok(())
    }

    /// Write the directory entry and the FAT if anything changed.
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        self.vol.update_entry(self.entry, self.first_cluster, self.size, self.vol.now())?;
        self.vol.sync()?;
        self.dirty = false;
        Ok(())
    }

    /// Flush and release the handle, reporting any flush error.
    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.flush()
    }
}

impl<'v, D: BlockDevice> Drop for File<'v, D> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Err(e) = self.flush() {
            log::warn!("FAT: flush of dropped file failed: {}", e);
        }
    }
}
