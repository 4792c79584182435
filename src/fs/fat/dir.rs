//! Directory entries, path lookup and namespace operations.

use super::name::{self, LongNameBuf, ATTR_LONG_NAME, LFN_LAST};
use super::{FatTimestamp, Volume};
use crate::error::{Error, Result};
use crate::fs::block::{BlockDevice, SECTOR_SIZE};
use crate::fs::vfs::{DirEntry, FileType, Stat};
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;

pub(super) const ENTRY_SIZE: usize = 32;
const ENTRIES_PER_SECTOR: usize = SECTOR_SIZE / ENTRY_SIZE;
const DELETED: u8 = 0xE5;
const END_OF_DIR: u8 = 0x00;
const MAX_ALIAS: u32 = 999_999;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Attributes: u8 {
        const READ_ONLY = 0x01;
        const HIDDEN    = 0x02;
        const SYSTEM    = 0x04;
        const VOLUME_ID = 0x08;
        const DIRECTORY = 0x10;
        const ARCHIVE   = 0x20;
    }
}

fn le16(b: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([b[off], b[off + 1]])
}

fn put16(b: &mut [u8], off: usize, v: u16) {
    b[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

/// Identity of a directory's storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum DirLoc {
    /// FAT16 root region between the FATs and the data area.
    FixedRoot,
    Chain(u32),
}

/// Location of one 32-byte slot on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct SlotPos {
    pub lba: u32,
    pub offset: usize,
}

/// Fields of a short entry that callers choose.
#[derive(Debug, Clone, Copy)]
pub(super) struct EntryMeta {
    pub attr: Attributes,
    pub first_cluster: u32,
    pub size: u32,
    pub created: FatTimestamp,
    pub modified: FatTimestamp,
}

fn encode_short(short: &[u8; 11], case: u8, meta: &EntryMeta) -> [u8; ENTRY_SIZE] {
    let mut e = [0u8; ENTRY_SIZE];
    e[..11].copy_from_slice(short);
    e[11] = meta.attr.bits();
    e[12] = case;
    let (cdate, ctime) = meta.created.to_fat();
    let (mdate, mtime) = meta.modified.to_fat();
    put16(&mut e, 14, ctime);
    put16(&mut e, 16, cdate);
    put16(&mut e, 18, mdate);
    put16(&mut e, 20, (meta.first_cluster >> 16) as u16);
    put16(&mut e, 22, mtime);
    put16(&mut e, 24, mdate);
    put16(&mut e, 26, meta.first_cluster as u16);
    e[28..32].copy_from_slice(&meta.size.to_le_bytes());
    e
}

/// Root-directory entry carrying the volume label.
pub(super) fn label_entry(label: &[u8; 11], now: FatTimestamp) -> [u8; ENTRY_SIZE] {
    let meta = EntryMeta {
        attr: Attributes::VOLUME_ID,
        first_cluster: 0,
        size: 0,
        created: now,
        modified: now,
    };
    encode_short(label, 0, &meta)
}

/// A decoded short entry together with the slots it occupies.
#[derive(Debug, Clone)]
pub(super) struct DirRecord {
    pub name: String,
    pub short: [u8; 11],
    pub case: u8,
    pub meta: EntryMeta,
    pub entry: SlotPos,
    pub long_slots: Vec<SlotPos>,
}

impl DirRecord {
    fn decode(raw: &[u8], long: Option<String>, entry: SlotPos, long_slots: Vec<SlotPos>) -> Self {
        let mut short = [0u8; 11];
        short.copy_from_slice(&raw[..11]);
        let case = raw[12];
        let meta = EntryMeta {
            attr: Attributes::from_bits_retain(raw[11]),
            first_cluster: ((le16(raw, 20) as u32) << 16) | le16(raw, 26) as u32,
            size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
            created: FatTimestamp::from_fat(le16(raw, 16), le16(raw, 14)),
            modified: FatTimestamp::from_fat(le16(raw, 24), le16(raw, 22)),
        };
        Self {
            name: long.unwrap_or_else(|| name::short_display(&short, case)),
            short,
            case,
            meta,
            entry,
            long_slots,
        }
    }

    fn encode(&self) -> [u8; ENTRY_SIZE] {
        encode_short(&self.short, self.case, &self.meta)
    }

    pub fn is_dir(&self) -> bool {
        self.meta.attr.contains(Attributes::DIRECTORY)
    }

    pub fn is_label(&self) -> bool {
        self.meta.attr.contains(Attributes::VOLUME_ID) && !self.is_dir()
    }

    pub fn is_dot(&self) -> bool {
        self.short[0] == b'.'
    }

    pub fn stat(&self) -> Stat {
        Stat {
            kind: if self.is_dir() { FileType::Directory } else { FileType::Regular },
            size: self.meta.size,
            modified: self.meta.modified,
        }
    }

    fn to_entry(&self) -> DirEntry {
        let st = self.stat();
        DirEntry {
            name: self.name.clone(),
            kind: st.kind,
            size: st.size,
            modified: st.modified,
        }
    }
}

// ─── Walking directory storage ───────────────────────────────────────────────

/// Yields the LBAs of a directory's sectors in order.
pub(super) struct SectorWalk {
    loc: DirLoc,
    cluster: u32,
    index: u32,
    last: u32,
    steps: u32,
}

impl SectorWalk {
    pub fn new(loc: DirLoc) -> Self {
        let cluster = match loc {
            DirLoc::Chain(c) if c >= 2 => c,
            _ => 0,
        };
        Self { loc, cluster, index: 0, last: cluster, steps: 0 }
    }

    pub fn next_lba<D: BlockDevice>(&mut self, vol: &Volume<D>) -> Result<Option<u32>> {
        let geo = &vol.geo;
        match self.loc {
            DirLoc::FixedRoot => {
                if self.index >= geo.root_sectors {
                    return Ok(None);
                }
                self.index += 1;
                Ok(Some(geo.root_start + self.index - 1))
            }
            DirLoc::Chain(_) => {
                if self.cluster == 0 {
                    return Ok(None);
                }
                if self.cluster > geo.max_cluster() {
                    return Err(Error::Io);
                }
                let lba = geo.cluster_lba(self.cluster) + self.index;
                self.index += 1;
                if self.index == geo.sectors_per_cluster {
                    self.index = 0;
                    self.last = self.cluster;
                    self.steps += 1;
                    if self.steps > geo.cluster_count {
                        return Err(Error::Io);
                    }
                    self.cluster = vol.next_cluster(self.cluster)?.unwrap_or(0);
                }
                Ok(Some(lba))
            }
        }
    }

    /// Final cluster of the chain, once the walk has ended.
    fn last_cluster(&self) -> u32 {
        self.last
    }
}

/// Decodes records (long name + short entry) from a directory.
pub(super) struct RecordReader {
    walk: SectorWalk,
    buf: [u8; SECTOR_SIZE],
    lba: u32,
    slot: usize,
    long: LongNameBuf,
    long_slots: Vec<SlotPos>,
    done: bool,
}

impl RecordReader {
    pub fn new(loc: DirLoc) -> Self {
        Self {
            walk: SectorWalk::new(loc),
            buf: [0; SECTOR_SIZE],
            lba: 0,
            slot: ENTRIES_PER_SECTOR,
            long: LongNameBuf::default(),
            long_slots: Vec::new(),
            done: false,
        }
    }

    pub fn next<D: BlockDevice>(&mut self, vol: &Volume<D>) -> Result<Option<DirRecord>> {
        while !self.done {
            if self.slot == ENTRIES_PER_SECTOR {
                match self.walk.next_lba(vol)? {
                    Some(lba) => {
                        vol.dev.read_sectors(lba, &mut self.buf, 1)?;
                        self.lba = lba;
                        self.slot = 0;
                    }
                    None => {
                        self.done = true;
                        break;
                    }
                }
            }

            let offset = self.slot * ENTRY_SIZE;
            self.slot += 1;
            let pos = SlotPos { lba: self.lba, offset };
            let raw = &self.buf[offset..offset + ENTRY_SIZE];

            match raw[0] {
                END_OF_DIR => self.done = true,
                DELETED => {
                    self.long.reset();
                    self.long_slots.clear();
                }
                first if raw[11] & 0x3F == ATTR_LONG_NAME => {
                    if first & LFN_LAST != 0 {
                        self.long_slots.clear();
                    }
                    self.long.push(raw);
                    self.long_slots.push(pos);
                }
                _ => {
                    let mut short = [0u8; 11];
                    short.copy_from_slice(&raw[..11]);
                    let long = self.long.take(&short);
                    let long_slots = if long.is_some() {
                        core::mem::take(&mut self.long_slots)
                    } else {
                        self.long_slots.clear();
                        Vec::new()
                    };
                    return Ok(Some(DirRecord::decode(raw, long, pos, long_slots)));
                }
            }
        }
        Ok(None)
    }
}

/// Open directory handle.
pub struct Dir<'v, D: BlockDevice> {
    vol: &'v Volume<D>,
    reader: RecordReader,
}

impl<'v, D: BlockDevice> Dir<'v, D> {
    /// Next entry, skipping `.`, `..` and the volume label.
    pub fn next_entry(&mut self) -> Result<Option<DirEntry>> {
        while let Some(rec) = self.reader.next(self.vol)? {
            if rec.is_label() || rec.is_dot() {
                continue;
            }
            return Ok(Some(rec.to_entry()));
        }
        Ok(None)
    }
}

impl<'v, D: BlockDevice> Iterator for Dir<'v, D> {
    type Item = Result<DirEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().transpose()
    }
}

pub(super) enum Located {
    Root,
    Entry { parent: DirLoc, record: DirRecord },
}

/// Path components with `.` dropped and `..` applied.
fn components(path: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    parts
}

// ─── Volume operations on directories ────────────────────────────────────────

impl<D: BlockDevice> Volume<D> {
    pub(super) fn root_loc(&self) -> DirLoc {
        match self.geo.fat_type {
            super::FatType::Fat16 => DirLoc::FixedRoot,
            super::FatType::Fat32 => DirLoc::Chain(self.geo.root_cluster),
        }
    }

    /// Directory whose entry (or `..` link) names `cluster`.
    pub(super) fn loc_of(&self, cluster: u32) -> DirLoc {
        if cluster == 0 {
            self.root_loc()
        } else {
            DirLoc::Chain(cluster)
        }
    }

    /// Cluster number stored in `.`/`..` entries; the root is always 0.
    fn link_value(&self, loc: DirLoc) -> u32 {
        match loc {
            DirLoc::Chain(c) if loc != self.root_loc() => c,
            _ => 0,
        }
    }

    pub(super) fn find(&self, dir: DirLoc, wanted: &str) -> Result<Option<DirRecord>> {
        let mut reader = RecordReader::new(dir);
        while let Some(rec) = reader.next(self)? {
            if rec.is_label() {
                continue;
            }
            if name::same_name(&rec.name, wanted)
                || name::same_name(&name::short_display(&rec.short, 0), wanted)
            {
                return Ok(Some(rec));
            }
        }
        Ok(None)
    }

    fn descend(&self, dirs: &[&str]) -> Result<DirLoc> {
        let mut loc = self.root_loc();
        for part in dirs {
            let rec = self.find(loc, part)?.ok_or(Error::NotFound)?;
            if !rec.is_dir() {
                return Err(Error::NotADirectory);
            }
            loc = self.loc_of(rec.meta.first_cluster);
        }
        Ok(loc)
    }

    pub(super) fn locate(&self, path: &str) -> Result<Located> {
        let parts = components(path);
        let Some((last, dirs)) = parts.split_last() else {
            return Ok(Located::Root);
        };
        let parent = self.descend(dirs)?;
        let record = self.find(parent, last)?.ok_or(Error::NotFound)?;
        Ok(Located::Entry { parent, record })
    }

    /// Parent directory of `path` and the final component.
    pub(super) fn parent_of<'p>(&self, path: &'p str) -> Result<(DirLoc, &'p str)> {
        let parts = components(path);
        let Some((&last, dirs)) = parts.split_last() else {
            return Err(Error::InvalidPath);
        };
        name::validate(last)?;
        Ok((self.descend(dirs)?, last))
    }

    fn write_slot(&self, pos: SlotPos, bytes: &[u8]) -> Result<()> {
        let mut sector = [0u8; SECTOR_SIZE];
        self.dev.read_sectors(pos.lba, &mut sector, 1)?;
        sector[pos.offset..pos.offset + bytes.len()].copy_from_slice(bytes);
        self.dev.write_sectors(pos.lba, &sector, 1)
    }

    fn erase(&self, rec: &DirRecord) -> Result<()> {
        for &pos in rec.long_slots.iter().chain(core::iter::once(&rec.entry)) {
            self.write_slot(pos, &[DELETED])?;
        }
        Ok(())
    }

    /// `count` consecutive free slots, growing a chained directory if needed.
    fn free_run(&self, dir: DirLoc, count: usize) -> Result<Vec<SlotPos>> {
        let mut run = Vec::with_capacity(count);
        let mut walk = SectorWalk::new(dir);
        let mut sector = [0u8; SECTOR_SIZE];

        while let Some(lba) = walk.next_lba(self)? {
            self.dev.read_sectors(lba, &mut sector, 1)?;
            for slot in 0..ENTRIES_PER_SECTOR {
                let offset = slot * ENTRY_SIZE;
                if matches!(sector[offset], END_OF_DIR | DELETED) {
                    run.push(SlotPos { lba, offset });
                    if run.len() == count {
                        return Ok(run);
                    }
                } else {
                    run.clear();
                }
            }
        }

        if dir == DirLoc::FixedRoot {
            return Err(Error::NoSpace);
        }
        let mut last = walk.last_cluster();
        while run.len() < count {
            let cluster = self.alloc_cluster(Some(last))?;
            self.zero_cluster(cluster)?;
            let base = self.geo.cluster_lba(cluster);
            for s in 0..self.geo.sectors_per_cluster {
                for slot in 0..ENTRIES_PER_SECTOR {
                    if run.len() < count {
                        run.push(SlotPos { lba: base + s, offset: slot * ENTRY_SIZE });
                    }
                }
            }
            last = cluster;
        }
        Ok(run)
    }

    /// Create a directory entry (with long-name slots when needed).
    pub(super) fn insert(&self, dir: DirLoc, entry_name: &str, meta: &EntryMeta) -> Result<DirRecord> {
        name::validate(entry_name)?;
        let (short, case, long) = match name::short_form(entry_name) {
            Some((short, case)) => (short, case, Vec::new()),
            None => {
                let mut taken = Vec::new();
                let mut reader = RecordReader::new(dir);
                while let Some(rec) = reader.next(self)? {
                    taken.push(rec.short);
                }
                let short = (1..=MAX_ALIAS)
                    .map(|n| name::numbered_short(entry_name, n))
                    .find(|s| !taken.contains(s))
                    .ok_or(Error::NoSpace)?;
                (short, 0, name::lfn_slots(entry_name, name::checksum(&short)))
            }
        };

        let mut run = self.free_run(dir, long.len() + 1)?;
        let entry = run.pop().ok_or(Error::Io)?;
        for (slot, &pos) in long.iter().zip(&run) {
            self.write_slot(pos, slot)?;
        }
        let record = DirRecord {
            name: String::from(entry_name),
            short,
            case,
            meta: *meta,
            entry,
            long_slots: run,
        };
        self.write_slot(entry, &record.encode())?;
        Ok(record)
    }

    /// Rewrite the size, first cluster and modification time of an entry.
    pub(super) fn update_entry(&self, pos: SlotPos, first_cluster: u32, size: u32, modified: FatTimestamp) -> Result<()> {
        let mut sector = [0u8; SECTOR_SIZE];
        self.dev.read_sectors(pos.lba, &mut sector, 1)?;
        let e = &mut sector[pos.offset..pos.offset + ENTRY_SIZE];
        let (date, time) = modified.to_fat();
        e[11] |= Attributes::ARCHIVE.bits();
        put16(e, 18, date);
        put16(e, 20, (first_cluster >> 16) as u16);
        put16(e, 22, time);
        put16(e, 24, date);
        put16(e, 26, first_cluster as u16);
        e[28..32].copy_from_slice(&size.to_le_bytes());
        self.dev.write_sectors(pos.lba, &sector, 1)
    }

    fn is_empty_dir(&self, loc: DirLoc) -> Result<bool> {
        let mut reader = RecordReader::new(loc);
        while let Some(rec) = reader.next(self)? {
            if !rec.is_dot() && !rec.is_label() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn write_dot_entries(&self, cluster: u32, parent: DirLoc) -> Result<()> {
        let now = self.now();
        let meta = |first_cluster| EntryMeta {
            attr: Attributes::DIRECTORY,
            first_cluster,
            size: 0,
            created: now,
            modified: now,
        };
        let mut sector = [0u8; SECTOR_SIZE];
        sector[..ENTRY_SIZE].copy_from_slice(&encode_short(b".          ", 0, &meta(cluster)));
        sector[ENTRY_SIZE..2 * ENTRY_SIZE]
            .copy_from_slice(&encode_short(b"..         ", 0, &meta(self.link_value(parent))));
        self.dev.write_sectors(self.geo.cluster_lba(cluster), &sector, 1)
    }

    /// Refuse to move a directory into its own subtree.
    fn check_not_within(&self, mut loc: DirLoc, moving: u32) -> Result<()> {
        for _ in 0..=self.geo.cluster_count {
            if loc == DirLoc::Chain(moving) {
                return Err(Error::InvalidArgument);
            }
            if loc == self.root_loc() {
                return Ok(());
            }
            let up = self.find(loc, "..")?.ok_or(Error::Io)?;
            loc = self.loc_of(up.meta.first_cluster);
        }
        Err(Error::Io)
    }

    pub fn mkdir(&self, path: &str) -> Result<()> {
        let (parent, dir_name) = self.parent_of(path)?;
        if self.find(parent, dir_name)?.is_some() {
            return Err(Error::AlreadyExists);
        }

        let cluster = self.alloc_cluster(None)?;
        let now = self.now();
        let meta = EntryMeta {
            attr: Attributes::DIRECTORY,
            first_cluster: cluster,
            size: 0,
            created: now,
            modified: now,
        };
        let made = self
            .zero_cluster(cluster)
            .and_then(|_| self.write_dot_entries(cluster, parent))
            .and_then(|_| self.insert(parent, dir_name, &meta));

        if let Err(e) = made {
            if let Err(undo) = self.free_chain(cluster) {
                log::warn!("FAT: could not release cluster {}: {}", cluster, undo);
            }
            self.flush_fat()?;
            return Err(e);
        }
        self.flush_fat()?;
        log::debug!("FAT: mkdir {} -> cluster {}", path, cluster);
        Ok(())
    }

    /// Remove a file or an empty directory.
    pub fn unlink(&self, path: &str) -> Result<()> {
        let (parent, entry_name) = self.parent_of(path)?;
        let rec = self.find(parent, entry_name)?.ok_or(Error::NotFound)?;
        let first = rec.meta.first_cluster;

        if rec.is_dir() && first >= 2 && !self.is_empty_dir(DirLoc::Chain(first))? {
            return Err(Error::DirectoryNotEmpty);
        }
        self.erase(&rec)?;
        if first >= 2 {
            self.free_chain(first)?;
        }
        self.flush_fat()
    }

    /// Rename or move an entry within this volume.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let (old_parent, old_name) = self.parent_of(old)?;
        let rec = self.find(old_parent, old_name)?.ok_or(Error::NotFound)?;
        let (new_parent, new_name) = self.parent_of(new)?;

        if let Some(existing) = self.find(new_parent, new_name)? {
            if existing.entry != rec.entry {
                return Err(Error::AlreadyExists);
            }
        }
        let moved_dir = rec.is_dir() && rec.meta.first_cluster >= 2;
        if moved_dir {
            self.check_not_within(new_parent, rec.meta.first_cluster)?;
        }

        self.insert(new_parent, new_name, &rec.meta)?;
        self.erase(&rec)?;

        if moved_dir && new_parent != old_parent {
            let loc = DirLoc::Chain(rec.meta.first_cluster);
            let mut up = self.find(loc, "..")?.ok_or(Error::Io)?;
            up.meta.first_cluster = self.link_value(new_parent);
            self.write_slot(up.entry, &up.encode())?;
        }
        self.flush_fat()
    }

    pub fn stat(&self, path: &str) -> Result<Stat> {
        match self.locate(path)? {
            Located::Root => Ok(Stat {
                kind: FileType::Directory,
                size: 0,
                modified: FatTimestamp::epoch(),
            }),
            Located::Entry { record, .. } => Ok(record.stat()),
        }
    }

    /// Size in bytes of a regular file.
    pub fn stat_size(&self, path: &str) -> Result<u32> {
        let st = self.stat(path)?;
        if st.kind == FileType::Directory {
            return Err(Error::IsADirectory);
        }
        Ok(st.size)
    }

    /// Whether two paths name the same directory entry, whatever spelling
    /// (long name, `~N` alias, case) each uses. A missing path matches
    /// nothing.
    pub fn same_entry(&self, a: &str, b: &str) -> Result<bool> {
        let slot = |path: &str| match self.locate(path) {
            Ok(Located::Root) => Ok(Some(None)),
            Ok(Located::Entry { record, .. }) => Ok(Some(Some(record.entry))),
            Err(Error::NotFound | Error::NotADirectory) => Ok(None),
            Err(e) => Err(e),
        };
        Ok(match (slot(a)?, slot(b)?) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        })
    }

    pub fn open_dir(&self, path: &str) -> Result<Dir<'_, D>> {
        let loc = match self.locate(path)? {
            Located::Root => self.root_loc(),
            Located::Entry { record, .. } if record.is_dir() => self.loc_of(record.meta.first_cluster),
            Located::Entry { .. } => return Err(Error::NotADirectory),
        };
        Ok(Dir { vol: self, reader: RecordReader::new(loc) })
    }

    /// Volume label from the root directory, falling back to the boot sector.
    pub fn label(&self) -> Result<String> {
        let mut raw = self.bpb.label;
        let mut reader = RecordReader::new(self.root_loc());
        while let Some(rec) = reader.next(self)? {
            if rec.is_label() {
                raw = rec.short;
                break;
            }
        }
        let label = core::str::from_utf8(&raw).unwrap_or("").trim_end();
        Ok(if label == "NO NAME" { String::new() } else { String::from(label) })
    }
}
