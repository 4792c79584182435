//! Path-based file operations on a [`StorageManager`].
//!
//! Every operation canonicalizes its paths against the current drive and
//! working directory before touching a volume. Handles are scoped: an early
//! return drops them, and dropping flushes.

use super::mount::{DriveVolume, StorageManager};
use super::path;
use super::vfs::{DirEntry, DiskUsage, Existence, FileType, OpenMode, PageControl, TreeEntry};
use crate::arch::x86_64::io::PortIo;
use crate::error::{Error, Result};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

/// A canonicalized path argument.
struct Target {
    drive: usize,
    canonical: String,
}

impl Target {
    /// The path inside the volume, e.g. `"/docs/a.txt/"`.
    fn on_volume(&self) -> &str {
        &self.canonical[2..]
    }
}

impl<P: PortIo> StorageManager<P> {
    fn target(&self, input: &str) -> Result<Target> {
        let canonical = self.canonicalize(input)?;
        let (drive, _) = path::split_canonical(&canonical)?;
        Ok(Target { drive, canonical })
    }

    fn open_target(&self, input: &str) -> Result<(&DriveVolume<P>, Target)> {
        let t = self.target(input)?;
        Ok((self.volume(t.drive)?, t))
    }

    /// Whether `input` names a directory, a file, or nothing.
    pub fn exists(&self, input: &str) -> Result<Existence> {
        let (vol, t) = self.open_target(input)?;
        match vol.open_dir(t.on_volume()) {
            Ok(_) => return Ok(Existence::Directory),
            Err(Error::NotFound | Error::NotADirectory) => {}
            Err(e) => return Err(e),
        }
        match vol.open(t.on_volume(), OpenMode::READ) {
            Ok(_) => Ok(Existence::File),
            Err(Error::NotFound | Error::NotADirectory) => Ok(Existence::None),
            Err(e) => Err(e),
        }
    }

    /// Create an empty file, truncating an existing one.
    pub fn create(&self, input: &str) -> Result<()> {
        let (vol, t) = self.open_target(input)?;
        vol.open(t.on_volume(), OpenMode::CREATE_ALWAYS)?.close()
    }

    /// Replace the contents of a file. A short write is an `Io` error.
    pub fn write_all(&self, input: &str, data: &[u8]) -> Result<()> {
        let (vol, t) = self.open_target(input)?;
        let mut file = vol.open(t.on_volume(), OpenMode::CREATE_ALWAYS)?;
        if file.write(data)? != data.len() {
            return Err(Error::Io);
        }
        file.close()
    }

    pub fn append(&self, input: &str, data: &[u8]) -> Result<()> {
        let (vol, t) = self.open_target(input)?;
        let mut file = vol.open(t.on_volume(), OpenMode::OPEN_APPEND)?;
        file.seek_to_end();
        if file.write(data)? != data.len() {
            return Err(Error::Io);
        }
        file.close()
    }

    pub fn read_all(&self, input: &str) -> Result<Vec<u8>> {
        let (vol, t) = self.open_target(input)?;
        let mut file = vol.open(t.on_volume(), OpenMode::READ)?;
        let mut data = vec![0u8; file.size() as usize];
        let mut filled = 0;
        while filled < data.len() {
            match file.read(&mut data[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        data.truncate(filled);
        Ok(data)
    }

    /// Read from the start of a file into `buf`. Returns the bytes read.
    pub fn read_all_into(&self, input: &str, buf: &mut [u8]) -> Result<usize> {
        self.read_at(input, 0, buf)
    }

    /// Read from `offset`. Returns 0 at end of file.
    pub fn read_at(&self, input: &str, offset: u32, buf: &mut [u8]) -> Result<usize> {
        let (vol, t) = self.open_target(input)?;
        let mut file = vol.open(t.on_volume(), OpenMode::READ)?;
        file.seek(offset)?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..])? {
                0 => break,
                n => filled += n,
            }
        }
        Ok(filled)
    }

    /// Copy a file, possibly across drives.
    pub fn copy(&self, src: &str, dst: &str) -> Result<()> {
        let (from_vol, from) = self.open_target(src)?;
        let (to_vol, to) = self.open_target(dst)?;
        if from.drive == to.drive && from_vol.same_entry(from.on_volume(), to.on_volume())? {
            return Err(Error::InvalidArgument);
        }

        let mut input = from_vol.open(from.on_volume(), OpenMode::READ)?;
        let mut output = to_vol.open(to.on_volume(), OpenMode::CREATE_ALWAYS)?;
        let mut chunk = vec![0u8; self.config().copy_chunk.max(1)];
        loop {
            let n = input.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            if output.write(&chunk[..n])? != n {
                log::warn!("STORAGE: short write copying {} to {}", from.canonical, to.canonical);
                return Err(Error::Io);
            }
        }
        output.close()
    }

    /// Remove a file or an empty directory.
    pub fn delete(&self, input: &str) -> Result<()> {
        let (vol, t) = self.open_target(input)?;
        vol.unlink(t.on_volume())
    }

    /// Rename or move within one drive.
    pub fn rename(&self, old: &str, new: &str) -> Result<()> {
        let (vol, from) = self.open_target(old)?;
        let to = self.target(new)?;
        if from.drive != to.drive {
            return Err(Error::InvalidArgument);
        }
        vol.rename(from.on_volume(), to.on_volume())
    }

    pub fn mkdir(&self, input: &str) -> Result<()> {
        let (vol, t) = self.open_target(input)?;
        vol.mkdir(t.on_volume())
    }

    /// All entries of a directory, `.` and `..` excluded.
    pub fn list(&self, input: &str) -> Result<Vec<DirEntry>> {
        let (vol, t) = self.open_target(input)?;
        vol.open_dir(t.on_volume())?.collect()
    }

    /// Hand a directory's entries to `on_page` in groups of `page_size`.
    /// Returns how many entries were delivered.
    pub fn list_paged<F>(&self, input: &str, page_size: usize, mut on_page: F) -> Result<usize>
    where
        F: FnMut(&[DirEntry]) -> PageControl,
    {
        if page_size == 0 {
            return Err(Error::InvalidArgument);
        }
        let (vol, t) = self.open_target(input)?;
        let mut dir = vol.open_dir(t.on_volume())?;
        let mut page = Vec::with_capacity(page_size);
        let mut delivered = 0;

        while let Some(entry) = dir.next_entry()? {
            page.push(entry);
            if page.len() == page_size {
                delivered += page.len();
                if on_page(&page) == PageControl::Stop {
                    return Ok(delivered);
                }
                page.clear();
            }
        }
        if !page.is_empty() {
            delivered += page.len();
            on_page(&page);
        }
        Ok(delivered)
    }

    /// Depth-first listing below a directory. A directory precedes its
    /// contents.
    pub fn list_recursive(&self, input: &str) -> Result<Vec<TreeEntry>> {
        let (vol, t) = self.open_target(input)?;
        let mut out = Vec::new();
        self.walk(vol, &t.canonical, 0, &mut out)?;
        Ok(out)
    }

    fn walk(&self, vol: &DriveVolume<P>, dir: &str, depth: usize, out: &mut Vec<TreeEntry>) -> Result<()> {
        if dir.len() > self.config().max_path_len {
            return Err(Error::InvalidPath);
        }
        let entries: Vec<DirEntry> = vol.open_dir(&dir[2..])?.collect::<Result<_>>()?;
        for entry in entries {
            let child = path::join(dir, &entry.name);
            out.push(TreeEntry {
                path: String::from(path::display(&child)),
                depth,
                kind: entry.kind,
                size: entry.size,
            });
            if entry.kind == FileType::Directory {
                self.walk(vol, &child, depth + 1, out)?;
            }
        }
        Ok(())
    }

    pub fn size_of(&self, input: &str) -> Result<u32> {
        let (vol, t) = self.open_target(input)?;
        vol.stat_size(t.on_volume())
    }

    pub fn disk_usage(&self, idx: usize) -> Result<DiskUsage> {
        let vol = self.volume(idx)?;
        Ok(DiskUsage {
            total_bytes: vol.total_bytes(),
            free_bytes: vol.free_space()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{formatted_storage, single_drive, SimDisk, FAT16_DISK};

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn write_then_read_round_trips() {
        let storage = single_drive();
        for len in [0, 1, 511, 512, 513, 4 * 512, 5 * 512 + 300] {
            let data = pattern(len);
            storage.write_all("data.bin", &data).unwrap();
            assert_eq!(storage.read_all("data.bin").unwrap(), data, "length {}", len);
            assert_eq!(storage.size_of("0:/data.bin").unwrap(), len as u32);
        }
    }

    #[test]
    fn append_grows_the_file() {
        let storage = single_drive();
        storage.append("log.txt", b"one ").unwrap();
        storage.append("log.txt", b"two").unwrap();
        assert_eq!(storage.read_all("log.txt").unwrap(), b"one two");
    }

    #[test]
    fn chunked_reads() {
        let storage = single_drive();
        let data = pattern(1300);
        storage.write_all("c.bin", &data).unwrap();

        let mut buf = [0u8; 600];
        assert_eq!(storage.read_at("c.bin", 1000, &mut buf).unwrap(), 300);
        assert_eq!(&buf[..300], &data[1000..]);
        assert_eq!(storage.read_at("c.bin", 1300, &mut buf).unwrap(), 0);
        assert_eq!(storage.read_at("c.bin", 1301, &mut buf), Err(Error::InvalidArgument));
        assert_eq!(storage.read_all_into("c.bin", &mut buf).unwrap(), 600);
        assert_eq!(&buf[..], &data[..600]);
    }

    #[test]
    fn copy_matches_source_including_empty_files() {
        let storage = single_drive();
        storage.create("empty").unwrap();
        storage.copy("empty", "empty.copy").unwrap();
        assert_eq!(storage.size_of("empty.copy").unwrap(), 0);

        let data = pattern(3 * 512 + 5);
        storage.write_all("src.bin", &data).unwrap();
        storage.copy("src.bin", "dst.bin").unwrap();
        assert_eq!(storage.size_of("dst.bin").unwrap(), storage.size_of("src.bin").unwrap());
        assert_eq!(storage.read_all("dst.bin").unwrap(), data);

        assert_eq!(storage.copy("src.bin", "./SRC.BIN"), Err(Error::InvalidArgument));
        assert_eq!(storage.copy("missing", "x"), Err(Error::NotFound));
        assert_eq!(storage.exists("x").unwrap(), Existence::None);
    }

    #[test]
    fn copy_onto_its_own_alias_is_refused() {
        let storage = single_drive();
        let data = pattern(3000);
        storage.write_all("My Long File.text", &data).unwrap();

        assert_eq!(storage.copy("MYLONG~1.TEX", "My Long File.text"), Err(Error::InvalidArgument));
        assert_eq!(storage.copy("my long file.TEXT", "0:/mylong~1.tex"), Err(Error::InvalidArgument));
        assert_eq!(storage.read_all("My Long File.text").unwrap(), data);

        storage.copy("MYLONG~1.TEX", "other.text").unwrap();
        assert_eq!(storage.read_all("other.text").unwrap(), data);
    }

    #[test]
    fn copy_across_drives() {
        let storage = formatted_storage(vec![
            (0, SimDisk::new(FAT16_DISK)),
            (1, SimDisk::new(FAT16_DISK)),
        ]);
        storage.write_all("0:/a.txt", b"travels").unwrap();
        storage.copy("0:/a.txt", "1:/b.txt").unwrap();
        assert_eq!(storage.read_all("1:/b.txt").unwrap(), b"travels");
        assert_eq!(storage.rename("0:/a.txt", "1:/a.txt"), Err(Error::InvalidArgument));
    }

    #[test]
    fn delete_rename_and_exists() {
        let storage = single_drive();
        storage.mkdir("dir").unwrap();
        storage.create("dir/f.txt").unwrap();
        assert_eq!(storage.exists("dir").unwrap(), Existence::Directory);
        assert_eq!(storage.exists("dir/f.txt").unwrap(), Existence::File);
        assert_eq!(storage.exists("0:/").unwrap(), Existence::Directory);

        storage.rename("dir/f.txt", "dir/g.txt").unwrap();
        assert_eq!(storage.exists("dir/f.txt").unwrap(), Existence::None);
        assert_eq!(storage.exists("dir/g.txt").unwrap(), Existence::File);

        assert_eq!(storage.delete("dir"), Err(Error::DirectoryNotEmpty));
        storage.delete("dir/g.txt").unwrap();
        assert_eq!(storage.exists("dir/g.txt").unwrap(), Existence::None);
        storage.delete("dir").unwrap();
        assert_eq!(storage.exists("dir").unwrap(), Existence::None);
    }

    #[test]
    fn listings() {
        let storage = single_drive();
        storage.mkdir("a").unwrap();
        storage.mkdir("a/b").unwrap();
        storage.write_all("a/b/deep.txt", b"xyz").unwrap();
        storage.create("top.txt").unwrap();

        let names: Vec<String> = storage.list("/").unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, ["a", "top.txt"]);

        let tree = storage.list_recursive("0:/").unwrap();
        let summary: Vec<(&str, usize)> = tree.iter().map(|e| (e.path.as_str(), e.depth)).collect();
        assert_eq!(
            summary,
            [("0:/a", 0), ("0:/a/b", 1), ("0:/a/b/deep.txt", 2), ("0:/top.txt", 0)]
        );
        assert_eq!(tree[2].size, 3);
        assert_eq!(storage.list("top.txt"), Err(Error::NotADirectory));
    }

    #[test]
    fn paged_listing_can_stop_early() {
        let storage = single_drive();
        for i in 0..7 {
            storage.create(&format!("f{}", i)).unwrap();
        }

        let mut pages = Vec::new();
        let seen = storage
            .list_paged("/", 3, |page| {
                pages.push(page.len());
                PageControl::Continue
            })
            .unwrap();
        assert_eq!((seen, pages), (7, vec![3, 3, 1]));

        let seen = storage.list_paged("/", 3, |_| PageControl::Stop).unwrap();
        assert_eq!(seen, 3);
        assert_eq!(storage.list_paged("/", 0, |_| PageControl::Continue), Err(Error::InvalidArgument));
    }

    #[test]
    fn disk_usage_tracks_writes() {
        let storage = single_drive();
        let before = storage.disk_usage(0).unwrap();
        assert_eq!(before.used_bytes(), 0);
        storage.write_all("f", &pattern(2048)).unwrap();
        let after = storage.disk_usage(0).unwrap();
        assert_eq!(after.total_bytes, before.total_bytes);
        assert_eq!(after.used_bytes(), 2048);
        assert_eq!(storage.disk_usage(3), Err(Error::NotInitialized));
    }

    #[test]
    fn errors_from_bad_paths() {
        let storage = single_drive();
        assert_eq!(storage.read_all("9:/x"), Err(Error::InvalidArgument));
        assert_eq!(storage.read_all("1:/x"), Err(Error::NotInitialized));
        assert_eq!(storage.write_all("bad?name", b""), Err(Error::InvalidPath));
        assert_eq!(storage.size_of("/"), Err(Error::IsADirectory));
        assert_eq!(storage.create("nodir/f"), Err(Error::NotFound));
    }
}
