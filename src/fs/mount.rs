//! The storage context: controller, drive map, mounted volumes and the
//! per-drive working directories.

use super::block::LogicalDisk;
use super::drives::DriveMap;
use super::fat::{self, FatType, FormatOptions, Volume};
use super::path;
use crate::arch::x86_64::io::PortIo;
use crate::config::{StorageConfig, MAX_LOGICAL_DRIVES};
use crate::drivers::ide::IdeController;
use crate::error::{Error, Result};
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub type DriveVolume<P> = Volume<LogicalDisk<P>>;

/// What the `drives` command shows for one logical drive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveInfo {
    pub logical: usize,
    pub slot: usize,
    pub channel: u8,
    pub slave: bool,
    pub model: String,
    pub serial: String,
    pub size_mb: u64,
    /// `None` when the disk carries no mountable volume.
    pub fat_type: Option<FatType>,
    /// Volume label, empty when unlabeled.
    pub label: Option<String>,
    pub volume_serial: Option<u32>,
}

pub struct StorageManager<P: PortIo> {
    controller: Arc<IdeController<P>>,
    map: DriveMap,
    volumes: [Option<DriveVolume<P>>; MAX_LOGICAL_DRIVES],
    cwds: [String; MAX_LOGICAL_DRIVES],
    current: usize,
    config: StorageConfig,
}

fn root_of(drive: usize) -> String {
    format!("{}:/", drive)
}

impl<P: PortIo> StorageManager<P> {
    /// A context with nothing probed; call [`mount_all`](Self::mount_all).
    pub fn new(ports: P, config: StorageConfig) -> Self {
        Self {
            controller: Arc::new(IdeController::new(ports, config.timing)),
            map: DriveMap::empty(),
            volumes: core::array::from_fn(|_| None),
            cwds: core::array::from_fn(root_of),
            current: 0,
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut StorageConfig {
        &mut self.config
    }

    pub fn controller(&self) -> &IdeController<P> {
        &self.controller
    }

    pub fn drive_map(&self) -> &DriveMap {
        &self.map
    }

    fn unmount_all(&mut self) {
        for slot in self.volumes.iter_mut() {
            if let Some(vol) = slot.take() {
                drop(vol.into_device());
            }
        }
    }

    fn mount_one(&mut self, logical: usize, slot: usize) -> Result<FatType> {
        let disk = LogicalDisk::new(Arc::clone(&self.controller), slot)?;
        let vol = Volume::mount(disk, self.config.clock)?;
        let fat_type = vol.fat_type();
        self.volumes[logical] = Some(vol);
        Ok(fat_type)
    }

    /// Probe every slot, rebuild the drive map, and mount what can be
    /// mounted. Returns the number of mounted volumes.
    ///
    /// Drives without a FAT volume stay mapped so they can be formatted.
    /// Working directories reset to each drive's root.
    pub fn mount_all(&mut self) -> Result<usize> {
        self.unmount_all();
        let controller = Arc::get_mut(&mut self.controller).ok_or(Error::NotReady)?;
        let present = controller.probe_all();
        self.map = DriveMap::build(&self.controller);
        self.cwds = core::array::from_fn(root_of);
        self.current = self.map.mapped().next().map_or(0, |(logical, _)| logical);

        let mapped: Vec<(usize, usize)> = self.map.mapped().collect();
        let mut mounted = 0;
        for (logical, slot) in mapped {
            match self.mount_one(logical, slot) {
                Ok(fat_type) => {
                    log::info!("STORAGE: {}: mounted ({})", logical, fat_type.name());
                    mounted += 1;
                }
                Err(e) => log::warn!("STORAGE: {}: not mounted: {}", logical, e),
            }
        }
        log::info!("STORAGE: {} disk(s) present, {} volume(s) mounted", present, mounted);
        Ok(mounted)
    }

    /// The mounted volume of logical drive `idx`.
    ///
    /// Unmapped or out-of-range drives are `NotInitialized`; mapped drives
    /// without a volume are `NotReady`.
    pub fn volume(&self, idx: usize) -> Result<&DriveVolume<P>> {
        self.map.physical(idx).ok_or(Error::NotInitialized)?;
        self.volumes[idx].as_ref().ok_or(Error::NotReady)
    }

    pub fn current_drive(&self) -> usize {
        self.current
    }

    pub fn current_dir(&self) -> &str {
        &self.cwds[self.current]
    }

    pub fn cwd_of(&self, idx: usize) -> Option<&str> {
        self.cwds.get(idx).map(String::as_str)
    }

    /// Canonical form of `input` against the current drive and its CWD.
    pub fn canonicalize(&self, input: &str) -> Result<String> {
        path::canonicalize(input, &self.cwds, self.current, self.config.max_path_len)
    }

    /// Make `input` the working directory of its drive, and that drive the
    /// current one. Nothing changes if the target is not a directory.
    pub fn change_directory(&mut self, input: &str) -> Result<()> {
        let canonical = self.canonicalize(input)?;
        let (drive, on_volume) = path::split_canonical(&canonical)?;
        self.volume(drive)?.open_dir(on_volume)?;

        log::debug!("STORAGE: cwd {} -> {}", self.cwds[drive], canonical);
        self.cwds[drive] = canonical;
        self.current = drive;
        Ok(())
    }

    pub fn drives(&self) -> Vec<DriveInfo> {
        self.map
            .mapped()
            .filter_map(|(logical, slot)| {
                let d = self.controller.slot_info(slot)?;
                let vol = self.volumes[logical].as_ref();
                Some(DriveInfo {
                    logical,
                    slot,
                    channel: d.channel(),
                    slave: d.is_slave(),
                    model: d.model.clone(),
                    serial: d.serial.clone(),
                    size_mb: d.size_mb(),
                    fat_type: vol.map(Volume::fat_type),
                    label: vol.and_then(|v| v.label().ok()),
                    volume_serial: vol.map(Volume::serial),
                })
            })
            .collect()
    }

    /// Erase logical drive `idx` with a fresh filesystem of automatic type.
    ///
    /// Refuses with `NotConfirmed` before touching the disk unless
    /// `confirmed` is set.
    pub fn format(&mut self, idx: usize, confirmed: bool) -> Result<FatType> {
        if !confirmed {
            return Err(Error::NotConfirmed);
        }
        self.format_with(idx, &FormatOptions::default())
    }

    /// Format with explicit options. Confirmation is the caller's job.
    pub fn format_with(&mut self, idx: usize, opts: &FormatOptions) -> Result<FatType> {
        let slot = self.map.physical(idx).ok_or(Error::NotInitialized)?;
        if let Some(vol) = self.volumes[idx].take() {
            drop(vol.into_device());
        }

        let disk = LogicalDisk::new(Arc::clone(&self.controller), slot)?;
        let fat_type = fat::format::format(&disk, opts, (self.config.clock)())?;
        self.volumes[idx] = Some(Volume::mount(disk, self.config.clock)?);
        self.cwds[idx] = root_of(idx);
        log::info!("STORAGE: {}: formatted as {}", idx, fat_type.name());
        Ok(fat_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::fat::FatKind;
    use crate::testing::{formatted_storage, single_drive, test_config, SimBus, SimDisk, FAT16_DISK};

    #[test]
    fn no_disks_means_no_drives() {
        let mut storage = StorageManager::new(SimBus::new(), test_config());
        assert_eq!(storage.mount_all().unwrap(), 0);
        assert!(storage.drive_map().is_empty());
        assert_eq!(storage.volume(0).err(), Some(Error::NotInitialized));
        assert_eq!(storage.format(0, true), Err(Error::NotInitialized));
        assert_eq!(storage.current_dir(), "0:/");
    }

    #[test]
    fn blank_disk_is_mapped_but_not_ready_until_formatted() {
        let mut bus = SimBus::new();
        bus.attach(2, SimDisk::new(FAT16_DISK));
        let mut storage = StorageManager::new(bus, test_config());

        assert_eq!(storage.mount_all().unwrap(), 0);
        assert_eq!(storage.drive_map().physical(0), Some(2));
        assert_eq!(storage.volume(0).err(), Some(Error::NotReady));
        assert_eq!(storage.volume(1).err(), Some(Error::NotInitialized));
        assert_eq!(storage.drives()[0].fat_type, None);
        assert_eq!(storage.drives()[0].volume_serial, None);

        assert_eq!(storage.format(0, true).unwrap(), FatType::Fat16);
        assert!(storage.volume(0).is_ok());
        assert_eq!(storage.drives()[0].fat_type, Some(FatType::Fat16));
    }

    #[test]
    fn garbage_boot_sector_leaves_the_drive_unmounted() {
        let mut boot = [0u8; 512];
        boot[11..13].copy_from_slice(&512u16.to_le_bytes());
        boot[13] = 1;
        boot[14..16].copy_from_slice(&32u16.to_le_bytes());
        boot[16] = 2;
        boot[32..36].copy_from_slice(&70_000u32.to_le_bytes());
        boot[36..40].copy_from_slice(&0x8000_0000u32.to_le_bytes());
        boot[44..48].copy_from_slice(&2u32.to_le_bytes());
        boot[510] = 0x55;
        boot[511] = 0xAA;

        let mut disk = SimDisk::new(70_000);
        disk.fill_sector(0, &boot);
        let mut bus = SimBus::new();
        bus.attach(0, disk);
        let mut storage = StorageManager::new(bus, test_config());

        assert_eq!(storage.mount_all().unwrap(), 0);
        assert_eq!(storage.volume(0).err(), Some(Error::NotReady));
        assert_eq!(storage.format(0, true).unwrap(), FatType::Fat16);
    }

    #[test]
    fn unconfirmed_format_touches_nothing() {
        let mut storage = single_drive();
        storage.write_all("keep.txt", b"precious").unwrap();
        storage.controller().with_ports(|bus| bus.clear_log());

        assert_eq!(storage.format(0, false), Err(Error::NotConfirmed));
        storage.controller().with_ports(|bus| assert!(bus.commands.is_empty()));
        assert_eq!(storage.read_all("keep.txt").unwrap(), b"precious");
    }

    #[test]
    fn volumes_survive_remount() {
        let mut storage = single_drive();
        storage.mkdir("0:/docs").unwrap();
        storage.write_all("0:/docs/a.txt", b"abc").unwrap();
        assert_eq!(storage.mount_all().unwrap(), 1);
        assert_eq!(storage.read_all("0:/docs/a.txt").unwrap(), b"abc");
    }

    #[test]
    fn change_directory_commits_only_directories() {
        let mut storage = single_drive();
        storage.mkdir("docs").unwrap();
        storage.create("docs/file").unwrap();

        storage.change_directory("docs").unwrap();
        assert_eq!(storage.current_dir(), "0:/docs/");
        assert_eq!(storage.size_of("file").unwrap(), 0);

        assert_eq!(storage.change_directory("file"), Err(Error::NotADirectory));
        assert_eq!(storage.change_directory("missing"), Err(Error::NotFound));
        assert_eq!(storage.current_dir(), "0:/docs/");

        storage.change_directory("..").unwrap();
        assert_eq!(storage.current_dir(), "0:/");
    }

    #[test]
    fn each_drive_keeps_its_own_cwd() {
        let mut storage = formatted_storage(vec![
            (0, SimDisk::new(FAT16_DISK)),
            (3, SimDisk::new(FAT16_DISK).with_model("SECOND DISK")),
        ]);
        storage.mkdir("0:/a").unwrap();
        storage.mkdir("1:/b").unwrap();

        storage.change_directory("0:/a").unwrap();
        storage.change_directory("1:/b").unwrap();
        assert_eq!(storage.current_drive(), 1);
        assert_eq!(storage.cwd_of(0), Some("0:/a/"));
        assert_eq!(storage.current_dir(), "1:/b/");

        storage.create("here").unwrap();
        assert!(storage.read_all("1:/b/here").unwrap().is_empty());
        assert_eq!(storage.canonicalize("0:").unwrap(), "0:/a/");

        let drives = storage.drives();
        assert_eq!(drives.len(), 2);
        assert_eq!((drives[1].slot, drives[1].channel, drives[1].slave), (3, 1, true));
        assert_eq!(drives[1].model, "SECOND DISK");
        assert_eq!(drives[1].label.as_deref(), Some(""));
        assert!(drives[1].volume_serial.is_some());
    }

    #[test]
    fn format_with_forced_fat32() {
        let mut storage = formatted_storage(vec![(0, SimDisk::new(70_000))]);
        let opts = FormatOptions { kind: FatKind::Fat32, ..FormatOptions::default() };
        assert_eq!(storage.format_with(0, &opts).unwrap(), FatType::Fat32);

        storage.write_all("big.bin", &[7u8; 3000]).unwrap();
        assert_eq!(storage.size_of("0:/big.bin").unwrap(), 3000);
        assert_eq!(storage.mount_all().unwrap(), 1);
        assert_eq!(storage.volume(0).unwrap().fat_type(), FatType::Fat32);
    }
}
