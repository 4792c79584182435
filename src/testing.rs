//! Test fixtures: an emulated two-channel IDE bus and storage builders.

use crate::arch::x86_64::io::{PortIo, POST_PORT};
use crate::config::{AtaTiming, StorageConfig};
use crate::drivers::ide::{
    AtaStatus, CMD_IDENTIFY, CMD_READ_PIO, CMD_WRITE_PIO, CTRL_SRST, REG_COMMAND, REG_DATA,
    REG_ERROR, REG_HDDEVSEL, REG_LBA0, REG_LBA1, REG_LBA2, REG_SECCOUNT, SECTOR_SIZE,
};
use crate::fs::fat::FatTimestamp;
use crate::fs::mount::StorageManager;
use std::collections::BTreeMap;

const ERR_ABRT: u8 = 0x04;
const ERR_IDNF: u8 = 0x10;
const ZERO_SECTOR: [u8; SECTOR_SIZE] = [0; SECTOR_SIZE];

/// A sparse in-memory ATA disk. Unwritten sectors read as zeros.
pub struct SimDisk {
    sectors: u32,
    data: BTreeMap<u32, [u8; SECTOR_SIZE]>,
    model: String,
    atapi: bool,
    bad: Vec<u32>,
    stalled: Vec<u32>,
}

impl SimDisk {
    pub fn new(sectors: u32) -> Self {
        Self {
            sectors,
            data: BTreeMap::new(),
            model: String::from("SIM HARDDISK"),
            atapi: false,
            bad: Vec::new(),
            stalled: Vec::new(),
        }
    }

    /// A packet device: aborts IDENTIFY and leaves the ATAPI signature.
    pub fn atapi() -> Self {
        let mut disk = Self::new(0);
        disk.atapi = true;
        disk
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = String::from(model);
        self
    }

    /// Commands on `lba` complete with ERR set.
    pub fn with_bad_sector(mut self, lba: u32) -> Self {
        self.bad.push(lba);
        self
    }

    /// Commands on `lba` leave BSY set forever.
    pub fn with_stalled_sector(mut self, lba: u32) -> Self {
        self.stalled.push(lba);
        self
    }

    pub fn fill_sector(&mut self, lba: u32, bytes: &[u8]) {
        let mut sector = [0u8; SECTOR_SIZE];
        sector[..bytes.len()].copy_from_slice(bytes);
        self.data.insert(lba, sector);
    }

    pub fn sector(&self, lba: u32) -> &[u8] {
        self.data.get(&lba).map_or(&ZERO_SECTOR[..], |s| &s[..])
    }

    fn identify_words(&self, slot: usize) -> [u16; 256] {
        let mut words = [0u16; 256];
        words[0] = 0x0040;
        words[49] = 0x0200;
        words[60] = (self.sectors & 0xFFFF) as u16;
        words[61] = (self.sectors >> 16) as u16;
        put_ata_string(&mut words[10..20], &format!("SIM{}", slot));
        put_ata_string(&mut words[27..47], &self.model);
        words
    }
}

fn put_ata_string(words: &mut [u16], s: &str) {
    let mut bytes = vec![b' '; words.len() * 2];
    for (dst, src) in bytes.iter_mut().zip(s.bytes()) {
        *dst = src;
    }
    for (i, w) in words.iter_mut().enumerate() {
        *w = ((bytes[2 * i] as u16) << 8) | bytes[2 * i + 1] as u16;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimCommand {
    pub slot: usize,
    pub command: u8,
    pub lba: u32,
}

enum Phase {
    Idle,
    DataIn { words: Vec<u16>, pos: usize },
    DataOut { lba: u32, bytes: Vec<u8> },
    Stalled,
}

struct Channel {
    drives: [Option<SimDisk>; 2],
    floating: bool,
    selected: usize,
    head: u8,
    count: u8,
    lba: [u8; 3],
    status: u8,
    error: u8,
    phase: Phase,
}

impl Channel {
    fn new() -> Self {
        Self {
            drives: [None, None],
            floating: false,
            selected: 0,
            head: 0,
            count: 0,
            lba: [0; 3],
            status: 0,
            error: 0,
            phase: Phase::Idle,
        }
    }

    fn status(&self) -> u8 {
        if self.floating {
            return 0xFF;
        }
        if self.drives[self.selected].is_none() {
            return 0;
        }
        match self.phase {
            Phase::Stalled => (AtaStatus::BSY | AtaStatus::DRDY).bits(),
            _ => self.status,
        }
    }

    fn lba28(&self) -> u32 {
        ((self.head as u32 & 0x0F) << 24)
            | ((self.lba[2] as u32) << 16)
            | ((self.lba[1] as u32) << 8)
            | self.lba[0] as u32
    }

    fn fail(&mut self, error: u8) {
        self.status = (AtaStatus::DRDY | AtaStatus::ERR).bits();
        self.error = error;
        self.phase = Phase::Idle;
    }

    fn command(&mut self, slot: usize, cmd: u8) {
        let lba = self.lba28();
        let Some(disk) = self.drives[self.selected].as_ref() else {
            self.status = 0;
            return;
        };
        let ready = (AtaStatus::DRDY | AtaStatus::DRQ).bits();

        match cmd {
            CMD_IDENTIFY if disk.atapi => {
                self.lba[1] = 0x14;
                self.lba[2] = 0xEB;
                self.fail(ERR_ABRT);
            }
            CMD_IDENTIFY => {
                let words = disk.identify_words(slot).to_vec();
                self.phase = Phase::DataIn { words, pos: 0 };
                self.status = ready;
            }
            CMD_READ_PIO | CMD_WRITE_PIO => {
                if disk.stalled.contains(&lba) {
                    self.phase = Phase::Stalled;
                } else if disk.bad.contains(&lba) || lba >= disk.sectors || self.count != 1 {
                    self.fail(ERR_IDNF);
                } else if cmd == CMD_READ_PIO {
                    let words = disk
                        .sector(lba)
                        .chunks_exact(2)
                        .map(|p| p[0] as u16 | (p[1] as u16) << 8)
                        .collect();
                    self.phase = Phase::DataIn { words, pos: 0 };
                    self.status = ready;
                } else {
                    self.phase = Phase::DataOut { lba, bytes: Vec::with_capacity(SECTOR_SIZE) };
                    self.status = ready;
                }
            }
            _ => self.fail(ERR_ABRT),
        }
    }
}

enum Target {
    Task(usize, u16),
    Control(usize),
}

fn decode(port: u16) -> Option<Target> {
    match port {
        0x1F0..=0x1F7 => Some(Target::Task(0, port - 0x1F0)),
        0x170..=0x177 => Some(Target::Task(1, port - 0x170)),
        0x3F6 => Some(Target::Control(0)),
        0x376 => Some(Target::Control(1)),
        _ => None,
    }
}

/// Register-level model of the legacy primary and secondary IDE channels.
pub struct SimBus {
    channels: [Channel; 2],
    /// Every byte written to a task-file or control register.
    pub writes: Vec<(u16, u8)>,
    pub commands: Vec<SimCommand>,
    pub delay_total_us: u64,
    pub status_reads: u64,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            channels: [Channel::new(), Channel::new()],
            writes: Vec::new(),
            commands: Vec::new(),
            delay_total_us: 0,
            status_reads: 0,
        }
    }

    pub fn attach(&mut self, slot: usize, disk: SimDisk) {
        self.channels[slot / 2].drives[slot % 2] = Some(disk);
    }

    /// Nothing drives the channel: every status read returns 0xFF.
    pub fn float_channel(&mut self, channel: usize) {
        self.channels[channel].floating = true;
    }

    pub fn disk(&self, slot: usize) -> &SimDisk {
        self.channels[slot / 2].drives[slot % 2].as_ref().expect("no disk attached")
    }

    pub fn disk_mut(&mut self, slot: usize) -> &mut SimDisk {
        self.channels[slot / 2].drives[slot % 2].as_mut().expect("no disk attached")
    }

    pub fn clear_log(&mut self) {
        self.writes.clear();
        self.commands.clear();
        self.delay_total_us = 0;
        self.status_reads = 0;
    }
}

impl PortIo for SimBus {
    fn read_byte(&mut self, port: u16) -> u8 {
        match decode(port) {
            Some(Target::Control(ch)) => {
                self.status_reads += 1;
                self.channels[ch].status()
            }
            Some(Target::Task(ch, reg)) => {
                let c = &self.channels[ch];
                if c.floating {
                    return 0xFF;
                }
                match reg {
                    REG_COMMAND => {
                        self.status_reads += 1;
                        c.status()
                    }
                    REG_ERROR => c.error,
                    REG_SECCOUNT => c.count,
                    REG_LBA0 => c.lba[0],
                    REG_LBA1 => c.lba[1],
                    REG_LBA2 => c.lba[2],
                    REG_HDDEVSEL => c.head,
                    _ => 0,
                }
            }
            None => 0xFF,
        }
    }

    fn write_byte(&mut self, port: u16, val: u8) {
        if port == POST_PORT {
            return;
        }
        self.writes.push((port, val));
        match decode(port) {
            Some(Target::Control(ch)) => {
                let c = &mut self.channels[ch];
                if val & CTRL_SRST != 0 {
                    c.phase = Phase::Idle;
                    c.lba = [0; 3];
                    c.error = 0;
                    c.status = AtaStatus::DRDY.bits();
                }
            }
            Some(Target::Task(ch, reg)) => {
                let c = &mut self.channels[ch];
                match reg {
                    REG_SECCOUNT => c.count = val,
                    REG_LBA0 => c.lba[0] = val,
                    REG_LBA1 => c.lba[1] = val,
                    REG_LBA2 => c.lba[2] = val,
                    REG_HDDEVSEL => {
                        c.head = val;
                        c.selected = ((val >> 4) & 1) as usize;
                        c.phase = Phase::Idle;
                        c.status = AtaStatus::DRDY.bits();
                    }
                    REG_COMMAND => {
                        let slot = ch * 2 + c.selected;
                        self.commands.push(SimCommand { slot, command: val, lba: c.lba28() });
                        c.command(slot, val);
                    }
                    _ => {}
                }
            }
            None => {}
        }
    }

    fn read_word(&mut self, port: u16) -> u16 {
        let Some(Target::Task(ch, REG_DATA)) = decode(port) else {
            return 0xFFFF;
        };
        let c = &mut self.channels[ch];
        let Phase::DataIn { words, pos } = &mut c.phase else {
            return 0xFFFF;
        };
        let w = words[*pos];
        *pos += 1;
        if *pos == words.len() {
            c.phase = Phase::Idle;
            c.status = AtaStatus::DRDY.bits();
        }
        w
    }

    fn write_word(&mut self, port: u16, val: u16) {
        let Some(Target::Task(ch, REG_DATA)) = decode(port) else {
            return;
        };
        let c = &mut self.channels[ch];
        let Phase::DataOut { lba, bytes } = &mut c.phase else {
            return;
        };
        bytes.push((val & 0xFF) as u8);
        bytes.push((val >> 8) as u8);
        if bytes.len() == SECTOR_SIZE {
            let lba = *lba;
            let mut sector = [0u8; SECTOR_SIZE];
            sector.copy_from_slice(bytes);
            if let Some(disk) = c.drives[c.selected].as_mut() {
                disk.data.insert(lba, sector);
            }
            c.phase = Phase::Idle;
            c.status = AtaStatus::DRDY.bits();
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.delay_total_us += us as u64;
    }
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn fixed_clock() -> FatTimestamp {
    FatTimestamp { year: 2024, month: 5, day: 17, hour: 13, minute: 45, second: 30 }
}

pub fn test_config() -> StorageConfig {
    StorageConfig {
        timing: AtaTiming::emulated(),
        clock: fixed_clock,
        ..StorageConfig::default()
    }
}

/// Sectors for a disk that `format` lays out as FAT16.
pub const FAT16_DISK: u32 = 16_384;

/// Build a manager over `disks`, probe, then format every mapped drive.
pub fn formatted_storage(disks: Vec<(usize, SimDisk)>) -> StorageManager<SimBus> {
    init_logging();
    let mut bus = SimBus::new();
    for (slot, disk) in disks {
        bus.attach(slot, disk);
    }
    let mut storage = StorageManager::new(bus, test_config());
    storage.mount_all().expect("mount");
    let mapped: Vec<usize> = storage.drive_map().mapped().map(|(logical, _)| logical).collect();
    for logical in mapped {
        storage.format(logical, true).expect("format");
    }
    storage
}

/// One formatted FAT16 disk on the primary master, mounted as `0:`.
pub fn single_drive() -> StorageManager<SimBus> {
    formatted_storage(vec![(0, SimDisk::new(FAT16_DISK))])
}
