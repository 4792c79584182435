//! ATA PIO driver for IDE controllers.
//!
//! Four fixed slots: primary/secondary channel × master/slave. LBA28 only, one
//! sector per command, busy-polled with bounded budgets. Every per-sector
//! register program runs under the controller lock, so commands from
//! different callers never interleave on the bus.
use crate::arch::x86_64::io::PortIo;
use crate::config::AtaTiming;
use crate::sync::spinlock::SpinLock;
use alloc::string::String;
use alloc::vec::Vec;
use bitflags::bitflags;
use core::fmt;

// ─── Channel I/O base addresses ───────────────────────────────────────────────

const PRIMARY_BASE: u16   = 0x1F0;
const PRIMARY_CTRL: u16   = 0x3F6;
const SECONDARY_BASE: u16 = 0x170;
const SECONDARY_CTRL: u16 = 0x376;

// ─── Register offsets from base ───────────────────────────────────────────────

pub const REG_DATA:     u16 = 0x00; // 16-bit
pub const REG_ERROR:    u16 = 0x01;
pub const REG_SECCOUNT: u16 = 0x02;
pub const REG_LBA0:     u16 = 0x03;
pub const REG_LBA1:     u16 = 0x04;
pub const REG_LBA2:     u16 = 0x05;
pub const REG_HDDEVSEL: u16 = 0x06;
pub const REG_STATUS:   u16 = 0x07;
pub const REG_COMMAND:  u16 = 0x07;

// ─── Device control register ─────────────────────────────────────────────────

pub const CTRL_NIEN: u8 = 0x02; // no interrupts, we poll
pub const CTRL_SRST: u8 = 0x04;

// ─── ATA commands ─────────────────────────────────────────────────────────────

pub const CMD_READ_PIO:  u8 = 0x20;
pub const CMD_WRITE_PIO: u8 = 0x30;
pub const CMD_IDENTIFY:  u8 = 0xEC;

/// LBA-mid/LBA-high pairs left behind by packet (ATAPI) devices.
const PACKET_SIGNATURES: [(u8, u8); 2] = [(0x14, 0xEB), (0x69, 0x96)];

pub const SECTOR_SIZE: usize = 512;
pub const MAX_SLOTS: usize = 4;
pub const LBA28_LIMIT: u32 = 1 << 28;

bitflags! {
    /// Status / alternate status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AtaStatus: u8 {
        const ERR  = 0x01;
        const IDX  = 0x02;
        const CORR = 0x04;
        const DRQ  = 0x08;
        const SRV  = 0x10;
        const DF   = 0x20;
        const DRDY = 0x40;
        const BSY  = 0x80;
    }
}

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskError {
    /// Slot absent or never probed.
    NotReady,
    /// Bad slot index, zero count, short buffer, or LBA out of range.
    InvalidArgument,
    /// Polling budget ran out while `lba` was in flight.
    Timeout { lba: u32 },
    /// Device raised ERR or DF while `lba` was in flight.
    Device { lba: u32, status: AtaStatus },
}

impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::NotReady => write!(f, "drive not ready"),
            DiskError::InvalidArgument => write!(f, "invalid argument"),
            DiskError::Timeout { lba } => write!(f, "timeout at sector {}", lba),
            DiskError::Device { lba, status } => {
                write!(f, "device error at sector {} (status {:#04x})", lba, status.bits())
            }
        }
    }
}

// ─── Slots ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unprobed,
    Present,
    Absent,
}

#[derive(Debug, Clone)]
pub struct DriveSlot {
    pub index: usize,
    pub state: SlotState,
    pub sectors: u32,
    pub model: String,
    pub serial: String,
    base: u16,
    ctrl: u16,
    select: u8,
}

impl DriveSlot {
    fn new(index: usize) -> Self {
        let (base, ctrl) = if index < 2 {
            (PRIMARY_BASE, PRIMARY_CTRL)
        } else {
            (SECONDARY_BASE, SECONDARY_CTRL)
        };
        Self {
            index,
            state: SlotState::Unprobed,
            sectors: 0,
            model: String::new(),
            serial: String::new(),
            base,
            ctrl,
            select: ((index & 1) as u8) << 4,
        }
    }

    pub fn channel(&self) -> u8 {
        (self.index / 2) as u8
    }

    pub fn is_slave(&self) -> bool {
        self.index & 1 != 0
    }

    pub fn is_present(&self) -> bool {
        self.state == SlotState::Present
    }

    pub fn size_mb(&self) -> u64 {
        self.sectors as u64 * SECTOR_SIZE as u64 / 1024 / 1024
    }

    pub fn io_base(&self) -> u16 {
        self.base
    }

    pub fn ctrl_base(&self) -> u16 {
        self.ctrl
    }

    fn mark_absent(&mut self) {
        self.state = SlotState::Absent;
        self.sectors = 0;
        self.model.clear();
        self.serial.clear();
    }
}

// ─── Queries ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlRequest {
    SectorSize,
    SectorCount,
    /// Flush. There is no write cache, so this always succeeds.
    Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlReply {
    SectorSize(u32),
    SectorCount(u32),
    Synced,
}

// ─── Low-level helpers (caller holds the port lock) ──────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollFault {
    Timeout,
    Error(AtaStatus),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbeFault {
    NoDevice,
    Busy,
    Aborted(AtaStatus),
    PacketDevice,
    UnknownSignature(u8, u8),
    NoData(PollFault),
}

fn alt_status<P: PortIo>(p: &mut P, slot: &DriveSlot) -> AtaStatus {
    AtaStatus::from_bits_retain(p.read_byte(slot.ctrl))
}

/// Wait until BSY clears; `None` once the budget is spent.
fn wait_not_busy<P: PortIo>(p: &mut P, slot: &DriveSlot, budget: u32) -> Option<AtaStatus> {
    for _ in 0..budget {
        let s = alt_status(p, slot);
        if !s.contains(AtaStatus::BSY) {
            return Some(s);
        }
        core::hint::spin_loop();
    }
    None
}

/// Wait until DRQ, or fail on ERR/DF.
fn wait_drq<P: PortIo>(p: &mut P, slot: &DriveSlot, budget: u32) -> Result<(), PollFault> {
    for _ in 0..budget {
        let s = alt_status(p, slot);
        if s.contains(AtaStatus::BSY) {
            core::hint::spin_loop();
            continue;
        }
        if s.intersects(AtaStatus::ERR | AtaStatus::DF) {
            return Err(PollFault::Error(s));
        }
        if s.contains(AtaStatus::DRQ) {
            return Ok(());
        }
    }
    Err(PollFault::Timeout)
}

fn select_drive<P: PortIo>(p: &mut P, slot: &DriveSlot, lba_top: u8, timing: &AtaTiming) {
    p.write_byte(slot.base + REG_HDDEVSEL, 0xE0 | slot.select | (lba_top & 0x0F));
    p.delay_us(timing.select_settle_us);
}

fn ata_string(words: &[u16], word_start: usize, word_count: usize) -> String {
    let mut bytes = Vec::with_capacity(word_count * 2);
    for w in &words[word_start..word_start + word_count] {
        bytes.push((w >> 8) as u8);
        bytes.push((w & 0xFF) as u8);
    }
    let s = core::str::from_utf8(&bytes).unwrap_or("").trim_end_matches(['\0', ' ']);
    String::from(s.trim_start())
}

fn identify<P: PortIo>(p: &mut P, slot: &DriveSlot, timing: &AtaTiming) -> Result<[u16; 256], ProbeFault> {
    // Software reset of the channel, interrupts stay masked.
    p.write_byte(slot.ctrl, CTRL_SRST | CTRL_NIEN);
    p.delay_us(timing.reset_settle_us);
    p.write_byte(slot.ctrl, CTRL_NIEN);
    p.delay_us(timing.reset_settle_us);

    select_drive(p, slot, 0, timing);

    p.write_byte(slot.base + REG_SECCOUNT, 0);
    p.write_byte(slot.base + REG_LBA0, 0);
    p.write_byte(slot.base + REG_LBA1, 0);
    p.write_byte(slot.base + REG_LBA2, 0);
    p.write_byte(slot.base + REG_COMMAND, CMD_IDENTIFY);

    if p.read_byte(slot.base + REG_STATUS) == 0 {
        return Err(ProbeFault::NoDevice);
    }

    let status = wait_not_busy(p, slot, timing.busy_poll_budget).ok_or(ProbeFault::Busy)?;

    let lba1 = p.read_byte(slot.base + REG_LBA1);
    let lba2 = p.read_byte(slot.base + REG_LBA2);
    if status.contains(AtaStatus::ERR) {
        if PACKET_SIGNATURES.contains(&(lba1, lba2)) {
            return Err(ProbeFault::PacketDevice);
        }
        return Err(ProbeFault::Aborted(status));
    }
    if PACKET_SIGNATURES.contains(&(lba1, lba2)) {
        return Err(ProbeFault::PacketDevice);
    }
    if lba1 != 0 || lba2 != 0 {
        return Err(ProbeFault::UnknownSignature(lba1, lba2));
    }

    wait_drq(p, slot, timing.drq_poll_budget).map_err(ProbeFault::NoData)?;

    let mut words = [0u16; 256];
    for w in words.iter_mut() {
        *w = p.read_word(slot.base + REG_DATA);
    }
    Ok(words)
}

/// Program the task file for a single-sector command on `lba`.
fn issue<P: PortIo>(p: &mut P, slot: &DriveSlot, lba: u32, cmd: u8, timing: &AtaTiming) {
    p.write_byte(slot.ctrl, CTRL_NIEN);
    select_drive(p, slot, ((lba >> 24) & 0x0F) as u8, timing);
    p.write_byte(slot.base + REG_SECCOUNT, 1);
    p.write_byte(slot.base + REG_LBA0, (lba & 0xFF) as u8);
    p.write_byte(slot.base + REG_LBA1, ((lba >> 8) & 0xFF) as u8);
    p.write_byte(slot.base + REG_LBA2, ((lba >> 16) & 0xFF) as u8);
    p.write_byte(slot.base + REG_COMMAND, cmd);
}

fn await_data<P: PortIo>(p: &mut P, slot: &DriveSlot, lba: u32, timing: &AtaTiming) -> Result<(), DiskError> {
    if wait_not_busy(p, slot, timing.busy_poll_budget).is_none() {
        return Err(DiskError::Timeout { lba });
    }
    match wait_drq(p, slot, timing.drq_poll_budget) {
        Ok(()) => Ok(()),
        Err(PollFault::Timeout) => Err(DiskError::Timeout { lba }),
        Err(PollFault::Error(status)) => Err(DiskError::Device { lba, status }),
    }
}

fn read_one<P: PortIo>(p: &mut P, slot: &DriveSlot, lba: u32, buf: &mut [u8], timing: &AtaTiming) -> Result<(), DiskError> {
    issue(p, slot, lba, CMD_READ_PIO, timing);
    await_data(p, slot, lba, timing)?;

    for pair in buf[..SECTOR_SIZE].chunks_exact_mut(2) {
        let w = p.read_word(slot.base + REG_DATA);
        pair[0] = (w & 0xFF) as u8;
        pair[1] = (w >> 8) as u8;
    }
    Ok(())
}

fn write_one<P: PortIo>(p: &mut P, slot: &DriveSlot, lba: u32, buf: &[u8], timing: &AtaTiming) -> Result<(), DiskError> {
    issue(p, slot, lba, CMD_WRITE_PIO, timing);
    await_data(p, slot, lba, timing)?;

    for pair in buf[..SECTOR_SIZE].chunks_exact(2) {
        p.write_word(slot.base + REG_DATA, (pair[0] as u16) | ((pair[1] as u16) << 8));
    }

    let status = wait_not_busy(p, slot, timing.busy_poll_budget).ok_or(DiskError::Timeout { lba })?;
    if status.intersects(AtaStatus::ERR | AtaStatus::DF) {
        return Err(DiskError::Device { lba, status });
    }
    Ok(())
}

// ─── Controller ──────────────────────────────────────────────────────────────

pub struct IdeController<P: PortIo> {
    ports: SpinLock<P>,
    slots: [DriveSlot; MAX_SLOTS],
    timing: AtaTiming,
}

impl<P: PortIo> IdeController<P> {
    pub fn new(ports: P, timing: AtaTiming) -> Self {
        Self {
            ports: SpinLock::new(ports),
            slots: [DriveSlot::new(0), DriveSlot::new(1), DriveSlot::new(2), DriveSlot::new(3)],
            timing,
        }
    }

    pub fn slots(&self) -> &[DriveSlot] {
        &self.slots
    }

    pub fn slot_info(&self, slot: usize) -> Option<&DriveSlot> {
        self.slots.get(slot)
    }

    pub fn is_present(&self, slot: usize) -> bool {
        self.slots.get(slot).map_or(false, DriveSlot::is_present)
    }

    /// IDENTIFY the drive in `slot` and record presence and capacity.
    /// Returns the sector count, or `NotReady` for anything that isn't a
    /// usable ATA disk.
    pub fn probe(&mut self, slot: usize) -> Result<u32, DiskError> {
        if slot >= MAX_SLOTS {
            return Err(DiskError::InvalidArgument);
        }

        let result = {
            let mut ports = self.ports.lock();
            identify(&mut *ports, &self.slots[slot], &self.timing)
        };

        let d = &mut self.slots[slot];
        let words = match result {
            Ok(words) => words,
            Err(fault) => {
                match fault {
                    ProbeFault::NoDevice => log::debug!("IDE: slot {} empty", slot),
                    ProbeFault::PacketDevice => log::warn!("IDE: slot {} is a packet device, skipped", slot),
                    other => log::warn!("IDE: slot {} probe failed: {:?}", slot, other),
                }
                d.mark_absent();
                return Err(DiskError::NotReady);
            }
        };

        let sectors = ((words[60] as u32) | ((words[61] as u32) << 16)) & (LBA28_LIMIT - 1);
        if sectors == 0 {
            log::warn!("IDE: slot {} reports zero LBA28 sectors", slot);
            d.mark_absent();
            return Err(DiskError::NotReady);
        }

        d.state = SlotState::Present;
        d.sectors = sectors;
        d.model = ata_string(&words, 27, 20);
        d.serial = ata_string(&words, 10, 10);

        log::info!(
            "IDE: slot {} ({} {}) {} [{} MiB] s/n: {}",
            slot,
            if d.channel() == 0 { "primary" } else { "secondary" },
            if d.is_slave() { "slave" } else { "master" },
            d.model,
            d.size_mb(),
            d.serial,
        );
        Ok(sectors)
    }

    /// Probe all four slots in order. Returns the number of present drives.
    pub fn probe_all(&mut self) -> usize {
        (0..MAX_SLOTS).filter(|&slot| self.probe(slot).is_ok()).count()
    }

    fn ready_slot(&self, slot: usize) -> Result<&DriveSlot, DiskError> {
        let d = self.slots.get(slot).ok_or(DiskError::InvalidArgument)?;
        if !d.is_present() {
            return Err(DiskError::NotReady);
        }
        Ok(d)
    }

    fn check_range(d: &DriveSlot, start_lba: u32, count: u32, buf_len: usize) -> Result<(), DiskError> {
        if count == 0 || buf_len < count as usize * SECTOR_SIZE {
            return Err(DiskError::InvalidArgument);
        }
        let end = start_lba.checked_add(count).ok_or(DiskError::InvalidArgument)?;
        if end > LBA28_LIMIT || end > d.sectors {
            return Err(DiskError::InvalidArgument);
        }
        Ok(())
    }

    /// Read `count` sectors starting at `start_lba` into `buf`.
    /// Stops at the first failing sector; the error names its LBA.
    pub fn read_sectors(&self, slot: usize, buf: &mut [u8], start_lba: u32, count: u32) -> Result<(), DiskError> {
        let d = self.ready_slot(slot)?;
        Self::check_range(d, start_lba, count, buf.len())?;

        for (i, chunk) in buf.chunks_exact_mut(SECTOR_SIZE).take(count as usize).enumerate() {
            let lba = start_lba + i as u32;
            let mut ports = self.ports.lock();
            if let Err(e) = read_one(&mut *ports, d, lba, chunk, &self.timing) {
                log::error!("IDE: slot {} read failed: {}", slot, e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Write `count` sectors from `buf` starting at `start_lba`.
    pub fn write_sectors(&self, slot: usize, buf: &[u8], start_lba: u32, count: u32) -> Result<(), DiskError> {
        let d = self.ready_slot(slot)?;
        Self::check_range(d, start_lba, count, buf.len())?;

        for (i, chunk) in buf.chunks_exact(SECTOR_SIZE).take(count as usize).enumerate() {
            let lba = start_lba + i as u32;
            let mut ports = self.ports.lock();
            if let Err(e) = write_one(&mut *ports, d, lba, chunk, &self.timing) {
                log::error!("IDE: slot {} write failed: {}", slot, e);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn query(&self, slot: usize, request: IoctlRequest) -> Result<IoctlReply, DiskError> {
        let d = self.ready_slot(slot)?;
        Ok(match request {
            IoctlRequest::SectorSize => IoctlReply::SectorSize(SECTOR_SIZE as u32),
            IoctlRequest::SectorCount => IoctlReply::SectorCount(d.sectors),
            IoctlRequest::Sync => IoctlReply::Synced,
        })
    }

    #[cfg(test)]
    pub(crate) fn with_ports<R>(&self, f: impl FnOnce(&mut P) -> R) -> R {
        f(&mut *self.ports.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{SimBus, SimDisk};
    use std::sync::Arc;
    use std::thread;

    fn controller(bus: SimBus) -> IdeController<SimBus> {
        IdeController::new(bus, AtaTiming::emulated())
    }

    fn pattern(lba: u32) -> [u8; SECTOR_SIZE] {
        let mut s = [0u8; SECTOR_SIZE];
        for (i, b) in s.iter_mut().enumerate() {
            *b = (lba as usize * 7 + i) as u8;
        }
        s
    }

    fn patterned_disk(sectors: u32) -> SimDisk {
        let mut disk = SimDisk::new(sectors);
        for lba in 0..sectors {
            disk.fill_sector(lba, &pattern(lba));
        }
        disk
    }

    #[test]
    fn probe_records_capacity_and_identity() {
        let mut bus = SimBus::new();
        bus.attach(0, SimDisk::new(2048).with_model("QEMU HARDDISK"));
        let mut ide = controller(bus);

        assert_eq!(ide.probe(0), Ok(2048));
        let slot = ide.slot_info(0).unwrap();
        assert_eq!(slot.state, SlotState::Present);
        assert_eq!(slot.model, "QEMU HARDDISK");
        assert_eq!(slot.sectors, 2048);
        assert_eq!(slot.serial, "SIM0");
    }

    #[test]
    fn empty_slot_is_absent() {
        let mut ide = controller(SimBus::new());
        assert_eq!(ide.probe(1), Err(DiskError::NotReady));
        assert_eq!(ide.slot_info(1).unwrap().state, SlotState::Absent);
        assert!(!ide.is_present(1));
    }

    #[test]
    fn floating_bus_probe_terminates_within_budget() {
        let mut bus = SimBus::new();
        bus.float_channel(1);
        let mut ide = controller(bus);

        assert_eq!(ide.probe(2), Err(DiskError::NotReady));
        assert_eq!(ide.slot_info(2).unwrap().state, SlotState::Absent);
        let reads = ide.with_ports(|p| p.status_reads);
        assert!(reads <= AtaTiming::emulated().busy_poll_budget as u64 + 1);
    }

    #[test]
    fn packet_device_is_rejected() {
        let mut bus = SimBus::new();
        bus.attach(2, SimDisk::atapi());
        let mut ide = controller(bus);
        assert_eq!(ide.probe(2), Err(DiskError::NotReady));
        assert!(!ide.is_present(2));
    }

    #[test]
    fn probe_all_counts_present_slots() {
        let mut bus = SimBus::new();
        bus.attach(1, SimDisk::new(64));
        bus.attach(3, SimDisk::new(64));
        let mut ide = controller(bus);
        assert_eq!(ide.probe_all(), 2);
        assert!(!ide.is_present(0));
        assert!(ide.is_present(1));
        assert!(ide.is_present(3));
    }

    #[test]
    fn sector_round_trip() {
        let mut bus = SimBus::new();
        bus.attach(3, SimDisk::new(128));
        let mut ide = controller(bus);
        ide.probe(3).unwrap();

        let mut data = alloc::vec![0u8; 3 * SECTOR_SIZE];
        for (i, b) in data.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        ide.write_sectors(3, &data, 40, 3).unwrap();

        let mut back = alloc::vec![0u8; 3 * SECTOR_SIZE];
        ide.read_sectors(3, &mut back, 40, 3).unwrap();
        assert_eq!(back, data);
        assert_eq!(ide.with_ports(|p| p.disk(3).sector(41).to_vec()), data[512..1024].to_vec());
    }

    #[test]
    fn register_program_order_is_fixed() {
        let mut bus = SimBus::new();
        bus.attach(1, SimDisk::new(0x0200_0000));
        let mut ide = controller(bus);
        ide.probe(1).unwrap();
        ide.with_ports(|p| p.clear_log());

        let lba = 0x0123_4567;
        let mut buf = [0u8; SECTOR_SIZE];
        ide.read_sectors(1, &mut buf, lba, 1).unwrap();

        let log = ide.with_ports(|p| p.writes.clone());
        assert_eq!(
            log,
            alloc::vec![
                (0x3F6, CTRL_NIEN),
                (0x1F6, 0xE0 | 0x10 | ((lba >> 24) & 0x0F) as u8),
                (0x1F2, 1),
                (0x1F3, (lba & 0xFF) as u8),
                (0x1F4, ((lba >> 8) & 0xFF) as u8),
                (0x1F5, ((lba >> 16) & 0xFF) as u8),
                (0x1F7, CMD_READ_PIO),
            ]
        );
        assert!(ide.with_ports(|p| p.delay_total_us) >= AtaTiming::emulated().select_settle_us as u64);
    }

    #[test]
    fn failing_sector_stops_the_transfer() {
        let mut bus = SimBus::new();
        bus.attach(0, patterned_disk(64).with_bad_sector(12));
        let mut ide = controller(bus);
        ide.probe(0).unwrap();
        ide.with_ports(|p| p.clear_log());

        let mut buf = alloc::vec![0u8; 4 * SECTOR_SIZE];
        match ide.read_sectors(0, &mut buf, 10, 4) {
            Err(DiskError::Device { lba, status }) => {
                assert_eq!(lba, 12);
                assert!(status.contains(AtaStatus::ERR));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(&buf[..SECTOR_SIZE], &pattern(10)[..]);
        let lbas: Vec<u32> = ide.with_ports(|p| p.commands.iter().map(|c| c.lba).collect());
        assert_eq!(lbas, alloc::vec![10, 11, 12]);
    }

    #[test]
    fn stalled_sector_times_out() {
        let mut bus = SimBus::new();
        bus.attach(0, SimDisk::new(64).with_stalled_sector(5));
        let mut ide = controller(bus);
        ide.probe(0).unwrap();

        let buf = [0u8; SECTOR_SIZE];
        assert_eq!(ide.write_sectors(0, &buf, 5, 1), Err(DiskError::Timeout { lba: 5 }));
        // presence survives a failed command
        assert!(ide.is_present(0));
    }

    #[test]
    fn validation_happens_before_any_port_access() {
        let mut bus = SimBus::new();
        bus.attach(0, SimDisk::new(64));
        let mut ide = controller(bus);
        ide.probe(0).unwrap();
        ide.with_ports(|p| p.clear_log());

        let mut buf = [0u8; 2 * SECTOR_SIZE];
        assert_eq!(ide.read_sectors(0, &mut buf, 0, 0), Err(DiskError::InvalidArgument));
        assert_eq!(ide.read_sectors(0, &mut buf, 0, 3), Err(DiskError::InvalidArgument));
        assert_eq!(ide.read_sectors(0, &mut buf, 63, 2), Err(DiskError::InvalidArgument));
        assert_eq!(ide.read_sectors(1, &mut buf, 0, 1), Err(DiskError::NotReady));
        assert_eq!(ide.read_sectors(7, &mut buf, 0, 1), Err(DiskError::InvalidArgument));
        assert!(ide.with_ports(|p| p.writes.is_empty()));
    }

    #[test]
    fn query_reports_geometry() {
        let mut bus = SimBus::new();
        bus.attach(0, SimDisk::new(4096));
        let mut ide = controller(bus);
        assert_eq!(ide.query(0, IoctlRequest::SectorCount), Err(DiskError::NotReady));
        ide.probe(0).unwrap();
        assert_eq!(ide.query(0, IoctlRequest::SectorSize), Ok(IoctlReply::SectorSize(512)));
        assert_eq!(ide.query(0, IoctlRequest::SectorCount), Ok(IoctlReply::SectorCount(4096)));
        assert_eq!(ide.query(0, IoctlRequest::Sync), Ok(IoctlReply::Synced));
    }

    #[test]
    fn concurrent_reads_never_interleave() {
        let mut bus = SimBus::new();
        bus.attach(0, patterned_disk(256));
        let mut ide = controller(bus);
        ide.probe(0).unwrap();
        ide.with_ports(|p| p.clear_log());
        let ide = Arc::new(ide);

        let workers: Vec<_> = [0u32, 128]
            .into_iter()
            .map(|base| {
                let ide = Arc::clone(&ide);
                thread::spawn(move || {
                    let mut buf = [0u8; SECTOR_SIZE];
                    for round in 0..200u32 {
                        let lba = base + round % 128;
                        ide.read_sectors(0, &mut buf, lba, 1).unwrap();
                        assert_eq!(buf, pattern(lba));
                    }
                })
            })
            .collect();
        for w in workers {
            w.join().unwrap();
        }

        let log = ide.with_ports(|p| p.writes.clone());
        assert_eq!(log.len(), 400 * 7);
        let expected_ports = [0x3F6, 0x1F6, 0x1F2, 0x1F3, 0x1F4, 0x1F5, 0x1F7];
        for program in log.chunks(7) {
            let ports: Vec<u16> = program.iter().map(|(port, _)| *port).collect();
            assert_eq!(ports, expected_ports);
        }
    }
}
