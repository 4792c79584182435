//! Port I/O primitives.
//!
//! The raw `in`/`out` wrappers are only meaningful on x86 hardware running at
//! ring 0. Everything above this module talks to ports through [`PortIo`], so
//! the ATA driver can be driven by an emulated bus on a host.

#[cfg(target_arch = "x86_64")]
use core::arch::asm;

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn outb(port: u16, val: u8) {
    asm!("out %al, %dx", in("dx") port, in("al") val,
        options(nomem, nostack, preserves_flags, att_syntax));
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn inb(port: u16) -> u8 {
    let val: u8;
    asm!("in %dx, %al", in("dx") port, out("al") val,
        options(nomem, nostack, preserves_flags, att_syntax));
    val
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn outw(port: u16, val: u16) {
    asm!("out %ax, %dx", in("dx") port, in("ax") val,
        options(nomem, nostack, preserves_flags, att_syntax));
}

#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn inw(port: u16) -> u16 {
    let val: u16;
    asm!("in %dx, %ax", in("dx") port, out("ax") val,
        options(nomem, nostack, preserves_flags, att_syntax));
    val
}

/// Short delay through a write to port 0x80 (POST code port), roughly 1µs.
#[cfg(target_arch = "x86_64")]
#[inline(always)]
pub unsafe fn io_wait() {
    outb(0x80, 0x00);
}

// ─── Port backend seam ────────────────────────────────────────────────────────

/// Byte/word access to hardware I/O ports.
///
/// There are no error conditions at this level: a missing device shows up as
/// a floating bus value and is detected by the protocol above.
pub trait PortIo {
    fn read_byte(&mut self, port: u16) -> u8;
    fn write_byte(&mut self, port: u16, val: u8);
    fn read_word(&mut self, port: u16) -> u16;
    fn write_word(&mut self, port: u16, val: u16);

    /// Busy-wait for roughly `us` microseconds.
    fn delay_us(&mut self, us: u32) {
        for _ in 0..us {
            self.write_byte(POST_PORT, 0);
        }
    }
}

pub const POST_PORT: u16 = 0x80;

/// Real hardware ports. Requires I/O privilege.
#[cfg(target_arch = "x86_64")]
#[derive(Debug, Default, Clone, Copy)]
pub struct X86Ports;

#[cfg(target_arch = "x86_64")]
impl PortIo for X86Ports {
    fn read_byte(&mut self, port: u16) -> u8 {
        unsafe { inb(port) }
    }

    fn write_byte(&mut self, port: u16, val: u8) {
        unsafe { outb(port, val) }
    }

    fn read_word(&mut self, port: u16) -> u16 {
        unsafe { inw(port) }
    }

    fn write_word(&mut self, port: u16, val: u16) {
        unsafe { outw(port, val) }
    }

    fn delay_us(&mut self, us: u32) {
        for _ in 0..us {
            unsafe { io_wait() };
        }
    }
}
