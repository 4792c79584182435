//! Short (8.3) and long (VFAT) directory entry names.

use crate::error::{Error, Result};
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

pub const NAME_MAX: usize = 255;

/// NT case flags in byte 12 of a short entry.
pub const CASE_LOWER_BASE: u8 = 0x08;
pub const CASE_LOWER_EXT: u8 = 0x10;

pub const ATTR_LONG_NAME: u8 = 0x0F;
pub const LFN_LAST: u8 = 0x40;
const LFN_SEQ_MASK: u8 = 0x1F;
const LFN_CHARS: usize = 13;
/// Byte offsets of the 13 UTF-16 units inside a long-name slot.
const LFN_OFFSETS: [usize; LFN_CHARS] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

const ILLEGAL: &str = "\"*/:<>?\\|";

fn is_short_char(b: u8) -> bool {
    b.is_ascii_uppercase() || b.is_ascii_digit() || b"$%'-_@~`!(){}^#&".contains(&b)
}

/// Reject names FAT cannot store.
pub fn validate(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.ends_with('.')
        || name.ends_with(' ')
        || name.encode_utf16().count() > NAME_MAX
        || name.chars().any(|c| (c as u32) < 0x20 || ILLEGAL.contains(c));
    if bad {
        Err(Error::InvalidPath)
    } else {
        Ok(())
    }
}

/// Case-insensitive name comparison, as FAT lookups require.
pub fn same_name(a: &str, b: &str) -> bool {
    a.chars()
        .flat_map(char::to_lowercase)
        .eq(b.chars().flat_map(char::to_lowercase))
}

/// The exact 8.3 form of `name` and its NT case flags, if it has one.
///
/// Each half may be all upper or all lower case; mixed case needs a long name.
pub fn short_form(name: &str) -> Option<([u8; 11], u8)> {
    if !name.is_ascii() {
        return None;
    }
    let (base, ext) = match name.rfind('.') {
        Some(i) => (&name[..i], &name[i + 1..]),
        None => (name, ""),
    };
    if base.is_empty() || base.len() > 8 || ext.len() > 3 || base.contains('.') {
        return None;
    }

    let mut raw = [b' '; 11];
    let mut case = 0;
    for (part, at, flag) in [(base, 0, CASE_LOWER_BASE), (ext, 8, CASE_LOWER_EXT)] {
        let lower = part.bytes().any(|b| b.is_ascii_lowercase());
        let upper = part.bytes().any(|b| b.is_ascii_uppercase());
        if lower && upper {
            return None;
        }
        if lower {
            case |= flag;
        }
        for (i, b) in part.bytes().enumerate() {
            let u = b.to_ascii_uppercase();
            if !is_short_char(u) {
                return None;
            }
            raw[at + i] = u;
        }
    }
    Some((raw, case))
}

/// Printable form of a short entry name.
pub fn short_display(raw: &[u8; 11], case: u8) -> String {
    let mut out = String::new();
    let push = |out: &mut String, part: &[u8], lower: bool| {
        for &b in part.iter().take_while(|&&b| b != b' ') {
            let c = b as char;
            out.push(if lower { c.to_ascii_lowercase() } else { c });
        }
    };

    let mut base = [0u8; 8];
    base.copy_from_slice(&raw[..8]);
    if base[0] == 0x05 {
        base[0] = 0xE5;
    }
    push(&mut out, &base, case & CASE_LOWER_BASE != 0);
    if raw[8] != b' ' {
        out.push('.');
        push(&mut out, &raw[8..], case & CASE_LOWER_EXT != 0);
    }
    out
}

fn basis_part(part: &str, limit: usize) -> Vec<u8> {
    part.chars()
        .filter(|&c| c != ' ' && c != '.')
        .map(|c| {
            let u = c.to_ascii_uppercase();
            if u.is_ascii() && is_short_char(u as u8) {
                u as u8
            } else {
                b'_'
            }
        })
        .take(limit)
        .collect()
}

/// Short alias `BASIS~n.EXT` for a name without an exact 8.3 form.
pub fn numbered_short(name: &str, n: u32) -> [u8; 11] {
    let trimmed = name.trim_start_matches('.');
    let (base, ext) = match trimmed.rfind('.') {
        Some(i) if i > 0 => (&trimmed[..i], &trimmed[i + 1..]),
        _ => (trimmed, ""),
    };
    let mut base = basis_part(base, 8);
    if base.is_empty() {
        base.push(b'_');
    }
    let ext = basis_part(ext, 3);

    let mut tail = [0u8; 8];
    let mut digits = 0;
    let mut v = n;
    loop {
        tail[7 - digits] = b'0' + (v % 10) as u8;
        digits += 1;
        v /= 10;
        if v == 0 || digits == 7 {
            break;
        }
    }
    tail[7 - digits] = b'~';
    let tail = &tail[7 - digits..];

    let keep = base.len().min(8 - tail.len());
    let mut raw = [b' '; 11];
    raw[..keep].copy_from_slice(&base[..keep]);
    raw[keep..keep + tail.len()].copy_from_slice(tail);
    raw[8..8 + ext.len()].copy_from_slice(&ext);
    raw
}

pub fn checksum(raw: &[u8; 11]) -> u8 {
    raw.iter().fold(0u8, |sum, &b| sum.rotate_right(1).wrapping_add(b))
}

/// Long-name slots for `name`, in on-disk order (highest sequence first).
pub fn lfn_slots(name: &str, sum: u8) -> Vec<[u8; 32]> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let count = units.len().div_ceil(LFN_CHARS);

    (1..=count)
        .rev()
        .map(|seq| {
            let mut slot = [0u8; 32];
            slot[0] = seq as u8 | if seq == count { LFN_LAST } else { 0 };
            slot[11] = ATTR_LONG_NAME;
            slot[13] = sum;
            for (k, &off) in LFN_OFFSETS.iter().enumerate() {
                let idx = (seq - 1) * LFN_CHARS + k;
                let unit = match idx.cmp(&units.len()) {
                    core::cmp::Ordering::Less => units[idx],
                    core::cmp::Ordering::Equal => 0x0000,
                    core::cmp::Ordering::Greater => 0xFFFF,
                };
                slot[off..off + 2].copy_from_slice(&unit.to_le_bytes());
            }
            slot
        })
        .collect()
}

/// Collects long-name slots until the short entry they belong to.
#[derive(Default)]
pub struct LongNameBuf {
    units: Vec<u16>,
    next: u8,
    sum: u8,
    valid: bool,
}

impl LongNameBuf {
    pub fn push(&mut self, slot: &[u8]) {
        let seq = slot[0] & LFN_SEQ_MASK;
        if slot[0] & LFN_LAST != 0 {
            self.units = vec![0xFFFF; seq as usize * LFN_CHARS];
            self.next = seq;
            self.sum = slot[13];
            self.valid = seq != 0;
        }
        if !self.valid || seq != self.next || slot[13] != self.sum {
            self.valid = false;
            return;
        }
        let base = (seq as usize - 1) * LFN_CHARS;
        for (k, &off) in LFN_OFFSETS.iter().enumerate() {
            self.units[base + k] = u16::from_le_bytes([slot[off], slot[off + 1]]);
        }
        self.next = seq - 1;
    }

    pub fn reset(&mut self) {
        self.valid = false;
        self.units.clear();
    }

    /// The long name, if a complete set of slots matching `short` was seen.
    pub fn take(&mut self, short: &[u8; 11]) -> Option<String> {
        let complete = self.valid && self.next == 0 && self.sum == checksum(short);
        let name = complete.then(|| {
            char::decode_utf16(self.units.iter().copied().take_while(|&u| u != 0 && u != 0xFFFF))
                .map(|r| r.unwrap_or(char::REPLACEMENT_CHARACTER))
                .collect()
        });
        self.reset();
        name
    }
}
