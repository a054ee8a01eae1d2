//! Tagged variable-width integers.
//!
//! Every stream entry starts with one tag byte:
//!
//! ```text
//!   bit 7 6 | 5     | 4   | 3 2 1 0
//!   payload | SMALL | NEG | type
//! ```
//!
//! A negative number `n` is stored as `!n` with `NEG` set. A magnitude below
//! `SMALL_THRESHOLD` sits in the payload bits with `SMALL` set; otherwise the
//! payload is a width code (0..=3 for 1, 2, 4 or 8 bytes) and
//! `magnitude - SMALL_THRESHOLD` follows big-endian.

use num_enum::TryFromPrimitive;

use crate::buffer::{ByteReader, ByteWriter};
use crate::error::{CodecError, Result};

/// Stream header: format marker plus version byte.
pub const MAGIC: &[u8; 4] = b"\xb6ke0";

pub const TYPE_MASK: u8 = 0x0f;
pub const NEG: u8 = 0x10;
pub const SMALL: u8 = 0x20;
pub const PAYLOAD_SHIFT: u32 = 6;
pub const SMALL_THRESHOLD: u64 = 4;

/// First sequence number handed out by the memo tables.
pub const COUNTER_START: i64 = -4;

/// Entry type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u8)]
pub enum Tag {
    Array = 0,
    Mapping = 1,
    Multiset = 2,
    Object = 3,
    Function = 4,
    Program = 5,
    String = 6,
    Float = 7,
    Int = 8,
    Type = 9,
    /// Back-reference to an already decoded value.
    Again = 15,
}

pub fn write_entry(w: &mut ByteWriter, ty: u8, n: i64) {
    let (tag, magnitude) = if n < 0 {
        (ty | NEG, !n as u64)
    } else {
        (ty, n as u64)
    };
    if magnitude < SMALL_THRESHOLD {
        w.write_u8(tag | SMALL | ((magnitude as u8) << PAYLOAD_SHIFT));
        return;
    }
    let rest = magnitude - SMALL_THRESHOLD;
    let (code, width) = match rest {
        0..=0xff => (0u8, 1usize),
        0x100..=0xffff => (1, 2),
        0x1_0000..=0xffff_ffff => (2, 4),
        _ => (3, 8),
    };
    w.write_u8(tag | (code << PAYLOAD_SHIFT));
    w.write_bytes(&rest.to_be_bytes()[8 - width..]);
}

/// Read one entry, returning the raw type field and the signed value.
pub fn read_entry(r: &mut ByteReader<'_>) -> Result<(u8, i64)> {
    let offset = r.position();
    let tag = r.read_u8()?;
    let code = tag >> PAYLOAD_SHIFT;
    let magnitude = if tag & SMALL != 0 {
        code as u64
    } else {
        let width = 1usize << code;
        let rest = r
            .read_bytes(width)?
            .iter()
            .fold(0u64, |acc, &b| (acc << 8) | b as u64);
        rest.checked_add(SMALL_THRESHOLD)
            .ok_or_else(|| CodecError::format(offset, "integer magnitude overflows"))?
    };
    let n = i64::try_from(magnitude)
        .map_err(|_| CodecError::format(offset, "integer magnitude overflows"))?;
    Ok((tag & TYPE_MASK, if tag & NEG != 0 { !n } else { n }))
}

/// Pack a plain integer into one entry: low four bits in the type field, the
/// rest as the magnitude.
pub fn write_number(w: &mut ByteWriter, x: i64) {
    write_entry(w, (x & TYPE_MASK as i64) as u8, x >> 4);
}

pub fn read_number(r: &mut ByteReader<'_>) -> Result<i64> {
    let offset = r.position();
    let (ty, n) = read_entry(r)?;
    n.checked_mul(16)
        .map(|high| high | ty as i64)
        .ok_or_else(|| CodecError::format(offset, "number out of range"))
}
