//! Output buffer and bounds-checked input cursor.

use crate::error::{CodecError, Result};

/// Growable output buffer.
#[derive(Debug, Default)]
pub struct ByteWriter {
    data: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Make room for `additional` bytes, reporting allocation failure.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.data
            .try_reserve(additional)
            .map_err(|_| {
                let wanted = self.data.len() + additional;
                CodecError::out_of_memory(format!("output buffer of {} bytes", wanted))
            })
    }

    pub fn write_u8(&mut self, v: u8) {
        self.data.push(v);
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    pub fn write_u16_be(&mut self, v: u16) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_u32_be(&mut self, v: u32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }

    pub fn write_i32_be(&mut self, v: i32) {
        self.data.extend_from_slice(&v.to_be_bytes());
    }
}

/// Cursor over an input buffer. Every read is bounds-checked; running off the
/// end is a `Format` error carrying the offset.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| CodecError::format(self.pos, "unexpected end of input"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if n > self.remaining() {
            return Err(CodecError::format(
                self.pos,
                format!("need {} bytes, {} left", n, self.remaining()),
            ));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn read_u16_be(&mut self) -> Result<u16> {
        let b = self.read_bytes(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn read_u32_be(&mut self) -> Result<u32> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32_be(&mut self) -> Result<i32> {
        Ok(self.read_u32_be()? as i32)
    }

    /// Validate a count read from the stream: negative counts are rejected,
    /// and `n` elements of at least `min_elem_bytes` each must fit in what is
    /// left. Returns the count as `usize`.
    pub fn check_count(&self, n: i64, min_elem_bytes: usize) -> Result<usize> {
        let count = usize::try_from(n)
            .map_err(|_| CodecError::format(self.pos, format!("negative count {}", n)))?;
        let needed = count.checked_mul(min_elem_bytes);
        match needed {
            Some(needed) if needed <= self.remaining() => Ok(count),
            _ => Err(CodecError::format(
                self.pos,
                format!("count {} exceeds remaining input ({} bytes)", count, self.remaining()),
            )),
        }
    }
}
