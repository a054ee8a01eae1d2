//! Decoder for the pre-magic stream format.
//!
//! Every entry is a `(tag, n)` pair of legacy integers followed by its
//! payload. A legacy integer is either one byte `0x80 | v` holding a 7-bit
//! value, or a count byte `0..=4` followed by that many big-endian bytes of
//! a wrapping 32-bit value. The format has no back-references, so shared
//! substructure decodes as copies and cycles cannot occur.

use tracing::debug;
use vcodec_core::{ArrayRef, MappingRef, MultisetRef, PikeString, Value};

use crate::buffer::ByteReader;
use crate::codec::Codec;
use crate::decode::alloc_vec;
use crate::error::{CodecError, Result};
use crate::options::DecodeOptions;
use crate::tag::Tag;

const SHORT_FLAG: u8 = 0x80;
const MAX_WIDTH: u8 = 4;

struct LegacyDecoder<'a, 'c> {
    input: ByteReader<'a>,
    codec: &'c mut dyn Codec,
    max_depth: usize,
    depth: usize,
}

impl LegacyDecoder<'_, '_> {
    fn read_int(&mut self) -> Result<i64> {
        let offset = self.input.position();
        let b = self.input.read_u8()?;
        if b & SHORT_FLAG != 0 {
            return Ok((b & !SHORT_FLAG) as i64);
        }
        if b > MAX_WIDTH {
            return Err(CodecError::format(offset, format!("bad legacy integer width {}", b)));
        }
        let mut x: u32 = 0;
        for _ in 0..b {
            x = (x << 8) | self.input.read_u8()? as u32;
        }
        Ok(x as i32 as i64)
    }

    fn read_name(&mut self, n: i64) -> Result<Value> {
        let len = self.input.check_count(n, 1)?;
        Ok(Value::String(PikeString::from_bytes(self.input.read_bytes(len)?)))
    }

    fn decode_value(&mut self) -> Result<Value> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthExceeded { limit: self.max_depth });
        }
        self.depth += 1;
        let result = self.decode_inner();
        self.depth -= 1;
        result
    }

    fn decode_inner(&mut self) -> Result<Value> {
        let offset = self.input.position();
        let raw = self.read_int()?;
        let n = self.read_int()?;
        let tag = u8::try_from(raw)
            .ok()
            .and_then(|b| Tag::try_from(b).ok())
            .ok_or_else(|| CodecError::format(offset, format!("unknown legacy tag {}", raw)))?;
        match tag {
            Tag::Int => Ok(Value::Int(n)),
            Tag::Float => Ok(Value::Float(f32::from_bits(n as u32) as f64)),
            Tag::String => self.read_name(n),
            Tag::Array => {
                let len = self.input.check_count(n, 2)?;
                let mut items = alloc_vec(len, "array")?;
                for _ in 0..len {
                    items.push(self.decode_value()?);
                }
                Ok(Value::Array(ArrayRef::new(items)))
            }
            Tag::Multiset => {
                let len = self.input.check_count(n, 2)?;
                let mut members = alloc_vec(len, "multiset")?;
                for _ in 0..len {
                    members.push(self.decode_value()?);
                }
                Ok(Value::Multiset(MultisetRef::new(members)))
            }
            Tag::Mapping => {
                let len = self.input.check_count(n, 4)?;
                let mapping = MappingRef::default();
                for _ in 0..len {
                    let key = self.decode_value()?;
                    let value = self.decode_value()?;
                    mapping.insert(key, value);
                }
                Ok(Value::Mapping(mapping))
            }
            Tag::Object => {
                let name = self.read_name(n)?;
                let v = self.codec.object_of(&name)?;
                expect_kind(v, "object_of", |v| matches!(v, Value::Object(_)))
            }
            Tag::Function => {
                let name = self.read_name(n)?;
                let v = self.codec.function_of(&name)?;
                expect_kind(v, "function_of", |v| matches!(v, Value::Function(_)))
            }
            Tag::Program => {
                let name = self.read_name(n)?;
                let v = self.codec.program_of(&name)?;
                expect_kind(v, "program_of", |v| matches!(v, Value::Program(_)))
            }
            Tag::Type | Tag::Again => Err(CodecError::format(
                offset,
                format!("legacy streams cannot hold tag {}", raw),
            )),
        }
    }
}

fn expect_kind(v: Value, hook: &str, ok: impl Fn(&Value) -> bool) -> Result<Value> {
    if ok(&v) {
        Ok(v)
    } else {
        Err(CodecError::protocol(format!("{} returned a {}", hook, v.kind())))
    }
}

/// Decode a stream written in the legacy format. Best effort: the result is
/// only as faithful as that format allows.
pub fn decode_legacy(
    bytes: &[u8],
    codec: &mut dyn Codec,
    options: &DecodeOptions,
) -> Result<Value> {
    let mut decoder = LegacyDecoder {
        input: ByteReader::new(bytes),
        codec,
        max_depth: options.max_depth,
        depth: 0,
    };
    let value = decoder.decode_value()?;
    if !decoder.input.is_at_end() {
        return Err(CodecError::format(
            decoder.input.position(),
            format!("{} trailing bytes", decoder.input.remaining()),
        ));
    }
    debug!(kind = %value.kind(), "decoded legacy stream");
    Ok(value)
}
