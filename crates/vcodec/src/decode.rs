//! Stream decoder.
//!
//! Mirrors the encoder entry for entry. Every entry other than a
//! back-reference takes the next sequence number. Containers, objects built
//! from an embedded program, and embedded programs are registered under that
//! number *before* their contents are decoded, so a back-reference from
//! inside a value to the value itself resolves to the partially built one.

use hashbrown::HashMap;
use tracing::{debug, warn};
use vcodec_core::{
    ArrayRef, FunctionRef, MappingRef, MultisetRef, ObjectRef, PikeString, Program, ProgramRef,
    Value, ValueKind,
};

use crate::buffer::ByteReader;
use crate::codec::{Codec, DefaultCodec};
use crate::encode::float_special;
use crate::error::{CodecError, Result};
use crate::legacy;
use crate::options::DecodeOptions;
use crate::tag::{read_entry, Tag, COUNTER_START, MAGIC};

/// Rebuild a float from `float_parts` output.
pub fn float_from_parts(mantissa: i64, exponent: i64) -> Option<f64> {
    if mantissa == 0 {
        return match exponent {
            float_special::POS_ZERO => Some(0.0),
            float_special::NEG_ZERO => Some(-0.0),
            float_special::POS_INF => Some(f64::INFINITY),
            float_special::NEG_INF => Some(f64::NEG_INFINITY),
            float_special::NAN => Some(f64::NAN),
            _ => None,
        };
    }
    let exponent = i32::try_from(exponent).ok()?;
    Some(libm::ldexp(mantissa as f64, exponent))
}

/// Allocate room for `n` elements, reporting failure instead of aborting.
pub(crate) fn alloc_vec<T>(n: usize, what: &str) -> Result<Vec<T>> {
    let mut v = Vec::new();
    v.try_reserve_exact(n)
        .map_err(|_| CodecError::out_of_memory(format!("{} with {} entries", what, n)))?;
    Ok(v)
}

/// Per-call decoder state.
pub struct Decoder<'a, 'c> {
    pub(crate) input: ByteReader<'a>,
    memo: HashMap<i64, Value>,
    counter: i64,
    pub(crate) codec: &'c mut dyn Codec,
    max_depth: usize,
    depth: usize,
}

impl<'a, 'c> Decoder<'a, 'c> {
    pub fn new(input: ByteReader<'a>, codec: &'c mut dyn Codec, options: &DecodeOptions) -> Self {
        Self {
            input,
            memo: HashMap::new(),
            counter: COUNTER_START,
            codec,
            max_depth: options.max_depth,
            depth: 0,
        }
    }

    pub(crate) fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthExceeded { limit: self.max_depth });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    pub(crate) fn error(&self, message: impl Into<String>) -> CodecError {
        CodecError::format(self.input.position(), message)
    }

    fn register(&mut self, seq: i64, value: &Value) {
        self.memo.insert(seq, value.clone());
    }

    pub fn decode_value(&mut self) -> Result<Value> {
        self.nested(|d| d.decode_inner())
    }

    // Arms live in separate non-inlined functions so the frame repeated per
    // nesting level stays small.
    fn decode_inner(&mut self) -> Result<Value> {
        let offset = self.input.position();
        let (ty, n) = read_entry(&mut self.input)?;
        let tag = Tag::try_from(ty)
            .map_err(|_| CodecError::format(offset, format!("unknown tag {}", ty)))?;
        if tag == Tag::Again {
            return self.backref(offset, n);
        }
        let seq = self.counter;
        self.counter += 1;

        match tag {
            Tag::Int => {
                let v = Value::Int(n);
                self.register(seq, &v);
                Ok(v)
            }
            Tag::Float => self.decode_float(seq, n),
            Tag::String => self.decode_string(offset, seq, n),
            Tag::Array => self.decode_array(seq, n),
            Tag::Mapping => self.decode_mapping(seq, n),
            Tag::Multiset => self.decode_multiset(seq, n),
            Tag::Object => self.decode_object(offset, seq, n),
            Tag::Function => self.decode_function(offset, seq, n),
            Tag::Program => self.decode_program_entry(offset, seq, n),
            Tag::Type => Err(CodecError::unsupported("decoding type expressions")),
            Tag::Again => self.backref(offset, n),
        }
    }

    #[inline(never)]
    fn backref(&self, offset: usize, n: i64) -> Result<Value> {
        self.memo
            .get(&n)
            .cloned()
            .ok_or_else(|| {
                CodecError::format(offset, format!("back-reference to unknown value {}", n))
            })
    }

    #[inline(never)]
    fn decode_float(&mut self, seq: i64, mantissa: i64) -> Result<Value> {
        let offset = self.input.position();
        let (ty, exponent) = read_entry(&mut self.input)?;
        if ty != Tag::Float as u8 {
            return Err(CodecError::format(offset, "float exponent entry has the wrong tag"));
        }
        let x = float_from_parts(mantissa, exponent)
            .ok_or_else(|| CodecError::format(offset, format!("bad float exponent {}", exponent)))?;
        let v = Value::Float(x);
        self.register(seq, &v);
        Ok(v)
    }

    #[inline(never)]
    fn decode_string(&mut self, offset: usize, seq: i64, n: i64) -> Result<Value> {
        let v = Value::String(self.read_string_body(offset, n)?);
        self.register(seq, &v);
        Ok(v)
    }

    #[inline(never)]
    fn decode_array(&mut self, seq: i64, n: i64) -> Result<Value> {
        let len = self.input.check_count(n, 1)?;
        let array = ArrayRef::new(alloc_vec(len, "array")?);
        let v = Value::Array(array.clone());
        self.register(seq, &v);
        for _ in 0..len {
            let item = self.decode_value()?;
            array.push(item);
        }
        Ok(v)
    }

    #[inline(never)]
    fn decode_mapping(&mut self, seq: i64, n: i64) -> Result<Value> {
        let len = self.input.check_count(n, 2)?;
        let mapping = MappingRef::default();
        mapping.borrow_mut().reserve(len);
        let v = Value::Mapping(mapping.clone());
        self.register(seq, &v);
        for _ in 0..len {
            let key = self.decode_value()?;
            let value = self.decode_value()?;
            mapping.insert(key, value);
        }
        Ok(v)
    }

    #[inline(never)]
    fn decode_multiset(&mut self, seq: i64, n: i64) -> Result<Value> {
        let len = self.input.check_count(n, 1)?;
        let multiset = MultisetRef::new(alloc_vec(len, "multiset")?);
        let v = Value::Multiset(multiset.clone());
        self.register(seq, &v);
        for _ in 0..len {
            let member = self.decode_value()?;
            multiset.push(member);
        }
        Ok(v)
    }

    /// Body of a string entry whose `(STRING, n)` header is already read.
    pub(crate) fn read_string_body(&mut self, offset: usize, n: i64) -> Result<PikeString> {
        if n >= 0 {
            let len = self.input.check_count(n, 1)?;
            return Ok(PikeString::from_bytes(self.input.read_bytes(len)?));
        }
        if n != -1 {
            return Err(CodecError::format(offset, format!("bad string length {}", n)));
        }
        let (shift, len) = read_entry(&mut self.input)?;
        if shift != 1 && shift != 2 {
            return Err(CodecError::format(offset, format!("bad string width class {}", shift)));
        }
        let len = self.input.check_count(len, 1 << shift)?;
        let mut chars: Vec<u32> = alloc_vec(len, "string")?;
        for _ in 0..len {
            let c = if shift == 1 {
                self.input.read_u16_be()? as u32
            } else {
                self.input.read_u32_be()?
            };
            chars.push(c);
        }
        Ok(PikeString::from_chars(chars))
    }

    fn expect_name(&self, offset: usize, name: &Value) -> Result<()> {
        match name.kind() {
            ValueKind::Object | ValueKind::Function | ValueKind::Program | ValueKind::Type => Err(
                CodecError::format(offset, format!("a {} cannot be used as a name", name.kind())),
            ),
            _ => Ok(()),
        }
    }

    #[inline(never)]
    fn decode_object(&mut self, offset: usize, seq: i64, n: i64) -> Result<Value> {
        match n {
            0 => {
                let name = self.decode_value()?;
                self.expect_name(offset, &name)?;
                let v = self.codec.object_of(&name)?;
                if !matches!(v, Value::Object(_)) {
                    return Err(CodecError::protocol(format!("object_of returned a {}", v.kind())));
                }
                self.register(seq, &v);
                Ok(v)
            }
            1 => {
                // Registered before its program is decoded: the program may
                // refer back to this very object.
                let object = ObjectRef::pending();
                let v = Value::Object(object.clone());
                self.register(seq, &v);
                match self.decode_value()? {
                    Value::Program(p) => {
                        object.attach(&p);
                        let payload = self.decode_value()?;
                        self.codec.decode_object(&object, payload)?;
                        Ok(v)
                    }
                    Value::Int(0) => {
                        // Program of a destructed object: the object decodes as zero.
                        self.register(seq, &Value::ZERO);
                        self.decode_value()?;
                        Ok(Value::ZERO)
                    }
                    other => Err(CodecError::format(
                        offset,
                        format!("object program decoded as a {}", other.kind()),
                    )),
                }
            }
            _ => Err(CodecError::format(offset, format!("bad object encoding {}", n))),
        }
    }

    #[inline(never)]
    fn decode_function(&mut self, offset: usize, seq: i64, n: i64) -> Result<Value> {
        let v = match n {
            0 => {
                let name = self.decode_value()?;
                self.expect_name(offset, &name)?;
                let v = self.codec.function_of(&name)?;
                if !matches!(v, Value::Function(_)) {
                    return Err(CodecError::protocol(format!(
                        "function_of returned a {}",
                        v.kind()
                    )));
                }
                v
            }
            1 => {
                let object = match self.decode_value()? {
                    Value::Object(o) => o,
                    other => {
                        return Err(CodecError::format(
                            offset,
                            format!("function object decoded as a {}", other.kind()),
                        ))
                    }
                };
                let name = match self.decode_value()? {
                    Value::String(s) => s,
                    other => {
                        return Err(CodecError::format(
                            offset,
                            format!("function name decoded as a {}", other.kind()),
                        ))
                    }
                };
                let program = object
                    .program()
                    .ok_or_else(|| CodecError::unresolved("method of destructed object", &name))?;
                let index = program
                    .try_borrow()
                    .ok()
                    .and_then(|p| p.find_identifier(&name))
                    .ok_or_else(|| CodecError::unresolved("method", &name))?;
                Value::Function(FunctionRef::new(object, index))
            }
            _ => return Err(CodecError::format(offset, format!("bad function encoding {}", n))),
        };
        self.register(seq, &v);
        Ok(v)
    }

    #[inline(never)]
    fn decode_program_entry(&mut self, offset: usize, seq: i64, n: i64) -> Result<Value> {
        match n {
            0 => {
                let name = self.decode_value()?;
                self.expect_name(offset, &name)?;
                let v = self.codec.program_of(&name)?;
                if !matches!(v, Value::Program(_)) {
                    return Err(CodecError::protocol(format!("program_of returned a {}", v.kind())));
                }
                self.register(seq, &v);
                Ok(v)
            }
            1 => {
                let placeholder = ProgramRef::new(Program::default());
                let v = Value::Program(placeholder.clone());
                self.register(seq, &v);
                self.decode_program(&placeholder)?;
                Ok(v)
            }
            _ => Err(CodecError::format(offset, format!("bad program encoding {}", n))),
        }
    }
}

/// Decode `bytes` with the given codec.
pub fn decode(bytes: &[u8], codec: &mut dyn Codec) -> Result<Value> {
    decode_with(bytes, codec, &DecodeOptions::default())
}

pub fn decode_with(bytes: &[u8], codec: &mut dyn Codec, options: &DecodeOptions) -> Result<Value> {
    debug!(len = bytes.len(), "decode");
    if !bytes.starts_with(MAGIC) {
        if !options.allow_legacy {
            return Err(CodecError::format(0, "missing stream header"));
        }
        warn!("stream header missing, decoding legacy format");
        return legacy::decode_legacy(bytes, codec, options);
    }
    let mut input = ByteReader::new(bytes);
    input.read_bytes(MAGIC.len())?;
    let mut decoder = Decoder::new(input, codec, options);
    let value = decoder.decode_value()?;
    if !decoder.input.is_at_end() {
        return Err(decoder.error(format!("{} trailing bytes", decoder.input.remaining())));
    }
    debug!(kind = %value.kind(), "decoded");
    Ok(value)
}

/// Decode with the builtin codec.
pub fn decode_value(bytes: &[u8]) -> Result<Value> {
    decode(bytes, &mut DefaultCodec::default())
}
