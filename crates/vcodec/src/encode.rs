//! Value graph encoder.
//!
//! Depth-first walk over the value graph. Every value gets a sequence number
//! the first time it is seen, *before* its children are written, so a later
//! occurrence (including one inside the value itself) becomes a two-field
//! back-reference `(AGAIN, n)`.

use hashbrown::HashMap;
use tracing::debug;
use vcodec_core::{FunctionRef, ObjectRef, PikeString, ProgramRef, Value, ValueKind};

use crate::buffer::ByteWriter;
use crate::canonical;
use crate::codec::{Codec, DefaultCodec};
use crate::error::{CodecError, Result, NAME_PREFIX_LEN};
use crate::options::EncodeOptions;
use crate::tag::{write_entry, Tag, COUNTER_START, MAGIC};

/// Float entries whose mantissa is zero carry one of these in the exponent.
pub(crate) mod float_special {
    pub const POS_ZERO: i64 = 0;
    pub const NEG_ZERO: i64 = 1;
    pub const POS_INF: i64 = 2;
    pub const NEG_INF: i64 = 3;
    pub const NAN: i64 = 4;
}

const MANTISSA_BITS: i64 = 53;

/// Split a float into an integer mantissa and a power-of-two exponent with
/// trailing zero bits of the mantissa shifted out.
pub fn float_parts(x: f64) -> (i64, i64) {
    if x.is_nan() {
        return (0, float_special::NAN);
    }
    if x.is_infinite() {
        let special = if x > 0.0 { float_special::POS_INF } else { float_special::NEG_INF };
        return (0, special);
    }
    if x == 0.0 {
        let special = if x.is_sign_negative() {
            float_special::NEG_ZERO
        } else {
            float_special::POS_ZERO
        };
        return (0, special);
    }
    let (fraction, exp) = libm::frexp(x);
    let mut mantissa = (fraction * (1u64 << MANTISSA_BITS) as f64) as i64;
    let mut exponent = exp as i64 - MANTISSA_BITS;
    let shift = mantissa.trailing_zeros();
    mantissa >>= shift;
    exponent += shift as i64;
    (mantissa, exponent)
}

/// Per-call encoder state.
pub struct Encoder<'c> {
    pub(crate) out: ByteWriter,
    memo: HashMap<Value, i64>,
    counter: i64,
    pub(crate) codec: &'c mut dyn Codec,
    canonical: bool,
    max_depth: usize,
    depth: usize,
}

impl<'c> Encoder<'c> {
    pub fn new(codec: &'c mut dyn Codec, options: &EncodeOptions) -> Self {
        Self {
            out: ByteWriter::new(),
            memo: HashMap::new(),
            counter: COUNTER_START,
            codec,
            canonical: options.canonical,
            max_depth: options.max_depth,
            depth: 0,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.out.into_bytes()
    }

    pub(crate) fn entry(&mut self, tag: Tag, n: i64) {
        write_entry(&mut self.out, tag as u8, n);
    }

    /// Run `f` one nesting level deeper.
    pub(crate) fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if self.depth >= self.max_depth {
            return Err(CodecError::DepthExceeded { limit: self.max_depth });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    pub fn encode_value(&mut self, value: &Value) -> Result<()> {
        self.nested(|e| e.encode_inner(value))
    }

    fn encode_inner(&mut self, value: &Value) -> Result<()> {
        if value.is_dead() {
            return self.encode_inner(&Value::ZERO);
        }
        if let Value::Type(t) = value {
            return Err(CodecError::unsupported(format!("encoding type expression {}", t)));
        }
        if let Some(&n) = self.memo.get(value) {
            self.entry(Tag::Again, n);
            return Ok(());
        }
        let n = self.counter;
        self.counter += 1;
        self.memo.insert(value.clone(), n);

        match value {
            Value::Int(i) => self.entry(Tag::Int, *i),
            Value::Float(x) => {
                let (mantissa, exponent) = float_parts(*x);
                self.entry(Tag::Float, mantissa);
                self.entry(Tag::Float, exponent);
            }
            Value::String(s) => self.write_string(s)?,
            Value::Array(a) => {
                let items = a.borrow().clone();
                self.entry(Tag::Array, items.len() as i64);
                for item in &items {
                    self.encode_value(item)?;
                }
            }
            Value::Mapping(m) => {
                let mut pairs: Vec<(Value, Value)> =
                    m.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                if self.canonical {
                    canonical::sort_pairs(&mut pairs)?;
                }
                self.entry(Tag::Mapping, pairs.len() as i64);
                for (k, v) in &pairs {
                    self.encode_value(k)?;
                    self.encode_value(v)?;
                }
            }
            Value::Multiset(m) => {
                let mut members = m.borrow().clone();
                if self.canonical {
                    canonical::sort_members(&mut members)?;
                }
                self.entry(Tag::Multiset, members.len() as i64);
                for member in &members {
                    self.encode_value(member)?;
                }
            }
            Value::Object(_) | Value::Function(_) | Value::Program(_) => {
                if self.canonical {
                    return Err(CodecError::unsupported(format!(
                        "canonical encoding of a {}",
                        value.kind()
                    )));
                }
                self.encode_by_name_or_value(value, n)?;
            }
            Value::Type(_) => return Err(CodecError::unsupported("encoding type expressions")),
        }
        Ok(())
    }

    fn encode_by_name_or_value(&mut self, value: &Value, n: i64) -> Result<()> {
        let tag = match value.kind() {
            ValueKind::Object => Tag::Object,
            ValueKind::Function => Tag::Function,
            _ => Tag::Program,
        };
        if let Some(name) = self.codec.name_of(value)? {
            if matches!(
                name.kind(),
                ValueKind::Object | ValueKind::Function | ValueKind::Program | ValueKind::Type
            ) {
                return Err(CodecError::protocol(format!(
                    "name_of returned a {} for a {}",
                    name.kind(),
                    value.kind()
                )));
            }
            self.entry(tag, 0);
            return self.encode_value(&name);
        }
        match value {
            Value::Object(o) => self.encode_object(o),
            Value::Function(f) => self.encode_function(value, f, n),
            Value::Program(p) => self.encode_program_value(p),
            _ => Ok(()),
        }
    }

    fn encode_object(&mut self, object: &ObjectRef) -> Result<()> {
        let program = object
            .program()
            .ok_or_else(|| CodecError::unsupported("encoding a destructed object"))?;
        self.entry(Tag::Object, 1);
        self.encode_value(&Value::Program(program))?;
        let payload = self.codec.encode_object(object)?;
        self.encode_value(&payload)
    }

    /// A method that is not overridden travels as its object plus its name.
    /// The function's own memo entry is withdrawn while those are written so
    /// a reference to it from inside the object is encoded in full.
    fn encode_function(&mut self, value: &Value, function: &FunctionRef, n: i64) -> Result<()> {
        let name = match function.name() {
            Some(name) if function.resolves_by_name() => name,
            _ => {
                return Err(CodecError::unsupported(format!(
                    "encoding function {} by value: method is overridden or unnamed",
                    function.name().map_or_else(|| "?".to_string(), |s| s.prefix(NAME_PREFIX_LEN))
                )))
            }
        };
        self.memo.remove(value);
        self.entry(Tag::Function, 1);
        self.encode_value(&Value::Object(function.object.clone()))?;
        self.encode_value(&Value::String(name))?;
        self.memo.insert(value.clone(), n);
        Ok(())
    }

    fn encode_program_value(&mut self, program: &ProgramRef) -> Result<()> {
        {
            let p = program
                .try_borrow()
                .map_err(|_| CodecError::unsupported("program is being modified"))?;
            if p.has_native_hooks() {
                return Err(CodecError::unsupported("encoding a program with native methods"));
            }
        }
        self.entry(Tag::Program, 1);
        self.encode_program(program)
    }

    /// String body: `(STRING, len)` + bytes, or `(STRING, -1)`, `(shift, len)`
    /// and big-endian characters for wide strings.
    pub(crate) fn write_string(&mut self, s: &PikeString) -> Result<()> {
        if let Some(bytes) = s.as_bytes() {
            self.entry(Tag::String, bytes.len() as i64);
            self.out.reserve(bytes.len())?;
            self.out.write_bytes(bytes);
            return Ok(());
        }
        let shift = s.size_shift();
        self.entry(Tag::String, -1);
        write_entry(&mut self.out, shift, s.len() as i64);
        self.out.reserve(s.len() << shift)?;
        for c in s.chars() {
            if shift == 1 {
                self.out.write_u16_be(c as u16);
            } else {
                self.out.write_u32_be(c);
            }
        }
        Ok(())
    }
}

/// Encode `value` with the given codec.
pub fn encode(value: &Value, codec: &mut dyn Codec) -> Result<Vec<u8>> {
    encode_with(value, codec, &EncodeOptions::default())
}

pub fn encode_with(
    value: &Value,
    codec: &mut dyn Codec,
    options: &EncodeOptions,
) -> Result<Vec<u8>> {
    debug!(kind = %value.kind(), canonical = options.canonical, "encode");
    let mut encoder = Encoder::new(codec, options);
    encoder.out.write_bytes(MAGIC);
    encoder.encode_value(value)?;
    let bytes = encoder.into_bytes();
    debug!(len = bytes.len(), "encoded");
    Ok(bytes)
}

/// Deterministic encoding: structurally equal values give identical bytes.
/// Objects, functions, programs and type expressions are rejected.
pub fn encode_canonical(value: &Value) -> Result<Vec<u8>> {
    let mut codec = DefaultCodec::default();
    encode_with(value, &mut codec, &EncodeOptions::canonical())
}
