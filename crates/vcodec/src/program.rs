//! Program dumps: serializing a compiled program's tables by value.
//!
//! Layout, in order:
//! - toolchain version (an encoded string value)
//! - header numbers: flags, storage_needed, alignment_needed, timestamp
//! - the nine table counts (see [`TableCounts`])
//! - raw bytecode, raw line number data
//! - identifier index, variable index, identifier references
//! - string pool, as raw string entries outside the memo
//! - inherits, identifiers, constants
//! - the lfun table
//!
//! Decoding validates every cross-reference against the table sizes read up
//! front, builds the tables in a private `Program` and only commits them to
//! the placeholder once all checks passed.

use tracing::trace;
use vcodec_core::program::{
    flags, Identifier, Inherit, InheritSource, ProgramConstant, Reference, Timestamp,
};
use vcodec_core::{
    FunctionRef, PikeString, Program, ProgramLayout, ProgramRef, TableCounts, Value, NUM_LFUNS,
};

use crate::decode::{alloc_vec, Decoder};
use crate::encode::Encoder;
use crate::error::{CodecError, Result, NAME_PREFIX_LEN};
use crate::tag::{read_entry, read_number, write_number, Tag};

/// Version string stamped on every program dump.
pub const TOOLCHAIN_VERSION: &str = concat!("vcodec ", env!("CARGO_PKG_VERSION"));

pub fn toolchain_version() -> PikeString {
    PikeString::from(TOOLCHAIN_VERSION)
}

/// Smallest encoded size of one element of each table, in `TableCounts`
/// order. Used to reject counts the remaining input cannot hold.
const MIN_ELEMENT_BYTES: [usize; 9] = [1, 1, 1, 1, 3, 1, 7, 5, 2];

/// Largest count of a table addressed by 16-bit indices.
const MAX_INDEXED: usize = u16::MAX as usize + 1;

// =============================================================================
// Encode
// =============================================================================

impl Encoder<'_> {
    fn number(&mut self, x: i64) {
        write_number(&mut self.out, x);
    }

    fn optional_name(&mut self, name: &Option<PikeString>) -> Result<()> {
        match name {
            Some(s) => self.encode_value(&Value::String(s.clone())),
            None => self.encode_value(&Value::ZERO),
        }
    }

    /// Write the dump of `program`. The program stays borrowed for the whole
    /// dump, so it cannot be restructured underneath the encoder.
    pub(crate) fn encode_program(&mut self, program: &ProgramRef) -> Result<()> {
        let p = program
            .try_borrow()
            .map_err(|_| CodecError::unsupported("program is being modified"))?;
        let counts = p.counts();
        trace!(?counts, "encoding program");

        self.encode_value(&Value::String(toolchain_version()))?;
        self.number(p.flags as i64);
        self.number(p.storage_needed);
        self.number(p.alignment_needed);
        self.number(p.timestamp.sec);
        self.number(p.timestamp.usec);
        for count in counts.to_array() {
            self.number(count as i64);
        }

        self.out.reserve(p.program.len() + p.linenumbers.len())?;
        self.out.write_bytes(&p.program);
        self.out.write_bytes(&p.linenumbers);

        for &i in &p.identifier_index {
            self.number(i as i64);
        }
        for &i in &p.variable_index {
            self.number(i as i64);
        }
        for r in &p.identifier_references {
            self.number(r.inherit_offset as i64);
            self.number(r.identifier_offset as i64);
            self.number(r.id_flags as i64);
        }
        trace!("program tables: strings");
        for s in &p.strings {
            self.write_string(s)?;
        }

        trace!("program tables: inherits");
        for inherit in &p.inherits {
            self.number(inherit.inherit_level);
            self.number(inherit.identifier_level);
            self.number(inherit.parent_offset);
            self.number(inherit.parent_identifier);
            self.number(inherit.storage_offset);
            match &inherit.source {
                InheritSource::This => self.encode_value(&Value::Program(program.clone()))?,
                InheritSource::Program(q) => self.encode_value(&Value::Program(q.clone()))?,
                InheritSource::Parent { object, identifier, .. } => {
                    let f = FunctionRef::new(object.clone(), *identifier);
                    self.encode_value(&Value::Function(f))?
                }
                InheritSource::Nothing => self.encode_value(&Value::ZERO)?,
            }
            self.optional_name(&inherit.name)?;
        }

        trace!("program tables: identifiers");
        for id in &p.identifiers {
            self.encode_value(&Value::String(id.name.clone()))?;
            self.encode_type(&id.ty)?;
            self.number(id.identifier_flags as i64);
            self.number(id.run_time_type as i64);
            self.number(id.func_offset);
        }

        trace!("program tables: constants");
        for c in &p.constants {
            self.encode_value(&c.value)?;
            self.optional_name(&c.name)?;
        }

        for &lfun in &p.lfuns {
            self.number(lfun as i64);
        }
        Ok(())
    }
}

// =============================================================================
// Decode
// =============================================================================

impl Decoder<'_, '_> {
    fn malformed(&self, what: impl std::fmt::Display) -> CodecError {
        self.error(format!("malformed program: {}", what))
    }

    fn num(&mut self) -> Result<i64> {
        read_number(&mut self.input)
    }

    /// Read a number that must lie in `0..bound`.
    fn index_below(&mut self, bound: usize, what: &str) -> Result<u16> {
        let x = self.num()?;
        match usize::try_from(x) {
            Ok(i) if i < bound => u16::try_from(i)
                .map_err(|_| self.malformed(format!("{} {} too large", what, x))),
            _ => Err(self.malformed(format!("{} {} out of range 0..{}", what, x, bound))),
        }
    }

    fn narrow<T: TryFrom<i64>>(&self, x: i64, what: &str) -> Result<T> {
        T::try_from(x).map_err(|_| self.malformed(format!("{} {} out of range", what, x)))
    }

    fn optional_name(&mut self) -> Result<Option<PikeString>> {
        match self.decode_value()? {
            Value::String(s) => Ok(Some(s)),
            Value::Int(0) => Ok(None),
            other => Err(self.malformed(format!("name decoded as a {}", other.kind()))),
        }
    }

    fn read_counts(&mut self) -> Result<TableCounts> {
        let mut raw = [0usize; 9];
        for slot in raw.iter_mut() {
            let x = self.num()?;
            *slot = usize::try_from(x)
                .map_err(|_| self.malformed(format!("negative table size {}", x)))?;
        }
        let counts = TableCounts::from_array(raw);
        let min_bytes = raw
            .iter()
            .zip(MIN_ELEMENT_BYTES)
            .try_fold(0usize, |acc, (&n, size)| {
                n.checked_mul(size).and_then(|b| acc.checked_add(b))
            });
        match min_bytes {
            Some(b) if b <= self.input.remaining() => {}
            _ => return Err(self.malformed("table sizes exceed remaining input")),
        }
        if counts.identifier_references > MAX_INDEXED
            || counts.identifiers > MAX_INDEXED
            || counts.inherits > MAX_INDEXED
        {
            return Err(self.malformed("table too large for 16-bit indices"));
        }
        if counts.inherits == 0 {
            return Err(self.malformed("no inherits"));
        }
        Ok(counts)
    }

    /// Decode a program dump into `placeholder`, which is already registered
    /// in the memo so that inherits and constants can refer back to it.
    pub(crate) fn decode_program(&mut self, placeholder: &ProgramRef) -> Result<()> {
        let version_offset = self.input.position();
        match self.decode_value()? {
            Value::String(found) if found == toolchain_version() => {}
            Value::String(found) => {
                return Err(CodecError::VersionMismatch {
                    expected: TOOLCHAIN_VERSION.to_string(),
                    found: found.prefix(NAME_PREFIX_LEN),
                })
            }
            other => {
                return Err(CodecError::format(
                    version_offset,
                    format!("program version decoded as a {}", other.kind()),
                ))
            }
        }

        let mut prog = Program::default();
        let raw_flags = self.num()?;
        prog.flags = self.narrow::<u32>(raw_flags, "flags")? & !flags::FINISHED;
        prog.storage_needed = self.num()?;
        prog.alignment_needed = self.num()?;
        prog.timestamp = Timestamp {
            sec: self.num()?,
            usec: self.num()?,
        };
        if prog.storage_needed < 0 {
            return Err(self.malformed(format!("negative storage size {}", prog.storage_needed)));
        }
        {
            // Instances created while the rest of the dump is decoded need
            // their storage size.
            let mut shell = placeholder
                .try_borrow_mut()
                .map_err(|_| CodecError::unsupported("program is being modified"))?;
            shell.storage_needed = prog.storage_needed;
            shell.alignment_needed = prog.alignment_needed;
        }

        let counts = self.read_counts()?;
        let layout = ProgramLayout::compute(&counts)
            .map_err(|_| CodecError::out_of_memory(format!("program tables {:?}", counts)))?;
        trace!(?counts, total_size = layout.total_size(), "decoding program");

        prog.program = alloc_vec(counts.program, "bytecode")?;
        prog.linenumbers = alloc_vec(counts.linenumbers, "line numbers")?;
        prog.identifier_index = alloc_vec(counts.identifier_index, "identifier index")?;
        prog.variable_index = alloc_vec(counts.variable_index, "variable index")?;
        prog.identifier_references =
            alloc_vec(counts.identifier_references, "identifier references")?;
        prog.strings = alloc_vec(counts.strings, "string pool")?;
        prog.inherits = alloc_vec(counts.inherits, "inherits")?;
        prog.identifiers = alloc_vec(counts.identifiers, "identifiers")?;
        prog.constants = alloc_vec(counts.constants, "constants")?;

        prog.program.extend_from_slice(self.input.read_bytes(counts.program)?);
        prog.linenumbers.extend_from_slice(self.input.read_bytes(counts.linenumbers)?);

        for _ in 0..counts.identifier_index {
            let i = self.index_below(counts.identifier_references, "identifier index")?;
            prog.identifier_index.push(i);
        }
        for _ in 0..counts.variable_index {
            let i = self.index_below(counts.identifiers, "variable index")?;
            prog.variable_index.push(i);
        }
        for _ in 0..counts.identifier_references {
            let inherit_offset = self.index_below(counts.inherits, "inherit offset")?;
            let raw = self.num()?;
            let identifier_offset = self.narrow::<u16>(raw, "identifier offset")?;
            let raw = self.num()?;
            let id_flags = self.narrow::<u16>(raw, "reference flags")?;
            prog.identifier_references.push(Reference {
                inherit_offset,
                identifier_offset,
                id_flags,
            });
        }

        trace!("program tables: strings");
        for _ in 0..counts.strings {
            let offset = self.input.position();
            let (ty, n) = read_entry(&mut self.input)?;
            if ty != Tag::String as u8 {
                return Err(CodecError::format(offset, "string pool entry is not a string"));
            }
            let s = self.read_string_body(offset, n)?;
            prog.strings.push(s);
        }

        trace!("program tables: inherits");
        for i in 0..counts.inherits {
            let inherit_level = self.num()?;
            let identifier_level = self.num()?;
            let parent_offset = self.num()?;
            let parent_identifier = self.num()?;
            let storage_offset = self.num()?;
            if parent_offset < -1 || parent_offset >= counts.inherits as i64 {
                return Err(self.malformed(format!(
                    "inherit parent offset {} out of range",
                    parent_offset
                )));
            }
            let source = self.decode_value()?;
            let source = self.inherit_source(i, source, placeholder)?;
            let name = self.optional_name()?;
            prog.inherits.push(Inherit {
                inherit_level,
                identifier_level,
                parent_offset,
                parent_identifier,
                storage_offset,
                source,
                name,
            });
        }

        trace!("program tables: identifiers");
        for _ in 0..counts.identifiers {
            let name = match self.decode_value()? {
                Value::String(s) => s,
                other => {
                    return Err(self.malformed(format!(
                        "identifier name decoded as a {}",
                        other.kind()
                    )))
                }
            };
            let ty = self.decode_type()?;
            let raw = self.num()?;
            let identifier_flags = self.narrow::<u8>(raw, "identifier flags")?;
            let raw = self.num()?;
            let run_time_type = self.narrow::<u8>(raw, "run-time type")?;
            let func_offset = self.num()?;
            let id = Identifier {
                name,
                ty,
                identifier_flags,
                run_time_type,
                func_offset,
            };
            if id.is_native() {
                return Err(CodecError::unsupported(format!(
                    "program dump with native method {}",
                    id.name.prefix(NAME_PREFIX_LEN)
                )));
            }
            prog.identifiers.push(id);
        }

        trace!("program tables: constants");
        for _ in 0..counts.constants {
            let value = self.decode_value()?;
            let name = self.optional_name()?;
            prog.constants.push(ProgramConstant { value, name });
        }

        for slot in prog.lfuns.iter_mut().take(NUM_LFUNS) {
            let x = self.num()?;
            if x < -1 || x >= counts.identifier_references as i64 {
                return Err(self.malformed(format!("lfun reference {} out of range", x)));
            }
            *slot = x as i32;
        }

        self.check_program(&prog)?;
        prog.sort_identifier_index();
        prog.total_size = layout.total_size();
        prog.flags |= flags::FINISHED;
        let mut target = placeholder
            .try_borrow_mut()
            .map_err(|_| CodecError::unsupported("program is being modified"))?;
        *target = prog;
        Ok(())
    }

    fn inherit_source(
        &self,
        index: usize,
        source: Value,
        placeholder: &ProgramRef,
    ) -> Result<InheritSource> {
        if index == 0 {
            return match source {
                Value::Program(p) if p.ptr_eq(placeholder) => Ok(InheritSource::This),
                _ => Err(self.malformed("first inherit is not the program itself")),
            };
        }
        match source {
            Value::Program(p) if p.ptr_eq(placeholder) => {
                Err(self.malformed("program inherits itself"))
            }
            Value::Program(p) => Ok(InheritSource::Program(p)),
            Value::Function(f) => {
                let program = match f.object.program() {
                    Some(op) => {
                        let constant =
                            op.try_borrow().ok().and_then(|p| p.reference_constant(f.index));
                        constant
                    }
                    None => None,
                };
                match program {
                    Some(Value::Program(program)) => Ok(InheritSource::Parent {
                        object: f.object,
                        identifier: f.index,
                        program,
                    }),
                    _ => Err(self.malformed("inherit parent identifier is not a program constant")),
                }
            }
            Value::Int(0) => Ok(InheritSource::Nothing),
            other => Err(self.malformed(format!("inherit source decoded as a {}", other.kind()))),
        }
    }

    /// Cross-table checks that need more than one table.
    fn check_program(&self, prog: &Program) -> Result<()> {
        for (i, r) in prog.identifier_references.iter().enumerate() {
            let inherit = &prog.inherits[r.inherit_offset as usize];
            let available = match &inherit.source {
                InheritSource::This => prog.identifiers.len(),
                InheritSource::Program(p) | InheritSource::Parent { program: p, .. } => {
                    p.try_borrow().map(|p| p.identifiers.len()).unwrap_or(0)
                }
                InheritSource::Nothing => 0,
            };
            if r.identifier_offset as usize >= available {
                return Err(self.malformed(format!(
                    "reference {} points at identifier {} of {}",
                    i, r.identifier_offset, available
                )));
            }
        }
        for id in &prog.identifiers {
            if id.is_constant() {
                let ok = usize::try_from(id.func_offset)
                    .map_or(false, |c| c < prog.constants.len());
                if !ok {
                    return Err(self.malformed(format!(
                        "constant offset {} out of range",
                        id.func_offset
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DefaultCodec;
    use crate::decode::decode_value;
    use crate::encode::encode;
    use pretty_assertions::assert_eq;
    use vcodec_core::program::identifier_flags;
    use vcodec_core::{ObjectRef, TypeExpr};

    fn sample() -> ProgramRef {
        let mut p = Program::new();
        p.add_variable("count", TypeExpr::int());
        let create_type = TypeExpr::function(vec![TypeExpr::int()], TypeExpr::Void);
        let create = p.add_function("create", create_type, &[7, 7]);
        p.add_constant("NAME", Value::string("sample"));
        p.add_string("hello".into());
        p.add_string(PikeString::from("\u{3b1}\u{3b2}"));
        p.set_lfun(vcodec_core::lfun::LFUN_CREATE, create);
        p.timestamp = Timestamp { sec: 1_700_000_000, usec: 42 };
        p.finish();
        ProgramRef::new(p)
    }

    fn roundtrip(p: &ProgramRef) -> ProgramRef {
        let bytes = encode(&Value::Program(p.clone()), &mut DefaultCodec::default()).unwrap();
        match decode_value(&bytes).unwrap() {
            Value::Program(q) => q,
            other => panic!("expected program, got {}", other),
        }
    }

    #[test]
    fn test_tables_survive() {
        let p = sample();
        let q = roundtrip(&p);
        let (p, q) = (p.borrow(), q.borrow());
        assert!(q.is_finished());
        assert_eq!(q.program, p.program);
        assert_eq!(q.linenumbers, p.linenumbers);
        assert_eq!(q.identifier_index, p.identifier_index);
        assert_eq!(q.variable_index, p.variable_index);
        assert_eq!(q.identifier_references, p.identifier_references);
        assert_eq!(q.strings, p.strings);
        assert_eq!(q.inherits.len(), p.inherits.len());
        assert_eq!(q.identifiers.len(), p.identifiers.len());
        assert_eq!(q.lfuns, p.lfuns);
        assert_eq!(q.timestamp, p.timestamp);
        assert_eq!(q.storage_needed, p.storage_needed);
        assert_eq!(q.find_constant(&"NAME".into()), Some(Value::string("sample")));
        assert!(matches!(q.inherits[0].source, InheritSource::This));
    }

    #[test]
    fn test_inherited_program_embedded() {
        let base = sample();
        let mut child = Program::new();
        child.add_inherit(&base, Some("base"));
        child.add_variable("extra", TypeExpr::String);
        child.finish();
        let child = ProgramRef::new(child);

        let q = roundtrip(&child);
        let q = q.borrow();
        assert_eq!(q.inherits.len(), 2);
        assert_eq!(q.inherits[1].name.as_ref().map(|n| n.to_string()), Some("base".to_string()));
        assert_eq!(q.find_constant(&"NAME".into()), Some(Value::string("sample")));
        assert_eq!(q.storage_needed, 2);
    }

    #[test]
    fn test_native_program_rejected() {
        let mut p = Program::new();
        p.add_native_function("write", TypeExpr::Mixed);
        p.finish();
        let err = encode(&Value::Program(ProgramRef::new(p)), &mut DefaultCodec::default())
            .unwrap_err();
        assert!(matches!(err, CodecError::Unsupported(_)));
    }

    #[test]
    fn test_borrowed_program_rejected() {
        let p = sample();
        let _guard = p.borrow_mut();
        let err = encode(&Value::Program(p.clone()), &mut DefaultCodec::default()).unwrap_err();
        assert_eq!(err, CodecError::unsupported("program is being modified"));
    }

    #[test]
    fn test_object_of_embedded_program() {
        let p = sample();
        let obj = ObjectRef::clone_of(&p);
        obj.set_variable(0, Value::Int(5));
        let bytes = encode(&Value::Object(obj), &mut DefaultCodec::default()).unwrap();
        let out = decode_value(&bytes).unwrap();
        let out = out.as_object().unwrap();
        assert_eq!(out.get_variable(0), Some(Value::Int(5)));
        assert!(out.program().unwrap().borrow().is_finished());
    }

    #[test]
    fn test_constant_identifier_flag_checked() {
        let mut p = Program::new();
        p.add_constant("A", Value::Int(1));
        p.finish();
        // point the constant past the constant table
        p.identifiers[0].func_offset = 5;
        assert_eq!(p.identifiers[0].identifier_flags, identifier_flags::CONSTANT);
        let bytes =
            encode(&Value::Program(ProgramRef::new(p)), &mut DefaultCodec::default()).unwrap();
        let err = decode_value(&bytes).unwrap_err();
        assert!(err.to_string().contains("malformed program"));
    }

    /// Encode `sample()` after `damage` and return the decode error text.
    fn decode_damaged(damage: impl FnOnce(&mut Program)) -> String {
        let p = sample();
        damage(&mut p.borrow_mut());
        let bytes = encode(&Value::Program(p), &mut DefaultCodec::default()).unwrap();
        let err = decode_value(&bytes).unwrap_err();
        assert!(err.is_format(), "{}", err);
        err.to_string()
    }

    #[test]
    fn test_first_inherit_must_be_self() {
        let other = sample();
        let msg = decode_damaged(|p| p.inherits[0].source = InheritSource::Program(other));
        assert!(
            msg.contains("malformed program: first inherit is not the program itself"),
            "{}",
            msg
        );
    }

    #[test]
    fn test_later_inherit_of_self() {
        let msg = decode_damaged(|p| p.inherits.push(Inherit::this()));
        assert!(msg.contains("malformed program: program inherits itself"), "{}", msg);
    }

    #[test]
    fn test_inherit_offset_out_of_range() {
        let msg = decode_damaged(|p| p.identifier_references[0].inherit_offset = 7);
        assert!(msg.contains("malformed program: inherit offset 7 out of range"), "{}", msg);
    }

    #[test]
    fn test_variable_index_out_of_range() {
        let msg = decode_damaged(|p| p.variable_index.push(50));
        assert!(msg.contains("malformed program: variable index 50 out of range"), "{}", msg);
    }

    #[test]
    fn test_lfun_reference_out_of_range() {
        let msg = decode_damaged(|p| p.lfuns[0] = 99);
        assert!(msg.contains("malformed program: lfun reference 99 out of range"), "{}", msg);
    }
}
