//! Compiled program tables.
//!
//! A `Program` is the output of the compiler: bytecode, line number data, a
//! string pool, the flattened inherit chain, identifier tables, constants and
//! the lfun table. Programs built here go through a small builder API
//! (`add_variable`, `add_function`, `add_constant`, `add_inherit`, ...) and are
//! sealed with [`Program::finish`].
//!
//! Name resolution goes through two levels of indirection:
//! `identifier_index` / `lfuns` hold *reference* numbers, a reference names an
//! inherit plus an identifier offset inside that inherit's program.

use std::alloc::{Layout, LayoutError};
use std::cell::{BorrowError, BorrowMutError, Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::lfun::NUM_LFUNS;
use crate::object::ObjectRef;
use crate::string::PikeString;
use crate::types::TypeExpr;
use crate::value::Value;

/// Program flag bits.
pub mod flags {
    pub const FINISHED: u32 = 0x1;
    pub const PASS_1_DONE: u32 = 0x2;
    pub const HAS_NATIVE_METHODS: u32 = 0x40;
}

/// Reference modifier bits.
pub mod id_flags {
    pub const PUBLIC: u16 = 0x8;
    pub const HIDDEN: u16 = 0x40;
    pub const INHERITED: u16 = 0x80;
}

/// Identifier kind bits. A plain variable has none of them set.
pub mod identifier_flags {
    pub const PIKE_FUNCTION: u8 = 0x1;
    pub const C_FUNCTION: u8 = 0x2;
    pub const FUNCTION: u8 = PIKE_FUNCTION | C_FUNCTION;
    pub const CONSTANT: u8 = 0x4;
}

/// `run_time_type` of an identifier whose type does not pin down a kind.
pub const RUNTIME_MIXED: u8 = 0xff;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timestamp {
    pub sec: i64,
    pub usec: i64,
}

/// Entry of `identifier_references`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    pub inherit_offset: u16,
    pub identifier_offset: u16,
    pub id_flags: u16,
}

/// Where an inherit entry's program comes from.
#[derive(Debug, Clone)]
pub enum InheritSource {
    /// The program itself. Only valid for `inherits[0]`.
    This,
    Program(ProgramRef),
    /// A program reached through a constant of a parent object.
    Parent {
        object: ObjectRef,
        identifier: u16,
        program: ProgramRef,
    },
    Nothing,
}

#[derive(Debug, Clone)]
pub struct Inherit {
    pub inherit_level: i64,
    pub identifier_level: i64,
    pub parent_offset: i64,
    pub parent_identifier: i64,
    pub storage_offset: i64,
    pub source: InheritSource,
    pub name: Option<PikeString>,
}

impl Inherit {
    pub fn this() -> Self {
        Self {
            inherit_level: 0,
            identifier_level: 0,
            parent_offset: -1,
            parent_identifier: -1,
            storage_offset: 0,
            source: InheritSource::This,
            name: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Identifier {
    pub name: PikeString,
    pub ty: TypeExpr,
    pub identifier_flags: u8,
    pub run_time_type: u8,
    /// Bytecode offset for functions, storage slot for variables, constant
    /// index for constants.
    pub func_offset: i64,
}

impl Identifier {
    pub fn is_constant(&self) -> bool {
        self.identifier_flags & identifier_flags::CONSTANT != 0
    }

    pub fn is_function(&self) -> bool {
        self.identifier_flags & identifier_flags::FUNCTION != 0
    }

    pub fn is_native(&self) -> bool {
        self.identifier_flags & identifier_flags::C_FUNCTION != 0
    }

    pub fn is_variable(&self) -> bool {
        self.identifier_flags & (identifier_flags::FUNCTION | identifier_flags::CONSTANT) == 0
    }
}

#[derive(Debug, Clone)]
pub struct ProgramConstant {
    pub value: Value,
    pub name: Option<PikeString>,
}

/// Sizes of the nine variable-length tables, in serialization order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub program: usize,
    pub linenumbers: usize,
    pub identifier_index: usize,
    pub variable_index: usize,
    pub identifier_references: usize,
    pub strings: usize,
    pub inherits: usize,
    pub identifiers: usize,
    pub constants: usize,
}

impl TableCounts {
    pub fn to_array(&self) -> [usize; 9] {
        [
            self.program,
            self.linenumbers,
            self.identifier_index,
            self.variable_index,
            self.identifier_references,
            self.strings,
            self.inherits,
            self.identifiers,
            self.constants,
        ]
    }

    pub fn from_array(c: [usize; 9]) -> Self {
        Self {
            program: c[0],
            linenumbers: c[1],
            identifier_index: c[2],
            variable_index: c[3],
            identifier_references: c[4],
            strings: c[5],
            inherits: c[6],
            identifiers: c[7],
            constants: c[8],
        }
    }
}

/// Placement of every table inside one aligned block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramLayout {
    /// Byte offset of each table, in `TableCounts` order, then the lfun table.
    pub offsets: [usize; 10],
    pub layout: Layout,
}

impl ProgramLayout {
    pub fn compute(counts: &TableCounts) -> Result<Self, LayoutError> {
        let parts = [
            Layout::array::<u8>(counts.program)?,
            Layout::array::<u8>(counts.linenumbers)?,
            Layout::array::<u16>(counts.identifier_index)?,
            Layout::array::<u16>(counts.variable_index)?,
            Layout::array::<Reference>(counts.identifier_references)?,
            Layout::array::<PikeString>(counts.strings)?,
            Layout::array::<Inherit>(counts.inherits)?,
            Layout::array::<Identifier>(counts.identifiers)?,
            Layout::array::<ProgramConstant>(counts.constants)?,
            Layout::array::<i32>(NUM_LFUNS)?,
        ];
        let mut layout = Layout::new::<()>();
        let mut offsets = [0usize; 10];
        for (slot, part) in offsets.iter_mut().zip(parts) {
            let (next, offset) = layout.extend(part)?;
            *slot = offset;
            layout = next;
        }
        Ok(Self {
            offsets,
            layout: layout.pad_to_align(),
        })
    }

    pub fn total_size(&self) -> usize {
        self.layout.size()
    }
}

#[derive(Debug)]
pub struct Program {
    pub flags: u32,
    /// Object storage size, in value slots.
    pub storage_needed: i64,
    pub alignment_needed: i64,
    pub timestamp: Timestamp,
    pub program: Vec<u8>,
    pub linenumbers: Vec<u8>,
    pub identifier_index: Vec<u16>,
    pub variable_index: Vec<u16>,
    pub identifier_references: Vec<Reference>,
    pub strings: Vec<PikeString>,
    pub inherits: Vec<Inherit>,
    pub identifiers: Vec<Identifier>,
    pub constants: Vec<ProgramConstant>,
    pub lfuns: Vec<i32>,
    pub total_size: usize,
}

impl Default for Program {
    /// Tables all empty, including `inherits`. Used as a decode target.
    fn default() -> Self {
        Self {
            flags: 0,
            storage_needed: 0,
            alignment_needed: std::mem::align_of::<Value>() as i64,
            timestamp: Timestamp::default(),
            program: Vec::new(),
            linenumbers: Vec::new(),
            identifier_index: Vec::new(),
            variable_index: Vec::new(),
            identifier_references: Vec::new(),
            strings: Vec::new(),
            inherits: Vec::new(),
            identifiers: Vec::new(),
            constants: Vec::new(),
            lfuns: vec![-1; NUM_LFUNS],
            total_size: 0,
        }
    }
}

impl Program {
    /// A fresh program under construction, with its self inherit in place.
    pub fn new() -> Self {
        let mut p = Self::default();
        p.inherits.push(Inherit::this());
        p
    }

    pub fn is_finished(&self) -> bool {
        self.flags & flags::FINISHED != 0
    }

    pub fn has_native_hooks(&self) -> bool {
        self.flags & flags::HAS_NATIVE_METHODS != 0
            || self.identifiers.iter().any(Identifier::is_native)
    }

    pub fn counts(&self) -> TableCounts {
        TableCounts {
            program: self.program.len(),
            linenumbers: self.linenumbers.len(),
            identifier_index: self.identifier_index.len(),
            variable_index: self.variable_index.len(),
            identifier_references: self.identifier_references.len(),
            strings: self.strings.len(),
            inherits: self.inherits.len(),
            identifiers: self.identifiers.len(),
            constants: self.constants.len(),
        }
    }

    // =========================================================================
    // Builder
    // =========================================================================

    /// Intern `s` in the string pool, returning its index.
    pub fn add_string(&mut self, s: PikeString) -> usize {
        if let Some(i) = self.strings.iter().position(|x| *x == s) {
            return i;
        }
        self.strings.push(s);
        self.strings.len() - 1
    }

    /// Define `ident` in this program and return its reference number.
    ///
    /// A visible identifier replaces any earlier reference of the same name
    /// in `identifier_index` (an override of an inherited identifier).
    pub fn add_identifier(&mut self, ident: Identifier, flags: u16) -> u16 {
        let name = ident.name.clone();
        self.identifiers.push(ident);
        let reference = Reference {
            inherit_offset: 0,
            identifier_offset: (self.identifiers.len() - 1) as u16,
            id_flags: flags,
        };
        self.identifier_references.push(reference);
        let ref_no = (self.identifier_references.len() - 1) as u16;
        if flags & id_flags::HIDDEN == 0 {
            self.publish(name, ref_no);
        }
        ref_no
    }

    fn publish(&mut self, name: PikeString, ref_no: u16) {
        let existing = self
            .identifier_index
            .iter()
            .position(|&r| self.reference_name(r).as_ref() == Some(&name));
        match existing {
            Some(pos) => self.identifier_index[pos] = ref_no,
            None => self.identifier_index.push(ref_no),
        }
    }

    pub fn add_variable(&mut self, name: &str, ty: TypeExpr) -> u16 {
        let slot = self.storage_needed;
        self.storage_needed += 1;
        let run_time_type = runtime_type_of(&ty);
        let ref_no = self.add_identifier(
            Identifier {
                name: name.into(),
                ty,
                identifier_flags: 0,
                run_time_type,
                func_offset: slot,
            },
            id_flags::PUBLIC,
        );
        self.variable_index.push((self.identifiers.len() - 1) as u16);
        ref_no
    }

    /// Append `code` to the bytecode and define a function starting there.
    pub fn add_function(&mut self, name: &str, ty: TypeExpr, code: &[u8]) -> u16 {
        let offset = self.program.len() as i64;
        self.program.extend_from_slice(code);
        self.linenumbers.extend_from_slice(&(offset as u32).to_be_bytes());
        self.add_identifier(
            Identifier {
                name: name.into(),
                ty,
                identifier_flags: identifier_flags::PIKE_FUNCTION,
                run_time_type: crate::value::ValueKind::Function as u8,
                func_offset: offset,
            },
            id_flags::PUBLIC,
        )
    }

    /// Define a function implemented natively. Such programs cannot be
    /// serialized by value.
    pub fn add_native_function(&mut self, name: &str, ty: TypeExpr) -> u16 {
        self.flags |= flags::HAS_NATIVE_METHODS;
        self.add_identifier(
            Identifier {
                name: name.into(),
                ty,
                identifier_flags: identifier_flags::C_FUNCTION,
                run_time_type: crate::value::ValueKind::Function as u8,
                func_offset: -1,
            },
            id_flags::PUBLIC,
        )
    }

    pub fn add_constant(&mut self, name: &str, value: Value) -> u16 {
        let idx = self.constants.len() as i64;
        let run_time_type = value.kind() as u8;
        self.constants.push(ProgramConstant {
            value,
            name: Some(name.into()),
        });
        self.add_identifier(
            Identifier {
                name: name.into(),
                ty: TypeExpr::Mixed,
                identifier_flags: identifier_flags::CONSTANT,
                run_time_type,
                func_offset: idx,
            },
            id_flags::PUBLIC,
        )
    }

    /// Constant without an identifier, e.g. a literal used by the bytecode.
    pub fn add_anonymous_constant(&mut self, value: Value) -> usize {
        self.constants.push(ProgramConstant { value, name: None });
        self.constants.len() - 1
    }

    /// Inherit `parent`, flattening its inherit chain into this one. Returns
    /// the index of the new top inherit entry.
    pub fn add_inherit(&mut self, parent: &ProgramRef, name: Option<&str>) -> usize {
        self.add_inherit_from(parent, InheritSource::Program(parent.clone()), name)
    }

    /// Inherit the program held by constant `identifier` of `object`.
    pub fn add_parent_inherit(
        &mut self,
        object: &ObjectRef,
        identifier: u16,
        parent: &ProgramRef,
        name: Option<&str>,
    ) -> usize {
        let source = InheritSource::Parent {
            object: object.clone(),
            identifier,
            program: parent.clone(),
        };
        self.add_inherit_from(parent, source, name)
    }

    fn add_inherit_from(
        &mut self,
        parent: &ProgramRef,
        source: InheritSource,
        name: Option<&str>,
    ) -> usize {
        let p = parent.borrow();
        let inherit_base = self.inherits.len();
        let ref_base = self.identifier_references.len();
        let storage_base = self.storage_needed;

        for (i, inh) in p.inherits.iter().enumerate() {
            let (source, name) = if i == 0 {
                (source.clone(), name.map(PikeString::from))
            } else {
                (inh.source.clone(), inh.name.clone())
            };
            self.inherits.push(Inherit {
                inherit_level: inh.inherit_level + 1,
                identifier_level: ref_base as i64 + inh.identifier_level,
                parent_offset: if i == 0 { 0 } else { inh.parent_offset + inherit_base as i64 },
                parent_identifier: inh.parent_identifier,
                storage_offset: storage_base + inh.storage_offset,
                source,
                name,
            });
        }
        for r in &p.identifier_references {
            self.identifier_references.push(Reference {
                inherit_offset: r.inherit_offset + inherit_base as u16,
                identifier_offset: r.identifier_offset,
                id_flags: r.id_flags | id_flags::INHERITED,
            });
        }
        self.storage_needed += p.storage_needed;
        if p.has_native_hooks() {
            self.flags |= flags::HAS_NATIVE_METHODS;
        }
        for (own, inherited) in self.lfuns.iter_mut().zip(&p.lfuns) {
            if *own < 0 && *inherited >= 0 {
                *own = inherited + ref_base as i32;
            }
        }
        let visible: Vec<u16> = p.identifier_index.iter().map(|&r| r + ref_base as u16).collect();
        drop(p);
        for r in visible {
            if let Some(name) = self.reference_name(r) {
                self.publish(name, r);
            }
        }
        inherit_base
    }

    /// Point lfun slot `lfun` at reference `reference`. Returns false when the
    /// slot or the reference does not exist.
    pub fn set_lfun(&mut self, lfun: usize, reference: u16) -> bool {
        if (reference as usize) >= self.identifier_references.len() {
            return false;
        }
        match self.lfuns.get_mut(lfun) {
            Some(slot) => {
                *slot = reference as i32;
                true
            }
            None => false,
        }
    }

    /// Seal the program: sort the identifier index, compute the footprint and
    /// set `FINISHED`.
    pub fn finish(&mut self) {
        self.sort_identifier_index();
        self.total_size = ProgramLayout::compute(&self.counts()).map_or(0, |l| l.total_size());
        self.flags |= flags::FINISHED | flags::PASS_1_DONE;
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    fn resolve<T>(
        &self,
        ref_no: u16,
        f: impl FnOnce(&Program, &Identifier) -> Option<T>,
    ) -> Option<T> {
        let reference = self.identifier_references.get(ref_no as usize)?;
        let inherit = self.inherits.get(reference.inherit_offset as usize)?;
        let idx = reference.identifier_offset as usize;
        match &inherit.source {
            InheritSource::This => f(self, self.identifiers.get(idx)?),
            InheritSource::Program(p) | InheritSource::Parent { program: p, .. } => {
                let p = p.try_borrow().ok()?;
                f(&p, p.identifiers.get(idx)?)
            }
            InheritSource::Nothing => None,
        }
    }

    pub fn reference_name(&self, ref_no: u16) -> Option<PikeString> {
        self.resolve(ref_no, |_, id| Some(id.name.clone()))
    }

    pub fn reference_identifier(&self, ref_no: u16) -> Option<Identifier> {
        self.resolve(ref_no, |_, id| Some(id.clone()))
    }

    /// Value of the constant behind reference `ref_no`.
    pub fn reference_constant(&self, ref_no: u16) -> Option<Value> {
        self.resolve(ref_no, |p, id| {
            if !id.is_constant() {
                return None;
            }
            let idx = usize::try_from(id.func_offset).ok()?;
            p.constants.get(idx).map(|c| c.value.clone())
        })
    }

    /// Object storage slot of the variable behind reference `ref_no`.
    pub fn variable_slot(&self, ref_no: u16) -> Option<usize> {
        let reference = self.identifier_references.get(ref_no as usize)?;
        let base = self.inherits.get(reference.inherit_offset as usize)?.storage_offset;
        self.resolve(ref_no, |_, id| {
            if !id.is_variable() {
                return None;
            }
            usize::try_from(base + id.func_offset).ok()
        })
    }

    /// Binary search of the sorted identifier index.
    pub fn find_identifier(&self, name: &PikeString) -> Option<u16> {
        self.identifier_index
            .binary_search_by(|&r| self.reference_name(r).as_ref().cmp(&Some(name)))
            .ok()
            .map(|pos| self.identifier_index[pos])
    }

    pub fn find_constant(&self, name: &PikeString) -> Option<Value> {
        self.find_identifier(name).and_then(|r| self.reference_constant(r))
    }

    /// Sort `identifier_index` by name, the ordering `find_identifier` relies on.
    pub fn sort_identifier_index(&mut self) {
        let mut keyed: Vec<(Option<PikeString>, u16)> = self
            .identifier_index
            .iter()
            .map(|&r| (self.reference_name(r), r))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        self.identifier_index = keyed.into_iter().map(|(_, r)| r).collect();
    }
}

fn runtime_type_of(ty: &TypeExpr) -> u8 {
    ty.runtime_kind().map_or(RUNTIME_MIXED, |k| k as u8)
}

/// Shared handle to a program. Equality and hashing are by identity.
#[derive(Clone)]
pub struct ProgramRef(Rc<RefCell<Program>>);

impl ProgramRef {
    pub fn new(program: Program) -> Self {
        Self(Rc::new(RefCell::new(program)))
    }

    pub fn borrow(&self) -> Ref<'_, Program> {
        self.0.borrow()
    }

    pub fn try_borrow(&self) -> Result<Ref<'_, Program>, BorrowError> {
        self.0.try_borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, Program> {
        self.0.borrow_mut()
    }

    pub fn try_borrow_mut(&self) -> Result<RefMut<'_, Program>, BorrowMutError> {
        self.0.try_borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for ProgramRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ProgramRef {}

impl Hash for ProgramRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ProgramRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(p) => write!(f, "program({:#x}, {} identifiers)", self.addr(), p.identifiers.len()),
            Err(_) => write!(f, "program({:#x})", self.addr()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base_program() -> ProgramRef {
        let mut p = Program::new();
        p.add_variable("count", TypeExpr::int());
        p.add_function("bump", TypeExpr::function(vec![], TypeExpr::Void), &[1, 2, 3]);
        p.add_constant("LIMIT", Value::Int(10));
        p.finish();
        ProgramRef::new(p)
    }

    #[test]
    fn test_builder_tables() {
        let p = base_program();
        let p = p.borrow();
        assert!(p.is_finished());
        assert_eq!(p.identifiers.len(), 3);
        assert_eq!(p.variable_index, vec![0]);
        assert_eq!(p.storage_needed, 1);
        assert_eq!(p.program, vec![1, 2, 3]);
        assert!(p.total_size > 0);
    }

    #[test]
    fn test_find_identifier_after_sort() {
        let p = base_program();
        let p = p.borrow();
        let names: Vec<String> = p
            .identifier_index
            .iter()
            .filter_map(|&r| p.reference_name(r))
            .map(|s| s.to_string())
            .collect();
        assert_eq!(names, vec!["LIMIT", "bump", "count"]);
        let r = p.find_identifier(&"bump".into()).unwrap();
        assert_eq!(p.reference_name(r).unwrap().to_string(), "bump");
        assert_eq!(p.find_identifier(&"missing".into()), None);
        assert_eq!(p.find_constant(&"LIMIT".into()), Some(Value::Int(10)));
        assert_eq!(p.find_constant(&"count".into()), None);
    }

    #[test]
    fn test_inherit_flattens_and_overrides() {
        let parent = base_program();
        let mut child = Program::new();
        child.add_inherit(&parent, Some("base"));
        let own = child.add_function("bump", TypeExpr::function(vec![], TypeExpr::Void), &[9]);
        child.add_variable("extra", TypeExpr::String);
        child.finish();

        assert_eq!(child.inherits.len(), 2);
        assert!(matches!(
            child.inherits[1].source,
            InheritSource::Program(ref p) if p.ptr_eq(&parent)
        ));
        assert_eq!(child.storage_needed, 2);
        assert_eq!(child.find_identifier(&"bump".into()), Some(own));
        assert_eq!(child.find_constant(&"LIMIT".into()), Some(Value::Int(10)));
        let inherited = child.identifier_references[0];
        assert_ne!(inherited.id_flags & id_flags::INHERITED, 0);
    }

    #[test]
    fn test_native_hooks_propagate() {
        let mut native = Program::new();
        native.add_native_function("write", TypeExpr::Mixed);
        native.finish();
        let native = ProgramRef::new(native);
        let mut child = Program::new();
        child.add_inherit(&native, None);
        assert!(child.has_native_hooks());
    }

    #[test]
    fn test_set_lfun_bounds() {
        let mut p = Program::new();
        let r = p.add_function("create", TypeExpr::Mixed, &[]);
        assert!(p.set_lfun(crate::lfun::LFUN_CREATE, r));
        assert!(!p.set_lfun(NUM_LFUNS, r));
        assert!(!p.set_lfun(0, r + 1));
    }

    #[test]
    fn test_layout_aligns_tables() {
        let counts = TableCounts {
            program: 3,
            identifier_index: 1,
            identifier_references: 2,
            ..Default::default()
        };
        let layout = ProgramLayout::compute(&counts).unwrap();
        assert_eq!(layout.offsets[0], 0);
        assert_eq!(layout.offsets[2] % std::mem::align_of::<u16>(), 0);
        assert_eq!(layout.offsets[4] % std::mem::align_of::<Reference>(), 0);
        assert_eq!(layout.total_size() % layout.layout.align(), 0);
    }
}
