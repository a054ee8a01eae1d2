//! Objects (program instances) and functions bound to them.

use std::cell::RefCell;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::program::ProgramRef;
use crate::string::PikeString;
use crate::value::Value;

/// A program instance. `program == None` means the object was destructed.
#[derive(Debug, Default)]
pub struct Object {
    pub program: Option<ProgramRef>,
    pub storage: Vec<Value>,
}

/// Shared handle to an object.
#[derive(Clone)]
pub struct ObjectRef(Rc<RefCell<Object>>);

impl ObjectRef {
    /// Create a blank instance with one zero slot per storage slot of `program`,
    /// inherited variables included.
    pub fn clone_of(program: &ProgramRef) -> Self {
        let slots = usize::try_from(program.borrow().storage_needed).unwrap_or(0);
        Self(Rc::new(RefCell::new(Object {
            program: Some(program.clone()),
            storage: vec![Value::ZERO; slots],
        })))
    }

    /// An instance whose program is not known yet. It reads as destructed
    /// until [`ObjectRef::attach`] is called.
    pub fn pending() -> Self {
        Self(Rc::new(RefCell::new(Object::default())))
    }

    /// Bind a pending instance to `program`, resetting its storage to one
    /// zero slot per storage slot.
    pub fn attach(&self, program: &ProgramRef) {
        let slots = program
            .try_borrow()
            .map_or(0, |p| usize::try_from(p.storage_needed).unwrap_or(0));
        let mut obj = self.0.borrow_mut();
        obj.program = Some(program.clone());
        obj.storage = vec![Value::ZERO; slots];
    }

    pub fn program(&self) -> Option<ProgramRef> {
        self.0.borrow().program.clone()
    }

    pub fn is_destructed(&self) -> bool {
        self.0.borrow().program.is_none()
    }

    /// Detach the object from its program and drop its storage.
    pub fn destruct(&self) {
        let mut obj = self.0.borrow_mut();
        obj.program = None;
        obj.storage.clear();
    }

    pub fn variable_count(&self) -> usize {
        self.0.borrow().storage.len()
    }

    pub fn variables(&self) -> Vec<Value> {
        self.0.borrow().storage.clone()
    }

    pub fn get_variable(&self, idx: usize) -> Option<Value> {
        self.0.borrow().storage.get(idx).cloned()
    }

    /// Returns false when `idx` is out of range.
    pub fn set_variable(&self, idx: usize, value: Value) -> bool {
        match self.0.borrow_mut().storage.get_mut(idx) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn set_variables(&self, values: Vec<Value>) {
        self.0.borrow_mut().storage = values;
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:#x})", self.addr())
    }
}

/// A method slot (identifier reference index) bound to an object.
#[derive(Clone)]
pub struct FunctionRef {
    pub object: ObjectRef,
    pub index: u16,
}

impl FunctionRef {
    pub fn new(object: ObjectRef, index: u16) -> Self {
        Self { object, index }
    }

    /// Bound to a destructed object.
    pub fn is_dead(&self) -> bool {
        self.object.is_destructed()
    }

    /// Name of the referenced identifier, resolved through the object's program.
    pub fn name(&self) -> Option<PikeString> {
        let program = self.object.program()?;
        let p = program.try_borrow().ok()?;
        p.reference_name(self.index)
    }

    /// True when looking the method up by name on its object yields this slot,
    /// i.e. the slot is not shadowed by an override.
    pub fn resolves_by_name(&self) -> bool {
        let Some(program) = self.object.program() else {
            return false;
        };
        let Ok(p) = program.try_borrow() else {
            return false;
        };
        p.reference_name(self.index)
            .and_then(|name| p.find_identifier(&name))
            .map_or(false, |found| found == self.index)
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.object.ptr_eq(&other.object)
    }
}

impl Eq for FunctionRef {}

impl Hash for FunctionRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.object.addr().hash(state);
        self.index.hash(state);
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef({:?}, {})", self.object, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::Program;
    use crate::types::TypeExpr;

    #[test]
    fn test_pending_then_attach() {
        let mut p = Program::new();
        p.add_variable("a", TypeExpr::int());
        p.add_variable("b", TypeExpr::String);
        p.finish();
        let program = ProgramRef::new(p);

        let obj = ObjectRef::pending();
        assert!(obj.is_destructed());
        assert_eq!(obj.variable_count(), 0);

        obj.attach(&program);
        assert!(!obj.is_destructed());
        assert_eq!(obj.variable_count(), 2);
        assert!(obj.program().unwrap().ptr_eq(&program));
    }
}
