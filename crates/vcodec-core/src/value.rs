//! Runtime values and shared container handles.
//!
//! `Value` is cheap to clone: containers, objects and programs are shared
//! handles, so a clone refers to the same underlying storage.
//!
//! Two notions of equality exist:
//! - `==` / `Hash` is *identity*: ints by value, floats by bit pattern,
//!   strings by content, everything else by handle. This is what mapping keys
//!   and the encoder's memo table use.
//! - [`Value::equal`] is *structural* and walks containers (cycle-safe).

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use hashbrown::HashSet;
use indexmap::IndexMap;

use crate::object::{FunctionRef, ObjectRef};
use crate::program::ProgramRef;
use crate::string::PikeString;
use crate::types::TypeExpr;

/// Runtime classification of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ValueKind {
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
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Array => "array",
            ValueKind::Mapping => "mapping",
            ValueKind::Multiset => "multiset",
            ValueKind::Object => "object",
            ValueKind::Function => "function",
            ValueKind::Program => "program",
            ValueKind::String => "string",
            ValueKind::Float => "float",
            ValueKind::Int => "int",
            ValueKind::Type => "type",
        }
    }

    /// Kinds that carry no references to other values.
    pub fn is_basic(self) -> bool {
        matches!(self, ValueKind::Int | ValueKind::Float | ValueKind::String)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type Mapping = IndexMap<Value, Value>;

macro_rules! shared_handle {
    ($(#[$meta:meta])* $name:ident, $inner:ty) => {
        $(#[$meta])*
        #[derive(Clone, Default)]
        pub struct $name(Rc<RefCell<$inner>>);

        impl $name {
            pub fn new(inner: $inner) -> Self {
                Self(Rc::new(RefCell::new(inner)))
            }

            pub fn borrow(&self) -> Ref<'_, $inner> {
                self.0.borrow()
            }

            pub fn borrow_mut(&self) -> RefMut<'_, $inner> {
                self.0.borrow_mut()
            }

            pub fn ptr_eq(&self, other: &Self) -> bool {
                Rc::ptr_eq(&self.0, &other.0)
            }

            /// Address of the shared storage, stable for the handle's lifetime.
            pub fn addr(&self) -> usize {
                Rc::as_ptr(&self.0) as *const () as usize
            }

            pub fn len(&self) -> usize {
                self.0.borrow().len()
            }

            pub fn is_empty(&self) -> bool {
                self.len() == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x}, len={})", stringify!($name), self.addr(), self.len())
            }
        }
    };
}

shared_handle!(
    /// Shared array storage.
    ArrayRef,
    Vec<Value>
);
shared_handle!(
    /// Shared mapping storage (insertion ordered).
    MappingRef,
    Mapping
);
shared_handle!(
    /// Shared multiset storage: an ordered bag.
    MultisetRef,
    Vec<Value>
);

impl ArrayRef {
    pub fn get(&self, idx: usize) -> Option<Value> {
        self.0.borrow().get(idx).cloned()
    }

    /// Returns false when `idx` is out of range.
    pub fn set(&self, idx: usize, value: Value) -> bool {
        match self.0.borrow_mut().get_mut(idx) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }
}

impl MappingRef {
    pub fn get(&self, key: &Value) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: Value, value: Value) -> Option<Value> {
        self.0.borrow_mut().insert(key, value)
    }
}

impl MultisetRef {
    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    pub fn contains(&self, value: &Value) -> bool {
        self.0.borrow().iter().any(|v| v == value)
    }
}

/// A runtime value.
#[derive(Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    String(PikeString),
    Array(ArrayRef),
    Mapping(MappingRef),
    Multiset(MultisetRef),
    Object(ObjectRef),
    Function(FunctionRef),
    Program(ProgramRef),
    Type(TypeExpr),
}

impl Value {
    pub const ZERO: Value = Value::Int(0);

    pub fn string(s: &str) -> Self {
        Value::String(PikeString::from(s))
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(ArrayRef::new(items))
    }

    pub fn mapping<I: IntoIterator<Item = (Value, Value)>>(pairs: I) -> Self {
        Value::Mapping(MappingRef::new(pairs.into_iter().collect()))
    }

    pub fn multiset(items: Vec<Value>) -> Self {
        Value::Multiset(MultisetRef::new(items))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::Array(_) => ValueKind::Array,
            Value::Mapping(_) => ValueKind::Mapping,
            Value::Multiset(_) => ValueKind::Multiset,
            Value::Object(_) => ValueKind::Object,
            Value::Function(_) => ValueKind::Function,
            Value::Program(_) => ValueKind::Program,
            Value::Type(_) => ValueKind::Type,
        }
    }

    pub fn is_zero(&self) -> bool {
        matches!(self, Value::Int(0))
    }

    /// A destructed object, or a function bound to one.
    pub fn is_dead(&self) -> bool {
        match self {
            Value::Object(o) => o.is_destructed(),
            Value::Function(f) => f.is_dead(),
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&PikeString> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayRef> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_mapping(&self) -> Option<&MappingRef> {
        match self {
            Value::Mapping(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_program(&self) -> Option<&ProgramRef> {
        match self {
            Value::Program(p) => Some(p),
            _ => None,
        }
    }

    /// Identity comparison, same as `==`.
    pub fn is_same(&self, other: &Value) -> bool {
        self == other
    }

    /// Structural equality. Containers are compared element-wise, mapping
    /// keys by identity, multisets as bags; objects, functions and programs
    /// by identity. Re-entering a pair already under comparison counts as equal.
    pub fn equal(&self, other: &Value) -> bool {
        let mut seen = HashSet::new();
        equal_inner(self, other, &mut seen)
    }
}

fn equal_inner(a: &Value, b: &Value, seen: &mut HashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            if x.ptr_eq(y) || !seen.insert((x.addr(), y.addr())) {
                return true;
            }
            let xs = x.borrow().clone();
            let ys = y.borrow().clone();
            xs.len() == ys.len() && xs.iter().zip(ys.iter()).all(|(p, q)| equal_inner(p, q, seen))
        }
        (Value::Mapping(x), Value::Mapping(y)) => {
            if x.ptr_eq(y) || !seen.insert((x.addr(), y.addr())) {
                return true;
            }
            let xs = x.borrow().clone();
            let ys = y.borrow().clone();
            if xs.len() != ys.len() {
                return false;
            }
            xs.iter().all(|(k, v)| match ys.get(k) {
                Some(w) => equal_inner(v, w, seen),
                None => false,
            })
        }
        (Value::Multiset(x), Value::Multiset(y)) => {
            if x.ptr_eq(y) || !seen.insert((x.addr(), y.addr())) {
                return true;
            }
            let xs = x.borrow().clone();
            let ys = y.borrow().clone();
            if xs.len() != ys.len() {
                return false;
            }
            let mut used = vec![false; ys.len()];
            'outer: for p in &xs {
                for (i, q) in ys.iter().enumerate() {
                    if !used[i] && equal_inner(p, q, seen) {
                        used[i] = true;
                        continue 'outer;
                    }
                }
                return false;
            }
            true
        }
        (Value::Object(x), Value::Object(y)) => x.ptr_eq(y),
        (Value::Function(x), Value::Function(y)) => x == y,
        (Value::Program(x), Value::Program(y)) => x.ptr_eq(y),
        (Value::Type(x), Value::Type(y)) => x == y,
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(x), Value::Int(y)) => x == y,
            (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
            (Value::String(x), Value::String(y)) => x == y,
            (Value::Array(x), Value::Array(y)) => x.ptr_eq(y),
            (Value::Mapping(x), Value::Mapping(y)) => x.ptr_eq(y),
            (Value::Multiset(x), Value::Multiset(y)) => x.ptr_eq(y),
            (Value::Object(x), Value::Object(y)) => x.ptr_eq(y),
            (Value::Function(x), Value::Function(y)) => x == y,
            (Value::Program(x), Value::Program(y)) => x.ptr_eq(y),
            (Value::Type(x), Value::Type(y)) => x == y,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.kind().hash(state);
        match self {
            Value::Int(i) => i.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::Array(a) => a.addr().hash(state),
            Value::Mapping(m) => m.addr().hash(state),
            Value::Multiset(m) => m.addr().hash(state),
            Value::Object(o) => o.addr().hash(state),
            Value::Function(f) => f.hash(state),
            Value::Program(p) => p.addr().hash(state),
            Value::Type(t) => t.hash(state),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<PikeString> for Value {
    fn from(s: PikeString) -> Self {
        Value::String(s)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = Vec::new();
        display_inner(self, f, &mut path)
    }
}

fn display_list(
    items: &[Value],
    open: &str,
    close: &str,
    f: &mut fmt::Formatter<'_>,
    path: &mut Vec<usize>,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.iter().enumerate() {
        f.write_str(if i == 0 { " " } else { ", " })?;
        display_inner(item, f, path)?;
    }
    f.write_str(" ")?;
    f.write_str(close)
}

fn display_inner(v: &Value, f: &mut fmt::Formatter<'_>, path: &mut Vec<usize>) -> fmt::Result {
    let addr = match v {
        Value::Array(a) => Some(a.addr()),
        Value::Mapping(m) => Some(m.addr()),
        Value::Multiset(m) => Some(m.addr()),
        _ => None,
    };
    if let Some(addr) = addr {
        if path.contains(&addr) {
            return f.write_str("<cycle>");
        }
        path.push(addr);
    }
    let result = match v {
        Value::Int(i) => write!(f, "{}", i),
        Value::Float(x) => write!(f, "{:?}", x),
        Value::String(s) => write!(f, "{:?}", s),
        Value::Array(a) => {
            let items = a.borrow().clone();
            display_list(&items, "({", "})", f, path)
        }
        Value::Multiset(m) => {
            let items = m.borrow().clone();
            display_list(&items, "(<", ">)", f, path)
        }
        Value::Mapping(m) => {
            let pairs: Vec<(Value, Value)> =
                m.borrow().iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            f.write_str("([")?;
            for (i, (k, val)) in pairs.iter().enumerate() {
                f.write_str(if i == 0 { " " } else { ", " })?;
                display_inner(k, f, path)?;
                f.write_str(": ")?;
                display_inner(val, f, path)?;
            }
            f.write_str(" ])")
        }
        Value::Object(o) => {
            if o.is_destructed() {
                f.write_str("object(destructed)")
            } else {
                write!(f, "object({} variables)", o.variable_count())
            }
        }
        Value::Function(func) => match func.name() {
            Some(name) => write!(f, "function({})", name),
            None => f.write_str("function"),
        },
        Value::Program(p) => write!(f, "{:?}", p),
        Value::Type(t) => write!(f, "type({})", t),
    };
    if addr.is_some() {
        path.pop();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_vs_structure() {
        let a = Value::array(vec![Value::Int(1), Value::string("x")]);
        let b = Value::array(vec![Value::Int(1), Value::string("x")]);
        assert_ne!(a, b);
        assert!(a.equal(&b));
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_strings_compare_by_content() {
        assert_eq!(Value::string("abc"), Value::string("abc"));
    }

    #[test]
    fn test_float_identity_uses_bits() {
        assert_ne!(Value::Float(0.0), Value::Float(-0.0));
        assert!(Value::Float(0.0).equal(&Value::Float(-0.0)));
        assert_eq!(Value::Float(f64::NAN), Value::Float(f64::NAN));
    }

    #[test]
    fn test_equal_on_cycles_terminates() {
        let a = ArrayRef::new(vec![Value::ZERO]);
        a.set(0, Value::Array(a.clone()));
        let b = ArrayRef::new(vec![Value::ZERO]);
        b.set(0, Value::Array(b.clone()));
        assert!(Value::Array(a).equal(&Value::Array(b)));
    }

    #[test]
    fn test_multiset_equal_ignores_order() {
        let a = Value::multiset(vec![Value::Int(1), Value::Int(2), Value::Int(2)]);
        let b = Value::multiset(vec![Value::Int(2), Value::Int(1), Value::Int(2)]);
        let c = Value::multiset(vec![Value::Int(1), Value::Int(1), Value::Int(2)]);
        assert!(a.equal(&b));
        assert!(!a.equal(&c));
    }

    #[test]
    fn test_display() {
        let m = Value::mapping([(Value::string("a"), Value::Int(1))]);
        let v = Value::array(vec![Value::Int(1), Value::Float(2.5), m]);
        assert_eq!(v.to_string(), r#"({ 1, 2.5, ([ "a": 1 ]) })"#);
        assert_eq!(Value::multiset(vec![]).to_string(), "(< >)");
    }

    #[test]
    fn test_display_cycle() {
        let a = ArrayRef::new(vec![Value::ZERO]);
        a.set(0, Value::Array(a.clone()));
        assert_eq!(Value::Array(a).to_string(), "({ <cycle> })");
    }
}
