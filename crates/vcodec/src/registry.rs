//! Named values known to the default codec.

use hashbrown::{HashMap, HashSet};
use vcodec_core::{FunctionRef, PikeString, Value};

use crate::program::toolchain_version;

/// Global name table plus the reverse index used by `name_of`.
///
/// Registering a mapping, program or object also names whatever is reachable
/// from it by dotted path at registration time: mapping members under string
/// keys, program constants, and object constants and methods.
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<PikeString, Value>,
    names: HashMap<Value, PikeString>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The fixed builtin set.
    pub fn builtins() -> Self {
        let mut r = Self::new();
        r.insert("version", Value::String(toolchain_version()));
        r.insert(
            "Int",
            Value::mapping([
                (Value::string("MAX"), Value::Int(i64::MAX)),
                (Value::string("MIN"), Value::Int(i64::MIN)),
            ]),
        );
        r.insert(
            "Float",
            Value::mapping([
                (Value::string("MAX"), Value::Float(f64::MAX)),
                (Value::string("MIN"), Value::Float(f64::MIN_POSITIVE)),
                (Value::string("EPSILON"), Value::Float(f64::EPSILON)),
                (Value::string("INF"), Value::Float(f64::INFINITY)),
            ]),
        );
        r
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.entries.get(&PikeString::from(name))
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        let name = PikeString::from(name);
        let mut seen = HashSet::new();
        self.index(&name, &value, &mut seen);
        self.entries.insert(name, value);
    }

    fn index(&mut self, path: &PikeString, value: &Value, seen: &mut HashSet<Value>) {
        if !seen.insert(value.clone()) {
            return;
        }
        if matches!(value, Value::Object(_) | Value::Function(_) | Value::Program(_)) {
            self.names.entry(value.clone()).or_insert_with(|| path.clone());
        }
        for (segment, child) in members(value) {
            let child_path = PikeString::from(format!("{}.{}", path, segment));
            self.index(&child_path, &child, seen);
        }
    }

    /// Registered name of an object, function or program.
    pub fn name_of(&self, value: &Value) -> Option<PikeString> {
        self.names.get(value).cloned()
    }

    /// Resolve a dotted path.
    pub fn resolve(&self, path: &PikeString) -> Option<Value> {
        let text = path.to_string_lossy();
        let mut segments = text.split('.');
        let mut current = self.entries.get(&PikeString::from(segments.next()?))?.clone();
        for segment in segments {
            current = member(&current, &PikeString::from(segment))?;
        }
        Some(current)
    }
}

fn member(value: &Value, segment: &PikeString) -> Option<Value> {
    match value {
        Value::Mapping(m) => m.get(&Value::String(segment.clone())),
        Value::Program(p) => p.try_borrow().ok()?.find_constant(segment),
        Value::Object(o) => {
            let program = o.program()?;
            let p = program.try_borrow().ok()?;
            let r = p.find_identifier(segment)?;
            if let Some(v) = p.reference_constant(r) {
                return Some(v);
            }
            if let Some(slot) = p.variable_slot(r) {
                return o.get_variable(slot);
            }
            Some(Value::Function(FunctionRef::new(o.clone(), r)))
        }
        _ => None,
    }
}

/// Children reachable by one path segment.
fn members(value: &Value) -> Vec<(PikeString, Value)> {
    match value {
        Value::Mapping(m) => m
            .borrow()
            .iter()
            .filter_map(|(k, v)| k.as_str().map(|s| (s.clone(), v.clone())))
            .collect(),
        Value::Program(p) => {
            let Ok(p) = p.try_borrow() else {
                return Vec::new();
            };
            let named = p
                .constants
                .iter()
                .filter_map(|c| c.name.clone().map(|n| (n, c.value.clone())))
                .collect();
            named
        }
        Value::Object(o) => {
            let Some(program) = o.program() else {
                return Vec::new();
            };
            let Ok(p) = program.try_borrow() else {
                return Vec::new();
            };
            let named = p
                .identifier_index
                .iter()
                .filter_map(|&r| {
                    let id = p.reference_identifier(r)?;
                    if id.is_variable() {
                        return None;
                    }
                    let v = match p.reference_constant(r) {
                        Some(v) => v,
                        None => Value::Function(FunctionRef::new(o.clone(), r)),
                    };
                    Some((id.name, v))
                })
                .collect();
            named
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcodec_core::{ObjectRef, Program, ProgramRef, TypeExpr};

    #[test]
    fn test_builtins_resolve() {
        let r = Registry::builtins();
        assert_eq!(r.resolve(&"Int.MAX".into()), Some(Value::Int(i64::MAX)));
        assert_eq!(r.resolve(&"Float.EPSILON".into()), Some(Value::Float(f64::EPSILON)));
        assert_eq!(r.resolve(&"Int.NOPE".into()), None);
        assert_eq!(r.resolve(&"nope".into()), None);
    }

    #[test]
    fn test_reverse_lookup_through_program() {
        let mut inner = Program::new();
        inner.add_variable("x", TypeExpr::int());
        inner.finish();
        let inner = ProgramRef::new(inner);

        let mut outer = Program::new();
        outer.add_constant("Inner", Value::Program(inner.clone()));
        outer.finish();
        let outer = ProgramRef::new(outer);

        let mut r = Registry::new();
        r.insert("mod", Value::Program(outer.clone()));
        assert_eq!(r.name_of(&Value::Program(outer)).unwrap().to_string(), "mod");
        assert_eq!(r.name_of(&Value::Program(inner.clone())).unwrap().to_string(), "mod.Inner");
        assert_eq!(r.resolve(&"mod.Inner".into()), Some(Value::Program(inner)));
    }

    #[test]
    fn test_object_methods_are_named() {
        let mut p = Program::new();
        let method = p.add_function("run", TypeExpr::function(vec![], TypeExpr::Void), &[0]);
        p.finish();
        let obj = ObjectRef::clone_of(&ProgramRef::new(p));
        let mut r = Registry::new();
        r.insert("main", Value::Object(obj.clone()));
        let f = Value::Function(FunctionRef::new(obj, method));
        assert_eq!(r.name_of(&f).unwrap().to_string(), "main.run");
        assert_eq!(r.resolve(&"main.run".into()), Some(f));
    }
}
