//! Compile-time type expressions attached to program identifiers.

use std::fmt;

use crate::program::ProgramRef;
use crate::value::ValueKind;

/// Type expression tree.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeExpr {
    /// `function(args..., many...: ret)`. `many` is `Void` when the function
    /// takes no variadic tail.
    Function {
        args: Vec<TypeExpr>,
        many: Box<TypeExpr>,
        ret: Box<TypeExpr>,
    },
    Mapping(Box<TypeExpr>, Box<TypeExpr>),
    Or(Box<TypeExpr>, Box<TypeExpr>),
    And(Box<TypeExpr>, Box<TypeExpr>),
    Array(Box<TypeExpr>),
    Multiset(Box<TypeExpr>),
    Not(Box<TypeExpr>),
    /// `object`, optionally restricted to instances of (or exactly) `program`.
    Object {
        exact: bool,
        program: Option<ProgramRef>,
    },
    Int {
        min: i32,
        max: i32,
    },
    String,
    Float,
    Zero,
    Void,
    Mixed,
    Program,
    Type,
}

impl TypeExpr {
    pub fn int() -> Self {
        TypeExpr::Int { min: i32::MIN, max: i32::MAX }
    }

    pub fn int_range(min: i32, max: i32) -> Self {
        TypeExpr::Int { min, max }
    }

    pub fn array(elem: TypeExpr) -> Self {
        TypeExpr::Array(Box::new(elem))
    }

    pub fn multiset(elem: TypeExpr) -> Self {
        TypeExpr::Multiset(Box::new(elem))
    }

    pub fn mapping(key: TypeExpr, value: TypeExpr) -> Self {
        TypeExpr::Mapping(Box::new(key), Box::new(value))
    }

    pub fn or(a: TypeExpr, b: TypeExpr) -> Self {
        TypeExpr::Or(Box::new(a), Box::new(b))
    }

    pub fn and(a: TypeExpr, b: TypeExpr) -> Self {
        TypeExpr::And(Box::new(a), Box::new(b))
    }

    pub fn not(t: TypeExpr) -> Self {
        TypeExpr::Not(Box::new(t))
    }

    pub fn function(args: Vec<TypeExpr>, ret: TypeExpr) -> Self {
        TypeExpr::Function {
            args,
            many: Box::new(TypeExpr::Void),
            ret: Box::new(ret),
        }
    }

    pub fn varargs(args: Vec<TypeExpr>, many: TypeExpr, ret: TypeExpr) -> Self {
        TypeExpr::Function {
            args,
            many: Box::new(many),
            ret: Box::new(ret),
        }
    }

    pub fn object() -> Self {
        TypeExpr::Object { exact: false, program: None }
    }

    /// Runtime kind a value of this type has, if the type pins one down.
    pub fn runtime_kind(&self) -> Option<ValueKind> {
        match self {
            TypeExpr::Function { .. } => Some(ValueKind::Function),
            TypeExpr::Mapping(..) => Some(ValueKind::Mapping),
            TypeExpr::Array(_) => Some(ValueKind::Array),
            TypeExpr::Multiset(_) => Some(ValueKind::Multiset),
            TypeExpr::Object { .. } => Some(ValueKind::Object),
            TypeExpr::Int { .. } | TypeExpr::Zero => Some(ValueKind::Int),
            TypeExpr::String => Some(ValueKind::String),
            TypeExpr::Float => Some(ValueKind::Float),
            TypeExpr::Program => Some(ValueKind::Program),
            TypeExpr::Type => Some(ValueKind::Type),
            TypeExpr::Or(..)
            | TypeExpr::And(..)
            | TypeExpr::Not(_)
            | TypeExpr::Void
            | TypeExpr::Mixed => None,
        }
    }
}

impl fmt::Display for TypeExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeExpr::Function { args, many, ret } => {
                f.write_str("function(")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", a)?;
                }
                if **many != TypeExpr::Void {
                    if !args.is_empty() {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} ...", many)?;
                }
                write!(f, ":{})", ret)
            }
            TypeExpr::Mapping(k, v) => write!(f, "mapping({}:{})", k, v),
            TypeExpr::Or(a, b) => write!(f, "{}|{}", a, b),
            TypeExpr::And(a, b) => write!(f, "{}&{}", a, b),
            TypeExpr::Array(t) => write!(f, "array({})", t),
            TypeExpr::Multiset(t) => write!(f, "multiset({})", t),
            TypeExpr::Not(t) => write!(f, "!{}", t),
            TypeExpr::Object { exact, program } => match program {
                Some(p) if *exact => write!(f, "object(is {:?})", p),
                Some(p) => write!(f, "object(implements {:?})", p),
                None => f.write_str("object"),
            },
            TypeExpr::Int { min, max } => {
                if *min == i32::MIN && *max == i32::MAX {
                    f.write_str("int")
                } else {
                    write!(f, "int({}..{})", min, max)
                }
            }
            TypeExpr::String => f.write_str("string"),
            TypeExpr::Float => f.write_str("float"),
            TypeExpr::Zero => f.write_str("zero"),
            TypeExpr::Void => f.write_str("void"),
            TypeExpr::Mixed => f.write_str("mixed"),
            TypeExpr::Program => f.write_str("program"),
            TypeExpr::Type => f.write_str("type"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let t = TypeExpr::varargs(
            vec![TypeExpr::int(), TypeExpr::mapping(TypeExpr::String, TypeExpr::Mixed)],
            TypeExpr::String,
            TypeExpr::or(TypeExpr::int_range(0, 10), TypeExpr::Void),
        );
        assert_eq!(
            t.to_string(),
            "function(int, mapping(string:mixed), string ...:int(0..10)|void)"
        );
        assert_eq!(TypeExpr::function(vec![], TypeExpr::Void).to_string(), "function(:void)");
    }

    #[test]
    fn test_runtime_kind() {
        assert_eq!(TypeExpr::Zero.runtime_kind(), Some(ValueKind::Int));
        assert_eq!(TypeExpr::array(TypeExpr::Mixed).runtime_kind(), Some(ValueKind::Array));
        assert_eq!(TypeExpr::Mixed.runtime_kind(), None);
    }
}
