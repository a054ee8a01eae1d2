//! Value model for the vcodec serializer.
//!
//! This crate provides the runtime values the codec walks:
//! - Immutable narrow/wide strings
//! - Shared arrays, mappings and multisets with identity semantics
//! - Objects, bound functions and compiled programs with their tables
//! - Compile-time type expressions

pub mod lfun;
pub mod object;
pub mod program;
pub mod string;
pub mod types;
pub mod value;

pub use lfun::{lfun_index, LFUN_NAMES, NUM_LFUNS};
pub use object::{FunctionRef, Object, ObjectRef};
pub use program::{
    Identifier, Inherit, InheritSource, Program, ProgramConstant, ProgramLayout, ProgramRef,
    Reference, TableCounts, Timestamp,
};
pub use string::PikeString;
pub use types::TypeExpr;
pub use value::{ArrayRef, Mapping, MappingRef, MultisetRef, Value, ValueKind};
