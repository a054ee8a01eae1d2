//! Name resolution hooks consulted by the encoder and decoder.
//!
//! Objects, functions and programs can travel either by *name* (the codec
//! maps them to a plain value and back) or by *value* (the encoder embeds
//! them). A [`Codec`] decides which, and supplies the payload that stands in
//! for an object's state.

use tracing::trace;
use vcodec_core::{ObjectRef, PikeString, Value};

use crate::error::{CodecError, Result};
use crate::registry::Registry;

pub trait Codec {
    /// Stable name for an object, function or program, or `None` to have it
    /// embedded by value. A name must be a plain value: not an object,
    /// function, program or type.
    fn name_of(&mut self, value: &Value) -> Result<Option<Value>>;

    /// Resolve a name produced by `name_of` for an object.
    fn object_of(&mut self, name: &Value) -> Result<Value>;

    fn function_of(&mut self, name: &Value) -> Result<Value>;

    fn program_of(&mut self, name: &Value) -> Result<Value>;

    /// State of an object embedded by value.
    fn encode_object(&mut self, object: &ObjectRef) -> Result<Value>;

    /// Restore state produced by `encode_object` into a fresh instance.
    fn decode_object(&mut self, object: &ObjectRef, payload: Value) -> Result<()>;
}

/// Codec backed by a [`Registry`] of named values.
///
/// Names are dotted paths (`"Int.MAX"`). The first segment is looked up in
/// the registry, later segments index mappings by string key, or programs and
/// objects by identifier. Objects embedded by value carry their variable
/// storage as an array.
#[derive(Debug)]
pub struct DefaultCodec {
    registry: Registry,
}

impl Default for DefaultCodec {
    /// Codec over the builtin registry.
    fn default() -> Self {
        Self::new(Registry::builtins())
    }
}

impl DefaultCodec {
    pub fn new(registry: Registry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    fn path_of<'a>(kind: &str, name: &'a Value) -> Result<&'a PikeString> {
        name.as_str()
            .ok_or_else(|| {
                CodecError::protocol(format!(
                    "{} name must be a string, got {}",
                    kind,
                    name.kind()
                ))
            })
    }
}

impl Codec for DefaultCodec {
    fn name_of(&mut self, value: &Value) -> Result<Option<Value>> {
        let name = self.registry.name_of(value).map(Value::String);
        trace!(found = name.is_some(), "name_of {}", value.kind());
        Ok(name)
    }

    fn object_of(&mut self, name: &Value) -> Result<Value> {
        let path = Self::path_of("object", name)?;
        self.registry
            .resolve(path)
            .ok_or_else(|| CodecError::unresolved("object", path))
    }

    fn function_of(&mut self, name: &Value) -> Result<Value> {
        let path = Self::path_of("function", name)?;
        self.registry
            .resolve(path)
            .ok_or_else(|| CodecError::unresolved("function", path))
    }

    fn program_of(&mut self, name: &Value) -> Result<Value> {
        let path = Self::path_of("program", name)?;
        self.registry
            .resolve(path)
            .ok_or_else(|| CodecError::unresolved("program", path))
    }

    fn encode_object(&mut self, object: &ObjectRef) -> Result<Value> {
        Ok(Value::array(object.variables()))
    }

    fn decode_object(&mut self, object: &ObjectRef, payload: Value) -> Result<()> {
        let Value::Array(items) = payload else {
            return Err(CodecError::protocol(format!(
                "object payload must be an array, got {}",
                payload.kind()
            )));
        };
        let items = items.borrow().clone();
        if items.len() != object.variable_count() {
            return Err(CodecError::protocol(format!(
                "object payload has {} variables, program declares {}",
                items.len(),
                object.variable_count()
            )));
        }
        object.set_variables(items);
        Ok(())
    }
}
