//! Type expression codec used inside program dumps.
//!
//! One byte per node in prefix order. Int ranges carry two big-endian `i32`
//! bounds; object types carry an exactness byte and the program (or zero) as
//! an ordinary encoded value.

use num_enum::TryFromPrimitive;
use vcodec_core::{TypeExpr, Value};

use crate::decode::Decoder;
use crate::encode::Encoder;
use crate::error::{CodecError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum TypeCode {
    Array = 0,
    Mapping = 1,
    Multiset = 2,
    Object = 3,
    Function = 4,
    Program = 5,
    String = 6,
    Type = 7,
    Int = 8,
    Float = 9,
    Zero = 10,
    Void = 11,
    Mixed = 12,
    Many = 13,
    Not = 14,
    And = 15,
    Or = 16,
}

impl Encoder<'_> {
    pub(crate) fn encode_type(&mut self, ty: &TypeExpr) -> Result<()> {
        self.nested(|e| e.encode_type_node(ty))
    }

    fn code(&mut self, code: TypeCode) {
        self.out.write_u8(code as u8);
    }

    fn encode_type_node(&mut self, ty: &TypeExpr) -> Result<()> {
        match ty {
            TypeExpr::Function { args, many, ret } => {
                self.code(TypeCode::Function);
                for arg in args {
                    self.encode_type(arg)?;
                }
                self.code(TypeCode::Many);
                self.encode_type(many)?;
                self.encode_type(ret)?;
            }
            TypeExpr::Mapping(k, v) => {
                self.code(TypeCode::Mapping);
                self.encode_type(k)?;
                self.encode_type(v)?;
            }
            TypeExpr::Or(a, b) | TypeExpr::And(a, b) => {
                let code = if matches!(ty, TypeExpr::Or(..)) {
                    TypeCode::Or
                } else {
                    TypeCode::And
                };
                self.code(code);
                self.encode_type(a)?;
                self.encode_type(b)?;
            }
            TypeExpr::Array(t) => {
                self.code(TypeCode::Array);
                self.encode_type(t)?;
            }
            TypeExpr::Multiset(t) => {
                self.code(TypeCode::Multiset);
                self.encode_type(t)?;
            }
            TypeExpr::Not(t) => {
                self.code(TypeCode::Not);
                self.encode_type(t)?;
            }
            TypeExpr::Object { exact, program } => {
                self.code(TypeCode::Object);
                self.out.write_u8(*exact as u8);
                match program {
                    Some(p) => self.encode_value(&Value::Program(p.clone()))?,
                    None => self.encode_value(&Value::ZERO)?,
                }
            }
            TypeExpr::Int { min, max } => {
                self.code(TypeCode::Int);
                self.out.write_i32_be(*min);
                self.out.write_i32_be(*max);
            }
            TypeExpr::String => self.code(TypeCode::String),
            TypeExpr::Float => self.code(TypeCode::Float),
            TypeExpr::Zero => self.code(TypeCode::Zero),
            TypeExpr::Void => self.code(TypeCode::Void),
            TypeExpr::Mixed => self.code(TypeCode::Mixed),
            TypeExpr::Program => self.code(TypeCode::Program),
            TypeExpr::Type => self.code(TypeCode::Type),
        }
        Ok(())
    }
}

impl Decoder<'_, '_> {
    pub(crate) fn decode_type(&mut self) -> Result<TypeExpr> {
        self.nested(|d| d.decode_type_node())
    }

    fn read_code(&mut self) -> Result<TypeCode> {
        let offset = self.input.position();
        let b = self.input.read_u8()?;
        TypeCode::try_from(b)
            .map_err(|_| CodecError::format(offset, format!("unknown type code {}", b)))
    }

    fn decode_type_node(&mut self) -> Result<TypeExpr> {
        let offset = self.input.position();
        let code = self.read_code()?;
        let ty = match code {
            TypeCode::Function => {
                let mut args = Vec::new();
                loop {
                    if self.input.peek_u8() == Some(TypeCode::Many as u8) {
                        self.input.read_u8()?;
                        break;
                    }
                    args.push(self.decode_type()?);
                }
                let many = self.decode_type()?;
                let ret = self.decode_type()?;
                TypeExpr::varargs(args, many, ret)
            }
            TypeCode::Mapping => {
                let k = self.decode_type()?;
                let v = self.decode_type()?;
                TypeExpr::mapping(k, v)
            }
            TypeCode::Or => {
                let a = self.decode_type()?;
                let b = self.decode_type()?;
                TypeExpr::or(a, b)
            }
            TypeCode::And => {
                let a = self.decode_type()?;
                let b = self.decode_type()?;
                TypeExpr::and(a, b)
            }
            TypeCode::Array => TypeExpr::array(self.decode_type()?),
            TypeCode::Multiset => TypeExpr::multiset(self.decode_type()?),
            TypeCode::Not => TypeExpr::not(self.decode_type()?),
            TypeCode::Object => {
                let exact = self.input.read_u8()? != 0;
                let program = match self.decode_value()? {
                    Value::Program(p) => Some(p),
                    Value::Int(0) => None,
                    other => {
                        return Err(CodecError::format(
                            offset,
                            format!("object type refers to a {}", other.kind()),
                        ))
                    }
                };
                TypeExpr::Object { exact, program }
            }
            TypeCode::Int => {
                let min = self.input.read_i32_be()?;
                let max = self.input.read_i32_be()?;
                TypeExpr::Int { min, max }
            }
            TypeCode::String => TypeExpr::String,
            TypeCode::Float => TypeExpr::Float,
            TypeCode::Zero => TypeExpr::Zero,
            TypeCode::Void => TypeExpr::Void,
            TypeCode::Mixed => TypeExpr::Mixed,
            TypeCode::Program => TypeExpr::Program,
            TypeCode::Type => TypeExpr::Type,
            TypeCode::Many => {
                return Err(CodecError::format(offset, "MANY outside a function type"))
            }
        };
        Ok(ty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::ByteReader;
    use crate::codec::DefaultCodec;
    use crate::options::{DecodeOptions, EncodeOptions};
    use pretty_assertions::assert_eq;

    fn type_bytes(ty: &TypeExpr) -> Vec<u8> {
        let mut codec = DefaultCodec::default();
        let mut e = Encoder::new(&mut codec, &EncodeOptions::default());
        e.encode_type(ty).unwrap();
        e.into_bytes()
    }

    fn decode_type_bytes(bytes: &[u8]) -> Result<TypeExpr> {
        let mut codec = DefaultCodec::default();
        let mut d = Decoder::new(ByteReader::new(bytes), &mut codec, &DecodeOptions::default());
        d.decode_type()
    }

    #[test]
    fn test_prefix_layout() {
        let ty = TypeExpr::function(vec![TypeExpr::String], TypeExpr::int_range(0, 1));
        assert_eq!(
            type_bytes(&ty),
            vec![4, 6, 13, 11, 8, 0, 0, 0, 0, 0, 0, 0, 1]
        );
    }

    #[test]
    fn test_roundtrip() {
        let ty = TypeExpr::or(
            TypeExpr::mapping(TypeExpr::String, TypeExpr::array(TypeExpr::Mixed)),
            TypeExpr::and(TypeExpr::not(TypeExpr::Zero), TypeExpr::multiset(TypeExpr::Float)),
        );
        assert_eq!(decode_type_bytes(&type_bytes(&ty)).unwrap(), ty);
        let obj = TypeExpr::object();
        assert_eq!(decode_type_bytes(&type_bytes(&obj)).unwrap(), obj);
    }

    #[test]
    fn test_bad_codes() {
        assert!(decode_type_bytes(&[42]).unwrap_err().is_format());
        assert!(decode_type_bytes(&[13]).unwrap_err().is_format());
        assert!(decode_type_bytes(&[4, 6]).unwrap_err().is_format());
    }
}
