//! Identity-preserving serializer for dynamic value graphs.
//!
//! A stream is [`MAGIC`] followed by one encoded value. Values are written as
//! `(tag, number)` entries; anything already written is referenced again by
//! its sequence number, so shared substructure stays shared and cycles
//! survive a round trip. Objects, functions and programs travel by name when
//! the [`Codec`] can name them, and by value otherwise. Programs embedded by
//! value are dumped table by table and rebuilt on decode.
//!
//! ```ignore
//! use vcodec::{decode_value, encode, DefaultCodec};
//! use vcodec_core::Value;
//!
//! let v = Value::array(vec![Value::Int(1), Value::string("two")]);
//! let bytes = encode(&v, &mut DefaultCodec::default())?;
//! assert!(decode_value(&bytes)?.equal(&v));
//! ```

pub mod buffer;
pub mod canonical;
pub mod codec;
pub mod decode;
pub mod encode;
pub mod error;
pub mod legacy;
pub mod options;
pub mod program;
pub mod registry;
pub mod tag;
pub mod types;

pub use buffer::{ByteReader, ByteWriter};
pub use codec::{Codec, DefaultCodec};
pub use decode::{decode, decode_value, decode_with, float_from_parts, Decoder};
pub use encode::{encode, encode_canonical, encode_with, float_parts, Encoder};
pub use error::{CodecError, Result};
pub use legacy::decode_legacy;
pub use options::{DecodeOptions, EncodeOptions, DEFAULT_MAX_DEPTH};
pub use program::{toolchain_version, TOOLCHAIN_VERSION};
pub use registry::Registry;
pub use tag::{Tag, MAGIC};
pub use types::TypeCode;
