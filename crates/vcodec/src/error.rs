//! Codec errors.

use thiserror::Error;
use vcodec_core::PikeString;

/// Longest name prefix quoted in an error message.
pub const NAME_PREFIX_LEN: usize = 32;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Truncated input, unknown tag, bad back-reference, malformed program.
    #[error("format error at offset {offset}: {message}")]
    Format { offset: usize, message: String },

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("program version mismatch: expected {expected:?}, found {found:?}")]
    VersionMismatch { expected: String, found: String },

    /// A codec hook returned a value of the wrong kind.
    #[error("codec protocol violation: {0}")]
    CodecProtocol(String),

    /// A codec hook could not resolve a name.
    #[error("cannot resolve {0}")]
    Unresolved(String),

    #[error("nesting deeper than {limit}")]
    DepthExceeded { limit: usize },

    #[error("out of memory: {0}")]
    OutOfMemory(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;

impl CodecError {
    pub fn format(offset: usize, message: impl Into<String>) -> Self {
        CodecError::Format {
            offset,
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        CodecError::Unsupported(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        CodecError::CodecProtocol(message.into())
    }

    /// `Unresolved` naming the value by at most `NAME_PREFIX_LEN` characters.
    pub fn unresolved(kind: &str, name: &PikeString) -> Self {
        CodecError::Unresolved(format!("{} {:?}", kind, name.prefix(NAME_PREFIX_LEN)))
    }

    pub fn out_of_memory(what: impl Into<String>) -> Self {
        CodecError::OutOfMemory(what.into())
    }

    pub fn is_format(&self) -> bool {
        matches!(self, CodecError::Format { .. })
    }
}
