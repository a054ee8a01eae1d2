//! Per-call encode/decode settings.

/// Default bound on value nesting (containers, objects, type expressions).
pub const DEFAULT_MAX_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Deterministic output: sorted mappings and multisets, no objects,
    /// functions or programs.
    pub canonical: bool,
    pub max_depth: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            canonical: false,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl EncodeOptions {
    pub fn canonical() -> Self {
        Self {
            canonical: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Fall back to the legacy format when the magic is missing.
    pub allow_legacy: bool,
    pub max_depth: usize,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            allow_legacy: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}
