//! Submitted document source, validated once at the boundary.

use std::ops::Deref;

use thiserror::Error;

/// Reasons a submission is refused before any workspace exists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("no source provided")]
    Empty,
    #[error("source is {actual} bytes, limit is {limit} bytes")]
    TooLarge { limit: usize, actual: usize },
    #[error("source contains NUL characters")]
    ContainsNul,
}

/// Document markup accepted for compilation.
///
/// The text is never interpreted here; it only has to be non-empty, within the size limit
/// and free of NUL characters, which the compiler cannot read back from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceText(String);

impl SourceText {
    pub fn parse(raw: String, max_bytes: usize) -> Result<Self, InputError> {
        if raw.is_empty() {
            return Err(InputError::Empty);
        }
        if raw.len() > max_bytes {
            return Err(InputError::TooLarge {
                limit: max_bytes,
                actual: raw.len(),
            });
        }
        if raw.contains('\0') {
            return Err(InputError::ContainsNul);
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for SourceText {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
