//! Key parsing and validation errors
//!
//! Every constructor and parser in this crate reports failures through
//! [`KeyError`]. Store-level code converts these into its own malformed-key
//! error; the variants here keep enough structure for callers that want to
//! distinguish *why* a string was rejected.

use thiserror::Error;

/// Result alias for key construction and parsing.
pub type KeyResult<T> = std::result::Result<T, KeyError>;

/// Reasons a key string or key component is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// A required component was empty.
    #[error("key field '{0}' must not be empty")]
    EmptyField(&'static str),

    /// A component contained a character outside `[A-Za-z0-9_.-]`.
    #[error("key field '{field}' contains invalid character {ch:?}")]
    InvalidCharacter {
        /// Which component was rejected.
        field: &'static str,
        /// The offending character.
        ch: char,
    },

    /// The string did not match the expected grammar.
    #[error("expected {expected}, got '{got}'")]
    WrongFormat {
        /// Human-readable description of the expected grammar.
        expected: &'static str,
        /// The rejected input.
        got: String,
    },

    /// The string carried an unknown tag prefix (not `i4x` / `c4x`).
    #[error("unknown key tag '{0}'")]
    UnknownTag(String),

    /// The revision / branch suffix was not `draft` or `published`.
    #[error("unknown branch '{0}'")]
    UnknownBranch(String),

    /// A version guid was not a valid UUID.
    #[error("invalid version guid '{0}'")]
    InvalidGuid(String),
}

impl KeyError {
    /// Stable short code for logs and counters.
    pub fn reason_code(&self) -> &'static str {
        match self {
            KeyError::EmptyField(_) => "empty_field",
            KeyError::InvalidCharacter { .. } => "invalid_character",
            KeyError::WrongFormat { .. } => "wrong_format",
            KeyError::UnknownTag(_) => "unknown_tag",
            KeyError::UnknownBranch(_) => "unknown_branch",
            KeyError::InvalidGuid(_) => "invalid_guid",
        }
    }
}

/// Validate one key component: non-empty and limited to `[A-Za-z0-9_.-]`.
///
/// The character set matches what the persisted string forms can carry
/// unescaped; separators (`/`, `@`, `#`, `:`) are therefore excluded.
pub(crate) fn validate_field(field: &'static str, value: &str) -> KeyResult<()> {
    if value.is_empty() {
        return Err(KeyError::EmptyField(field));
    }
    for ch in value.chars() {
        if !ch.is_ascii_alphanumeric() && !matches!(ch, '_' | '.' | '-') {
            return Err(KeyError::InvalidCharacter { field, ch });
        }
    }
    Ok(())
}
