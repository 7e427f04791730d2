//! Errors for parsing type names.

use thiserror::Error;

/// Errors produced when parsing a type from its listing name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseTypeError {
    /// The type name was empty.
    #[error("empty type name")]
    Empty,

    /// The name contains characters that cannot appear in a type name.
    #[error("invalid type name '{0}'")]
    InvalidName(String),

    /// A byref of a byref is not a representable type.
    #[error("byref of byref is not allowed: '{0}'")]
    NestedByRef(String),
}
