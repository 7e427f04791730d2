//! Error types for the cilcheck listing assembler.

use cilcheck_common::ParseTypeError;
use thiserror::Error;

/// Errors produced while reading a listing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsmError {
    /// An unrecognized operation mnemonic was encountered.
    #[error("line {line}: unknown operation '{token}'")]
    UnknownMnemonic { line: usize, token: String },

    /// An unrecognized `.directive` was encountered.
    #[error("line {line}: unknown directive '{token}'")]
    UnknownDirective { line: usize, token: String },

    /// A type name could not be parsed.
    #[error("line {line}: {source}")]
    InvalidType {
        line: usize,
        #[source]
        source: ParseTypeError,
    },

    /// An operation or directive ended before its operands did.
    #[error("line {line}: {mnemonic} expects {expected}")]
    MissingOperand {
        line: usize,
        mnemonic: String,
        expected: &'static str,
    },

    /// A numeric literal could not be parsed or is out of range.
    #[error("line {line}: invalid number '{token}'")]
    InvalidNumber { line: usize, token: String },

    /// A string literal was not closed before the end of the line.
    #[error("line {line}: unterminated string literal")]
    UnterminatedString { line: usize },

    /// A token appeared where it was not expected.
    #[error("line {line}: unexpected token '{token}'")]
    UnexpectedToken { line: usize, token: String },

    /// Body content appeared before any `.method` header.
    #[error("line {line}: body content before .method")]
    OutsideMethod { line: usize },

    /// A second `.method` header was found.
    #[error("line {line}: only one .method per listing (first at line {first})")]
    DuplicateMethod { line: usize, first: usize },

    /// The listing has no `.method` header at all.
    #[error("listing has no .method header")]
    MissingMethod,
}

impl AsmError {
    /// Source line the error points at, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            AsmError::UnknownMnemonic { line, .. }
            | AsmError::UnknownDirective { line, .. }
            | AsmError::InvalidType { line, .. }
            | AsmError::MissingOperand { line, .. }
            | AsmError::InvalidNumber { line, .. }
            | AsmError::UnterminatedString { line }
            | AsmError::UnexpectedToken { line, .. }
            | AsmError::OutsideMethod { line }
            | AsmError::DuplicateMethod { line, .. } => Some(*line),
            AsmError::MissingMethod => None,
        }
    }
}
