//! Verification errors for the cilcheck verifier.
//!
//! Every error that belongs to one instruction carries its index (`at`).
//! A builder stops at the first error: once a sequence is rejected it is
//! never usable for emission.

use thiserror::Error;

/// Errors found while verifying a method body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    // --- Stack ---
    /// Fewer values on the stack than the operation pops.
    #[error("stack underflow at instruction {at}: {}", underflow_detail(*required, *available))]
    StackUnderflow {
        at: usize,
        required: usize,
        available: usize,
    },

    /// A value is present but not assignable to what the operation accepts.
    ///
    /// `operand` counts from the top of the stack (0 = top).
    #[error(
        "type mismatch at instruction {at}: operand {operand} (from top) expected {expected}, found {found}"
    )]
    TypeMismatch {
        at: usize,
        operand: usize,
        expected: String,
        found: String,
    },

    /// The operation (or a merge point) requires an exact stack depth.
    #[error(
        "stack size mismatch at instruction {at}: expected exactly {expected} value(s), found {found}"
    )]
    StackSize {
        at: usize,
        expected: usize,
        found: usize,
    },

    /// A transition's validation callback refused the live stack.
    #[error("instruction {at} rejected: {reason}")]
    Rejected { at: usize, reason: String },

    /// A transition was attempted at a point no control flow reaches.
    #[error("unreachable code at instruction {at}")]
    UnreachableCode { at: usize },

    // --- Labels ---
    /// Label misuse: double mark, never marked, foreign builder, bad name.
    #[error("label {label}: {reason}")]
    LabelError { label: String, reason: String },

    // --- Protected regions ---
    /// Illegal transfer across a try/catch/finally boundary, or a malformed
    /// open/close sequence.
    #[error("region violation at instruction {at}: {reason}")]
    RegionViolation { at: usize, reason: String },

    // --- Returns ---
    /// At least one path from an entry point never reaches a terminator.
    /// Each path is the sequence of labels branched to along the way.
    #[error("not every path returns: {}", render_paths(paths))]
    NonTerminating { paths: Vec<Vec<String>> },

    // --- Usage ---
    /// An operand names something that does not exist in this method.
    #[error("invalid operand at instruction {at}: {reason}")]
    InvalidOperand { at: usize, reason: String },

    /// The method exceeds the configured instruction limit.
    #[error("method too large: {size} instructions (max {max})")]
    TooLarge { size: usize, max: usize },
}

/// Taxonomy the error variants fall into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    StackUnderflow,
    TypeMismatch,
    UnreachableCode,
    LabelError,
    RegionViolation,
    NonTerminating,
    Usage,
}

impl VerifyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VerifyError::StackUnderflow { .. } => ErrorKind::StackUnderflow,
            VerifyError::TypeMismatch { .. }
            | VerifyError::StackSize { .. }
            | VerifyError::Rejected { .. } => ErrorKind::TypeMismatch,
            VerifyError::UnreachableCode { .. } => ErrorKind::UnreachableCode,
            VerifyError::LabelError { .. } => ErrorKind::LabelError,
            VerifyError::RegionViolation { .. } => ErrorKind::RegionViolation,
            VerifyError::NonTerminating { .. } => ErrorKind::NonTerminating,
            VerifyError::InvalidOperand { .. } | VerifyError::TooLarge { .. } => ErrorKind::Usage,
        }
    }

    /// Index of the instruction the error belongs to, if any.
    pub fn at(&self) -> Option<usize> {
        match self {
            VerifyError::StackUnderflow { at, .. }
            | VerifyError::TypeMismatch { at, .. }
            | VerifyError::StackSize { at, .. }
            | VerifyError::Rejected { at, .. }
            | VerifyError::UnreachableCode { at }
            | VerifyError::RegionViolation { at, .. }
            | VerifyError::InvalidOperand { at, .. } => Some(*at),
            VerifyError::LabelError { .. }
            | VerifyError::NonTerminating { .. }
            | VerifyError::TooLarge { .. } => None,
        }
    }

    /// Stack slot (from the top) the error points at, if any.
    pub fn operand(&self) -> Option<usize> {
        match self {
            VerifyError::TypeMismatch { operand, .. } => Some(*operand),
            _ => None,
        }
    }

    pub(crate) fn label(label: impl ToString, reason: impl Into<String>) -> Self {
        VerifyError::LabelError {
            label: label.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn region(at: usize, reason: impl Into<String>) -> Self {
        VerifyError::RegionViolation {
            at,
            reason: reason.into(),
        }
    }
}

fn underflow_detail(required: usize, available: usize) -> String {
    if available == 0 {
        format!("expected {required} value(s) but the stack is empty")
    } else {
        format!(
            "expected {required} value(s), found {available} ({} missing)",
            required.saturating_sub(available)
        )
    }
}

fn render_paths(paths: &[Vec<String>]) -> String {
    paths
        .iter()
        .map(|p| {
            if p.is_empty() {
                "entry".to_string()
            } else {
                format!("entry -> {}", p.join(" -> "))
            }
        })
        .collect::<Vec<_>>()
        .join("; ")
}
