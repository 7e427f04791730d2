//! Verifier configuration.

use crate::limits::MAX_INSTRUCTIONS;

/// Options for one method builder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierOptions {
    /// Record every operation and verify only at finalize, instead of
    /// checking each operation as it is emitted.
    pub deferred: bool,
    /// Largest method body accepted, in instructions.
    pub max_instructions: usize,
}

impl Default for VerifierOptions {
    fn default() -> Self {
        Self {
            deferred: false,
            max_instructions: MAX_INSTRUCTIONS,
        }
    }
}

impl VerifierOptions {
    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }

    pub fn max_instructions(mut self, max: usize) -> Self {
        self.max_instructions = max;
        self
    }
}
