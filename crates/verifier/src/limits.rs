//! Hard limits on method bodies.

use crate::error::VerifyError;

/// Maximum method size in instructions.
pub const MAX_INSTRUCTIONS: usize = 65_536;

/// Maximum number of targets in one `switch`.
pub const MAX_SWITCH_TARGETS: usize = 4_096;

/// Check that appending one more instruction keeps the body within `max`.
pub fn check_size(current: usize, max: usize) -> Result<(), VerifyError> {
    if current >= max {
        return Err(VerifyError::TooLarge {
            size: current + 1,
            max,
        });
    }
    Ok(())
}
