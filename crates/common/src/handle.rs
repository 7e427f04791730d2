//! Opaque handles for labels and locals.
//!
//! Handles carry the identity of the builder that issued them so a handle
//! from one method can never be used to address another method's state.

use std::fmt;

/// A branch target within one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Label {
    owner: u64,
    index: u32,
}

impl Label {
    pub fn new(owner: u64, index: u32) -> Self {
        Self { owner, index }
    }

    /// Identity of the builder that defined this label.
    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label#{}", self.index)
    }
}

/// A local variable slot within one method body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Local {
    owner: u64,
    index: u16,
}

impl Local {
    pub fn new(owner: u64, index: u16) -> Self {
        Self { owner, index }
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn index(&self) -> usize {
        self.index as usize
    }
}

impl fmt::Display for Local {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "local#{}", self.index)
    }
}
