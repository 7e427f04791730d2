//! Stack transitions: the effect one operation has on the abstract stack.

use std::fmt;
use std::sync::Arc;

use cilcheck_common::{TypeRegistry, TypeValue};

use crate::stack::StackState;

/// Extra check run against the live stack before a transition applies.
///
/// Used for constraints the type lattice cannot express, such as "the
/// operand must be some array".
pub type Validator = Arc<dyn Fn(&StackState, &TypeRegistry) -> Result<(), String> + Send + Sync>;

/// One candidate stack effect.
///
/// `pops` is ordered from the top of the stack down; `pushes` is ordered so
/// the first pushed value ends up deepest.
#[derive(Clone, Default)]
pub struct Transition {
    pops: Vec<TypeValue>,
    pushes: Vec<TypeValue>,
    stack_size: Option<usize>,
    duplicate: bool,
    validator: Option<Validator>,
}

impl Transition {
    pub fn new(pops: Vec<TypeValue>, pushes: Vec<TypeValue>) -> Self {
        Self {
            pops,
            pushes,
            ..Self::default()
        }
    }

    /// A transition that leaves the stack untouched.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn push(ty: impl Into<TypeValue>) -> Self {
        Self::new(Vec::new(), vec![ty.into()])
    }

    pub fn pop(pops: Vec<TypeValue>) -> Self {
        Self::new(pops, Vec::new())
    }

    /// Clear the entire stack, whatever it holds.
    pub fn pop_all() -> Self {
        Self::new(vec![TypeValue::PopAll], Vec::new())
    }

    /// Require the stack to hold exactly `size` values before applying.
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.stack_size = Some(size);
        self
    }

    /// Push copies of the popped top value instead of the declared pushes.
    ///
    /// Each declared push becomes one copy, so `dup` is a transition popping
    /// one value and pushing two.
    pub fn duplicating(mut self) -> Self {
        self.duplicate = true;
        self
    }

    pub fn with_validator(
        mut self,
        validator: impl Fn(&StackState, &TypeRegistry) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn pops(&self) -> &[TypeValue] {
        &self.pops
    }

    pub fn pushes(&self) -> &[TypeValue] {
        &self.pushes
    }

    pub fn stack_size(&self) -> Option<usize> {
        self.stack_size
    }

    pub fn is_duplicate(&self) -> bool {
        self.duplicate
    }

    pub fn validator(&self) -> Option<&Validator> {
        self.validator.as_ref()
    }

    /// True if this transition consumes the whole stack.
    pub fn pops_all(&self) -> bool {
        self.pops.first() == Some(&TypeValue::PopAll)
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("pops", &self.pops)
            .field("pushes", &self.pushes)
            .field("stack_size", &self.stack_size)
            .field("duplicate", &self.duplicate)
            .field("validator", &self.validator.is_some())
            .finish()
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = |items: &[TypeValue]| {
            items
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", list(&self.pops), list(&self.pushes))?;
        if let Some(size) = self.stack_size {
            write!(f, " [depth {size}]")?;
        }
        Ok(())
    }
}
