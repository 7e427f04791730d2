//! Abstract evaluation stack.
//!
//! A [`StackState`] is an immutable snapshot: applying a transition yields a
//! new state and leaves the old one untouched, so states can be stored as
//! label shapes and per-instruction snapshots without copying on demand.
//! Each slot remembers the instruction that pushed it.

use std::fmt;

use cilcheck_common::{TypeRegistry, TypeValue};

use crate::error::VerifyError;
use crate::lattice::{is_assignable, merge};
use crate::transition::Transition;

/// One slot on the abstract stack.
#[derive(Debug, Clone)]
pub struct StackValue {
    ty: TypeValue,
    pushed_by: Option<usize>,
}

impl StackValue {
    pub fn new(ty: TypeValue, pushed_by: Option<usize>) -> Self {
        Self { ty, pushed_by }
    }

    pub fn ty(&self) -> &TypeValue {
        &self.ty
    }

    /// Index of the instruction that pushed this value, if known.
    pub fn pushed_by(&self) -> Option<usize> {
        self.pushed_by
    }
}

/// Slots compare by type only; provenance is informational.
impl PartialEq for StackValue {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty
    }
}

/// Stack contents, bottom first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StackState {
    values: Vec<StackValue>,
}

/// Outcome of a successful application.
#[derive(Debug, Clone)]
pub struct Applied {
    pub state: StackState,
    /// Candidate that matched.
    pub candidate: usize,
    /// The values the transition consumed, top first.
    pub consumed: Vec<StackValue>,
}

impl StackState {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a state from types listed bottom first, with no provenance.
    pub fn from_types(types: impl IntoIterator<Item = TypeValue>) -> Self {
        Self {
            values: types
                .into_iter()
                .map(|ty| StackValue::new(ty, None))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Slots, bottom first.
    pub fn values(&self) -> &[StackValue] {
        &self.values
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeValue> + '_ {
        self.values.iter().map(StackValue::ty)
    }

    /// The `depth`-th slot from the top (0 = top).
    pub fn peek(&self, depth: usize) -> Option<&StackValue> {
        self.values
            .len()
            .checked_sub(depth + 1)
            .map(|index| &self.values[index])
    }

    /// Apply a single candidate transition on behalf of instruction `at`.
    ///
    /// Checks run in a fixed order: exact depth, underflow, each operand
    /// from the top down, then the validator.
    pub fn apply(
        &self,
        transition: &Transition,
        at: usize,
        registry: &TypeRegistry,
    ) -> Result<Applied, VerifyError> {
        if let Some(expected) = transition.stack_size() {
            if self.len() != expected {
                return Err(VerifyError::StackSize {
                    at,
                    expected,
                    found: self.len(),
                });
            }
        }

        let pop_count = if transition.pops_all() {
            self.len()
        } else {
            transition.pops().len()
        };
        if pop_count > self.len() {
            return Err(VerifyError::StackUnderflow {
                at,
                required: pop_count,
                available: self.len(),
            });
        }

        if !transition.pops_all() {
            for (operand, required) in transition.pops().iter().enumerate() {
                let slot = &self.values[self.len() - 1 - operand];
                if !is_assignable(required, &slot.ty, registry) {
                    return Err(VerifyError::TypeMismatch {
                        at,
                        operand,
                        expected: required.to_string(),
                        found: slot.ty.to_string(),
                    });
                }
            }
        }

        if let Some(validator) = transition.validator() {
            validator(self, registry).map_err(|reason| VerifyError::Rejected { at, reason })?;
        }

        let split = self.len() - pop_count;
        let mut consumed = self.values[split..].to_vec();
        consumed.reverse();

        let mut values = self.values[..split].to_vec();
        for pushed in transition.pushes() {
            let ty = match (transition.is_duplicate(), consumed.first()) {
                (true, Some(top)) => top.ty.clone(),
                _ => pushed.clone(),
            };
            values.push(StackValue::new(ty, Some(at)));
        }

        Ok(Applied {
            state: StackState { values },
            candidate: 0,
            consumed,
        })
    }

    /// Apply the first candidate that accepts this stack.
    ///
    /// Every candidate sees the same unmodified stack. When none applies, a
    /// type mismatch is preferred over underflow, and its expectation lists
    /// what any candidate would have accepted in the offending slot.
    pub fn apply_any(
        &self,
        candidates: &[Transition],
        at: usize,
        registry: &TypeRegistry,
    ) -> Result<Applied, VerifyError> {
        if candidates.is_empty() {
            return self.apply(&Transition::none(), at, registry);
        }

        let mut failures = Vec::with_capacity(candidates.len());
        for (index, candidate) in candidates.iter().enumerate() {
            match self.apply(candidate, at, registry) {
                Ok(mut applied) => {
                    applied.candidate = index;
                    return Ok(applied);
                }
                Err(error) => failures.push(error),
            }
        }

        if failures.len() == 1 {
            return Err(failures.remove(0));
        }

        let mismatch = failures.iter().find_map(|f| match f {
            VerifyError::TypeMismatch { operand, found, .. } => Some((*operand, found.clone())),
            _ => None,
        });
        if let Some((operand, found)) = mismatch {
            let mut accepted: Vec<String> = Vec::new();
            for candidate in candidates.iter().filter(|c| !c.pops_all()) {
                if let Some(required) = candidate.pops().get(operand) {
                    let name = required.to_string();
                    if !accepted.contains(&name) {
                        accepted.push(name);
                    }
                }
            }
            return Err(VerifyError::TypeMismatch {
                at,
                operand,
                expected: join_alternatives(&accepted),
                found,
            });
        }

        let underflow = failures
            .iter()
            .filter_map(|f| match f {
                VerifyError::StackUnderflow { required, .. } => Some(*required),
                _ => None,
            })
            .min();
        if let Some(required) = underflow {
            return Err(VerifyError::StackUnderflow {
                at,
                required,
                available: self.len(),
            });
        }

        Err(failures.remove(0))
    }

    /// Reconcile this (recorded) shape with another arrival at the same point.
    ///
    /// Depths must match and each slot pair must be assignable in one
    /// direction; the result keeps the more general type per slot and this
    /// state's provenance.
    pub fn reconcile(
        &self,
        other: &StackState,
        at: usize,
        registry: &TypeRegistry,
    ) -> Result<StackState, VerifyError> {
        if self.len() != other.len() {
            return Err(VerifyError::StackSize {
                at,
                expected: self.len(),
                found: other.len(),
            });
        }
        let mut values = Vec::with_capacity(self.len());
        for (index, (mine, theirs)) in self.values.iter().zip(&other.values).enumerate() {
            let ty = merge(&mine.ty, &theirs.ty, registry).ok_or_else(|| {
                VerifyError::TypeMismatch {
                    at,
                    operand: self.len() - 1 - index,
                    expected: mine.ty.to_string(),
                    found: theirs.ty.to_string(),
                }
            })?;
            values.push(StackValue::new(ty, mine.pushed_by));
        }
        Ok(StackState { values })
    }
}

impl fmt::Display for StackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, value) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", value.ty)?;
        }
        f.write_str("]")
    }
}

/// "a", "a or b", "a, b or c".
pub(crate) fn join_alternatives(items: &[String]) -> String {
    match items.split_last() {
        None => String::new(),
        Some((last, [])) => last.clone(),
        Some((last, rest)) => format!("{} or {last}", rest.join(", ")),
    }
}
