//! cilcheck verifier: pre-emission checks for stack-machine method bodies.
//!
//! A code generator emits through a [`MethodBuilder`] instead of writing
//! bytecode directly. Every operation is checked against an abstract
//! evaluation stack as it arrives, so a malformed sequence is rejected at
//! the operation that broke it rather than at load time.
//!
//! # Usage
//!
//! ```
//! use cilcheck_common::{MethodSignature, Op, TypeRegistry};
//! use cilcheck_verifier::{verify, VerifierOptions};
//!
//! let signature = MethodSignature::typed::<(i32,), i32>();
//! let method = verify(signature, TypeRegistry::new(), VerifierOptions::default(), |b| {
//!     let done = b.define_label(Some("done"))?;
//!     b.emit(Op::LdArg(0))?;
//!     b.emit(Op::Dup)?;
//!     b.emit(Op::BrTrue(done))?;
//!     b.emit(Op::Pop)?;
//!     b.emit(Op::LdcI4(1))?;
//!     b.mark_label(done)?;
//!     b.emit(Op::Ret)
//! })
//! .unwrap();
//! assert_eq!(method.label_shapes["done"].to_string(), "[int32]");
//! ```
//!
//! # Checks
//!
//! 1. **Stack**: each operation's operands exist and are assignable
//! 2. **Labels**: every branch target is marked exactly once, and every
//!    arrival at a label agrees on the stack shape
//! 3. **Reachability**: no instruction follows an unconditional transfer
//!    unless a branch reaches it
//! 4. **Regions**: transfers respect try/catch/finally boundaries
//! 5. **Returns**: every path from every entry point terminates

pub mod builder;
pub mod catalog;
pub mod diagnostic;
pub mod error;
pub mod labels;
pub mod lattice;
pub mod limits;
pub mod namer;
pub mod options;
pub mod regions;
pub mod returns;
pub mod stack;
pub mod tracker;
pub mod transition;

pub use builder::{MethodBuilder, Step, VerifiedMethod};
pub use error::{ErrorKind, VerifyError};
pub use labels::{BranchKind, BranchRecord};
pub use lattice::is_assignable;
pub use options::VerifierOptions;
pub use regions::{CatchBlock, ExceptionBlock, FinallyBlock};
pub use stack::{StackState, StackValue};
pub use tracker::{Flow, InstructionRecord, Tracker};
pub use transition::Transition;

use cilcheck_common::{MethodSignature, TypeRegistry};

/// Build and verify a method in one call.
///
/// `body` emits through the builder; the method is finalized afterwards.
/// On failure the error is returned together with the annotated listing.
pub fn verify(
    signature: MethodSignature,
    registry: TypeRegistry,
    options: VerifierOptions,
    body: impl FnOnce(&mut MethodBuilder) -> Result<(), VerifyError>,
) -> Result<VerifiedMethod, Failure> {
    let mut builder = MethodBuilder::with_options(signature, registry, options);
    body(&mut builder)
        .and_then(|()| builder.finalize())
        .map_err(|error| Failure {
            report: builder.diagnose(&error),
            error,
        })
}

/// A rejected method: the first error and its rendered report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub error: VerifyError,
    pub report: String,
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.report)
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cilcheck_common::{ElementType, Op, Type, TypeValue};

    fn void() -> MethodSignature {
        MethodSignature::new_static(vec![], None)
    }

    #[test]
    fn minimal_valid_method() {
        let method = verify(void(), TypeRegistry::new(), VerifierOptions::default(), |b| {
            b.emit(Op::Ret)
        })
        .unwrap();
        assert_eq!(method.steps.len(), 1);
        assert_eq!(method.max_stack, 0);
    }

    #[test]
    fn empty_body_never_returns() {
        let failure = verify(void(), TypeRegistry::new(), VerifierOptions::default(), |_| Ok(()))
            .unwrap_err();
        assert_eq!(failure.error.kind(), ErrorKind::NonTerminating);
    }

    #[test]
    fn failure_carries_report() {
        let failure = verify(void(), TypeRegistry::new(), VerifierOptions::default(), |b| {
            b.emit(Op::LdcI4(1))?;
            b.emit(Op::Ret)
        })
        .unwrap_err();
        assert!(matches!(failure.error, VerifyError::StackSize { at: 1, .. }));
        assert!(failure.report.contains(">> 1"));
    }

    #[test]
    fn deferred_mode_reports_at_finalize() {
        let options = VerifierOptions::default().deferred(true);
        let mut emitted = false;
        let failure = verify(void(), TypeRegistry::new(), options, |b| {
            b.emit(Op::LdStr("x".into()))?;
            b.emit(Op::Neg)?;
            emitted = true;
            b.emit(Op::Ret)
        })
        .unwrap_err();
        assert!(emitted);
        assert_eq!(failure.error.at(), Some(1));
    }

    #[test]
    fn label_shape_recorded() {
        let sig = MethodSignature::new_static(vec![], Some(Type::Element(ElementType::Object)));
        let method = verify(sig, TypeRegistry::new(), VerifierOptions::default(), |b| {
            let out = b.define_label(Some("out"))?;
            b.emit(Op::LdNull)?;
            b.emit(Op::Br(out))?;
            b.mark_label(out)?;
            b.emit(Op::Ret)
        })
        .unwrap();
        assert_eq!(
            method.label_shapes["out"],
            StackState::from_types([TypeValue::Null])
        );
    }
}
