//! cilcheck common types.
//!
//! This crate provides the data model shared by the verifier, the listing
//! assembler and the CLI:
//!
//! - [`Type`], [`ElementType`], [`TypeValue`] — stack value types and the
//!   verifier's sentinel requirements
//! - [`TypeRegistry`] — the nominal type system (classes, interfaces,
//!   value types, inheritance)
//! - [`Op`] — every supported operation with its operands
//! - [`MethodSignature`], [`MethodRef`], [`FieldRef`] — member shapes
//! - [`Label`], [`Local`] — builder-owned handles
//! - [`HostType`], [`HostArgs`] — Rust types that name stack types
//!
//! # Dependencies
//!
//! This crate uses `thiserror` and has no other dependencies.

pub mod error;
pub mod handle;
pub mod host;
pub mod op;
pub mod registry;
pub mod signature;
pub mod type_value;

// Re-export commonly used types at the crate root.
pub use error::ParseTypeError;
pub use handle::{Label, Local};
pub use host::{HostArgs, HostType};
pub use op::{BinaryOp, BranchCompare, CompareOp, Op};
pub use registry::{TypeKind, TypeRegistry, EXCEPTION_ROOT};
pub use signature::{FieldRef, MethodRef, MethodSignature};
pub use type_value::{ElementType, StackCategory, Type, TypeValue};

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn arb_element() -> impl Strategy<Value = ElementType> {
        prop::sample::select(&type_value::ALL_ELEMENT_TYPES[..])
    }

    fn arb_name() -> impl Strategy<Value = String> {
        "[A-Z][A-Za-z0-9_]{0,8}"
    }

    fn arb_type() -> impl Strategy<Value = Type> {
        let leaf = prop_oneof![
            arb_element().prop_map(Type::Element),
            arb_name().prop_map(|n| Type::named(&n)),
        ];
        leaf.prop_recursive(3, 8, 1, |inner| {
            prop_oneof![
                inner.clone().prop_map(Type::array),
                inner.prop_map(Type::pointer),
            ]
        })
    }

    proptest! {
        /// Every printed type name parses back to the same type.
        #[test]
        fn display_then_parse(ty in arb_type()) {
            let text = ty.to_string();
            prop_assert_eq!(text.parse::<Type>().unwrap(), ty);
        }

        /// A byref layer can be added to any non-byref type exactly once.
        #[test]
        fn single_byref_layer(ty in arb_type()) {
            let text = format!("{ty}&");
            let parsed: Type = text.parse().unwrap();
            prop_assert!(parsed.is_by_ref());
            let double_byref = format!("{text}&");
            prop_assert!(double_byref.parse::<Type>().is_err());
        }
    }
}
