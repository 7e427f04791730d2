//! Assignability between stack value types.
//!
//! [`is_assignable`] answers "may a value of type `candidate` sit where
//! `target` is required", following the bytecode's own verification rules:
//! small integers verify as `int32`, `null` fits any reference or pointer,
//! native ints unify with pointer-width types, and named types fall back to
//! the registry's inheritance edges.

use cilcheck_common::{ElementType, StackCategory, Type, TypeKind, TypeRegistry, TypeValue};

/// Check whether `candidate` may be used where `target` is required.
pub fn is_assignable(target: &TypeValue, candidate: &TypeValue, registry: &TypeRegistry) -> bool {
    use TypeValue::*;

    if target == candidate {
        return true;
    }
    match (target, candidate) {
        (Wildcard, _) | (_, Wildcard) => true,
        (PopAll, _) | (_, PopAll) => false,
        (_, Null) => accepts_null(target, registry),
        (Null, _) => false,
        (NativeInt, other) | (other, NativeInt) => is_native_width(other),
        (AnyPointer, c) => matches!(c, Exact(Type::Pointer(_))),
        (AnyByRef, c) => matches!(c, Exact(Type::ByRef(_))),
        (Exact(Type::Pointer(_)), AnyPointer) => true,
        (Exact(Type::ByRef(_)), AnyByRef) => true,
        (OnlyObject, c) => *c == TypeValue::object(),
        (t, OnlyObject) => is_assignable(t, &TypeValue::object(), registry),
        (Exact(t), Exact(c)) => type_assignable(t, c, registry),
        _ => false,
    }
}

/// Merge two slots arriving at the same program point.
///
/// Returns the more general of the two when one is assignable to the other.
/// When both directions hold, `first` wins so the first arrival's shape is
/// kept stable.
pub fn merge(first: &TypeValue, other: &TypeValue, registry: &TypeRegistry) -> Option<TypeValue> {
    if is_assignable(first, other, registry) {
        Some(first.clone())
    } else if is_assignable(other, first, registry) {
        Some(other.clone())
    } else {
        None
    }
}

/// True if two operands may be compared for equality: both numeric in the
/// same category, or both references, or both pointer-like.
pub fn comparable(a: &TypeValue, b: &TypeValue, registry: &TypeRegistry) -> bool {
    if is_assignable(a, b, registry) || is_assignable(b, a, registry) {
        return true;
    }
    let object = TypeValue::object();
    is_assignable(&object, a, registry) && is_assignable(&object, b, registry)
}

fn accepts_null(target: &TypeValue, registry: &TypeRegistry) -> bool {
    match target {
        TypeValue::Exact(ty) => registry.is_reference(ty) || ty.is_pointer(),
        TypeValue::AnyPointer | TypeValue::OnlyObject => true,
        _ => false,
    }
}

fn is_native_width(value: &TypeValue) -> bool {
    match value {
        TypeValue::NativeInt | TypeValue::AnyPointer | TypeValue::AnyByRef => true,
        TypeValue::Exact(Type::Element(et)) => et.category() == StackCategory::NativeInt,
        TypeValue::Exact(Type::Pointer(_) | Type::ByRef(_)) => true,
        _ => false,
    }
}

fn type_assignable(target: &Type, candidate: &Type, registry: &TypeRegistry) -> bool {
    if target == candidate {
        return true;
    }
    match (target, candidate) {
        (Type::Element(ElementType::Object), c) => registry.is_reference(c),
        (Type::Element(t), Type::Element(c)) => {
            !t.is_reference() && !c.is_reference() && t.category() == c.category()
        }
        (Type::Named(t), Type::Named(c)) => {
            registry.kind(t) != TypeKind::ValueType
                && registry.kind(c) != TypeKind::ValueType
                && registry.derives_from(c, t)
        }
        (Type::Array(t), Type::Array(c)) => {
            (registry.is_reference(t) && registry.is_reference(c) && type_assignable(t, c, registry))
                || same_storage(t, c)
        }
        (Type::Pointer(t), Type::Pointer(c)) | (Type::ByRef(t), Type::ByRef(c)) => {
            same_storage(t, c)
        }
        _ => false,
    }
}

/// Element types that share a storage size and category are interchangeable
/// behind a reference (`int32[]` and `uint32[]`, `int8&` and `bool&`).
fn same_storage(a: &Type, b: &Type) -> bool {
    if a == b {
        return true;
    }
    match (a.element(), b.element()) {
        (Some(x), Some(y)) => {
            !x.is_reference() && x.category() == y.category() && size_of(x) == size_of(y)
        }
        _ => false,
    }
}

fn size_of(et: ElementType) -> usize {
    match et {
        ElementType::Boolean | ElementType::I1 | ElementType::U1 => 1,
        ElementType::Char | ElementType::I2 | ElementType::U2 => 2,
        ElementType::I4 | ElementType::U4 | ElementType::R4 => 4,
        ElementType::I8 | ElementType::U8 | ElementType::R8 => 8,
        ElementType::I | ElementType::U | ElementType::Object | ElementType::String => {
            std::mem::size_of::<usize>()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn registry() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .declare_class("Animal", None)
            .declare_class("Dog", Some("Animal"))
            .declare_interface("IPet")
            .implement("Dog", "IPet")
            .declare_value_type("Point");
        registry
    }

    fn ty(text: &str) -> TypeValue {
        text.parse().unwrap()
    }

    #[test]
    fn small_integers_verify_as_int32() {
        let r = registry();
        assert!(is_assignable(&ty("int32"), &ty("bool"), &r));
        assert!(is_assignable(&ty("int32"), &ty("char"), &r));
        assert!(is_assignable(&ty("uint8"), &ty("int32"), &r));
        assert!(!is_assignable(&ty("int32"), &ty("int64"), &r));
        assert!(!is_assignable(&ty("int32"), &ty("float64"), &r));
    }

    #[test]
    fn wildcard_matches_both_ways() {
        let r = registry();
        assert!(is_assignable(&TypeValue::Wildcard, &ty("Point"), &r));
        assert!(is_assignable(&ty("string"), &TypeValue::Wildcard, &r));
    }

    #[test]
    fn null_fits_references_and_pointers_only() {
        let r = registry();
        assert!(is_assignable(&ty("string"), &TypeValue::Null, &r));
        assert!(is_assignable(&ty("Dog"), &TypeValue::Null, &r));
        assert!(is_assignable(&ty("int32[]"), &TypeValue::Null, &r));
        assert!(is_assignable(&ty("int32*"), &TypeValue::Null, &r));
        assert!(!is_assignable(&ty("int32"), &TypeValue::Null, &r));
        assert!(!is_assignable(&ty("Point"), &TypeValue::Null, &r));
        assert!(!is_assignable(&TypeValue::Null, &ty("string"), &r));
    }

    #[test]
    fn native_int_unifies_with_pointer_width() {
        let r = registry();
        assert!(is_assignable(&TypeValue::NativeInt, &ty("native int"), &r));
        assert!(is_assignable(&ty("native uint"), &TypeValue::NativeInt, &r));
        assert!(is_assignable(&ty("int32*"), &TypeValue::NativeInt, &r));
        assert!(is_assignable(&TypeValue::NativeInt, &ty("int32&"), &r));
        assert!(!is_assignable(&TypeValue::NativeInt, &ty("int32"), &r));
        assert!(!is_assignable(&ty("int64"), &TypeValue::NativeInt, &r));
    }

    #[test]
    fn any_pointer_and_any_byref() {
        let r = registry();
        assert!(is_assignable(&TypeValue::AnyPointer, &ty("Point*"), &r));
        assert!(!is_assignable(&TypeValue::AnyPointer, &ty("Point&"), &r));
        assert!(is_assignable(&TypeValue::AnyByRef, &ty("Point&"), &r));
        assert!(!is_assignable(&TypeValue::AnyByRef, &ty("string"), &r));
    }

    #[test]
    fn only_object_rejects_subtypes() {
        let r = registry();
        assert!(is_assignable(&TypeValue::OnlyObject, &ty("object"), &r));
        assert!(is_assignable(&TypeValue::OnlyObject, &TypeValue::Null, &r));
        assert!(!is_assignable(&TypeValue::OnlyObject, &ty("string"), &r));
        assert!(!is_assignable(&TypeValue::OnlyObject, &ty("Dog"), &r));
    }

    #[test]
    fn nominal_subtyping() {
        let r = registry();
        assert!(is_assignable(&ty("Animal"), &ty("Dog"), &r));
        assert!(is_assignable(&ty("IPet"), &ty("Dog"), &r));
        assert!(!is_assignable(&ty("Dog"), &ty("Animal"), &r));
        assert!(is_assignable(&ty("object"), &ty("Dog"), &r));
        assert!(is_assignable(&ty("object"), &ty("string"), &r));
        assert!(!is_assignable(&ty("object"), &ty("Point"), &r));
        assert!(!is_assignable(&ty("object"), &ty("int32"), &r));
    }

    #[test]
    fn array_covariance_for_references() {
        let r = registry();
        assert!(is_assignable(&ty("Animal[]"), &ty("Dog[]"), &r));
        assert!(is_assignable(&ty("object[]"), &ty("string[]"), &r));
        assert!(is_assignable(&ty("int32[]"), &ty("uint32[]"), &r));
        assert!(!is_assignable(&ty("int32[]"), &ty("int16[]"), &r));
        assert!(!is_assignable(&ty("object[]"), &ty("int32[]"), &r));
    }

    #[test]
    fn byrefs_need_matching_storage() {
        let r = registry();
        assert!(is_assignable(&ty("int32&"), &ty("uint32&"), &r));
        assert!(is_assignable(&ty("bool&"), &ty("int8&"), &r));
        assert!(!is_assignable(&ty("int32&"), &ty("int64&"), &r));
        assert!(!is_assignable(&ty("Animal&"), &ty("Dog&"), &r));
    }

    #[test]
    fn pop_all_is_only_itself() {
        let r = registry();
        assert!(is_assignable(&TypeValue::PopAll, &TypeValue::PopAll, &r));
        assert!(!is_assignable(&TypeValue::PopAll, &ty("int32"), &r));
    }

    #[test]
    fn merge_prefers_general_side() {
        let r = registry();
        assert_eq!(merge(&ty("Dog"), &ty("Animal"), &r), Some(ty("Animal")));
        assert_eq!(merge(&TypeValue::Null, &ty("string"), &r), Some(ty("string")));
        assert_eq!(merge(&ty("int32"), &ty("bool"), &r), Some(ty("int32")));
        assert_eq!(merge(&ty("int32"), &ty("string"), &r), None);
    }

    #[test]
    fn comparable_operands() {
        let r = registry();
        assert!(comparable(&ty("Dog"), &ty("string"), &r));
        assert!(comparable(&ty("int32"), &ty("bool"), &r));
        assert!(!comparable(&ty("int32"), &ty("string"), &r));
    }

    fn arb_value() -> impl Strategy<Value = TypeValue> {
        prop::sample::select(vec![
            TypeValue::Wildcard,
            TypeValue::NativeInt,
            TypeValue::Null,
            TypeValue::AnyPointer,
            TypeValue::AnyByRef,
            TypeValue::OnlyObject,
            ty("int32"),
            ty("bool"),
            ty("int64"),
            ty("float64"),
            ty("native int"),
            ty("object"),
            ty("string"),
            ty("Dog"),
            ty("Animal"),
            ty("IPet"),
            ty("Point"),
            ty("Dog[]"),
            ty("Animal[]"),
            ty("int32&"),
            ty("int32*"),
        ])
    }

    proptest! {
        #[test]
        fn assignability_is_reflexive(v in arb_value()) {
            prop_assert!(is_assignable(&v, &v, &registry()));
        }

        /// Merging succeeds in one order exactly when it succeeds in the other.
        #[test]
        fn merge_success_is_symmetric(a in arb_value(), b in arb_value()) {
            let r = registry();
            prop_assert_eq!(merge(&a, &b, &r).is_some(), merge(&b, &a, &r).is_some());
        }
    }
}
