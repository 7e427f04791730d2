//! Compile-time typed surface: Rust types that name stack types.

use crate::type_value::{ElementType, Type};

/// A Rust type with a fixed counterpart in the verified type system.
pub trait HostType {
    fn host_type() -> Type;
}

macro_rules! element_host_type {
    ($($rust:ty => $et:ident),* $(,)?) => {
        $(
            impl HostType for $rust {
                fn host_type() -> Type {
                    Type::Element(ElementType::$et)
                }
            }
        )*
    };
}

element_host_type! {
    bool => Boolean,
    char => Char,
    i8 => I1,
    u8 => U1,
    i16 => I2,
    u16 => U2,
    i32 => I4,
    u32 => U4,
    i64 => I8,
    u64 => U8,
    f32 => R4,
    f64 => R8,
    isize => I,
    usize => U,
    String => String,
}

impl HostType for &str {
    fn host_type() -> Type {
        Type::Element(ElementType::String)
    }
}

impl<T: HostType> HostType for Vec<T> {
    fn host_type() -> Type {
        T::host_type().array()
    }
}

impl<T: HostType> HostType for *const T {
    fn host_type() -> Type {
        T::host_type().pointer()
    }
}

impl<T: HostType> HostType for *mut T {
    fn host_type() -> Type {
        T::host_type().pointer()
    }
}

/// A tuple of Rust types naming a parameter list.
pub trait HostArgs {
    fn host_types() -> Vec<Type>;
}

macro_rules! tuple_host_args {
    ($($name:ident),*) => {
        impl<$($name: HostType),*> HostArgs for ($($name,)*) {
            fn host_types() -> Vec<Type> {
                vec![$($name::host_type()),*]
            }
        }
    };
}

tuple_host_args!();
tuple_host_args!(A);
tuple_host_args!(A, B);
tuple_host_args!(A, B, C);
tuple_host_args!(A, B, C, D);
tuple_host_args!(A, B, C, D, E);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_host_types() {
        assert_eq!(
            <Vec<Vec<u8>>>::host_type(),
            Type::Element(ElementType::U1).array().array()
        );
        assert_eq!(
            <*const i32>::host_type(),
            Type::Element(ElementType::I4).pointer()
        );
    }

    #[test]
    fn empty_argument_list() {
        assert!(<()>::host_types().is_empty());
        assert_eq!(
            <(bool, &str)>::host_types(),
            vec![
                Type::Element(ElementType::Boolean),
                Type::Element(ElementType::String)
            ]
        );
    }
}
