//! Stack value types for the cilcheck type lattice.
//!
//! A [`TypeValue`] is either an exact [`Type`] (an element type or a named
//! type, optionally wrapped in array/pointer/byref layers) or one of the
//! sentinels the verifier uses for requirements that are wider than any
//! single nominal type.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::error::ParseTypeError;

/// Built-in element types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    /// Native-width signed integer.
    I,
    /// Native-width unsigned integer.
    U,
    Object,
    String,
}

/// All element types, in definition order.
pub const ALL_ELEMENT_TYPES: [ElementType; 16] = [
    ElementType::Boolean,
    ElementType::Char,
    ElementType::I1,
    ElementType::U1,
    ElementType::I2,
    ElementType::U2,
    ElementType::I4,
    ElementType::U4,
    ElementType::I8,
    ElementType::U8,
    ElementType::R4,
    ElementType::R8,
    ElementType::I,
    ElementType::U,
    ElementType::Object,
    ElementType::String,
];

/// The category a value occupies once it is on the evaluation stack.
///
/// Small integers, booleans and chars all widen to `Int32` when loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackCategory {
    Int32,
    Int64,
    NativeInt,
    Float,
    Reference,
    Pointer,
    ByRef,
    ValueType,
}

impl ElementType {
    /// Returns the listing name for this element type.
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Boolean => "bool",
            ElementType::Char => "char",
            ElementType::I1 => "int8",
            ElementType::U1 => "uint8",
            ElementType::I2 => "int16",
            ElementType::U2 => "uint16",
            ElementType::I4 => "int32",
            ElementType::U4 => "uint32",
            ElementType::I8 => "int64",
            ElementType::U8 => "uint64",
            ElementType::R4 => "float32",
            ElementType::R8 => "float64",
            ElementType::I => "native int",
            ElementType::U => "native uint",
            ElementType::Object => "object",
            ElementType::String => "string",
        }
    }

    /// Suffix used by the `conv.*` family, if this type is a conversion target.
    pub fn conv_suffix(&self) -> Option<&'static str> {
        match self {
            ElementType::I1 => Some("i1"),
            ElementType::U1 => Some("u1"),
            ElementType::I2 => Some("i2"),
            ElementType::U2 => Some("u2"),
            ElementType::I4 => Some("i4"),
            ElementType::U4 => Some("u4"),
            ElementType::I8 => Some("i8"),
            ElementType::U8 => Some("u8"),
            ElementType::R4 => Some("r4"),
            ElementType::R8 => Some("r8"),
            ElementType::I => Some("i"),
            ElementType::U => Some("u"),
            _ => None,
        }
    }

    pub fn category(&self) -> StackCategory {
        match self {
            ElementType::Boolean
            | ElementType::Char
            | ElementType::I1
            | ElementType::U1
            | ElementType::I2
            | ElementType::U2
            | ElementType::I4
            | ElementType::U4 => StackCategory::Int32,
            ElementType::I8 | ElementType::U8 => StackCategory::Int64,
            ElementType::R4 | ElementType::R8 => StackCategory::Float,
            ElementType::I | ElementType::U => StackCategory::NativeInt,
            ElementType::Object | ElementType::String => StackCategory::Reference,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.category() == StackCategory::Reference
    }

    fn from_name(name: &str) -> Option<Self> {
        let aliased = match name {
            "nint" | "native_int" => "native int",
            "nuint" | "native_uint" => "native uint",
            "int" => "int32",
            "long" => "int64",
            "double" => "float64",
            "float" => "float32",
            other => other,
        };
        ALL_ELEMENT_TYPES
            .iter()
            .find(|et| et.name() == aliased)
            .copied()
    }
}

/// An exact type: what the host type system can name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Element(ElementType),
    /// A class, interface or value type declared in a `TypeRegistry`.
    Named(Arc<str>),
    Array(Box<Type>),
    Pointer(Box<Type>),
    ByRef(Box<Type>),
}

impl Type {
    pub fn named(name: &str) -> Self {
        Type::Named(Arc::from(name))
    }

    pub fn array(self) -> Self {
        Type::Array(Box::new(self))
    }

    pub fn pointer(self) -> Self {
        Type::Pointer(Box::new(self))
    }

    pub fn by_ref(self) -> Self {
        Type::ByRef(Box::new(self))
    }

    /// The element type, if this is an unwrapped built-in.
    pub fn element(&self) -> Option<ElementType> {
        match self {
            Type::Element(et) => Some(*et),
            _ => None,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Type::Array(_))
    }

    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Pointer(_))
    }

    pub fn is_by_ref(&self) -> bool {
        matches!(self, Type::ByRef(_))
    }
}

impl From<ElementType> for Type {
    fn from(et: ElementType) -> Self {
        Type::Element(et)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Element(et) => f.write_str(et.name()),
            Type::Named(name) => f.write_str(name),
            Type::Array(inner) => write!(f, "{inner}[]"),
            Type::Pointer(inner) => write!(f, "{inner}*"),
            Type::ByRef(inner) => write!(f, "{inner}&"),
        }
    }
}

impl FromStr for Type {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseTypeError::Empty);
        }
        if let Some(inner) = s.strip_suffix("[]") {
            return Ok(inner.parse::<Type>()?.array());
        }
        if let Some(inner) = s.strip_suffix('*') {
            return Ok(inner.parse::<Type>()?.pointer());
        }
        if let Some(inner) = s.strip_suffix('&') {
            let inner: Type = inner.parse()?;
            if inner.is_by_ref() {
                return Err(ParseTypeError::NestedByRef(s.to_string()));
            }
            return Ok(inner.by_ref());
        }
        if let Some(et) = ElementType::from_name(s) {
            return Ok(Type::Element(et));
        }
        let valid = s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '`'));
        if !valid || s.starts_with(|c: char| c.is_ascii_digit()) {
            return Err(ParseTypeError::InvalidName(s.to_string()));
        }
        Ok(Type::named(s))
    }
}

/// A value type as tracked on the abstract stack, or a sentinel requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeValue {
    /// Matches anything, in either direction.
    Wildcard,
    /// A native-width integer whose signedness is not known.
    NativeInt,
    /// The null reference.
    Null,
    /// Any unmanaged pointer.
    AnyPointer,
    /// Any managed reference.
    AnyByRef,
    /// Exactly `object`, never one of its subtypes.
    OnlyObject,
    /// Requirement that consumes every value on the stack.
    PopAll,
    Exact(Type),
}

impl TypeValue {
    pub fn int32() -> Self {
        TypeValue::Exact(Type::Element(ElementType::I4))
    }

    pub fn int64() -> Self {
        TypeValue::Exact(Type::Element(ElementType::I8))
    }

    pub fn float64() -> Self {
        TypeValue::Exact(Type::Element(ElementType::R8))
    }

    pub fn object() -> Self {
        TypeValue::Exact(Type::Element(ElementType::Object))
    }

    pub fn string() -> Self {
        TypeValue::Exact(Type::Element(ElementType::String))
    }

    pub fn as_type(&self) -> Option<&Type> {
        match self {
            TypeValue::Exact(ty) => Some(ty),
            _ => None,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        !matches!(self, TypeValue::Exact(_))
    }
}

impl From<Type> for TypeValue {
    fn from(ty: Type) -> Self {
        TypeValue::Exact(ty)
    }
}

impl From<ElementType> for TypeValue {
    fn from(et: ElementType) -> Self {
        TypeValue::Exact(Type::Element(et))
    }
}

impl fmt::Display for TypeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeValue::Wildcard => f.write_str("any value"),
            TypeValue::NativeInt => f.write_str("native int"),
            TypeValue::Null => f.write_str("null"),
            TypeValue::AnyPointer => f.write_str("pointer"),
            TypeValue::AnyByRef => f.write_str("byref"),
            TypeValue::OnlyObject => f.write_str("object (exactly)"),
            TypeValue::PopAll => f.write_str("entire stack"),
            TypeValue::Exact(ty) => ty.fmt(f),
        }
    }
}

impl FromStr for TypeValue {
    type Err = ParseTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "null" => Ok(TypeValue::Null),
            other => other.parse::<Type>().map(TypeValue::Exact),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_integers_share_int32_category() {
        for et in [
            ElementType::Boolean,
            ElementType::Char,
            ElementType::I1,
            ElementType::U2,
            ElementType::U4,
        ] {
            assert_eq!(et.category(), StackCategory::Int32, "{et:?}");
        }
        assert_eq!(ElementType::U8.category(), StackCategory::Int64);
        assert_eq!(ElementType::U.category(), StackCategory::NativeInt);
    }

    #[test]
    fn parse_element_names_and_aliases() {
        assert_eq!("int32".parse::<Type>().unwrap(), Type::Element(ElementType::I4));
        assert_eq!("nint".parse::<Type>().unwrap(), Type::Element(ElementType::I));
        assert_eq!(
            "native int".parse::<Type>().unwrap(),
            Type::Element(ElementType::I)
        );
        assert_eq!("long".parse::<Type>().unwrap(), Type::Element(ElementType::I8));
    }

    #[test]
    fn parse_wrapped_types() {
        let ty: Type = "int32[]&".parse().unwrap();
        assert_eq!(ty, Type::Element(ElementType::I4).array().by_ref());
        let ty: Type = "Point*".parse().unwrap();
        assert_eq!(ty, Type::named("Point").pointer());
    }

    #[test]
    fn display_matches_parse() {
        for text in ["string[]", "uint8*", "Dog&", "System.Exception", "float64[][]"] {
            let ty: Type = text.parse().unwrap();
            assert_eq!(ty.to_string(), text);
        }
    }

    #[test]
    fn reject_bad_names() {
        assert_eq!("".parse::<Type>(), Err(ParseTypeError::Empty));
        assert!(matches!(
            "9lives".parse::<Type>(),
            Err(ParseTypeError::InvalidName(_))
        ));
        assert!(matches!(
            "int32&&".parse::<Type>(),
            Err(ParseTypeError::NestedByRef(_))
        ));
    }

    #[test]
    fn null_parses_as_sentinel() {
        assert_eq!("null".parse::<TypeValue>().unwrap(), TypeValue::Null);
        assert!(TypeValue::Null.is_sentinel());
        assert!(!TypeValue::int32().is_sentinel());
    }
}
