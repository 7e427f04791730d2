//! Method signatures and member references.

use std::fmt;
use std::sync::Arc;

use crate::host::{HostArgs, HostType};
use crate::registry::TypeRegistry;
use crate::type_value::Type;

/// The declared signature of the method being built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodSignature {
    pub params: Vec<Type>,
    /// `None` for a method returning void.
    pub returns: Option<Type>,
    pub is_static: bool,
    /// Declaring type; only consulted for the `this` argument.
    pub declaring: Option<Type>,
}

impl MethodSignature {
    pub fn new_static(params: Vec<Type>, returns: Option<Type>) -> Self {
        Self {
            params,
            returns,
            is_static: true,
            declaring: None,
        }
    }

    pub fn new_instance(declaring: Type, params: Vec<Type>, returns: Option<Type>) -> Self {
        Self {
            params,
            returns,
            is_static: false,
            declaring: Some(declaring),
        }
    }

    /// Static signature whose parameter and return types come from Rust types.
    pub fn typed<A: HostArgs, R: HostType>() -> Self {
        Self::new_static(A::host_types(), Some(R::host_type()))
    }

    /// Static void signature whose parameter types come from Rust types.
    pub fn typed_void<A: HostArgs>() -> Self {
        Self::new_static(A::host_types(), None)
    }

    /// Number of addressable arguments, including `this`.
    pub fn arg_count(&self) -> usize {
        self.params.len() + usize::from(!self.is_static)
    }

    /// Type of argument `n`. For instance methods argument 0 is `this`,
    /// which is a byref when the declaring type is a value type.
    pub fn argument(&self, n: usize, registry: &TypeRegistry) -> Option<Type> {
        if self.is_static {
            return self.params.get(n).cloned();
        }
        if n == 0 {
            let declaring = self
                .declaring
                .clone()
                .unwrap_or(Type::Element(crate::ElementType::Object));
            return Some(if registry.is_value_type(&declaring) {
                declaring.by_ref()
            } else {
                declaring
            });
        }
        self.params.get(n - 1).cloned()
    }
}

impl fmt::Display for MethodSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(if self.is_static { "static " } else { "instance " })?;
        match &self.returns {
            Some(ty) => write!(f, "{ty}")?,
            None => f.write_str("void")?,
        }
        if let Some(declaring) = &self.declaring {
            write!(f, " {declaring}")?;
        }
        write_params(f, &self.params)
    }
}

/// A method invoked by `call`, `callvirt` or `newobj`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodRef {
    pub declaring: Type,
    pub name: Arc<str>,
    pub params: Vec<Type>,
    pub returns: Option<Type>,
    pub is_static: bool,
}

impl MethodRef {
    pub fn new(
        declaring: Type,
        name: &str,
        params: Vec<Type>,
        returns: Option<Type>,
        is_static: bool,
    ) -> Self {
        Self {
            declaring,
            name: Arc::from(name),
            params,
            returns,
            is_static,
        }
    }

    /// A constructor of `declaring`, as used by `newobj`.
    pub fn constructor(declaring: Type, params: Vec<Type>) -> Self {
        Self::new(declaring, ".ctor", params, None, false)
    }

    pub fn is_constructor(&self) -> bool {
        &*self.name == ".ctor"
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_constructor() {
            write!(f, "{}", self.declaring)?;
            return write_params(f, &self.params);
        }
        if self.is_static {
            f.write_str("static ")?;
        }
        match &self.returns {
            Some(ty) => write!(f, "{ty} ")?,
            None => f.write_str("void ")?,
        }
        write!(f, "{}::{}", self.declaring, self.name)?;
        write_params(f, &self.params)
    }
}

/// A field accessed by the `ld*fld`/`st*fld` family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldRef {
    pub declaring: Type,
    pub name: Arc<str>,
    pub ty: Type,
    pub is_static: bool,
}

impl FieldRef {
    pub fn new(declaring: Type, name: &str, ty: Type, is_static: bool) -> Self {
        Self {
            declaring,
            name: Arc::from(name),
            ty,
            is_static,
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}::{}", self.ty, self.declaring, self.name)
    }
}

fn write_params(f: &mut fmt::Formatter<'_>, params: &[Type]) -> fmt::Result {
    f.write_str("(")?;
    for (i, p) in params.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{p}")?;
    }
    f.write_str(")")
}
