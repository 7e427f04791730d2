//! The host's nominal type system, as far as verification needs it.
//!
//! Named types are declared with a kind and an optional base class.
//! Names that were never declared are treated as plain classes deriving
//! from `object`.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::type_value::{ElementType, Type};

/// What kind of named type a declaration introduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Class,
    Interface,
    ValueType,
}

#[derive(Debug, Clone)]
struct TypeDef {
    kind: TypeKind,
    base: Option<Arc<str>>,
    interfaces: Vec<Arc<str>>,
}

/// Registry of named types and their inheritance edges.
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    defs: HashMap<Arc<str>, TypeDef>,
}

/// Exception root every catch clause type must derive from.
pub const EXCEPTION_ROOT: &str = "Exception";

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TypeRegistry {
    /// Create a registry that knows only the exception root.
    pub fn new() -> Self {
        let mut registry = Self {
            defs: HashMap::new(),
        };
        registry.declare_class(EXCEPTION_ROOT, None);
        registry
    }

    /// Declare (or redeclare) a class with an optional base class.
    pub fn declare_class(&mut self, name: &str, base: Option<&str>) -> &mut Self {
        self.insert(name, TypeKind::Class, base);
        self
    }

    pub fn declare_interface(&mut self, name: &str) -> &mut Self {
        self.insert(name, TypeKind::Interface, None);
        self
    }

    pub fn declare_value_type(&mut self, name: &str) -> &mut Self {
        self.insert(name, TypeKind::ValueType, None);
        self
    }

    /// Record that `name` implements `interface`.
    pub fn implement(&mut self, name: &str, interface: &str) -> &mut Self {
        let def = self
            .defs
            .entry(Arc::from(name))
            .or_insert_with(|| TypeDef {
                kind: TypeKind::Class,
                base: None,
                interfaces: Vec::new(),
            });
        def.interfaces.push(Arc::from(interface));
        self
    }

    fn insert(&mut self, name: &str, kind: TypeKind, base: Option<&str>) {
        let interfaces = self
            .defs
            .remove(name)
            .map(|d| d.interfaces)
            .unwrap_or_default();
        self.defs.insert(
            Arc::from(name),
            TypeDef {
                kind,
                base: base.map(Arc::from),
                interfaces,
            },
        );
    }

    /// Kind of a named type. Undeclared names are classes.
    pub fn kind(&self, name: &str) -> TypeKind {
        self.defs.get(name).map_or(TypeKind::Class, |d| d.kind)
    }

    /// True if values of `ty` live on the stack as object references.
    pub fn is_reference(&self, ty: &Type) -> bool {
        match ty {
            Type::Element(et) => et.is_reference(),
            Type::Named(name) => self.kind(name) != TypeKind::ValueType,
            Type::Array(_) => true,
            Type::Pointer(_) | Type::ByRef(_) => false,
        }
    }

    /// True for primitives other than `object`/`string` and declared value types.
    pub fn is_value_type(&self, ty: &Type) -> bool {
        match ty {
            Type::Element(et) => !et.is_reference(),
            Type::Named(name) => self.kind(name) == TypeKind::ValueType,
            _ => false,
        }
    }

    /// True if `candidate` is `target` or inherits/implements it, transitively.
    pub fn derives_from(&self, candidate: &str, target: &str) -> bool {
        let mut pending = vec![candidate];
        let mut seen = HashSet::new();
        while let Some(name) = pending.pop() {
            if name == target {
                return true;
            }
            if !seen.insert(name) {
                continue;
            }
            if let Some(def) = self.defs.get(name) {
                if let Some(base) = &def.base {
                    pending.push(base.as_ref());
                }
                pending.extend(def.interfaces.iter().map(|i| i.as_ref()));
            }
        }
        false
    }

    /// True if `ty` may be thrown or caught.
    pub fn is_exception(&self, ty: &Type) -> bool {
        match ty {
            Type::Named(name) => self.derives_from(name, EXCEPTION_ROOT),
            Type::Element(ElementType::Object) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn animals() -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        registry
            .declare_class("Animal", None)
            .declare_class("Dog", Some("Animal"))
            .declare_interface("IPet")
            .implement("Dog", "IPet")
            .declare_value_type("Point");
        registry
    }

    #[test]
    fn derives_through_base_chain() {
        let registry = animals();
        assert!(registry.derives_from("Dog", "Animal"));
        assert!(registry.derives_from("Dog", "Dog"));
        assert!(!registry.derives_from("Animal", "Dog"));
    }

    #[test]
    fn derives_through_interface() {
        let registry = animals();
        assert!(registry.derives_from("Dog", "IPet"));
        assert!(!registry.derives_from("Animal", "IPet"));
    }

    #[test]
    fn cyclic_declarations_terminate() {
        let mut registry = TypeRegistry::new();
        registry
            .declare_class("A", Some("B"))
            .declare_class("B", Some("A"));
        assert!(!registry.derives_from("A", "C"));
    }

    #[test]
    fn value_types_are_not_references() {
        let registry = animals();
        assert!(registry.is_value_type(&Type::named("Point")));
        assert!(!registry.is_reference(&Type::named("Point")));
        assert!(registry.is_reference(&Type::named("Dog")));
        assert!(registry.is_reference(&Type::named("Undeclared")));
        assert!(registry.is_reference(&Type::Element(ElementType::I4).array()));
    }

    #[test]
    fn interfaces_survive_redeclaration() {
        let mut registry = TypeRegistry::new();
        registry.implement("Cat", "IPet").declare_class("Cat", None);
        assert!(registry.derives_from("Cat", "IPet"));
    }

    #[test]
    fn exception_root_is_predeclared() {
        let mut registry = TypeRegistry::new();
        registry.declare_class("IoError", Some(EXCEPTION_ROOT));
        assert!(registry.is_exception(&Type::named("IoError")));
        assert!(!registry.is_exception(&Type::named("Dog")));
    }
}
