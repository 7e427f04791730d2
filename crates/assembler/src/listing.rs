//! The parsed form of a listing.
//!
//! Labels and locals are still names here: handles only exist once a
//! builder hands them out, so [`Instr::resolve`] turns an instruction into
//! an [`Op`] given the builder's handles.

use cilcheck_common::{BranchCompare, Label, Local, MethodSignature, Op, Type, TypeRegistry};

/// A type declared at the top of a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeDecl {
    Class {
        name: String,
        base: Option<String>,
        interfaces: Vec<String>,
    },
    Interface {
        name: String,
    },
    ValueType {
        name: String,
    },
}

/// The `.method` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodHeader {
    pub name: String,
    pub signature: MethodSignature,
    pub line: usize,
}

/// One body item with the source line it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    pub line: usize,
    pub item: Item,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    /// `.local name type`
    Local { name: String, ty: Type },
    /// `name:`
    Mark(String),
    Instr(Instr),
    Try,
    Catch(Type),
    CatchAll,
    EndCatch,
    Finally,
    EndFinally,
    EndTry,
}

/// An operation whose label and local operands are still names.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// Anything without a label or local operand.
    Plain(Op),
    Local(LocalOp, String),
    Branch(BranchOp, String),
    Switch(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalOp {
    Load,
    Address,
    Store,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchOp {
    Br,
    BrTrue,
    BrFalse,
    If(BranchCompare),
    Leave,
}

/// A name the resolver had no handle for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unresolved {
    Label(String),
    Local(String),
}

impl Instr {
    /// Label names this instruction refers to, in operand order.
    pub fn label_names(&self) -> Vec<&str> {
        match self {
            Instr::Branch(_, name) => vec![name.as_str()],
            Instr::Switch(names) => names.iter().map(String::as_str).collect(),
            Instr::Plain(_) | Instr::Local(..) => Vec::new(),
        }
    }

    pub fn resolve(
        &self,
        mut label: impl FnMut(&str) -> Option<Label>,
        mut local: impl FnMut(&str) -> Option<Local>,
    ) -> Result<Op, Unresolved> {
        let mut target = |name: &str| label(name).ok_or_else(|| Unresolved::Label(name.to_string()));
        Ok(match self {
            Instr::Plain(op) => op.clone(),
            Instr::Local(kind, name) => {
                let handle = local(name).ok_or_else(|| Unresolved::Local(name.clone()))?;
                match kind {
                    LocalOp::Load => Op::LdLoc(handle),
                    LocalOp::Address => Op::LdLocA(handle),
                    LocalOp::Store => Op::StLoc(handle),
                }
            }
            Instr::Branch(kind, name) => {
                let l = target(name)?;
                match kind {
                    BranchOp::Br => Op::Br(l),
                    BranchOp::BrTrue => Op::BrTrue(l),
                    BranchOp::BrFalse => Op::BrFalse(l),
                    BranchOp::If(cmp) => Op::BranchIf(*cmp, l),
                    BranchOp::Leave => Op::Leave(l),
                }
            }
            Instr::Switch(names) => Op::Switch(
                names
                    .iter()
                    .map(|n| target(n))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}

/// A parsed listing: type declarations, one method header and its body.
#[derive(Debug, Clone, PartialEq)]
pub struct Listing {
    pub types: Vec<TypeDecl>,
    pub method: MethodHeader,
    pub body: Vec<Line>,
}

impl Listing {
    /// A registry holding the exception root plus every declared type.
    pub fn registry(&self) -> TypeRegistry {
        let mut registry = TypeRegistry::new();
        for decl in &self.types {
            match decl {
                TypeDecl::Class {
                    name,
                    base,
                    interfaces,
                } => {
                    registry.declare_class(name, base.as_deref());
                    for interface in interfaces {
                        registry.implement(name, interface);
                    }
                }
                TypeDecl::Interface { name } => {
                    registry.declare_interface(name);
                }
                TypeDecl::ValueType { name } => {
                    registry.declare_value_type(name);
                }
            }
        }
        registry
    }

    /// Every label name, in order of first appearance (marks and targets).
    pub fn label_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for line in &self.body {
            let found = match &line.item {
                Item::Mark(name) => vec![name.as_str()],
                Item::Instr(instr) => instr.label_names(),
                _ => Vec::new(),
            };
            for name in found {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Number of operation lines.
    pub fn instruction_count(&self) -> usize {
        self.body
            .iter()
            .filter(|l| matches!(l.item, Item::Instr(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cilcheck_common::TypeKind;

    fn header() -> MethodHeader {
        MethodHeader {
            name: "m".to_string(),
            signature: MethodSignature::new_static(vec![], None),
            line: 1,
        }
    }

    #[test]
    fn registry_from_declarations() {
        let listing = Listing {
            types: vec![
                TypeDecl::Interface {
                    name: "IPet".to_string(),
                },
                TypeDecl::Class {
                    name: "Animal".to_string(),
                    base: None,
                    interfaces: vec![],
                },
                TypeDecl::Class {
                    name: "Dog".to_string(),
                    base: Some("Animal".to_string()),
                    interfaces: vec!["IPet".to_string()],
                },
                TypeDecl::ValueType {
                    name: "Vec2".to_string(),
                },
            ],
            method: header(),
            body: vec![],
        };
        let registry = listing.registry();
        assert!(registry.derives_from("Dog", "Animal"));
        assert!(registry.derives_from("Dog", "IPet"));
        assert_eq!(registry.kind("Vec2"), TypeKind::ValueType);
        assert_eq!(registry.kind("IPet"), TypeKind::Interface);
    }

    #[test]
    fn label_names_in_first_appearance_order() {
        let line = |item| Line { line: 1, item };
        let listing = Listing {
            types: vec![],
            method: header(),
            body: vec![
                line(Item::Instr(Instr::Branch(BranchOp::Br, "b".to_string()))),
                line(Item::Mark("a".to_string())),
                line(Item::Instr(Instr::Switch(vec!["a".to_string(), "c".to_string()]))),
                line(Item::Mark("b".to_string())),
            ],
        };
        assert_eq!(listing.label_names(), vec!["b", "a", "c"]);
        assert_eq!(listing.instruction_count(), 2);
    }

    #[test]
    fn resolve_reports_missing_names() {
        let instr = Instr::Local(LocalOp::Load, "x".to_string());
        assert_eq!(
            instr.resolve(|_| None, |_| None),
            Err(Unresolved::Local("x".to_string()))
        );
        let instr = Instr::Switch(vec!["a".to_string()]);
        assert_eq!(
            instr.resolve(|_| None, |_| None),
            Err(Unresolved::Label("a".to_string()))
        );
    }

    #[test]
    fn resolve_branch() {
        let l = Label::new(9, 0);
        let instr = Instr::Branch(BranchOp::If(BranchCompare::Blt), "top".to_string());
        assert_eq!(
            instr.resolve(|n| (n == "top").then_some(l), |_| None),
            Ok(Op::BranchIf(BranchCompare::Blt, l))
        );
    }
}
