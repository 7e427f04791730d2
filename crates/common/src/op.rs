//! Operations of the CIL-like instruction set.
//!
//! An [`Op`] is one instruction as the frontend authors it: the operation
//! plus its operands. Stack effects live in the verifier's catalog, not
//! here.

use std::fmt;

use crate::handle::{Label, Local};
use crate::signature::{FieldRef, MethodRef};
use crate::type_value::{ElementType, Type};

/// Two-operand arithmetic and bitwise operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    DivUn,
    Rem,
    RemUn,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    ShrUn,
}

pub const ALL_BINARY_OPS: [BinaryOp; 13] = [
    BinaryOp::Add,
    BinaryOp::Sub,
    BinaryOp::Mul,
    BinaryOp::Div,
    BinaryOp::DivUn,
    BinaryOp::Rem,
    BinaryOp::RemUn,
    BinaryOp::And,
    BinaryOp::Or,
    BinaryOp::Xor,
    BinaryOp::Shl,
    BinaryOp::Shr,
    BinaryOp::ShrUn,
];

impl BinaryOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::DivUn => "div.un",
            BinaryOp::Rem => "rem",
            BinaryOp::RemUn => "rem.un",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Shr => "shr",
            BinaryOp::ShrUn => "shr.un",
        }
    }

    /// Operations that accept floating point operands.
    pub fn accepts_float(&self) -> bool {
        matches!(
            self,
            BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem
        )
    }

    pub fn is_shift(&self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::ShrUn)
    }
}

/// Comparisons that push an `int32` truth value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Ceq,
    Cgt,
    CgtUn,
    Clt,
    CltUn,
}

pub const ALL_COMPARE_OPS: [CompareOp; 5] = [
    CompareOp::Ceq,
    CompareOp::Cgt,
    CompareOp::CgtUn,
    CompareOp::Clt,
    CompareOp::CltUn,
];

impl CompareOp {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            CompareOp::Ceq => "ceq",
            CompareOp::Cgt => "cgt",
            CompareOp::CgtUn => "cgt.un",
            CompareOp::Clt => "clt",
            CompareOp::CltUn => "clt.un",
        }
    }

    /// Equality-like comparisons also accept two object references.
    pub fn accepts_references(&self) -> bool {
        matches!(self, CompareOp::Ceq | CompareOp::CgtUn)
    }
}

/// Branches that compare two operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchCompare {
    Beq,
    BneUn,
    Bge,
    BgeUn,
    Bgt,
    BgtUn,
    Ble,
    BleUn,
    Blt,
    BltUn,
}

pub const ALL_BRANCH_COMPARES: [BranchCompare; 10] = [
    BranchCompare::Beq,
    BranchCompare::BneUn,
    BranchCompare::Bge,
    BranchCompare::BgeUn,
    BranchCompare::Bgt,
    BranchCompare::BgtUn,
    BranchCompare::Ble,
    BranchCompare::BleUn,
    BranchCompare::Blt,
    BranchCompare::BltUn,
];

impl BranchCompare {
    pub fn mnemonic(&self) -> &'static str {
        match self {
            BranchCompare::Beq => "beq",
            BranchCompare::BneUn => "bne.un",
            BranchCompare::Bge => "bge",
            BranchCompare::BgeUn => "bge.un",
            BranchCompare::Bgt => "bgt",
            BranchCompare::BgtUn => "bgt.un",
            BranchCompare::Ble => "ble",
            BranchCompare::BleUn => "ble.un",
            BranchCompare::Blt => "blt",
            BranchCompare::BltUn => "blt.un",
        }
    }

    pub fn accepts_references(&self) -> bool {
        matches!(self, BranchCompare::Beq | BranchCompare::BneUn)
    }
}

/// One instruction with its operands.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Nop,
    Dup,
    Pop,

    // Constants
    LdcI4(i32),
    LdcI8(i64),
    LdcR4(f32),
    LdcR8(f64),
    LdStr(String),
    LdNull,

    // Arguments and locals
    LdArg(u16),
    LdArgA(u16),
    StArg(u16),
    LdLoc(Local),
    LdLocA(Local),
    StLoc(Local),

    // Arithmetic, logic, comparison, conversion
    Binary(BinaryOp),
    Neg,
    Not,
    Compare(CompareOp),
    Conv(ElementType),

    // Control flow
    Br(Label),
    BrTrue(Label),
    BrFalse(Label),
    BranchIf(BranchCompare, Label),
    Switch(Vec<Label>),
    Leave(Label),
    Ret,
    Throw,
    Rethrow,
    EndFinally,

    // Calls
    Call(MethodRef),
    CallVirt(MethodRef),
    NewObj(MethodRef),

    // Fields
    LdFld(FieldRef),
    LdFldA(FieldRef),
    StFld(FieldRef),
    LdsFld(FieldRef),
    StsFld(FieldRef),

    // Arrays
    NewArr(Type),
    LdLen,
    LdElem(Type),
    LdElemA(Type),
    StElem(Type),

    // Objects and indirection
    Box(Type),
    UnboxAny(Type),
    CastClass(Type),
    IsInst(Type),
    LdInd(Type),
    StInd(Type),
}

impl Op {
    /// Returns the listing mnemonic for this operation.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Op::Nop => "nop",
            Op::Dup => "dup",
            Op::Pop => "pop",
            Op::LdcI4(_) => "ldc.i4",
            Op::LdcI8(_) => "ldc.i8",
            Op::LdcR4(_) => "ldc.r4",
            Op::LdcR8(_) => "ldc.r8",
            Op::LdStr(_) => "ldstr",
            Op::LdNull => "ldnull",
            Op::LdArg(_) => "ldarg",
            Op::LdArgA(_) => "ldarga",
            Op::StArg(_) => "starg",
            Op::LdLoc(_) => "ldloc",
            Op::LdLocA(_) => "ldloca",
            Op::StLoc(_) => "stloc",
            Op::Binary(op) => op.mnemonic(),
            Op::Neg => "neg",
            Op::Not => "not",
            Op::Compare(op) => op.mnemonic(),
            Op::Conv(et) => match et {
                ElementType::I1 => "conv.i1",
                ElementType::U1 => "conv.u1",
                ElementType::I2 => "conv.i2",
                ElementType::U2 => "conv.u2",
                ElementType::I4 => "conv.i4",
                ElementType::U4 => "conv.u4",
                ElementType::I8 => "conv.i8",
                ElementType::U8 => "conv.u8",
                ElementType::R4 => "conv.r4",
                ElementType::R8 => "conv.r8",
                ElementType::I => "conv.i",
                ElementType::U => "conv.u",
                _ => "conv",
            },
            Op::Br(_) => "br",
            Op::BrTrue(_) => "brtrue",
            Op::BrFalse(_) => "brfalse",
            Op::BranchIf(cmp, _) => cmp.mnemonic(),
            Op::Switch(_) => "switch",
            Op::Leave(_) => "leave",
            Op::Ret => "ret",
            Op::Throw => "throw",
            Op::Rethrow => "rethrow",
            Op::EndFinally => "endfinally",
            Op::Call(_) => "call",
            Op::CallVirt(_) => "callvirt",
            Op::NewObj(_) => "newobj",
            Op::LdFld(_) => "ldfld",
            Op::LdFldA(_) => "ldflda",
            Op::StFld(_) => "stfld",
            Op::LdsFld(_) => "ldsfld",
            Op::StsFld(_) => "stsfld",
            Op::NewArr(_) => "newarr",
            Op::LdLen => "ldlen",
            Op::LdElem(_) => "ldelem",
            Op::LdElemA(_) => "ldelema",
            Op::StElem(_) => "stelem",
            Op::Box(_) => "box",
            Op::UnboxAny(_) => "unbox.any",
            Op::CastClass(_) => "castclass",
            Op::IsInst(_) => "isinst",
            Op::LdInd(_) => "ldind",
            Op::StInd(_) => "stind",
        }
    }

    /// Labels this operation may transfer control to.
    pub fn targets(&self) -> Vec<Label> {
        match self {
            Op::Br(l) | Op::BrTrue(l) | Op::BrFalse(l) | Op::BranchIf(_, l) | Op::Leave(l) => {
                vec![*l]
            }
            Op::Switch(ls) => ls.clone(),
            _ => Vec::new(),
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mnemonic();
        match self {
            Op::LdcI4(v) => write!(f, "{m} {v}"),
            Op::LdcI8(v) => write!(f, "{m} {v}"),
            Op::LdcR4(v) => write!(f, "{m} {v}"),
            Op::LdcR8(v) => write!(f, "{m} {v}"),
            Op::LdStr(s) => write!(f, "{m} {s:?}"),
            Op::LdArg(n) | Op::LdArgA(n) | Op::StArg(n) => write!(f, "{m} {n}"),
            Op::LdLoc(l) | Op::LdLocA(l) | Op::StLoc(l) => write!(f, "{m} {l}"),
            Op::Br(l)
            | Op::BrTrue(l)
            | Op::BrFalse(l)
            | Op::BranchIf(_, l)
            | Op::Leave(l) => write!(f, "{m} {l}"),
            Op::Switch(ls) => {
                write!(f, "{m} (")?;
                for (i, l) in ls.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{l}")?;
                }
                f.write_str(")")
            }
            Op::Call(mr) | Op::CallVirt(mr) | Op::NewObj(mr) => write!(f, "{m} {mr}"),
            Op::LdFld(fr) | Op::LdFldA(fr) | Op::StFld(fr) | Op::LdsFld(fr) | Op::StsFld(fr) => {
                write!(f, "{m} {fr}")
            }
            Op::NewArr(ty)
            | Op::LdElem(ty)
            | Op::LdElemA(ty)
            | Op::StElem(ty)
            | Op::Box(ty)
            | Op::UnboxAny(ty)
            | Op::CastClass(ty)
            | Op::IsInst(ty)
            | Op::LdInd(ty)
            | Op::StInd(ty) => write!(f, "{m} {ty}"),
            _ => f.write_str(m),
        }
    }
}
