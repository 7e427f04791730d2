//! Stack effects and control flow for every operation.
//!
//! [`lookup`] maps an [`Op`] to its candidate transitions and its [`Flow`].
//! Numeric operations list one candidate per accepted operand combination;
//! the stack applies the first that fits.

use cilcheck_common::{
    BinaryOp, ElementType, FieldRef, Label, MethodRef, MethodSignature, Op, StackCategory, Type,
    TypeKind, TypeRegistry, TypeValue,
};

use crate::error::VerifyError;
use crate::labels::BranchKind;
use crate::lattice::comparable;
use crate::limits::MAX_SWITCH_TARGETS;
use crate::stack::StackState;
use crate::tracker::Flow;
use crate::transition::Transition;

/// What an operation may see while its effect is computed.
#[derive(Debug, Clone, Copy)]
pub struct CatalogContext<'a> {
    pub signature: &'a MethodSignature,
    pub locals: &'a [Type],
    pub registry: &'a TypeRegistry,
}

/// The catalog's answer for one operation.
#[derive(Debug, Clone)]
pub struct Entry {
    pub flow: Flow,
    pub candidates: Vec<Transition>,
}

impl Entry {
    fn next(candidates: Vec<Transition>) -> Self {
        Self {
            flow: Flow::Next,
            candidates,
        }
    }

    fn with_flow(flow: Flow, candidates: Vec<Transition>) -> Self {
        Self { flow, candidates }
    }
}

/// Look up the stack effect and flow of `op`, emitted at index `at`.
pub fn lookup(op: &Op, ctx: &CatalogContext<'_>, at: usize) -> Result<Entry, VerifyError> {
    let invalid = |reason: String| VerifyError::InvalidOperand { at, reason };

    let entry = match op {
        Op::Nop => Entry::next(vec![Transition::none()]),
        Op::Dup => Entry::next(vec![Transition::new(
            vec![TypeValue::Wildcard],
            vec![TypeValue::Wildcard, TypeValue::Wildcard],
        )
        .duplicating()]),
        Op::Pop => Entry::next(vec![Transition::pop(vec![TypeValue::Wildcard])]),

        Op::LdcI4(_) => Entry::next(vec![Transition::push(TypeValue::int32())]),
        Op::LdcI8(_) => Entry::next(vec![Transition::push(TypeValue::int64())]),
        Op::LdcR4(_) | Op::LdcR8(_) => Entry::next(vec![Transition::push(TypeValue::float64())]),
        Op::LdStr(_) => Entry::next(vec![Transition::push(TypeValue::string())]),
        Op::LdNull => Entry::next(vec![Transition::push(TypeValue::Null)]),

        Op::LdArg(n) | Op::LdArgA(n) | Op::StArg(n) => {
            let ty = ctx
                .signature
                .argument(usize::from(*n), ctx.registry)
                .ok_or_else(|| {
                    invalid(format!(
                        "argument {n} does not exist (method has {})",
                        ctx.signature.arg_count()
                    ))
                })?;
            Entry::next(vec![slot_access(op, ty)])
        }
        Op::LdLoc(local) | Op::LdLocA(local) | Op::StLoc(local) => {
            let ty = ctx
                .locals
                .get(local.index())
                .cloned()
                .ok_or_else(|| invalid(format!("{local} is not declared")))?;
            Entry::next(vec![slot_access(op, ty)])
        }

        Op::Binary(bin) => Entry::next(binary(*bin)),
        Op::Neg => Entry::next(unary(true)),
        Op::Not => Entry::next(unary(false)),
        Op::Compare(cmp) => Entry::next(compare(cmp.accepts_references(), vec![TypeValue::int32()])),
        Op::Conv(et) => Entry::next(conv(*et).ok_or_else(|| {
            invalid(format!("{} is not a conversion target", et.name()))
        })?),

        Op::Br(label) => branch(BranchKind::Unconditional, vec![*label], vec![Transition::none()]),
        Op::BrTrue(label) | Op::BrFalse(label) => {
            branch(BranchKind::UnaryConditional, vec![*label], truthy())
        }
        Op::BranchIf(cmp, label) => branch(
            BranchKind::BinaryConditional,
            vec![*label],
            compare(cmp.accepts_references(), Vec::new()),
        ),
        Op::Switch(labels) => {
            if labels.len() > MAX_SWITCH_TARGETS {
                return Err(invalid(format!(
                    "switch has {} targets (max {MAX_SWITCH_TARGETS})",
                    labels.len()
                )));
            }
            branch(
                BranchKind::Switch,
                labels.clone(),
                vec![
                    Transition::pop(vec![TypeValue::int32()]),
                    Transition::pop(vec![TypeValue::NativeInt]),
                ],
            )
        }
        Op::Leave(label) => branch(BranchKind::Leave, vec![*label], vec![Transition::pop_all()]),
        Op::Ret => {
            let t = match &ctx.signature.returns {
                Some(ty) => Transition::pop(vec![ty.clone().into()]).with_stack_size(1),
                None => Transition::none().with_stack_size(0),
            };
            Entry::with_flow(Flow::Return, vec![t])
        }
        Op::Throw => Entry::with_flow(
            Flow::Throw,
            vec![Transition::pop(vec![TypeValue::object()])],
        ),
        Op::Rethrow => Entry::with_flow(Flow::Throw, vec![Transition::none()]),
        Op::EndFinally => Entry::with_flow(Flow::EndFinally, vec![Transition::pop_all()]),

        Op::Call(method) => Entry::next(vec![call(method, ctx.registry)]),
        Op::CallVirt(method) => {
            if method.is_static {
                return Err(invalid(format!("callvirt on static method {method}")));
            }
            Entry::next(vec![call(method, ctx.registry)])
        }
        Op::NewObj(method) => {
            if !method.is_constructor() || method.is_static {
                return Err(invalid(format!("newobj needs a constructor, got {method}")));
            }
            let pops = method.params.iter().rev().cloned().map(TypeValue::from).collect();
            Entry::next(vec![Transition::new(
                pops,
                vec![method.declaring.clone().into()],
            )])
        }

        Op::LdFld(field) | Op::LdFldA(field) | Op::StFld(field) => {
            if field.is_static {
                return Err(invalid(format!(
                    "{} on static field {field}",
                    op.mnemonic()
                )));
            }
            Entry::next(instance_field(op, field, ctx.registry))
        }
        Op::LdsFld(field) | Op::StsFld(field) => {
            if !field.is_static {
                return Err(invalid(format!(
                    "{} on instance field {field}",
                    op.mnemonic()
                )));
            }
            let t = if matches!(op, Op::LdsFld(_)) {
                Transition::push(field.ty.clone())
            } else {
                Transition::pop(vec![field.ty.clone().into()])
            };
            Entry::next(vec![t])
        }

        Op::NewArr(elem) => Entry::next(
            indices()
                .into_iter()
                .map(|index| Transition::new(vec![index], vec![elem.clone().array().into()]))
                .collect(),
        ),
        Op::LdLen => Entry::next(vec![Transition::new(
            vec![TypeValue::Wildcard],
            vec![TypeValue::NativeInt],
        )
        .with_validator(require_array)]),
        Op::LdElem(elem) | Op::LdElemA(elem) => {
            let pushed: TypeValue = if matches!(op, Op::LdElemA(_)) {
                elem.clone().by_ref().into()
            } else {
                elem.clone().into()
            };
            Entry::next(
                indices()
                    .into_iter()
                    .map(|index| {
                        Transition::new(
                            vec![index, elem.clone().array().into()],
                            vec![pushed.clone()],
                        )
                    })
                    .collect(),
            )
        }
        Op::StElem(elem) => Entry::next(
            indices()
                .into_iter()
                .map(|index| {
                    Transition::pop(vec![
                        elem.clone().into(),
                        index,
                        elem.clone().array().into(),
                    ])
                })
                .collect(),
        ),

        Op::Box(ty) => {
            if ctx.registry.is_reference(ty) || ty.is_pointer() || ty.is_by_ref() {
                return Err(invalid(format!("box needs a value type, got {ty}")));
            }
            Entry::next(vec![Transition::new(
                vec![ty.clone().into()],
                vec![TypeValue::object()],
            )])
        }
        Op::UnboxAny(ty) | Op::CastClass(ty) | Op::IsInst(ty) => {
            if !matches!(op, Op::UnboxAny(_)) && !ctx.registry.is_reference(ty) {
                return Err(invalid(format!(
                    "{} needs a reference type, got {ty}",
                    op.mnemonic()
                )));
            }
            Entry::next(vec![Transition::new(
                vec![TypeValue::object()],
                vec![ty.clone().into()],
            )])
        }
        Op::LdInd(ty) => Entry::next(
            addresses(ty)
                .into_iter()
                .map(|address| Transition::new(vec![address], vec![ty.clone().into()]))
                .collect(),
        ),
        Op::StInd(ty) => Entry::next(
            addresses(ty)
                .into_iter()
                .map(|address| Transition::pop(vec![ty.clone().into(), address]))
                .collect(),
        ),
    };
    Ok(entry)
}

fn branch(kind: BranchKind, targets: Vec<Label>, candidates: Vec<Transition>) -> Entry {
    Entry::with_flow(Flow::Branch { kind, targets }, candidates)
}

/// ldarg/ldloc push the slot type, the address forms push a byref to it,
/// and the store forms pop it.
fn slot_access(op: &Op, ty: Type) -> Transition {
    match op {
        Op::LdArgA(_) | Op::LdLocA(_) => Transition::push(ty.by_ref()),
        Op::StArg(_) | Op::StLoc(_) => Transition::pop(vec![ty.into()]),
        _ => Transition::push(ty),
    }
}

fn int_kinds() -> [TypeValue; 3] {
    [TypeValue::int32(), TypeValue::int64(), TypeValue::NativeInt]
}

fn indices() -> Vec<TypeValue> {
    vec![TypeValue::int32(), TypeValue::NativeInt]
}

fn addresses(ty: &Type) -> Vec<TypeValue> {
    vec![
        ty.clone().by_ref().into(),
        ty.clone().pointer().into(),
        TypeValue::NativeInt,
    ]
}

fn binary(op: BinaryOp) -> Vec<Transition> {
    if op.is_shift() {
        let mut out = Vec::new();
        for value in int_kinds() {
            for amount in [TypeValue::int32(), TypeValue::NativeInt] {
                out.push(Transition::new(vec![amount, value.clone()], vec![value.clone()]));
            }
        }
        return out;
    }

    let native = TypeValue::NativeInt;
    let int = TypeValue::int32();
    let mut out: Vec<Transition> = int_kinds()
        .into_iter()
        .map(|t| Transition::new(vec![t.clone(), t.clone()], vec![t]))
        .collect();
    out.push(Transition::new(vec![native.clone(), int.clone()], vec![native.clone()]));
    out.push(Transition::new(vec![int, native.clone()], vec![native]));
    if op.accepts_float() {
        let float = TypeValue::float64();
        out.push(Transition::new(vec![float.clone(), float.clone()], vec![float]));
    }
    out
}

fn unary(accepts_float: bool) -> Vec<Transition> {
    let mut kinds = int_kinds().to_vec();
    if accepts_float {
        kinds.push(TypeValue::float64());
    }
    kinds
        .into_iter()
        .map(|t| Transition::new(vec![t.clone()], vec![t]))
        .collect()
}

/// Operand pairs accepted by comparisons and compare-and-branch.
fn compare(references: bool, pushes: Vec<TypeValue>) -> Vec<Transition> {
    let native = TypeValue::NativeInt;
    let int = TypeValue::int32();
    let mut pairs: Vec<(TypeValue, TypeValue)> = int_kinds()
        .into_iter()
        .map(|t| (t.clone(), t))
        .collect();
    pairs.push((native.clone(), int.clone()));
    pairs.push((int, native));
    pairs.push((TypeValue::float64(), TypeValue::float64()));

    let mut out: Vec<Transition> = pairs
        .into_iter()
        .map(|(a, b)| Transition::new(vec![a, b], pushes.clone()))
        .collect();
    if references {
        out.push(
            Transition::new(vec![TypeValue::object(), TypeValue::object()], pushes.clone())
                .with_validator(require_comparable),
        );
        out.push(Transition::new(
            vec![TypeValue::AnyByRef, TypeValue::AnyByRef],
            pushes.clone(),
        ));
        out.push(Transition::new(
            vec![TypeValue::AnyPointer, TypeValue::AnyPointer],
            pushes,
        ));
    }
    out
}

fn truthy() -> Vec<Transition> {
    let mut kinds = int_kinds().to_vec();
    kinds.extend([TypeValue::object(), TypeValue::AnyPointer, TypeValue::AnyByRef]);
    kinds
        .into_iter()
        .map(|t| Transition::pop(vec![t]))
        .collect()
}

fn conv(target: ElementType) -> Option<Vec<Transition>> {
    target.conv_suffix()?;
    let pushed = match target.category() {
        StackCategory::Int32 => TypeValue::int32(),
        StackCategory::Int64 => TypeValue::int64(),
        StackCategory::Float => TypeValue::float64(),
        _ => TypeValue::NativeInt,
    };
    let mut sources = int_kinds().to_vec();
    sources.push(TypeValue::float64());
    Some(
        sources
            .into_iter()
            .map(|source| Transition::new(vec![source], vec![pushed.clone()]))
            .collect(),
    )
}

/// `this` for an instance call: a byref for value types, the type itself
/// otherwise.
fn receiver(declaring: &Type, registry: &TypeRegistry) -> TypeValue {
    match declaring {
        Type::Named(name) if registry.kind(name) == TypeKind::ValueType => {
            declaring.clone().by_ref().into()
        }
        _ => declaring.clone().into(),
    }
}

fn call(method: &MethodRef, registry: &TypeRegistry) -> Transition {
    let mut pops: Vec<TypeValue> = method.params.iter().rev().cloned().map(TypeValue::from).collect();
    if !method.is_static {
        pops.push(receiver(&method.declaring, registry));
    }
    let pushes = method.returns.iter().cloned().map(TypeValue::from).collect();
    Transition::new(pops, pushes)
}

fn instance_field(op: &Op, field: &FieldRef, registry: &TypeRegistry) -> Vec<Transition> {
    let mut owners = vec![TypeValue::from(field.declaring.clone())];
    if registry.is_value_type(&field.declaring) {
        owners.insert(0, field.declaring.clone().by_ref().into());
    }
    owners
        .into_iter()
        .map(|owner| match op {
            Op::StFld(_) => Transition::pop(vec![field.ty.clone().into(), owner]),
            Op::LdFldA(_) => Transition::new(vec![owner], vec![field.ty.clone().by_ref().into()]),
            _ => Transition::new(vec![owner], vec![field.ty.clone().into()]),
        })
        .collect()
}

fn require_array(stack: &StackState, _: &TypeRegistry) -> Result<(), String> {
    match stack.peek(0).map(|v| v.ty()) {
        Some(TypeValue::Exact(Type::Array(_))) | Some(TypeValue::Null) => Ok(()),
        Some(other) => Err(format!("ldlen needs an array, found {other}")),
        None => Err("ldlen needs an array".to_string()),
    }
}

fn require_comparable(stack: &StackState, registry: &TypeRegistry) -> Result<(), String> {
    match (stack.peek(1), stack.peek(0)) {
        (Some(a), Some(b)) if comparable(a.ty(), b.ty(), registry) => Ok(()),
        (Some(a), Some(b)) => Err(format!("cannot compare {} with {}", a.ty(), b.ty())),
        _ => Err("comparison needs two operands".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cilcheck_common::{CompareOp, Local};

    fn sig() -> MethodSignature {
        MethodSignature::new_static(
            vec![Type::Element(ElementType::I4), Type::Element(ElementType::String)],
            Some(Type::Element(ElementType::I4)),
        )
    }

    fn run(op: Op, stack: &[TypeValue]) -> Result<StackState, VerifyError> {
        let registry = TypeRegistry::new();
        let signature = sig();
        let locals = [Type::Element(ElementType::R8)];
        let ctx = CatalogContext {
            signature: &signature,
            locals: &locals,
            registry: &registry,
        };
        let entry = lookup(&op, &ctx, 0)?;
        StackState::from_types(stack.iter().cloned())
            .apply_any(&entry.candidates, 0, &registry)
            .map(|a| a.state)
    }

    fn st(types: &[TypeValue]) -> StackState {
        StackState::from_types(types.iter().cloned())
    }

    #[test]
    fn add_int_and_native_widens() {
        let out = run(
            Op::Binary(BinaryOp::Add),
            &[TypeValue::int32(), TypeValue::NativeInt],
        )
        .unwrap();
        assert_eq!(out, st(&[TypeValue::NativeInt]));
    }

    #[test]
    fn bitwise_rejects_floats() {
        let err = run(
            Op::Binary(BinaryOp::And),
            &[TypeValue::float64(), TypeValue::float64()],
        )
        .unwrap_err();
        assert!(matches!(err, VerifyError::TypeMismatch { .. }));
    }

    #[test]
    fn shift_amount_may_be_narrower() {
        let out = run(
            Op::Binary(BinaryOp::Shl),
            &[TypeValue::int64(), TypeValue::int32()],
        )
        .unwrap();
        assert_eq!(out, st(&[TypeValue::int64()]));
    }

    #[test]
    fn ceq_on_references() {
        let out = run(
            Op::Compare(CompareOp::Ceq),
            &[TypeValue::string(), TypeValue::Null],
        )
        .unwrap();
        assert_eq!(out, st(&[TypeValue::int32()]));
    }

    #[test]
    fn clt_rejects_references() {
        assert!(run(
            Op::Compare(CompareOp::Clt),
            &[TypeValue::string(), TypeValue::string()],
        )
        .is_err());
    }

    #[test]
    fn conv_to_native() {
        let out = run(Op::Conv(ElementType::U), &[TypeValue::float64()]).unwrap();
        assert_eq!(out, st(&[TypeValue::NativeInt]));
        let out = run(Op::Conv(ElementType::U1), &[TypeValue::int64()]).unwrap();
        assert_eq!(out, st(&[TypeValue::int32()]));
    }

    #[test]
    fn conv_to_object_is_invalid() {
        assert!(matches!(
            run(Op::Conv(ElementType::Object), &[TypeValue::int32()]),
            Err(VerifyError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn ldarg_reads_signature() {
        let out = run(Op::LdArg(1), &[]).unwrap();
        assert_eq!(out, st(&[TypeValue::string()]));
        assert!(matches!(
            run(Op::LdArg(2), &[]),
            Err(VerifyError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn ldloca_pushes_byref() {
        let out = run(Op::LdLocA(Local::new(0, 0)), &[]).unwrap();
        assert_eq!(
            out,
            st(&[Type::Element(ElementType::R8).by_ref().into()])
        );
    }

    #[test]
    fn ret_needs_exactly_the_return_value() {
        assert!(run(Op::Ret, &[TypeValue::int32()]).is_ok());
        assert!(matches!(
            run(Op::Ret, &[TypeValue::int32(), TypeValue::int32()]),
            Err(VerifyError::StackSize { .. })
        ));
        assert!(matches!(
            run(Op::Ret, &[TypeValue::string()]),
            Err(VerifyError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn leave_empties_stack() {
        let out = run(
            Op::Leave(Label::new(0, 0)),
            &[TypeValue::int32(), TypeValue::string()],
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn ldlen_needs_array() {
        let arr: TypeValue = Type::Element(ElementType::I4).array().into();
        assert_eq!(run(Op::LdLen, &[arr]).unwrap(), st(&[TypeValue::NativeInt]));
        assert!(matches!(
            run(Op::LdLen, &[TypeValue::string()]),
            Err(VerifyError::Rejected { .. })
        ));
    }

    #[test]
    fn stelem_with_covariant_array() {
        let arr: TypeValue = Type::Element(ElementType::String).array().into();
        let out = run(
            Op::StElem(Type::Element(ElementType::Object)),
            &[arr, TypeValue::int32(), TypeValue::string()],
        )
        .unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn call_pops_receiver_and_params() {
        let m = MethodRef::new(
            Type::named("Widget"),
            "Resize",
            vec![Type::Element(ElementType::I4)],
            Some(Type::Element(ElementType::Boolean)),
            false,
        );
        let out = run(
            Op::Call(m),
            &[Type::named("Widget").into(), TypeValue::int32()],
        )
        .unwrap();
        assert_eq!(out, st(&[Type::Element(ElementType::Boolean).into()]));
    }

    #[test]
    fn newobj_requires_constructor() {
        let m = MethodRef::new(Type::named("Widget"), "Make", vec![], None, false);
        assert!(matches!(
            run(Op::NewObj(m), &[]),
            Err(VerifyError::InvalidOperand { .. })
        ));
        let ctor = MethodRef::constructor(Type::named("Widget"), vec![]);
        assert_eq!(
            run(Op::NewObj(ctor), &[]).unwrap(),
            st(&[Type::named("Widget").into()])
        );
    }

    #[test]
    fn static_field_forms_are_checked() {
        let f = FieldRef::new(Type::named("Widget"), "Count", Type::Element(ElementType::I4), true);
        assert!(matches!(
            run(Op::LdFld(f.clone()), &[Type::named("Widget").into()]),
            Err(VerifyError::InvalidOperand { .. })
        ));
        assert_eq!(run(Op::LdsFld(f), &[]).unwrap(), st(&[TypeValue::int32()]));
    }

    #[test]
    fn box_then_unbox() {
        let boxed = run(Op::Box(Type::Element(ElementType::I4)), &[TypeValue::int32()]).unwrap();
        assert_eq!(boxed, st(&[TypeValue::object()]));
        assert!(matches!(
            run(Op::Box(Type::Element(ElementType::String)), &[TypeValue::string()]),
            Err(VerifyError::InvalidOperand { .. })
        ));
    }

    #[test]
    fn dup_copies_exact_type() {
        let out = run(Op::Dup, &[TypeValue::string()]).unwrap();
        assert_eq!(out, st(&[TypeValue::string(), TypeValue::string()]));
    }
}
