//! The method builder: what a code generator emits through.
//!
//! A [`MethodBuilder`] accepts operations one at a time, verifies each as it
//! arrives (or, in deferred mode, at [`MethodBuilder::finalize`]) and only
//! hands out a [`VerifiedMethod`] once the whole body has been checked.
//! The first error poisons the builder: every later call returns it again.
//!
//! ```
//! use cilcheck_common::{BinaryOp, MethodSignature, Op, TypeRegistry};
//! use cilcheck_verifier::MethodBuilder;
//!
//! let signature = MethodSignature::typed::<(i32, i32), i32>();
//! let mut builder = MethodBuilder::new(signature, TypeRegistry::new());
//! builder.emit(Op::LdArg(0)).unwrap();
//! builder.emit(Op::LdArg(1)).unwrap();
//! builder.emit(Op::Binary(BinaryOp::Add)).unwrap();
//! builder.emit(Op::Ret).unwrap();
//! let method = builder.finalize().unwrap();
//! assert_eq!(method.max_stack, 2);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};

use cilcheck_common::{ElementType, Label, Local, MethodSignature, Op, Type, TypeRegistry};
use tracing::debug;

use crate::catalog::{self, CatalogContext};
use crate::diagnostic;
use crate::error::VerifyError;
use crate::labels::BranchKind;
use crate::limits;
use crate::namer::Namer;
use crate::options::VerifierOptions;
use crate::regions::{CatchBlock, ExceptionBlock, FinallyBlock, RegionPath, RegionTracker};
use crate::returns;
use crate::stack::StackState;
use crate::tracker::{Flow, InstructionRecord, Tracker};
use crate::transition::Transition;

static NEXT_BUILDER: AtomicU64 = AtomicU64::new(1);

/// One entry of the verified instruction stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Op(Op),
    /// An operation outside the catalog, applied through [`MethodBuilder::apply`].
    Raw(String),
    BeginTry,
    BeginCatch(Type),
    BeginFinally,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Op(op) => op.fmt(f),
            Step::Raw(name) => f.write_str(name),
            Step::BeginTry => f.write_str(".try"),
            Step::BeginCatch(ty) => write!(f, ".catch {ty}"),
            Step::BeginFinally => f.write_str(".finally"),
        }
    }
}

/// A method body that passed every check, ready for emission.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedMethod {
    pub signature: MethodSignature,
    pub steps: Vec<Step>,
    /// Each step as diagnostics print it, with label and local names.
    pub listing: Vec<String>,
    pub locals: Vec<Type>,
    /// Instruction index of every label, by name.
    pub label_marks: BTreeMap<String, usize>,
    /// Stack shape on entry to every reachable label, by name.
    pub label_shapes: BTreeMap<String, StackState>,
    pub max_stack: usize,
}

#[derive(Debug, Clone)]
struct PendingTransfer {
    at: usize,
    target: Label,
    origin: RegionPath,
    leave: bool,
}

#[derive(Debug)]
pub struct MethodBuilder {
    id: u64,
    signature: MethodSignature,
    options: VerifierOptions,
    tracker: Tracker,
    regions: RegionTracker,
    /// Labels and locals are named independently.
    label_namer: Namer,
    local_namer: Namer,
    steps: Vec<Step>,
    locals: Vec<Type>,
    local_names: Vec<String>,
    label_paths: HashMap<Label, RegionPath>,
    pending: Vec<PendingTransfer>,
    failed: Option<VerifyError>,
}

impl MethodBuilder {
    pub fn new(signature: MethodSignature, registry: TypeRegistry) -> Self {
        Self::with_options(signature, registry, VerifierOptions::default())
    }

    pub fn with_options(
        signature: MethodSignature,
        registry: TypeRegistry,
        options: VerifierOptions,
    ) -> Self {
        let id = NEXT_BUILDER.fetch_add(1, Ordering::Relaxed);
        debug!(builder = id, %signature, deferred = options.deferred, "method builder created");
        Self {
            id,
            signature,
            options,
            tracker: Tracker::new(registry, id, options.deferred),
            regions: RegionTracker::new(id),
            label_namer: Namer::new(),
            local_namer: Namer::new(),
            steps: Vec::new(),
            locals: Vec::new(),
            local_names: Vec::new(),
            label_paths: HashMap::new(),
            pending: Vec::new(),
            failed: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn options(&self) -> &VerifierOptions {
        &self.options
    }

    pub fn registry(&self) -> &TypeRegistry {
        self.tracker.registry()
    }

    pub fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The error that poisoned this builder, if any.
    pub fn error(&self) -> Option<&VerifyError> {
        self.failed.as_ref()
    }

    /// The stack at the current position, when it is known.
    pub fn current_stack(&self) -> Option<&StackState> {
        self.tracker.current()
    }

    pub fn local_type(&self, local: Local) -> Option<&Type> {
        if local.owner() != self.id {
            return None;
        }
        self.locals.get(local.index())
    }

    pub fn label_name(&self, label: Label) -> &str {
        self.tracker.labels().name(label)
    }

    /// Define a label, optionally named. Unnamed labels get `label0`,
    /// `label1`, ...
    pub fn define_label(&mut self, name: Option<&str>) -> Result<Label, VerifyError> {
        self.guarded(|b| {
            let name = claim_name(&mut b.label_namer, name, "label", |n| {
                VerifyError::label(n, "name already in use")
            })?;
            b.tracker.define_label(name)
        })
    }

    /// Declare a local variable slot.
    pub fn declare_local(&mut self, ty: Type, name: Option<&str>) -> Result<Local, VerifyError> {
        self.guarded(|b| {
            let at = b.tracker.len();
            let index = u16::try_from(b.locals.len()).map_err(|_| VerifyError::InvalidOperand {
                at,
                reason: "too many locals".to_string(),
            })?;
            let name = claim_name(&mut b.local_namer, name, "local", |n| {
                VerifyError::InvalidOperand {
                    at,
                    reason: format!("local name '{n}' already in use"),
                }
            })?;
            debug!(builder = b.id, local = %name, %ty, "local declared");
            b.locals.push(ty);
            b.local_names.push(name);
            Ok(Local::new(b.id, index))
        })
    }

    pub fn mark_label(&mut self, label: Label) -> Result<(), VerifyError> {
        self.guarded(|b| b.mark(label))
    }

    /// Emit one operation.
    pub fn emit(&mut self, op: Op) -> Result<(), VerifyError> {
        self.guarded(|b| b.emit_op(op))
    }

    /// Apply caller-supplied candidate transitions for an operation the
    /// catalog does not cover. Returns the stack afterwards when known.
    pub fn apply(
        &mut self,
        name: &str,
        candidates: Vec<Transition>,
    ) -> Result<Option<StackState>, VerifyError> {
        self.guarded(|b| {
            limits::check_size(b.tracker.len(), b.options.max_instructions)?;
            b.steps.push(Step::Raw(name.to_string()));
            b.tracker.apply(name, candidates)
        })
    }

    /// Open a try block. The stack must be empty.
    pub fn begin_try(&mut self) -> Result<ExceptionBlock, VerifyError> {
        self.guarded(|b| {
            let at = b.tracker.len();
            let name = b.label_namer.fresh("try_end");
            let end_label = b.tracker.define_label(name)?;
            b.push_marker(Step::BeginTry, vec![Transition::none().with_stack_size(0)])?;
            Ok(b.regions.begin_try(at, end_label))
        })
    }

    /// Open a catch handler for exceptions of type `ty`.
    ///
    /// If the preceding body or handler falls through, a `leave` to the end
    /// of the try is inserted; the stack must be empty at that point.
    pub fn begin_catch(&mut self, block: ExceptionBlock, ty: Type) -> Result<CatchBlock, VerifyError> {
        self.guarded(|b| {
            let at = b.tracker.len();
            if !b.tracker.registry().is_exception(&ty) {
                return Err(VerifyError::InvalidOperand {
                    at,
                    reason: format!("catch type {ty} does not derive from Exception"),
                });
            }
            let origin = b.regions.path();
            let catch = b.regions.begin_catch(block, at)?;
            b.leave_if_falling(block, origin)?;
            b.tracker.begin_handler()?;
            b.push_marker(
                Step::BeginCatch(ty.clone()),
                vec![Transition::push(ty).with_stack_size(0)],
            )?;
            Ok(catch)
        })
    }

    /// Open a handler that catches every exception.
    pub fn begin_catch_all(&mut self, block: ExceptionBlock) -> Result<CatchBlock, VerifyError> {
        self.begin_catch(block, Type::Element(ElementType::Object))
    }

    pub fn end_catch(&mut self, catch: CatchBlock) -> Result<(), VerifyError> {
        self.guarded(|b| {
            let at = b.tracker.len();
            let origin = b.regions.path();
            b.regions.end_catch(catch, at)?;
            b.leave_if_falling(catch.block(), origin)
        })
    }

    /// Open the finally handler of `block`.
    pub fn begin_finally(&mut self, block: ExceptionBlock) -> Result<FinallyBlock, VerifyError> {
        self.guarded(|b| {
            let at = b.tracker.len();
            let origin = b.regions.path();
            let finally = b.regions.begin_finally(block, at)?;
            b.leave_if_falling(block, origin)?;
            b.tracker.begin_handler()?;
            b.push_marker(Step::BeginFinally, vec![Transition::none().with_stack_size(0)])?;
            Ok(finally)
        })
    }

    /// Close a finally handler, inserting `endfinally` if control reaches
    /// the end of it.
    pub fn end_finally(&mut self, finally: FinallyBlock) -> Result<(), VerifyError> {
        self.guarded(|b| {
            let at = b.tracker.len();
            b.regions.end_finally(finally, at)?;
            if b.tracker.falls_through() {
                limits::check_size(at, b.options.max_instructions)?;
                b.push_op(Op::EndFinally, at)?;
            }
            Ok(())
        })
    }

    /// Close `block`; code after it starts at the block's end label.
    pub fn end_try(&mut self, block: ExceptionBlock) -> Result<(), VerifyError> {
        self.guarded(|b| {
            let at = b.tracker.len();
            let end_label = b.regions.end_try(block, at)?;
            b.mark(end_label)
        })
    }

    /// Finish the body: regions closed, labels marked, every segment
    /// reachable and every path terminating.
    pub fn finalize(&mut self) -> Result<VerifiedMethod, VerifyError> {
        self.guarded(|b| {
            b.regions.check_all_closed(b.tracker.len())?;
            b.tracker.finish()?;
            returns::verify_all_paths_return(&b.tracker.path_input())?;

            let labels = b.tracker.labels();
            let label_marks = labels
                .marked_at()
                .into_iter()
                .flat_map(|(at, names)| names.into_iter().map(move |n| (n.to_string(), at)))
                .collect();
            let method = VerifiedMethod {
                signature: b.signature.clone(),
                steps: b.steps.clone(),
                listing: b.tracker.records().iter().map(|r| r.name.clone()).collect(),
                locals: b.locals.clone(),
                label_marks,
                label_shapes: labels.shapes(),
                max_stack: b.tracker.max_stack(),
            };
            debug!(
                builder = b.id,
                instructions = method.steps.len(),
                max_stack = method.max_stack,
                "method verified"
            );
            Ok(method)
        })
    }

    /// Render a failure against this builder's instruction stream.
    pub fn diagnose(&self, error: &VerifyError) -> String {
        diagnostic::render(&self.tracker, error)
    }

    fn guarded<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, VerifyError>,
    ) -> Result<T, VerifyError> {
        if let Some(error) = &self.failed {
            return Err(error.clone());
        }
        let result = f(self);
        if let Err(error) = &result {
            debug!(builder = self.id, %error, "method rejected");
            self.failed = Some(error.clone());
        }
        result
    }

    fn mark(&mut self, label: Label) -> Result<(), VerifyError> {
        let labels = self.tracker.labels();
        labels.check(label)?;
        let path = self.regions.path();
        if labels.mark_of(label).is_none() {
            let (resolved, rest): (Vec<_>, Vec<_>) = mem::take(&mut self.pending)
                .into_iter()
                .partition(|p| p.target == label);
            self.pending = rest;
            for transfer in resolved {
                RegionTracker::check_transfer(&transfer.origin, &path, transfer.leave, transfer.at)?;
            }
        }
        self.tracker.mark_label(label)?;
        self.label_paths.insert(label, path);
        Ok(())
    }

    fn emit_op(&mut self, op: Op) -> Result<(), VerifyError> {
        let at = self.tracker.len();
        limits::check_size(at, self.options.max_instructions)?;
        self.check_handles(&op, at)?;

        match op {
            Op::Ret if !self.regions.path().is_empty() => {
                return Err(VerifyError::region(
                    at,
                    "cannot return from inside a protected region; leave it first",
                ))
            }
            Op::Rethrow if !self.regions.in_catch() => {
                return Err(VerifyError::region(at, "rethrow is only valid inside a catch block"))
            }
            Op::EndFinally if !self.regions.in_finally() => {
                return Err(VerifyError::region(
                    at,
                    "endfinally is only valid inside a finally block",
                ))
            }
            _ => {}
        }

        let origin = self.regions.path();
        let leave = matches!(op, Op::Leave(_));
        for target in op.targets() {
            self.check_transfer(at, target, origin.clone(), leave)?;
        }
        self.push_op(op, at)
    }

    /// Append `op` with its catalog transitions.
    fn push_op(&mut self, op: Op, at: usize) -> Result<(), VerifyError> {
        let ctx = CatalogContext {
            signature: &self.signature,
            locals: &self.locals,
            registry: self.tracker.registry(),
        };
        let entry = catalog::lookup(&op, &ctx, at)?;
        let name = self.render(&op);
        self.steps.push(Step::Op(op));
        self.tracker
            .append(InstructionRecord::new(name, entry.flow, entry.candidates))?;
        Ok(())
    }

    fn check_handles(&self, op: &Op, at: usize) -> Result<(), VerifyError> {
        if let Op::LdLoc(local) | Op::LdLocA(local) | Op::StLoc(local) = op {
            if local.owner() != self.id {
                return Err(VerifyError::InvalidOperand {
                    at,
                    reason: format!("{local} belongs to a different method builder"),
                });
            }
        }
        for target in op.targets() {
            self.tracker.labels().check(target)?;
        }
        Ok(())
    }

    fn check_transfer(
        &mut self,
        at: usize,
        target: Label,
        origin: RegionPath,
        leave: bool,
    ) -> Result<(), VerifyError> {
        match self.label_paths.get(&target) {
            Some(path) => RegionTracker::check_transfer(&origin, path, leave, at),
            None => {
                self.pending.push(PendingTransfer {
                    at,
                    target,
                    origin,
                    leave,
                });
                Ok(())
            }
        }
    }

    /// Insert `leave end` when control would otherwise run into the next
    /// handler. The stack must be empty there.
    fn leave_if_falling(&mut self, block: ExceptionBlock, origin: RegionPath) -> Result<(), VerifyError> {
        if !self.tracker.falls_through() {
            return Ok(());
        }
        let at = self.tracker.len();
        limits::check_size(at, self.options.max_instructions)?;
        let end_label = self
            .regions
            .end_label(block)
            .ok_or_else(|| VerifyError::region(at, "unknown try block"))?;
        self.check_transfer(at, end_label, origin, true)?;
        let name = format!("leave {}", self.tracker.labels().name(end_label));
        self.steps.push(Step::Op(Op::Leave(end_label)));
        self.tracker.append(InstructionRecord::new(
            name,
            Flow::Branch {
                kind: BranchKind::Leave,
                targets: vec![end_label],
            },
            vec![Transition::none().with_stack_size(0)],
        ))?;
        Ok(())
    }

    fn push_marker(&mut self, step: Step, candidates: Vec<Transition>) -> Result<(), VerifyError> {
        limits::check_size(self.tracker.len(), self.options.max_instructions)?;
        let name = step.to_string();
        self.steps.push(step);
        self.tracker.append(InstructionRecord::next(name, candidates))?;
        Ok(())
    }

    /// Display form with label and local names in place of raw handles.
    fn render(&self, op: &Op) -> String {
        let labels = self.tracker.labels();
        let m = op.mnemonic();
        match op {
            Op::LdLoc(local) | Op::LdLocA(local) | Op::StLoc(local) => {
                match self.local_names.get(local.index()) {
                    Some(name) => format!("{m} {name}"),
                    None => op.to_string(),
                }
            }
            Op::Br(l) | Op::BrTrue(l) | Op::BrFalse(l) | Op::BranchIf(_, l) | Op::Leave(l) => {
                format!("{m} {}", labels.name(*l))
            }
            Op::Switch(targets) => {
                let names: Vec<&str> = targets.iter().map(|l| labels.name(*l)).collect();
                format!("{m} ({})", names.join(", "))
            }
            _ => op.to_string(),
        }
    }
}

fn claim_name(
    namer: &mut Namer,
    name: Option<&str>,
    root: &str,
    taken: impl FnOnce(&str) -> VerifyError,
) -> Result<String, VerifyError> {
    match name {
        Some(name) if namer.claim(name) => Ok(name.to_string()),
        Some(name) => Err(taken(name)),
        None => Ok(namer.fresh(root)),
    }
}
