//! Incremental stack tracking across a method body.
//!
//! The body is split into segments. One starts at the method entry, one at
//! every marked label and one at every exception handler. A segment whose
//! entry shape is known is checked as its instructions arrive. A segment
//! that starts at a label nothing has branched to yet is recorded
//! unverified and replayed once an arrival fixes the label's shape.
//!
//! When a later arrival widens a label's shape (a `Dog` reaching a label
//! first seen with `Animal` is fine, the reverse widens it), the label's
//! segment is replayed under the wider shape. Shapes only ever widen, so
//! replays terminate.
//!
//! Deferred mode records everything and runs the same replay engine once,
//! at [`Tracker::finish`].

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::mem;

use cilcheck_common::{Label, TypeRegistry};
use tracing::{debug, trace};

use crate::error::VerifyError;
use crate::labels::{BranchKind, LabelTable};
use crate::returns::PathInput;
use crate::stack::StackState;
use crate::transition::Transition;

/// Where control goes after an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    Next,
    Branch { kind: BranchKind, targets: Vec<Label> },
    Return,
    /// `throw` and `rethrow`.
    Throw,
    EndFinally,
}

impl Flow {
    pub fn falls_through(&self) -> bool {
        match self {
            Flow::Next => true,
            Flow::Branch { kind, .. } => kind.falls_through(),
            Flow::Return | Flow::Throw | Flow::EndFinally => false,
        }
    }
}

/// One recorded instruction: a display name, its flow and its candidate
/// stack effects.
#[derive(Debug, Clone)]
pub struct InstructionRecord {
    pub name: String,
    pub flow: Flow,
    pub candidates: Vec<Transition>,
}

impl InstructionRecord {
    pub fn new(name: impl Into<String>, flow: Flow, candidates: Vec<Transition>) -> Self {
        Self {
            name: name.into(),
            flow,
            candidates,
        }
    }

    /// A straight-line instruction.
    pub fn next(name: impl Into<String>, candidates: Vec<Transition>) -> Self {
        Self::new(name, Flow::Next, candidates)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Seed {
    Entry,
    Label(Label),
    Handler,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: usize,
    seed: Seed,
}

#[derive(Debug, Clone, Default)]
enum Cursor {
    Tracking(StackState),
    /// The current segment's entry shape is not known yet.
    #[default]
    Unverified,
    /// The previous instruction never falls through.
    Unreachable,
}

#[derive(Debug)]
pub struct Tracker {
    registry: TypeRegistry,
    labels: LabelTable,
    records: Vec<InstructionRecord>,
    before: Vec<Option<StackState>>,
    segments: Vec<Segment>,
    cursor: Cursor,
    pending: VecDeque<usize>,
    deferred: bool,
    max_stack: usize,
    consumers: BTreeMap<usize, BTreeSet<usize>>,
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new(TypeRegistry::new(), 0, false)
    }
}

impl Tracker {
    /// Create a tracker for one method. `owner` identifies the builder the
    /// method's labels belong to.
    pub fn new(registry: TypeRegistry, owner: u64, deferred: bool) -> Self {
        Self {
            registry,
            labels: LabelTable::new(owner),
            records: Vec::new(),
            before: Vec::new(),
            segments: vec![Segment {
                start: 0,
                seed: Seed::Entry,
            }],
            cursor: if deferred {
                Cursor::Unverified
            } else {
                Cursor::Tracking(StackState::empty())
            },
            pending: VecDeque::new(),
            deferred,
            max_stack: 0,
            consumers: BTreeMap::new(),
        }
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn labels(&self) -> &LabelTable {
        &self.labels
    }

    pub fn records(&self) -> &[InstructionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The stack at the current position, when it is known.
    pub fn current(&self) -> Option<&StackState> {
        match &self.cursor {
            Cursor::Tracking(state) => Some(state),
            _ => None,
        }
    }

    /// Stack observed before instruction `at`, once it has been verified.
    pub fn stack_before(&self, at: usize) -> Option<&StackState> {
        self.before.get(at).and_then(Option::as_ref)
    }

    /// Deepest stack seen so far.
    pub fn max_stack(&self) -> usize {
        self.max_stack
    }

    /// Instructions that consumed a value pushed by instruction `at`.
    pub fn consumers_of(&self, at: usize) -> Vec<usize> {
        self.consumers
            .get(&at)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// True if control may reach the next instruction appended, judged from
    /// the structure of the body alone.
    pub fn falls_through(&self) -> bool {
        let start = self.segments.last().map_or(0, |s| s.start);
        if self.records.len() > start {
            self.records.last().map_or(true, |r| r.flow.falls_through())
        } else {
            true
        }
    }

    pub fn define_label(&mut self, name: impl Into<String>) -> Result<Label, VerifyError> {
        self.labels.define(name)
    }

    /// Apply a straight-line transition, returning the stack afterwards when
    /// it is known.
    pub fn apply(
        &mut self,
        name: impl Into<String>,
        candidates: Vec<Transition>,
    ) -> Result<Option<StackState>, VerifyError> {
        self.append(InstructionRecord::next(name, candidates))
    }

    /// Record an instruction and, in immediate mode, verify it.
    pub fn append(&mut self, record: InstructionRecord) -> Result<Option<StackState>, VerifyError> {
        let at = self.records.len();
        if let Flow::Branch { kind, targets } = &record.flow {
            for target in targets {
                self.labels.record_branch(*kind, *target, at)?;
            }
        }
        self.records.push(record);
        self.before.push(None);

        if self.deferred {
            return Ok(None);
        }
        match mem::take(&mut self.cursor) {
            Cursor::Tracking(state) => {
                self.cursor = self.step(at, state)?;
                self.drain()?;
            }
            Cursor::Unverified => {}
            Cursor::Unreachable => {
                self.cursor = Cursor::Unreachable;
                return Err(VerifyError::UnreachableCode { at });
            }
        }
        Ok(self.current().cloned())
    }

    /// Mark `label` at the current position, reconciling the fall-through
    /// stack with any shape branches have already fixed.
    pub fn mark_label(&mut self, label: Label) -> Result<(), VerifyError> {
        let at = self.records.len();
        self.labels.mark(label, at)?;
        let segment = self.segments.len();
        self.segments.push(Segment {
            start: at,
            seed: Seed::Label(label),
        });
        self.labels.set_segment(label, segment);
        debug!(label = self.labels.name(label), at, "label marked");

        if self.deferred {
            return Ok(());
        }
        let incoming = mem::take(&mut self.cursor);
        if let Cursor::Tracking(state) = &incoming {
            self.arrive(label, state, at.saturating_sub(1))?;
        }
        self.drain()?;
        self.cursor = match self.labels.shape(label) {
            Some(shape) => Cursor::Tracking(shape.clone()),
            None => Cursor::Unverified,
        };
        Ok(())
    }

    /// Start an exception handler at the current position with an empty
    /// stack. Control must not fall into it.
    pub fn begin_handler(&mut self) -> Result<(), VerifyError> {
        let at = self.records.len();
        if self.falls_through() {
            return Err(VerifyError::region(
                at,
                "control cannot fall through into an exception handler",
            ));
        }
        self.segments.push(Segment {
            start: at,
            seed: Seed::Handler,
        });
        self.cursor = if self.deferred {
            Cursor::Unverified
        } else {
            Cursor::Tracking(StackState::empty())
        };
        Ok(())
    }

    /// Complete verification: every branch target marked, deferred segments
    /// replayed, and no instruction left in a segment nothing reaches.
    pub fn finish(&mut self) -> Result<(), VerifyError> {
        self.labels.check_all_marked()?;

        if self.deferred {
            self.labels.clear_shapes();
            self.pending.clear();
            let roots: Vec<usize> = self
                .segments
                .iter()
                .enumerate()
                .filter(|(_, s)| !matches!(s.seed, Seed::Label(_)))
                .map(|(i, _)| i)
                .collect();
            self.pending.extend(roots);
            self.drain()?;
        }

        for segment in 0..self.segments.len() {
            let start = self.segments[segment].start;
            if start < self.segment_end(segment) && self.entry_state(segment).is_none() {
                return Err(VerifyError::UnreachableCode { at: start });
            }
        }
        debug!(
            instructions = self.records.len(),
            max_stack = self.max_stack,
            "stack tracking complete"
        );
        Ok(())
    }

    /// Control-flow facts for the return tracer.
    pub fn path_input(&self) -> PathInput {
        let mut input = PathInput {
            len: self.records.len(),
            branches: self.labels.branches().to_vec(),
            marks: self.labels.marks(),
            names: HashMap::new(),
            returns: BTreeSet::new(),
            throws: BTreeSet::new(),
            entries: self
                .segments
                .iter()
                .filter(|s| !matches!(s.seed, Seed::Label(_)))
                .map(|s| s.start)
                .collect(),
        };
        for label in input.marks.keys() {
            input
                .names
                .insert(*label, self.labels.name(*label).to_string());
        }
        for (at, record) in self.records.iter().enumerate() {
            match record.flow {
                Flow::Return | Flow::EndFinally => {
                    input.returns.insert(at);
                }
                Flow::Throw => {
                    input.throws.insert(at);
                }
                _ => {}
            }
        }
        input
    }

    fn step(&mut self, at: usize, state: StackState) -> Result<Cursor, VerifyError> {
        self.before[at] = Some(state.clone());
        let applied = state.apply_any(&self.records[at].candidates, at, &self.registry)?;
        for value in &applied.consumed {
            if let Some(origin) = value.pushed_by() {
                self.consumers.entry(origin).or_default().insert(at);
            }
        }
        self.max_stack = self.max_stack.max(state.len()).max(applied.state.len());
        trace!(
            at,
            op = %self.records[at].name,
            before = %state,
            after = %applied.state,
            "applied"
        );

        let flow = self.records[at].flow.clone();
        match flow {
            Flow::Next => Ok(Cursor::Tracking(applied.state)),
            Flow::Branch { kind, targets } => {
                for target in targets {
                    self.arrive(target, &applied.state, at)?;
                }
                if kind.falls_through() {
                    Ok(Cursor::Tracking(applied.state))
                } else {
                    Ok(Cursor::Unreachable)
                }
            }
            Flow::Return | Flow::Throw | Flow::EndFinally => Ok(Cursor::Unreachable),
        }
    }

    /// Reconcile an arrival at `label` coming from instruction `from`.
    fn arrive(&mut self, label: Label, state: &StackState, from: usize) -> Result<(), VerifyError> {
        let shape = match self.labels.shape(label) {
            None => state.clone(),
            Some(existing) => {
                let merged = existing.reconcile(state, from, &self.registry)?;
                if merged == *existing {
                    return Ok(());
                }
                merged
            }
        };
        debug!(label = self.labels.name(label), from, shape = %shape, "label shape");
        self.labels.set_shape(label, shape);
        if let Some(segment) = self.labels.segment_of(label) {
            if !self.pending.contains(&segment) {
                self.pending.push_back(segment);
            }
        }
        Ok(())
    }

    fn drain(&mut self) -> Result<(), VerifyError> {
        while let Some(segment) = self.pending.pop_front() {
            self.replay(segment)?;
        }
        Ok(())
    }

    fn replay(&mut self, segment: usize) -> Result<(), VerifyError> {
        let Some(entry) = self.entry_state(segment) else {
            return Ok(());
        };
        let start = self.segments[segment].start;
        let end = self.segment_end(segment);
        debug!(segment, start, end, "replaying segment");

        let mut cursor = Cursor::Tracking(entry);
        for at in start..end {
            cursor = match cursor {
                Cursor::Tracking(state) => self.step(at, state)?,
                _ => return Err(VerifyError::UnreachableCode { at }),
            };
        }

        match self.segments.get(segment + 1).map(|s| s.seed) {
            Some(next) => {
                if let Cursor::Tracking(state) = &cursor {
                    match next {
                        Seed::Label(label) => self.arrive(label, state, end.saturating_sub(1))?,
                        _ => {
                            return Err(VerifyError::region(
                                end,
                                "control cannot fall through into an exception handler",
                            ))
                        }
                    }
                }
            }
            None => self.cursor = cursor,
        }
        Ok(())
    }

    fn segment_end(&self, segment: usize) -> usize {
        self.segments
            .get(segment + 1)
            .map_or(self.records.len(), |next| next.start)
    }

    fn entry_state(&self, segment: usize) -> Option<StackState> {
        match self.segments[segment].seed {
            Seed::Entry | Seed::Handler => Some(StackState::empty()),
            Seed::Label(label) => self.labels.shape(label).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cilcheck_common::{Type, TypeValue};

    fn int() -> TypeValue {
        TypeValue::int32()
    }

    fn push(ty: TypeValue) -> Vec<Transition> {
        vec![Transition::push(ty)]
    }

    fn add() -> Vec<Transition> {
        vec![Transition::new(vec![int(), int()], vec![int()])]
    }

    fn pop() -> Vec<Transition> {
        vec![Transition::pop(vec![TypeValue::Wildcard])]
    }

    fn br(label: Label) -> InstructionRecord {
        InstructionRecord::new(
            "br",
            Flow::Branch {
                kind: BranchKind::Unconditional,
                targets: vec![label],
            },
            vec![Transition::none()],
        )
    }

    fn brtrue(label: Label) -> InstructionRecord {
        InstructionRecord::new(
            "brtrue",
            Flow::Branch {
                kind: BranchKind::UnaryConditional,
                targets: vec![label],
            },
            vec![Transition::pop(vec![int()])],
        )
    }

    fn ret() -> InstructionRecord {
        InstructionRecord::new(
            "ret",
            Flow::Return,
            vec![Transition::none().with_stack_size(0)],
        )
    }

    #[test]
    fn push_push_add() {
        let mut tracker = Tracker::default();
        tracker.apply("ldc.i4 1", push(int())).unwrap();
        tracker.apply("ldc.i4 2", push(int())).unwrap();
        let after = tracker.apply("add", add()).unwrap();
        assert_eq!(after, Some(StackState::from_types([int()])));
        assert_eq!(tracker.max_stack(), 2);
        assert_eq!(tracker.consumers_of(0), vec![2]);
    }

    #[test]
    fn forward_branch_fixes_shape() {
        let mut tracker = Tracker::default();
        let exit = tracker.define_label("exit").unwrap();
        tracker.apply("ldc.i4 1", push(int())).unwrap();
        tracker.append(br(exit)).unwrap();
        tracker.mark_label(exit).unwrap();
        assert_eq!(tracker.current(), Some(&StackState::from_types([int()])));
        assert_eq!(
            tracker.labels().shape(exit),
            Some(&StackState::from_types([int()]))
        );
    }

    #[test]
    fn fall_through_must_match_branch_shape() {
        let mut tracker = Tracker::default();
        let join = tracker.define_label("join").unwrap();
        tracker.apply("ldc.i4 1", push(int())).unwrap();
        tracker.apply("ldc.i4 1", push(int())).unwrap();
        tracker.append(brtrue(join)).unwrap();
        tracker.apply("pop", pop()).unwrap();
        tracker.apply("ldstr", push(TypeValue::string())).unwrap();
        let err = tracker.mark_label(join).unwrap_err();
        assert!(matches!(err, VerifyError::TypeMismatch { at: 4, .. }));
    }

    #[test]
    fn code_after_branch_is_unreachable() {
        let mut tracker = Tracker::default();
        let exit = tracker.define_label("exit").unwrap();
        tracker.append(br(exit)).unwrap();
        let err = tracker.apply("nop", vec![Transition::none()]).unwrap_err();
        assert_eq!(err, VerifyError::UnreachableCode { at: 1 });
    }

    #[test]
    fn unverified_segment_replayed_on_first_arrival() {
        let mut tracker = Tracker::default();
        let body = tracker.define_label("body").unwrap();
        let start = tracker.define_label("start").unwrap();
        let done = tracker.define_label("done").unwrap();

        tracker.append(br(start)).unwrap();
        tracker.mark_label(body).unwrap();
        assert_eq!(tracker.current(), None);
        tracker.apply("ldc.i4 1", push(int())).unwrap();
        tracker.append(br(done)).unwrap();
        tracker.mark_label(start).unwrap();
        tracker.append(br(body)).unwrap();
        tracker.mark_label(done).unwrap();

        assert_eq!(tracker.current(), Some(&StackState::from_types([int()])));
        assert_eq!(
            tracker.stack_before(2),
            Some(&StackState::from_types([int()]))
        );
        tracker.apply("pop", pop()).unwrap();
        tracker.append(ret()).unwrap();
        tracker.finish().unwrap();
    }

    #[test]
    fn unreached_label_segment_fails_at_finish() {
        let mut tracker = Tracker::default();
        let orphan = tracker.define_label("orphan").unwrap();
        tracker.append(ret()).unwrap();
        tracker.mark_label(orphan).unwrap();
        tracker.append(ret()).unwrap();
        assert_eq!(
            tracker.finish(),
            Err(VerifyError::UnreachableCode { at: 1 })
        );
    }

    #[test]
    fn never_marked_target_fails_at_finish() {
        let mut tracker = Tracker::default();
        let missing = tracker.define_label("missing").unwrap();
        tracker.append(br(missing)).unwrap();
        assert!(matches!(
            tracker.finish(),
            Err(VerifyError::LabelError { .. })
        ));
    }

    #[test]
    fn back_edge_widens_and_replays() {
        let mut registry = TypeRegistry::new();
        registry
            .declare_class("Animal", None)
            .declare_class("Dog", Some("Animal"));
        let dog: TypeValue = Type::named("Dog").into();
        let animal: TypeValue = Type::named("Animal").into();

        let mut tracker = Tracker::new(registry, 0, false);
        let top = tracker.define_label("top").unwrap();
        tracker.apply("newobj Dog", push(dog.clone())).unwrap();
        tracker.mark_label(top).unwrap();
        tracker.apply("pop", pop()).unwrap();
        tracker.apply("newobj Animal", push(animal.clone())).unwrap();
        tracker.apply("ldc.i4 1", push(int())).unwrap();
        tracker.append(brtrue(top)).unwrap();

        assert_eq!(
            tracker.labels().shape(top),
            Some(&StackState::from_types([animal.clone()]))
        );
        assert_eq!(
            tracker.stack_before(1),
            Some(&StackState::from_types([animal]))
        );
    }

    #[test]
    fn handler_cannot_be_fallen_into() {
        let mut tracker = Tracker::default();
        tracker.apply("nop", vec![Transition::none()]).unwrap();
        assert!(matches!(
            tracker.begin_handler(),
            Err(VerifyError::RegionViolation { .. })
        ));
    }

    #[test]
    fn deferred_matches_immediate() {
        let build = |deferred: bool| {
            let mut tracker = Tracker::new(TypeRegistry::new(), 0, deferred);
            let exit = tracker.define_label("exit").unwrap();
            tracker.apply("ldc.i4 1", push(int())).unwrap();
            tracker.apply("ldc.i4 2", push(int())).unwrap();
            tracker.apply("add", add()).unwrap();
            tracker.append(br(exit)).unwrap();
            tracker.mark_label(exit).unwrap();
            tracker.apply("pop", pop()).unwrap();
            tracker.append(ret()).unwrap();
            tracker.finish().unwrap();
            (tracker.labels().shapes(), tracker.max_stack())
        };
        assert_eq!(build(true), build(false));
    }

    #[test]
    fn deferred_reports_first_failure_at_finish() {
        let mut tracker = Tracker::new(TypeRegistry::new(), 0, true);
        tracker.apply("ldc.i4 1", push(int())).unwrap();
        tracker.apply("add", add()).unwrap();
        tracker.append(ret()).unwrap();
        assert_eq!(
            tracker.finish(),
            Err(VerifyError::StackUnderflow {
                at: 1,
                required: 2,
                available: 1
            })
        );
    }
}
