//! Branch targets.
//!
//! Labels are defined before use, marked exactly once, and owned by the
//! builder that defined them. Each branch to a label is recorded with its
//! kind and origin so the return tracer can walk the control-flow graph
//! after the fact.

use std::collections::{BTreeMap, HashMap};

use cilcheck_common::Label;

use crate::error::VerifyError;
use crate::stack::StackState;

/// How a branch leaves its origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchKind {
    /// `br`: always jumps.
    Unconditional,
    /// `brtrue`/`brfalse`: pops one operand, may fall through.
    UnaryConditional,
    /// `beq`, `blt`, ...: pops two comparable operands, may fall through.
    BinaryConditional,
    /// `switch`: jumps to one of several targets or falls through.
    Switch,
    /// `leave`: exits a protected region, emptying the stack.
    Leave,
}

impl BranchKind {
    /// True if execution may continue at the next instruction.
    pub fn falls_through(&self) -> bool {
        matches!(
            self,
            BranchKind::UnaryConditional | BranchKind::BinaryConditional | BranchKind::Switch
        )
    }
}

/// One recorded branch edge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchRecord {
    pub kind: BranchKind,
    pub target: Label,
    pub origin: usize,
}

#[derive(Debug, Clone)]
struct LabelInfo {
    name: String,
    mark: Option<usize>,
    shape: Option<StackState>,
    segment: Option<usize>,
}

/// All labels of one method.
#[derive(Debug, Clone)]
pub struct LabelTable {
    owner: u64,
    labels: Vec<LabelInfo>,
    by_name: HashMap<String, Label>,
    branches: Vec<BranchRecord>,
}

impl LabelTable {
    pub fn new(owner: u64) -> Self {
        Self {
            owner,
            labels: Vec::new(),
            by_name: HashMap::new(),
            branches: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Define a new, unmarked label. Names are unique per method.
    pub fn define(&mut self, name: impl Into<String>) -> Result<Label, VerifyError> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(VerifyError::label(&name, "already defined"));
        }
        let index = u32::try_from(self.labels.len())
            .map_err(|_| VerifyError::label(&name, "too many labels"))?;
        let label = Label::new(self.owner, index);
        self.labels.push(LabelInfo {
            name: name.clone(),
            mark: None,
            shape: None,
            segment: None,
        });
        self.by_name.insert(name, label);
        Ok(label)
    }

    /// Reject labels that belong to another builder.
    pub fn check(&self, label: Label) -> Result<(), VerifyError> {
        if label.owner() != self.owner || label.index() >= self.labels.len() {
            return Err(VerifyError::label(
                label,
                "belongs to a different method builder",
            ));
        }
        Ok(())
    }

    /// Mark `label` at instruction index `at`.
    pub fn mark(&mut self, label: Label, at: usize) -> Result<(), VerifyError> {
        self.check(label)?;
        let info = &mut self.labels[label.index()];
        if let Some(previous) = info.mark {
            return Err(VerifyError::label(
                &info.name,
                format!("already marked at instruction {previous}"),
            ));
        }
        info.mark = Some(at);
        Ok(())
    }

    pub fn record_branch(
        &mut self,
        kind: BranchKind,
        target: Label,
        origin: usize,
    ) -> Result<(), VerifyError> {
        self.check(target)?;
        self.branches.push(BranchRecord {
            kind,
            target,
            origin,
        });
        Ok(())
    }

    /// Display name; callers pass labels that passed [`LabelTable::check`].
    pub fn name(&self, label: Label) -> &str {
        self.labels
            .get(label.index())
            .map_or("?", |info| info.name.as_str())
    }

    pub fn mark_of(&self, label: Label) -> Option<usize> {
        self.labels.get(label.index()).and_then(|info| info.mark)
    }

    /// Stack shape fixed by the first arrival (widened by later ones).
    pub fn shape(&self, label: Label) -> Option<&StackState> {
        self.labels
            .get(label.index())
            .and_then(|info| info.shape.as_ref())
    }

    pub(crate) fn set_shape(&mut self, label: Label, shape: StackState) {
        if let Some(info) = self.labels.get_mut(label.index()) {
            info.shape = Some(shape);
        }
    }

    pub(crate) fn clear_shapes(&mut self) {
        for info in &mut self.labels {
            info.shape = None;
        }
    }

    pub(crate) fn segment_of(&self, label: Label) -> Option<usize> {
        self.labels.get(label.index()).and_then(|info| info.segment)
    }

    pub(crate) fn set_segment(&mut self, label: Label, segment: usize) {
        if let Some(info) = self.labels.get_mut(label.index()) {
            info.segment = Some(segment);
        }
    }

    pub fn branches(&self) -> &[BranchRecord] {
        &self.branches
    }

    /// Label to marked instruction index, for every marked label.
    pub fn marks(&self) -> HashMap<Label, usize> {
        self.labels
            .iter()
            .enumerate()
            .filter_map(|(i, info)| {
                let label = Label::new(self.owner, i as u32);
                info.mark.map(|at| (label, at))
            })
            .collect()
    }

    /// Marked labels in order of their mark index, for listings.
    pub fn marked_at(&self) -> BTreeMap<usize, Vec<&str>> {
        let mut out: BTreeMap<usize, Vec<&str>> = BTreeMap::new();
        for info in &self.labels {
            if let Some(at) = info.mark {
                out.entry(at).or_default().push(info.name.as_str());
            }
        }
        out
    }

    /// Final shapes of every marked label that some path reaches.
    pub fn shapes(&self) -> BTreeMap<String, StackState> {
        self.labels
            .iter()
            .filter(|info| info.mark.is_some())
            .filter_map(|info| info.shape.clone().map(|s| (info.name.clone(), s)))
            .collect()
    }

    /// Every branch must target a marked label, and every defined label
    /// must be marked.
    pub fn check_all_marked(&self) -> Result<(), VerifyError> {
        for branch in &self.branches {
            if self.mark_of(branch.target).is_none() {
                return Err(VerifyError::label(
                    self.name(branch.target),
                    format!(
                        "branched to from instruction {} but never marked",
                        branch.origin
                    ),
                ));
            }
        }
        if let Some(info) = self.labels.iter().find(|info| info.mark.is_none()) {
            return Err(VerifyError::label(&info.name, "defined but never marked"));
        }
        Ok(())
    }
}
