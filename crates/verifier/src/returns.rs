//! All-paths-return analysis.
//!
//! Walks the control-flow graph implied by the recorded branches from every
//! entry point (the method entry and each handler start). A path succeeds
//! when it reaches a `ret`, `throw`, `rethrow` or `endfinally`, or when it
//! branches back to an instruction already on the current path: a loop is
//! not required to terminate. A path fails when it runs off the end of the
//! body. Failures are reported as the sequence of labels branched to.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use cilcheck_common::Label;
use tracing::debug;

use crate::error::VerifyError;
use crate::labels::BranchRecord;

/// Control-flow facts of a finished body.
#[derive(Debug, Clone, Default)]
pub struct PathInput {
    /// Number of instructions.
    pub len: usize,
    pub branches: Vec<BranchRecord>,
    /// Instruction index each label was marked at.
    pub marks: HashMap<Label, usize>,
    /// Display names for labels, used in failure paths.
    pub names: HashMap<Label, String>,
    /// `ret` and `endfinally` indices.
    pub returns: BTreeSet<usize>,
    /// `throw` and `rethrow` indices.
    pub throws: BTreeSet<usize>,
    /// Where tracing starts.
    pub entries: Vec<usize>,
}

type Outcome = Result<(), Vec<Vec<String>>>;

/// Where control may go from a scanned stretch of instructions.
enum Scan {
    Done(Outcome),
    /// Successor starts, each with the label name that prefixes its
    /// failure paths (`None` for fall-through).
    Branch(Vec<(usize, Option<String>)>),
}

/// One start index whose successors are still being traced.
struct Frame {
    start: usize,
    /// Successors not yet traced, last one next.
    pending: Vec<(usize, Option<String>)>,
    /// Prefix for the successor currently being traced.
    waiting: Option<String>,
    failures: Vec<Vec<String>>,
}

impl Frame {
    fn absorb(&mut self, paths: Vec<Vec<String>>, prefix: Option<String>) {
        self.failures.extend(paths.into_iter().map(|mut path| {
            if let Some(name) = &prefix {
                path.insert(0, name.clone());
            }
            path
        }));
    }

    fn finish(mut self) -> Outcome {
        if self.failures.is_empty() {
            return Ok(());
        }
        self.failures.sort();
        self.failures.dedup();
        Err(self.failures)
    }
}

struct PathTracer<'a> {
    input: &'a PathInput,
    by_origin: BTreeMap<usize, Vec<&'a BranchRecord>>,
    on_path: HashSet<usize>,
    results: HashMap<usize, Outcome>,
}

/// Check that every path from every entry point terminates.
pub fn verify_all_paths_return(input: &PathInput) -> Result<(), VerifyError> {
    let mut tracer = PathTracer::new(input);
    let mut failures = Vec::new();
    for &entry in &input.entries {
        if let Err(paths) = tracer.trace(entry) {
            failures.extend(paths);
        }
    }
    if failures.is_empty() {
        return Ok(());
    }
    failures.sort();
    failures.dedup();
    debug!(paths = failures.len(), "non-terminating paths");
    Err(VerifyError::NonTerminating { paths: failures })
}

impl<'a> PathTracer<'a> {
    fn new(input: &'a PathInput) -> Self {
        let mut by_origin: BTreeMap<usize, Vec<&BranchRecord>> = BTreeMap::new();
        for branch in &input.branches {
            by_origin.entry(branch.origin).or_default().push(branch);
        }
        Self {
            input,
            by_origin,
            on_path: HashSet::new(),
            results: HashMap::new(),
        }
    }

    /// Depth-first walk from `entry` on an explicit frame stack, so the
    /// number of chained branches is not bounded by the thread's stack.
    fn trace(&mut self, entry: usize) -> Outcome {
        let mut frames: Vec<Frame> = Vec::new();
        let mut done = self.enter(entry, &mut frames);
        loop {
            if let Some(outcome) = done.take() {
                let Some(parent) = frames.last_mut() else {
                    return outcome;
                };
                let prefix = parent.waiting.take();
                if let Err(paths) = outcome {
                    parent.absorb(paths, prefix);
                }
            }
            let Some(frame) = frames.last_mut() else {
                return Ok(());
            };
            match frame.pending.pop() {
                Some((next, prefix)) => {
                    frame.waiting = prefix;
                    done = self.enter(next, &mut frames);
                }
                None => {
                    let Some(frame) = frames.pop() else {
                        return Ok(());
                    };
                    let start = frame.start;
                    let outcome = frame.finish();
                    self.on_path.remove(&start);
                    self.results.insert(start, outcome.clone());
                    done = Some(outcome);
                }
            }
        }
    }

    /// Start tracing at `start`. Returns the outcome when it is already
    /// known, otherwise pushes a frame for its successors.
    fn enter(&mut self, start: usize, frames: &mut Vec<Frame>) -> Option<Outcome> {
        if self.on_path.contains(&start) {
            return Some(Ok(()));
        }
        if let Some(done) = self.results.get(&start) {
            return Some(done.clone());
        }
        match self.scan(start) {
            Scan::Done(outcome) => {
                self.results.insert(start, outcome.clone());
                Some(outcome)
            }
            Scan::Branch(mut successors) => {
                successors.reverse();
                self.on_path.insert(start);
                frames.push(Frame {
                    start,
                    pending: successors,
                    waiting: None,
                    failures: Vec::new(),
                });
                None
            }
        }
    }

    /// Scan forward from `start` to the first terminator or branch.
    fn scan(&self, start: usize) -> Scan {
        let mut at = start;
        loop {
            if at >= self.input.len {
                return Scan::Done(Err(vec![Vec::new()]));
            }
            if self.input.returns.contains(&at) || self.input.throws.contains(&at) {
                return Scan::Done(Ok(()));
            }
            if let Some(edges) = self.by_origin.get(&at) {
                return Scan::Branch(self.successors(at, edges));
            }
            at += 1;
        }
    }

    fn successors(&self, at: usize, edges: &[&BranchRecord]) -> Vec<(usize, Option<String>)> {
        let mut next = Vec::with_capacity(edges.len() + 1);
        for edge in edges {
            // Unmarked targets are reported by the label check.
            let Some(&target) = self.input.marks.get(&edge.target) else {
                continue;
            };
            let name = self
                .input
                .names
                .get(&edge.target)
                .cloned()
                .unwrap_or_else(|| edge.target.to_string());
            next.push((target, Some(name)));
        }
        if edges.iter().any(|e| e.kind.falls_through()) {
            next.push((at + 1, None));
        }
        next
    }
}
