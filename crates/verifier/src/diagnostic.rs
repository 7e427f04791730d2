//! Annotated listings for verification failures.
//!
//! A report shows every instruction with the stack observed before it,
//! bottom first. The failing instruction is marked with `>>`, the offending
//! slot is underlined and the instruction that pushed it is named.
//!
//! ```text
//! error: type mismatch at instruction 2: operand 0 (from top) expected int32, found string
//!      0  ldc.i4 1   []
//!      1  ldstr "x"  [int32]
//!   >> 2  add        [int32, string]
//!                             ^^^^^^
//!         operand 0 (string) pushed by instruction 1: ldstr "x"
//! ```
//!
//! When the offending value also reached other instructions on another
//! path, those are listed as well.

use std::fmt;

use crate::error::VerifyError;
use crate::stack::StackState;
use crate::tracker::{InstructionRecord, Tracker};

const MAX_NAME_WIDTH: usize = 40;

/// Render `error` against the instructions recorded in `tracker`.
pub fn render(tracker: &Tracker, error: &VerifyError) -> String {
    Report { tracker, error }.to_string()
}

/// A failure together with the instruction stream it was found in.
struct Report<'a> {
    tracker: &'a Tracker,
    error: &'a VerifyError,
}

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.error)?;

        let records = self.tracker.records();
        if records.is_empty() {
            return Ok(());
        }
        let failing = self.error.at();
        let marks = self.tracker.labels().marked_at();
        let index_width = (records.len() - 1).to_string().len();
        let name_width = records
            .iter()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0)
            .min(MAX_NAME_WIDTH);
        // ">> " plus the index column plus two spaces.
        let gutter = 3 + index_width + 2;

        for (at, record) in records.iter().enumerate() {
            for name in marks.get(&at).into_iter().flatten() {
                writeln!(f, "{name}:")?;
            }
            let marker = if failing == Some(at) { ">>" } else { "  " };
            let stack = self
                .tracker
                .stack_before(at)
                .map_or_else(|| "?".to_string(), StackState::to_string);
            writeln!(
                f,
                "{marker} {at:>index_width$}  {:<name_width$}  {stack}",
                record.name
            )?;

            if failing != Some(at) {
                continue;
            }
            let operand = self.error.operand();
            let (Some(operand), Some(state)) = (operand, self.tracker.stack_before(at)) else {
                continue;
            };
            if let Some((offset, width)) = slot_span(state, operand) {
                let pad = gutter + name_width.max(record.name.len()) + 2 + offset;
                writeln!(f, "{}{}", " ".repeat(pad), "^".repeat(width))?;
            }
            let Some(value) = state.peek(operand) else {
                continue;
            };
            let Some(origin) = value.pushed_by() else {
                writeln!(
                    f,
                    "{}operand {operand} ({}) present on entry",
                    " ".repeat(gutter),
                    value.ty()
                )?;
                continue;
            };
            writeln!(
                f,
                "{}operand {operand} ({}) pushed by instruction {origin}: {}",
                " ".repeat(gutter),
                value.ty(),
                name_of(records, origin)
            )?;
            for consumer in self.tracker.consumers_of(origin) {
                if consumer != at {
                    writeln!(
                        f,
                        "{}also consumed by instruction {consumer}: {}",
                        " ".repeat(gutter),
                        name_of(records, consumer)
                    )?;
                }
            }
        }
        for name in marks.get(&records.len()).into_iter().flatten() {
            writeln!(f, "{name}:")?;
        }
        Ok(())
    }
}

fn name_of(records: &[InstructionRecord], at: usize) -> &str {
    records.get(at).map_or("?", |r| r.name.as_str())
}

/// Character offset and width of slot `operand` (from the top) in the
/// rendered stack.
fn slot_span(state: &StackState, operand: usize) -> Option<(usize, usize)> {
    let index = state.len().checked_sub(operand + 1)?;
    let mut offset = 1;
    for (i, ty) in state.types().enumerate() {
        let width = ty.to_string().len();
        if i == index {
            return Some((offset, width));
        }
        offset += width + 2;
    }
    None
}
