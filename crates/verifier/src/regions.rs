//! Protected regions: try blocks and their catch and finally handlers.
//!
//! Regions nest. The region path of an instruction is the list of
//! (block, part) frames enclosing it, outermost first. Transfers are legal
//! when they stay within a region or, for `leave`, exit to an enclosing one.
//! Nothing may branch into a region from outside, and no finally block may
//! be entered by a branch at all.

use cilcheck_common::Label;

use crate::error::VerifyError;

/// Handle for an open try block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExceptionBlock {
    owner: u64,
    index: usize,
}

/// Handle for a catch handler of a try block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CatchBlock {
    block: ExceptionBlock,
    index: usize,
}

/// Handle for the finally handler of a try block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FinallyBlock {
    block: ExceptionBlock,
}

impl CatchBlock {
    pub fn block(&self) -> ExceptionBlock {
        self.block
    }
}

impl FinallyBlock {
    pub fn block(&self) -> ExceptionBlock {
        self.block
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionPart {
    Try,
    Catch(usize),
    Finally,
}

/// One enclosing region of an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionFrame {
    pub block: usize,
    pub part: RegionPart,
}

pub type RegionPath = Vec<RegionFrame>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    InTry,
    InCatch(usize),
    InFinally,
    /// Between handlers: the body or the last handler has been closed.
    Handled,
    Closed,
}

#[derive(Debug, Clone)]
struct BlockInfo {
    begin: usize,
    end_label: Label,
    state: BlockState,
    catches: usize,
    has_finally: bool,
}

#[derive(Debug, Clone)]
pub struct RegionTracker {
    owner: u64,
    blocks: Vec<BlockInfo>,
    open: Vec<usize>,
}

impl RegionTracker {
    pub fn new(owner: u64) -> Self {
        Self {
            owner,
            blocks: Vec::new(),
            open: Vec::new(),
        }
    }

    /// Region path at the current position.
    pub fn path(&self) -> RegionPath {
        self.open
            .iter()
            .filter_map(|&index| {
                let part = match self.blocks[index].state {
                    BlockState::InTry => RegionPart::Try,
                    BlockState::InCatch(i) => RegionPart::Catch(i),
                    BlockState::InFinally => RegionPart::Finally,
                    BlockState::Handled | BlockState::Closed => return None,
                };
                Some(RegionFrame { block: index, part })
            })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.open.is_empty()
    }

    pub fn in_catch(&self) -> bool {
        self.path()
            .iter()
            .any(|f| matches!(f.part, RegionPart::Catch(_)))
    }

    pub fn in_finally(&self) -> bool {
        self.path().iter().any(|f| f.part == RegionPart::Finally)
    }

    /// Label control reaches when the block is left.
    pub fn end_label(&self, block: ExceptionBlock) -> Option<Label> {
        self.blocks.get(block.index).map(|b| b.end_label)
    }

    pub fn begin_try(&mut self, at: usize, end_label: Label) -> ExceptionBlock {
        let index = self.blocks.len();
        self.blocks.push(BlockInfo {
            begin: at,
            end_label,
            state: BlockState::InTry,
            catches: 0,
            has_finally: false,
        });
        self.open.push(index);
        ExceptionBlock {
            owner: self.owner,
            index,
        }
    }

    pub fn begin_catch(
        &mut self,
        block: ExceptionBlock,
        at: usize,
    ) -> Result<CatchBlock, VerifyError> {
        let info = self.innermost(block, at)?;
        if info.has_finally {
            return Err(VerifyError::region(
                at,
                "a catch cannot follow the finally of the same try",
            ));
        }
        match info.state {
            BlockState::InTry | BlockState::Handled => {}
            other => return Err(VerifyError::region(at, close_first(other))),
        }
        let index = info.catches;
        info.catches += 1;
        info.state = BlockState::InCatch(index);
        Ok(CatchBlock { block, index })
    }

    pub fn end_catch(&mut self, catch: CatchBlock, at: usize) -> Result<(), VerifyError> {
        let info = self.innermost(catch.block, at)?;
        if info.state != BlockState::InCatch(catch.index) {
            return Err(VerifyError::region(at, "this catch block is not open"));
        }
        info.state = BlockState::Handled;
        Ok(())
    }

    pub fn begin_finally(
        &mut self,
        block: ExceptionBlock,
        at: usize,
    ) -> Result<FinallyBlock, VerifyError> {
        let info = self.innermost(block, at)?;
        if info.has_finally {
            return Err(VerifyError::region(at, "this try already has a finally block"));
        }
        match info.state {
            BlockState::InTry | BlockState::Handled => {}
            other => return Err(VerifyError::region(at, close_first(other))),
        }
        info.has_finally = true;
        info.state = BlockState::InFinally;
        Ok(FinallyBlock { block })
    }

    pub fn end_finally(&mut self, finally: FinallyBlock, at: usize) -> Result<(), VerifyError> {
        let info = self.innermost(finally.block, at)?;
        if info.state != BlockState::InFinally {
            return Err(VerifyError::region(at, "this finally block is not open"));
        }
        info.state = BlockState::Handled;
        Ok(())
    }

    /// Close `block`, returning the label to mark after it.
    pub fn end_try(&mut self, block: ExceptionBlock, at: usize) -> Result<Label, VerifyError> {
        let info = self.innermost(block, at)?;
        match info.state {
            BlockState::Handled => {}
            BlockState::InTry => {
                return Err(VerifyError::region(
                    at,
                    "a try needs a catch or finally before it can be closed",
                ))
            }
            other => return Err(VerifyError::region(at, close_first(other))),
        }
        info.state = BlockState::Closed;
        let end_label = info.end_label;
        self.open.pop();
        Ok(end_label)
    }

    /// Every try must be closed before the method is finished.
    pub fn check_all_closed(&self, at: usize) -> Result<(), VerifyError> {
        match self.open.last() {
            Some(&index) => Err(VerifyError::region(
                at,
                format!(
                    "try block opened at instruction {} was never closed",
                    self.blocks[index].begin
                ),
            )),
            None => Ok(()),
        }
    }

    /// Check a transfer from `origin` to `target`. `leave` may exit
    /// enclosing regions; other branches must stay in the same one.
    pub fn check_transfer(
        origin: &[RegionFrame],
        target: &[RegionFrame],
        leave: bool,
        at: usize,
    ) -> Result<(), VerifyError> {
        let common = origin
            .iter()
            .zip(target)
            .take_while(|(a, b)| a == b)
            .count();
        let entered = &target[common..];
        let exited = &origin[common..];

        if entered.iter().any(|f| f.part == RegionPart::Finally) {
            return Err(VerifyError::region(at, "cannot branch into a finally block"));
        }
        if !entered.is_empty() {
            return Err(VerifyError::region(
                at,
                "cannot branch into a protected region from outside it",
            ));
        }
        if exited.is_empty() {
            return Ok(());
        }
        if !leave {
            return Err(VerifyError::region(
                at,
                "cannot branch out of a protected region; exit the block first with leave",
            ));
        }
        if exited.iter().any(|f| f.part == RegionPart::Finally) {
            return Err(VerifyError::region(
                at,
                "cannot leave a finally block; use endfinally",
            ));
        }
        Ok(())
    }

    fn innermost(
        &mut self,
        block: ExceptionBlock,
        at: usize,
    ) -> Result<&mut BlockInfo, VerifyError> {
        if block.owner != self.owner || block.index >= self.blocks.len() {
            return Err(VerifyError::region(
                at,
                "exception block belongs to a different method builder",
            ));
        }
        match self.open.last() {
            Some(&index) if index == block.index => Ok(&mut self.blocks[index]),
            _ if self.open.contains(&block.index) => {
                Err(VerifyError::region(at, "a nested try block is still open"))
            }
            _ => Err(VerifyError::region(at, "this try block is not open")),
        }
    }
}

fn close_first(state: BlockState) -> &'static str {
    match state {
        BlockState::InCatch(_) => "close the open catch block first",
        BlockState::InFinally => "close the open finally block first",
        _ => "this try block is not open",
    }
}
