//! Replays a parsed listing through a [`MethodBuilder`].
//!
//! Every label name in the listing is defined up front, so branches may
//! name labels marked further down. Errors are mapped back to the listing
//! line that produced the failing instruction.

use std::collections::HashMap;

use cilcheck_assembler::{Item, Line, Listing, Unresolved};
use cilcheck_common::{Label, Local};
use cilcheck_verifier::{
    CatchBlock, ExceptionBlock, FinallyBlock, MethodBuilder, VerifiedMethod, VerifierOptions,
    VerifyError,
};
use thiserror::Error;
use tracing::debug;

/// Why a listing could not be turned into a verified method.
#[derive(Debug, Error)]
pub enum DriveError {
    /// The listing is inconsistent on its own terms (undeclared local,
    /// unbalanced region directives).
    #[error("line {line}: {message}")]
    Input { line: usize, message: String },

    /// The verifier rejected the body.
    #[error("{location}: {error}")]
    Verify {
        location: String,
        line: Option<usize>,
        error: VerifyError,
        /// Annotated instruction listing for the failure.
        report: String,
    },
}

impl DriveError {
    /// Process exit code: 1 for input errors, 2 for verification failures.
    pub fn exit_code(&self) -> i32 {
        match self {
            DriveError::Input { .. } => 1,
            DriveError::Verify { .. } => 2,
        }
    }
}

/// Build and verify the method a listing describes.
pub fn drive(listing: &Listing, options: VerifierOptions) -> Result<VerifiedMethod, DriveError> {
    let mut driver = Driver::new(listing, options)?;
    for line in &listing.body {
        driver.step(line)?;
    }
    driver.finish()
}

struct OpenRegion {
    block: ExceptionBlock,
    catch: Option<CatchBlock>,
    finally: Option<FinallyBlock>,
}

struct Driver<'a> {
    listing: &'a Listing,
    builder: MethodBuilder,
    labels: HashMap<&'a str, Label>,
    locals: HashMap<&'a str, Local>,
    slots: Vec<Local>,
    regions: Vec<OpenRegion>,
    /// (first instruction index, source line) per body item, in order.
    starts: Vec<(usize, usize)>,
}

impl<'a> Driver<'a> {
    fn new(listing: &'a Listing, options: VerifierOptions) -> Result<Self, DriveError> {
        let builder = MethodBuilder::with_options(
            listing.method.signature.clone(),
            listing.registry(),
            options,
        );
        let mut driver = Self {
            listing,
            builder,
            labels: HashMap::new(),
            locals: HashMap::new(),
            slots: Vec::new(),
            regions: Vec::new(),
            starts: Vec::new(),
        };
        for name in listing.label_names() {
            let label = driver
                .builder
                .define_label(Some(name))
                .map_err(|e| driver.verify_error(e, Some(listing.method.line)))?;
            driver.labels.insert(name, label);
        }
        debug!(
            method = %listing.method.name,
            labels = driver.labels.len(),
            "driving listing"
        );
        Ok(driver)
    }

    fn step(&mut self, line: &'a Line) -> Result<(), DriveError> {
        self.starts.push((self.builder.tracker().len(), line.line));
        let result = match &line.item {
            Item::Local { name, ty } => self
                .builder
                .declare_local(ty.clone(), Some(name.as_str()))
                .map(|local| {
                    self.locals.insert(name, local);
                    self.slots.push(local);
                }),
            Item::Mark(name) => match self.labels.get(name.as_str()) {
                Some(&label) => self.builder.mark_label(label),
                None => return Err(input(line.line, format!("undefined label '{name}'"))),
            },
            Item::Instr(instr) => {
                let op = instr
                    .resolve(
                        |name| self.labels.get(name).copied(),
                        |name| {
                            self.locals.get(name).copied().or_else(|| {
                                name.parse::<usize>().ok().and_then(|i| self.slots.get(i).copied())
                            })
                        },
                    )
                    .map_err(|missing| match missing {
                        Unresolved::Local(name) => input(line.line, format!("undeclared local '{name}'")),
                        Unresolved::Label(name) => input(line.line, format!("undefined label '{name}'")),
                    })?;
                self.builder.emit(op)
            }
            Item::Try => self.builder.begin_try().map(|block| {
                self.regions.push(OpenRegion {
                    block,
                    catch: None,
                    finally: None,
                });
            }),
            Item::Catch(_) | Item::CatchAll => {
                let Some(region) = self.regions.last_mut() else {
                    return Err(input(line.line, "handler outside any .try".to_string()));
                };
                if region.catch.is_some() {
                    return Err(input(
                        line.line,
                        "previous .catch is not closed with .endcatch".to_string(),
                    ));
                }
                let opened = match &line.item {
                    Item::Catch(ty) => self.builder.begin_catch(region.block, ty.clone()),
                    _ => self.builder.begin_catch_all(region.block),
                };
                opened.map(|catch| region.catch = Some(catch))
            }
            Item::EndCatch => {
                let catch = self.regions.last_mut().and_then(|r| r.catch.take());
                let Some(catch) = catch else {
                    return Err(input(line.line, ".endcatch without an open .catch".to_string()));
                };
                self.builder.end_catch(catch)
            }
            Item::Finally => {
                let Some(region) = self.regions.last_mut() else {
                    return Err(input(line.line, ".finally outside any .try".to_string()));
                };
                self.builder
                    .begin_finally(region.block)
                    .map(|finally| region.finally = Some(finally))
            }
            Item::EndFinally => {
                let finally = self.regions.last_mut().and_then(|r| r.finally.take());
                let Some(finally) = finally else {
                    return Err(input(line.line, ".endfinally without an open .finally".to_string()));
                };
                self.builder.end_finally(finally)
            }
            Item::EndTry => {
                let Some(region) = self.regions.pop() else {
                    return Err(input(line.line, ".endtry without an open .try".to_string()));
                };
                self.builder.end_try(region.block)
            }
        };
        result.map_err(|e| self.verify_error(e, Some(line.line)))
    }

    fn finish(mut self) -> Result<VerifiedMethod, DriveError> {
        self.builder
            .finalize()
            .map_err(|e| self.verify_error(e, None))
    }

    /// Attach a location and report to `error`. `current` is the line being
    /// processed, used when the error names no instruction.
    fn verify_error(&self, error: VerifyError, current: Option<usize>) -> DriveError {
        let line = error.at().and_then(|at| self.line_of(at)).or(current);
        let location = match line {
            Some(line) => format!("line {line}"),
            None => format!("method {}", self.listing.method.name),
        };
        DriveError::Verify {
            location,
            line,
            report: self.builder.diagnose(&error),
            error,
        }
    }

    fn line_of(&self, at: usize) -> Option<usize> {
        self.starts
            .iter()
            .rev()
            .find(|(start, _)| *start <= at)
            .map(|&(_, line)| line)
    }
}

fn input(line: usize, message: String) -> DriveError {
    DriveError::Input { line, message }
}
