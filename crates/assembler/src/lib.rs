//! cilcheck assembler: the text listing format for one method body.
//!
//! A listing declares the types the body refers to, one `.method` header,
//! and the body itself, one item per line:
//!
//! ```text
//! .class Animal
//! .class Dog extends Animal
//! .method static int32 Clamp(int32)
//! .local result int32
//!     ldarg 0
//!     ldc.i4 100
//!     ble keep
//!     ldc.i4 100
//!     br done
//! keep:
//!     ldarg 0
//! done:
//!     ret
//! ```
//!
//! Try regions use `.try`, `.catch <type>`, `.catchall`, `.endcatch`,
//! `.finally`, `.endfinally` and `.endtry`. Comments start with `;`.
//!
//! # Usage
//!
//! ```
//! use cilcheck_assembler::parse;
//!
//! let listing = parse(".method static int32 One()\nldc.i4 1\nret\n").unwrap();
//! assert_eq!(listing.method.name, "One");
//! assert_eq!(listing.instruction_count(), 2);
//! ```
//!
//! Parsing is purely syntactic. Whether the body is well formed is the
//! verifier's job.

pub mod error;
pub mod listing;

mod lexer;
mod parser;

pub use error::AsmError;
pub use listing::{BranchOp, Instr, Item, Line, Listing, LocalOp, MethodHeader, TypeDecl, Unresolved};

use lexer::tokenize_line;
use parser::{parse_line, Parsed};

/// Parse listing text.
///
/// Returns the first error encountered. Fix one error at a time.
pub fn parse(text: &str) -> Result<Listing, AsmError> {
    let mut types = Vec::new();
    let mut method: Option<MethodHeader> = None;
    let mut body = Vec::new();

    for (idx, text_line) in text.lines().enumerate() {
        let line = idx + 1;
        let tokens = tokenize_line(text_line, line)?;
        match parse_line(&tokens, line)? {
            None => {}
            Some(Parsed::Decl(decl)) => types.push(decl),
            Some(Parsed::Method(header)) => {
                if let Some(first) = &method {
                    return Err(AsmError::DuplicateMethod {
                        line,
                        first: first.line,
                    });
                }
                method = Some(header);
            }
            Some(Parsed::Body(items)) => {
                if method.is_none() {
                    return Err(AsmError::OutsideMethod { line });
                }
                body.extend(items.into_iter().map(|item| Line { line, item }));
            }
        }
    }

    let method = method.ok_or(AsmError::MissingMethod)?;
    Ok(Listing {
        types,
        method,
        body,
    })
}
