//! Library half of the `cilcheck` command: turning a listing into
//! [`MethodBuilder`](cilcheck_verifier::MethodBuilder) calls.

pub mod driver;

pub use driver::{drive, DriveError};
