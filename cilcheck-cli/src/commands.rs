//! CLI command implementations.

use std::fs;

use cilcheck_assembler::Listing;
use cilcheck_cli::{drive, DriveError};
use cilcheck_verifier::{VerifiedMethod, VerifierOptions};
use tracing::info;

/// Input path and options shared by every command.
struct Invocation {
    input: String,
    options: VerifierOptions,
}

fn parse_args(command: &str, args: &[String]) -> Result<Invocation, i32> {
    let mut input = None;
    let mut options = VerifierOptions::default();
    for arg in args {
        match arg.as_str() {
            "--deferred" => options = options.deferred(true),
            flag if flag.starts_with("--") => {
                eprintln!("error: unknown option '{flag}'");
                return Err(1);
            }
            path if input.is_none() => input = Some(path.to_string()),
            extra => {
                eprintln!("error: unexpected argument '{extra}'");
                return Err(1);
            }
        }
    }
    let Some(input) = input else {
        eprintln!("error: {command} requires an input file");
        eprintln!("Usage: cilcheck {command} <listing> [--deferred]");
        return Err(1);
    };
    Ok(Invocation { input, options })
}

fn read_listing(input: &str) -> Result<Listing, i32> {
    let text = fs::read_to_string(input).map_err(|e| {
        eprintln!("error: cannot read '{input}': {e}");
        1
    })?;
    cilcheck_assembler::parse(&text).map_err(|e| {
        eprintln!("error: {input}: {e}");
        1
    })
}

fn run(inv: &Invocation) -> Result<(Listing, Result<VerifiedMethod, DriveError>), i32> {
    let listing = read_listing(&inv.input)?;
    info!(
        input = %inv.input,
        method = %listing.method.name,
        deferred = inv.options.deferred,
        "verifying"
    );
    let outcome = drive(&listing, inv.options);
    Ok((listing, outcome))
}

fn report_ok(input: &str, listing: &Listing, method: &VerifiedMethod) {
    println!(
        "OK: {input} ({}: {} instructions, max stack {})",
        listing.method.name,
        method.steps.len(),
        method.max_stack
    );
}

fn report_error(input: &str, err: &DriveError) -> i32 {
    eprintln!("error: {input}: {err}");
    err.exit_code()
}

/// Verify a listing; print one line either way.
pub fn verify(args: &[String]) -> Result<(), i32> {
    let inv = parse_args("verify", args)?;
    match run(&inv)? {
        (listing, Ok(method)) => {
            report_ok(&inv.input, &listing, &method);
            Ok(())
        }
        (_, Err(err)) => Err(report_error(&inv.input, &err)),
    }
}

/// Verify a listing; on failure also print the annotated instruction stream.
pub fn explain(args: &[String]) -> Result<(), i32> {
    let inv = parse_args("explain", args)?;
    match run(&inv)? {
        (listing, Ok(method)) => {
            for (at, line) in method.listing.iter().enumerate() {
                println!("{at:>4}  {line}");
            }
            report_ok(&inv.input, &listing, &method);
            Ok(())
        }
        (_, Err(err)) => {
            if let DriveError::Verify { report, .. } = &err {
                print!("{report}");
            }
            Err(report_error(&inv.input, &err))
        }
    }
}

/// Print the reconciled stack shape at every label.
pub fn shapes(args: &[String]) -> Result<(), i32> {
    let inv = parse_args("shapes", args)?;
    match run(&inv)? {
        (_, Ok(method)) => {
            let width = method.label_marks.keys().map(String::len).max().unwrap_or(0);
            for (name, at) in &method.label_marks {
                let shape = method
                    .label_shapes
                    .get(name)
                    .map_or_else(|| "unreachable".to_string(), ToString::to_string);
                println!("{name:<width$}  @{at:<4} {shape}");
            }
            println!("max stack: {}", method.max_stack);
            Ok(())
        }
        (_, Err(err)) => Err(report_error(&inv.input, &err)),
    }
}
