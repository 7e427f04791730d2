//! cilcheck CLI: verify method listings before they are emitted.
//!
//! Exit codes:
//! - 0: Success
//! - 1: Usage, input or listing error
//! - 2: Verification failure

mod commands;

use std::process;

use tracing_subscriber::{prelude::*, EnvFilter};

fn main() {
    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let verbosity = take_verbosity(&mut args);
    init_logging(verbosity);

    let Some(command) = args.first().cloned() else {
        print_usage();
        process::exit(1);
    };

    let rest = &args[1..];
    let result = match command.as_str() {
        "verify" => commands::verify(rest),
        "explain" => commands::explain(rest),
        "shapes" => commands::shapes(rest),
        "--help" | "-h" | "help" => {
            print_usage();
            process::exit(0);
        }
        other => {
            eprintln!("error: unknown command '{other}'");
            eprintln!();
            print_usage();
            process::exit(1);
        }
    };

    if let Err(code) = result {
        process::exit(code);
    }
}

/// Remove every `-v`/`-vv`/`--verbose` flag and count the levels.
fn take_verbosity(args: &mut Vec<String>) -> usize {
    let mut level = 0;
    args.retain(|arg| match arg.as_str() {
        "--verbose" => {
            level += 1;
            false
        }
        a if a.len() > 1 && a.starts_with('-') && a[1..].chars().all(|c| c == 'v') => {
            level += a.len() - 1;
            false
        }
        _ => true,
    });
    level
}

/// Log to stderr. `CILCHECK_LOG` takes precedence over `-v`.
fn init_logging(verbosity: usize) {
    let default = match verbosity {
        0 => "warn",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_env("CILCHECK_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);
    tracing_subscriber::registry().with(layer).with(filter).init();
}

fn print_usage() {
    eprintln!("Usage: cilcheck [-v|-vv] <command> <listing> [--deferred]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  verify <listing>    Verify a method listing");
    eprintln!("  explain <listing>   Verify and print the annotated stack trace on failure");
    eprintln!("  shapes <listing>    Print the stack shape at every label");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --deferred          Check stacks once at the end instead of per instruction");
    eprintln!("  -v, -vv             Debug or trace logging (or set CILCHECK_LOG)");
}
