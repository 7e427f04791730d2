//! Integration tests for the cilcheck CLI.
//!
//! These tests invoke the `cilcheck` binary as a subprocess and check
//! exit codes, stdout, and stderr.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[allow(deprecated)]
fn cilcheck() -> Command {
    Command::cargo_bin("cilcheck").unwrap()
}

/// Return the workspace root (parent of cilcheck-cli/).
fn workspace_root() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap()
        .to_path_buf()
}

/// Return the absolute path to a sample listing.
fn listing(name: &str) -> String {
    workspace_root()
        .join("tests/listings")
        .join(name)
        .to_string_lossy()
        .into_owned()
}

/// Write `text` to a temporary listing file.
fn temp_listing(dir: &TempDir, text: &str) -> String {
    let path = dir.path().join("method.cil");
    fs::write(&path, text).unwrap();
    path.to_string_lossy().into_owned()
}

// ---- No-args / help ----

#[test]
fn no_args_prints_usage_and_exits_1() {
    cilcheck()
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Usage: cilcheck"));
}

#[test]
fn help_flag_exits_0() {
    cilcheck()
        .arg("--help")
        .assert()
        .success()
        .stderr(predicate::str::contains("Commands:"));
}

#[test]
fn unknown_command_exits_1() {
    cilcheck()
        .arg("frobnicate")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown command"));
}

// ---- Verify ----

#[test]
fn verify_loop_listing() {
    cilcheck()
        .args(["verify", &listing("sum.cil")])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "(Sum: 18 instructions, max stack 2)",
        ));
}

#[test]
fn verify_guarded_listing() {
    cilcheck()
        .args(["verify", &listing("guarded.cil")])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("OK:"));
}

#[test]
fn verify_deferred_matches_immediate() {
    cilcheck()
        .args(["verify", &listing("sum.cil"), "--deferred"])
        .assert()
        .success()
        .stdout(predicate::str::contains("max stack 2"));
    cilcheck()
        .args(["verify", "--deferred", &listing("mismatch.cil")])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn verify_type_mismatch_exits_2_with_line() {
    cilcheck()
        .args(["verify", &listing("mismatch.cil")])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("line 5: type mismatch"));
}

#[test]
fn verify_region_escape_exits_2() {
    cilcheck()
        .args(["verify", &listing("escape.cil")])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("exit the block first"));
}

#[test]
fn verify_fall_off_end_exits_2() {
    cilcheck()
        .args(["verify", &listing("spin.cil")])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("method Spin"))
        .stderr(predicate::str::contains("top"));
}

#[test]
fn verify_missing_file_exits_1() {
    cilcheck()
        .args(["verify", "/nonexistent/method.cil"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn verify_parse_error_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = temp_listing(&dir, ".method static void M()\n  frobnicate\n");
    cilcheck()
        .args(["verify", &path])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("line 2: unknown operation 'frobnicate'"));
}

#[test]
fn verify_undeclared_local_exits_1() {
    let dir = TempDir::new().unwrap();
    let path = temp_listing(&dir, ".method static void M()\n  ldloc x\n  pop\n  ret\n");
    cilcheck()
        .args(["verify", &path])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("undeclared local 'x'"));
}

#[test]
fn verify_requires_input() {
    cilcheck()
        .arg("verify")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("requires an input file"));
}

#[test]
fn verify_rejects_unknown_option() {
    cilcheck()
        .args(["verify", &listing("sum.cil"), "--fast"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("unknown option '--fast'"));
}

// ---- Explain ----

#[test]
fn explain_marks_failing_instruction() {
    cilcheck()
        .args(["explain", &listing("mismatch.cil")])
        .assert()
        .failure()
        .code(2)
        .stdout(predicate::str::contains(">> 2"))
        .stdout(predicate::str::contains("^^^"))
        .stdout(predicate::str::contains("pushed by instruction 1"));
}

#[test]
fn explain_lists_steps_on_success() {
    cilcheck()
        .args(["explain", &listing("sum.cil")])
        .assert()
        .success()
        .stdout(predicate::str::contains("blt"))
        .stdout(predicate::str::contains("OK:"));
}

// ---- Shapes ----

#[test]
fn shapes_prints_every_label() {
    cilcheck()
        .args(["shapes", &listing("sum.cil")])
        .assert()
        .success()
        .stdout(predicate::str::contains("body"))
        .stdout(predicate::str::contains("test"))
        .stdout(predicate::str::contains("max stack: 2"));
}

#[test]
fn shapes_show_values_carried_across_branches() {
    let dir = TempDir::new().unwrap();
    let path = temp_listing(
        &dir,
        "\
.method static int32 Pick(int32)
    ldc.i4 10
    ldarg 0
    brtrue keep
    pop
    ldc.i4 20
keep:
    ret
",
    );
    cilcheck()
        .args(["shapes", &path])
        .assert()
        .success()
        .stdout(predicate::str::contains("[int32]"));
}

// ---- Logging ----

#[test]
fn verbose_flag_logs_to_stderr() {
    cilcheck()
        .args(["-v", "verify", &listing("sum.cil")])
        .assert()
        .success()
        .stderr(predicate::str::contains("verifying"));
}

#[test]
fn quiet_by_default() {
    cilcheck()
        .args(["verify", &listing("sum.cil")])
        .env_remove("CILCHECK_LOG")
        .assert()
        .success()
        .stderr(predicate::str::is_empty());
}
