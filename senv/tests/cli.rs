// Copyright (c) The senv Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end tests against the built `senv` binary.
//!
//! Each test works in a fresh temp directory with its own `senv.toml`, and
//! only uses host-only sessions so no Python tooling is required on the
//! test machine.

use camino_tempfile::Utf8TempDir;
use indoc::indoc;
use pretty_assertions::assert_eq;
use senv_metadata::{ListEntrySummary, ReportSummary, RunResultSummary, SenvExitCode};
use std::process::{Command, Output};

fn workspace(config: &str) -> Utf8TempDir {
    let dir = camino_tempfile::tempdir().expect("tempdir");
    fs_err::write(dir.path().join("senv.toml"), config).expect("write senv.toml");
    dir
}

fn senv(dir: &Utf8TempDir, args: &[&str]) -> Output {
    let mut command = Command::new(env!("CARGO_BIN_EXE_senv"));
    command.args(args).current_dir(dir.path());
    // Keep ambient configuration from leaking into the tests.
    for (key, _) in std::env::vars() {
        if key.starts_with("SENV_") {
            command.env_remove(&key);
        }
    }
    command.output().expect("senv runs")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[cfg(unix)]
#[test]
fn single_session_success_exits_zero() {
    let dir = workspace(indoc! {r#"
        [[session]]
        name = "t"
        python = false
        [[session.steps]]
        run = ["echo", "ok"]
        silent = true
    "#});
    let output = senv(&dir, &["--report", "report.json"]);
    assert_eq!(
        output.status.code(),
        Some(SenvExitCode::OK),
        "stderr: {}",
        stderr(&output)
    );

    let report = fs_err::read_to_string(dir.path().join("report.json")).expect("report written");
    let report = ReportSummary::parse_json(&report).expect("report parses");
    assert_eq!(report.result, RunResultSummary::Success);
    assert_eq!(report.sessions.len(), 1);
    assert_eq!(report.sessions[0].name, "t");
}

#[cfg(unix)]
#[test]
fn failing_session_exits_one() {
    let dir = workspace(indoc! {r#"
        [[session]]
        name = "t"
        python = false
        [[session.steps]]
        run = ["sh", "-c", "exit 9"]
        silent = true
    "#});
    let output = senv(&dir, &[]);
    assert_eq!(output.status.code(), Some(SenvExitCode::RUN_FAILED));
    assert!(stderr(&output).contains("FAIL"), "{}", stderr(&output));
}

#[test]
fn list_json_round_trips_instances() {
    let dir = workspace(indoc! {r#"
        [[session]]
        name = "tests"
        [[session.parametrize]]
        arg = "d"
        values = ["1", "2"]
        ids = ["old", "new"]
    "#});
    let output = senv(&dir, &["--list", "--json"]);
    assert_eq!(
        output.status.code(),
        Some(SenvExitCode::OK),
        "stderr: {}",
        stderr(&output)
    );
    let entries = ListEntrySummary::parse_json_list(stdout(&output)).expect("json parses");
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["tests(old)", "tests(new)"]);
    assert_eq!(entries[0].call_spec["d"], serde_json::json!("1"));
    assert_eq!(entries[1].call_spec["d"], serde_json::json!("2"));
}

#[test]
fn missing_config_exits_three() {
    let dir = camino_tempfile::tempdir().expect("tempdir");
    let output = senv(&dir, &[]);
    assert_eq!(output.status.code(), Some(SenvExitCode::CONFIG_LOAD_FAILED));
    assert!(
        stderr(&output).contains("senv.toml"),
        "{}",
        stderr(&output)
    );
}

#[test]
fn unsatisfied_needs_version_exits_three() {
    let dir = workspace(indoc! {r#"
        needs-version = ">=999.0"

        [[session]]
        name = "t"
        python = false
    "#});
    let output = senv(&dir, &[]);
    assert_eq!(output.status.code(), Some(SenvExitCode::CONFIG_LOAD_FAILED));
}

#[test]
fn unknown_flag_exits_two() {
    let dir = workspace("");
    let output = senv(&dir, &["--definitely-not-a-flag"]);
    assert_eq!(output.status.code(), Some(SenvExitCode::ARGUMENT_ERROR));
}

#[test]
fn unknown_session_selection_fails() {
    let dir = workspace(indoc! {r#"
        [[session]]
        name = "t"
        python = false
    "#});
    let output = senv(&dir, &["-s", "nope"]);
    assert_eq!(output.status.code(), Some(SenvExitCode::RUN_FAILED));
    assert!(stderr(&output).contains("nope"), "{}", stderr(&output));
}

#[test]
fn empty_selection_lists_and_exits_zero() {
    let dir = workspace(indoc! {r#"
        [options]
        sessions = []

        [[session]]
        name = "t"
        python = false
    "#});
    let output = senv(&dir, &[]);
    assert_eq!(output.status.code(), Some(SenvExitCode::OK));
    // The listing goes to stderr and nothing runs.
    assert!(stderr(&output).contains("- t"), "{}", stderr(&output));
    assert!(!stderr(&output).contains("START"), "{}", stderr(&output));
}

#[cfg(unix)]
#[test]
fn reuse_with_no_install_skips_second_install() {
    // The install step drops a line into a log file every time it actually
    // runs; `run` steps always run. With -R the second invocation must only
    // log the run step.
    let dir = workspace(indoc! {r#"
        [[session]]
        name = "t"
        python = false
        [[session.steps]]
        run-install = ["sh", "-c", "echo install >> steps.log"]
        silent = true
        [[session.steps]]
        run = ["sh", "-c", "echo run >> steps.log"]
        silent = true
    "#});

    let first = senv(&dir, &["-R"]);
    assert_eq!(
        first.status.code(),
        Some(SenvExitCode::OK),
        "stderr: {}",
        stderr(&first)
    );
    let second = senv(&dir, &["-R"]);
    assert_eq!(second.status.code(), Some(SenvExitCode::OK));

    let log = fs_err::read_to_string(dir.path().join("steps.log")).expect("log written");
    let lines: Vec<&str> = log.lines().collect();
    assert_eq!(lines, ["install", "run", "run"]);
}
