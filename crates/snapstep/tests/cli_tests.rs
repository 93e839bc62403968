use std::{fs, process::Command as StdCommand};

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use tracing::{info, warn};

const ADD_PROGRAM: &str = r#"public class Add {
    public static void main(String[] args) {
        int x = 2 + 3;
        System.out.println(x);
    }
}
"#;

const OUTER_PROGRAM: &str = r#"interface Consts {
    int LIMIT = 10;
}

public class Outer implements Consts {
    static int counter = 0;

    class Inner {
        int v = 1;
    }

    public static void main(String[] args) {
        Outer outer = new Outer();
        Inner inner = outer.new Inner();
        assert inner.v == 1;
        counter = inner.v + LIMIT;
    }
}
"#;

fn snapstep() -> Command {
    let mut cmd = Command::cargo_bin("snapstep").unwrap();
    cmd.env_remove("SNAPSTEP_MAX_STEPS")
        .env_remove("SNAPSTEP_EVENT_TIMEOUT")
        .env_remove("SNAPSTEP_JAVA")
        .env_remove("SNAPSTEP_JAVAC");
    cmd
}

fn records(stdout: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

fn jdk_available() -> bool {
    let has = |tool: &str| StdCommand::new(tool).arg("-version").output().is_ok();
    has("javac") && has("java")
}

#[test]
fn test_help_command() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Testing CLI help command");

    snapstep()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Step-by-step program state recorder"))
        .stdout(predicate::str::contains("--max-steps"));
}

#[test]
fn test_version_command() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");
    snapstep().arg("--version").assert().success().stdout(predicate::str::contains("snapstep"));
}

#[test]
fn test_missing_source_argument() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");
    snapstep().assert().failure().stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_invalid_capture_mode() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");
    snapstep().args(["--capture-mode", "sometimes", "Main.java"]).assert().failure();
}

#[test]
fn test_missing_source_file_is_reported() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    let output = snapstep().arg("/nonexistent/snapstep/Main.java").output().unwrap();
    assert!(!output.status.success());
    let records = records(&output.stdout);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["type"], "error");
    assert!(records[0]["message"].as_str().unwrap().contains("Source file not found"));
}

#[test]
fn test_missing_compiler_is_reported() {
    snapstep_utils::logging::ensure_test_logging(None);
    info!("Running test");

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Add.java");
    fs::write(&source, ADD_PROGRAM).unwrap();

    let output = snapstep()
        .arg("--javac")
        .arg(dir.path().join("no-such-javac"))
        .arg(&source)
        .output()
        .unwrap();
    assert!(!output.status.success());
    let records = records(&output.stdout);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["type"], "error");
}

#[test]
fn test_compile_error_is_reported() {
    snapstep_utils::logging::ensure_test_logging(None);
    if !jdk_available() {
        warn!("Skipping test, no JDK on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Broken.java");
    fs::write(&source, "public class Broken { void f() { int x = ; } }\n").unwrap();

    let output = snapstep().arg(&source).output().unwrap();
    assert!(!output.status.success());
    let records = records(&output.stdout);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["type"], "compile_error");
    assert!(records[0]["message"].as_str().unwrap().contains("Broken.java"));
}

#[test]
fn test_records_small_program() {
    snapstep_utils::logging::ensure_test_logging(None);
    if !jdk_available() {
        warn!("Skipping test, no JDK on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Add.java");
    fs::write(&source, ADD_PROGRAM).unwrap();

    let output = snapstep().arg(&source).output().unwrap();
    assert!(output.status.success());
    let records = records(&output.stdout);

    assert_eq!(records.first().map(|r| r["type"].clone()), Some("start".into()));
    assert_eq!(records[0]["className"], "Add");
    assert_eq!(records.last().map(|r| r["type"].clone()), Some("end".into()));

    let frames: Vec<_> = records.iter().filter(|r| r["type"] == "frame").collect();
    assert!(frames.len() >= 2);
    for (i, frame) in frames.iter().enumerate() {
        assert_eq!(frame["step"], i as u64 + 1);
        assert_eq!(frame["className"], "Add");
        assert_eq!(frame["callStack"][0]["methodName"], "main");
    }
    assert!(frames.iter().any(|f| f["variables"]["x"]["value"] == "5"));

    let printed: String = records
        .iter()
        .filter_map(|r| match r["type"].as_str() {
            Some("stdout") => r["output"].as_str().map(str::to_string),
            Some("frame") => r["stdout"].as_str().map(str::to_string),
            _ => None,
        })
        .collect();
    assert!(printed.contains('5'));
    assert!(!records.iter().any(|r| r["type"] == "error"));
}

#[test]
fn test_records_inherited_and_synthetic_fields() {
    snapstep_utils::logging::ensure_test_logging(None);
    if !jdk_available() {
        warn!("Skipping test, no JDK on PATH");
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("Outer.java");
    fs::write(&source, OUTER_PROGRAM).unwrap();

    let output = snapstep().arg(&source).output().unwrap();
    assert!(output.status.success());
    let records = records(&output.stdout);
    let last = records.iter().filter(|r| r["type"] == "frame").last().unwrap();

    let statics = last["statics"].as_object().unwrap();
    for name in ["counter", "$assertionsDisabled", "LIMIT"] {
        assert!(statics.contains_key(name), "missing static {name}");
    }
    assert_eq!(statics["LIMIT"]["value"], "10");

    let inner_id = last["variables"]["inner"]["id"].as_str().unwrap();
    let inner = &last["heap"][inner_id];
    assert_eq!(inner["type"], "Outer$Inner");
    assert_eq!(inner["fields"]["v"], "1");
    assert!(inner["fields"]["this$0"].as_str().unwrap().starts_with('@'));
}
