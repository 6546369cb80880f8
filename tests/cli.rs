//! CLI test cases.
//!
//! Most of these only touch the store, so they don't need poppler. The ones
//! that read a real PDF are ignored by default.

use std::{fs, path::PathBuf, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;
use serde_json::Value;

/// A one-page PDF with "Invoice #42" near the top left.
static TEST_PDF_PATH: &str = "tests/fixtures/invoice.pdf";

/// Create a new `Command` with our binary.
fn cmd() -> Command {
    Command::cargo_bin("region-scribe").unwrap()
}

/// Create a project for `pdf` under `dir`, without reading the PDF.
fn init_project(dir: &tempfile::TempDir, pdf: &str) -> PathBuf {
    let output = cmd()
        .arg("init")
        .arg(pdf)
        .arg("--projects-dir")
        .arg(dir.path())
        .arg("--skip-full-text")
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    PathBuf::from(String::from_utf8(output.stdout).unwrap().trim())
}

fn stdout_json(command: &mut Command) -> Value {
    let output = command.output().unwrap();
    assert!(output.status.success(), "{output:?}");
    serde_json::from_slice(&output.stdout).unwrap()
}

#[test]
fn test_help() {
    cmd().arg("--help").assert().success();
}

#[test]
fn test_version() {
    cmd().arg("--version").assert().success();
}

#[test]
fn test_schema() {
    cmd()
        .arg("schema")
        .assert()
        .success()
        .stdout(predicate::str::contains("rectangles"))
        .stdout(predicate::str::contains("eventComplete"));
}

#[test]
fn test_add_list_remove() {
    let dir = tempfile::TempDir::with_prefix("cli").unwrap();
    let project = init_project(&dir, TEST_PDF_PATH);
    assert!(project.join("rectangle_map.json").is_file());
    assert!(project.join("screenshots/thumbnails").is_dir());

    let added = stdout_json(
        cmd()
            .arg("add")
            .arg(&project)
            .args(["--page", "0", "--rect", "110,70,10,20"])
            .args(["--description", "total", "--keyword", "money"]),
    );
    assert_eq!(added["id"], 1);
    assert_eq!(added["rect"], serde_json::json!([10.0, 20.0, 110.0, 70.0]));
    assert_eq!(added["dimensions"]["width"], 100.0);
    assert_eq!(added["eventComplete"], false);

    let second = stdout_json(
        cmd()
            .arg("add")
            .arg(&project)
            .args(["--page", "1", "--rect", "0,0,5,5"]),
    );
    assert_eq!(second["id"], 2);

    let listed = stdout_json(cmd().arg("list").arg(&project));
    assert_eq!(listed.as_array().map(Vec::len), Some(2));
    assert_eq!(listed[0]["keywords"], serde_json::json!(["money"]));

    cmd()
        .arg("remove")
        .arg(&project)
        .args(["--id", "2", "--page", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no rectangle with id 2 on page 0"));
    let removed = stdout_json(
        cmd()
            .arg("remove")
            .arg(&project)
            .args(["--id", "2", "--page", "1"]),
    );
    assert_eq!(removed[0]["id"], 2);

    // IDs are never reused.
    let third = stdout_json(
        cmd()
            .arg("add")
            .arg(&project)
            .args(["--page", "0", "--rect", "0,0,5,5"]),
    );
    assert_eq!(third["id"], 3);
}

#[test]
fn test_add_rejects_empty_rectangles() {
    let dir = tempfile::TempDir::with_prefix("cli").unwrap();
    let project = init_project(&dir, TEST_PDF_PATH);
    cmd()
        .arg("add")
        .arg(&project)
        .args(["--page", "0", "--rect", "5,5,5,10"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid rectangle"));
}

#[test]
fn test_requeue_failed() {
    let dir = tempfile::TempDir::with_prefix("cli").unwrap();
    let project = init_project(&dir, TEST_PDF_PATH);
    cmd()
        .arg("add")
        .arg(&project)
        .args(["--page", "0", "--rect", "0,0,5,5"])
        .assert()
        .success();

    let store_path = project.join("rectangle_map.json");
    let mut store: Value = serde_json::from_str(&fs::read_to_string(&store_path).unwrap()).unwrap();
    store["rectangles"][0]["eventComplete"] = Value::Bool(true);
    store["rectangles"][0]["extraction_status"] = Value::from("failed");
    store["rectangles"][0]["extraction_error"] = Value::from("simple_text: declined");
    fs::write(&store_path, serde_json::to_string_pretty(&store).unwrap()).unwrap();

    let requeued = stdout_json(cmd().arg("requeue").arg(&project));
    assert_eq!(requeued, serde_json::json!([1]));
    let listed = stdout_json(cmd().arg("list").arg(&project));
    assert_eq!(listed[0]["eventComplete"], false);
    assert!(listed[0].get("extraction_status").is_none());
    assert!(listed[0].get("extraction_error").is_none());

    let requeued = stdout_json(cmd().arg("requeue").arg(&project));
    assert_eq!(requeued, serde_json::json!([]));
}

#[test]
fn test_list_refuses_corrupt_stores() {
    let dir = tempfile::TempDir::with_prefix("cli").unwrap();
    let project = init_project(&dir, TEST_PDF_PATH);
    cmd()
        .arg("add")
        .arg(&project)
        .args(["--page", "0", "--rect", "0,0,5,5"])
        .assert()
        .success();
    fs::write(project.join("rectangle_map.json"), "{\"pdf_path\": \"x\", \"rect").unwrap();
    cmd()
        .arg("list")
        .arg(&project)
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupt"));
}

#[test]
fn test_export() {
    let dir = tempfile::TempDir::with_prefix("cli").unwrap();
    let project = init_project(&dir, TEST_PDF_PATH);
    let dest = dir.path().join("exported");
    let output = cmd()
        .arg("export")
        .arg(&project)
        .arg(&dest)
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let exported = PathBuf::from(String::from_utf8(output.stdout).unwrap().trim());
    assert!(exported.join("invoice.pdf").is_file());
    assert!(exported.join("rectangle_map.json").is_file());
}

#[test]
#[ignore = "Requires poppler-utils to be installed"]
fn test_process_pending_extracts_text() {
    let dir = tempfile::TempDir::with_prefix("cli").unwrap();
    let output = cmd()
        .arg("init")
        .arg(TEST_PDF_PATH)
        .arg("--projects-dir")
        .arg(dir.path())
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");
    let project = PathBuf::from(String::from_utf8(output.stdout).unwrap().trim());
    let full_text = fs::read_to_string(project.join("pdf_content.txt")).unwrap();
    assert!(full_text.contains("Invoice #42"));

    cmd()
        .arg("add")
        .arg(&project)
        .args(["--page", "0", "--rect", "0,0,300,100"])
        .assert()
        .success();
    cmd()
        .arg("process-pending")
        .arg(&project)
        .assert()
        .success();

    let listed = stdout_json(cmd().arg("list").arg(&project));
    assert_eq!(listed[0]["extraction_status"], "completed");
    assert_eq!(listed[0]["extracted_text"], "Invoice #42");
    assert_eq!(listed[0]["extraction_source"], "pdf_text");
    assert_eq!(listed[0]["extraction_metadata"]["strategy"], "simple_text");
}
