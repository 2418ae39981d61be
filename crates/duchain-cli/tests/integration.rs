//! Integration tests for the duchain CLI
//!
//! These tests run full commands against event streams written to a
//! temporary workspace. HOME points into the workspace so no user
//! configuration is picked up.

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

/// Get a Command for the duchain binary running inside `workspace`
#[allow(deprecated)]
fn duchain(workspace: &Path) -> Command {
    let mut command = Command::cargo_bin("duchain").expect("Failed to find duchain binary");
    command
        .current_dir(workspace)
        .env("HOME", workspace.join("home"))
        .env_remove("RUST_LOG")
        .env_remove("DUCHAIN_WORKSPACE")
        .env_remove("DUCHAIN_CONFIG")
        .env_remove("DUCHAIN_VISIBILITY");
    command
}

const HEADER: &str = r#"[
  {"event": "begin_document", "url": "vec.h",
   "range": {"start": {"line": 0, "column": 0}, "end": {"line": 20, "column": 0}}},
  {"event": "open_context", "kind": "namespace", "scope": "ns",
   "range": {"start": {"line": 1, "column": 0}, "end": {"line": 6, "column": 1}}},
  {"event": "declare", "name": "Vec", "kind": "type",
   "range": {"start": {"line": 2, "column": 6}, "end": {"line": 2, "column": 9}}},
  {"event": "open_context", "kind": "class", "scope": "Vec", "owned": true,
   "range": {"start": {"line": 2, "column": 10}, "end": {"line": 4, "column": 1}}},
  {"event": "declare", "name": "size", "type": "int",
   "range": {"start": {"line": 3, "column": 8}, "end": {"line": 3, "column": 12}}},
  {"event": "close_context"},
  {"event": "close_context"},
  {"event": "end_document"}
]"#;

const SOURCE: &str = r#"[
  {"event": "begin_document", "url": "main.cpp",
   "range": {"start": {"line": 0, "column": 0}, "end": {"line": 20, "column": 0}}},
  {"event": "import", "document": "vec.h"},
  {"event": "use", "name": "ns::Vec::size",
   "range": {"start": {"line": 4, "column": 0}, "end": {"line": 4, "column": 13}}},
  {"event": "use", "name": "missing",
   "range": {"start": {"line": 5, "column": 0}, "end": {"line": 5, "column": 7}}},
  {"event": "end_document"}
]"#;

/// Workspace with the two event files under `events/`
fn setup_workspace() -> TempDir {
    let temp = TempDir::new().expect("Failed to create temp dir");
    let events = temp.path().join("events");
    std::fs::create_dir_all(&events).unwrap();
    std::fs::create_dir_all(temp.path().join("home")).unwrap();
    // main.cpp sorts first; replay order follows imports, not file order
    std::fs::write(events.join("a_main.json"), SOURCE).unwrap();
    std::fs::write(events.join("b_vec.json"), HEADER).unwrap();
    temp
}

// ============================================================================
// Replay Command Integration Tests
// ============================================================================

#[test]
fn test_replay_prints_summary() {
    let workspace = setup_workspace();

    duchain(workspace.path())
        .args(["--quiet", "replay", "events"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Documents:     2"))
        .stdout(predicate::str::contains("Declarations:  2"))
        .stdout(predicate::str::contains("Uses:          2 (1 unresolved)"));
}

#[test]
fn test_replay_dump_and_dot() {
    let workspace = setup_workspace();
    let dot = workspace.path().join("main.dot");

    duchain(workspace.path())
        .args(["--quiet", "replay", "events", "--dump", "--dot"])
        .arg(&dot)
        .assert()
        .success()
        .stdout(predicate::str::contains("top vec.h [registered]"))
        .stdout(predicate::str::contains("top main.cpp [registered]"))
        .stdout(predicate::str::contains("-> <unresolved>"));

    let rendered = std::fs::read_to_string(&dot).unwrap();
    assert!(rendered.starts_with("digraph {"));
    assert!(rendered.contains("vec.h"));
}

#[test]
fn test_replay_watch_counts_notifications() {
    let workspace = setup_workspace();

    duchain(workspace.path())
        .args(["--quiet", "replay", "events", "--watch"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Notifications"))
        .stdout(predicate::str::contains("Addition Registration"))
        .stdout(predicate::str::contains("dropped"));
}

#[test]
fn test_replay_of_missing_path_fails() {
    let workspace = setup_workspace();

    duchain(workspace.path())
        .args(["replay", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No such file or directory"));
}

#[test]
fn test_replay_reports_malformed_stream() {
    let workspace = setup_workspace();
    std::fs::write(workspace.path().join("broken.json"), r#"[{"event": "explode"}]"#).unwrap();

    duchain(workspace.path())
        .args(["replay", "broken.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("broken.json"));
}

#[test]
fn test_replay_failure_is_reported() {
    let workspace = setup_workspace();
    std::fs::write(
        workspace.path().join("unbalanced.json"),
        r#"[
  {"event": "begin_document", "url": "unbalanced.cpp",
   "range": {"start": {"line": 0, "column": 0}, "end": {"line": 5, "column": 0}}},
  {"event": "close_context"},
  {"event": "end_document"}
]"#,
    )
    .unwrap();

    duchain(workspace.path())
        .args(["replay", "unbalanced.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Replay failed"))
        .stderr(predicate::str::contains("cannot close the root context"));
}

// ============================================================================
// Query Command Integration Tests
// ============================================================================

#[test]
fn test_query_finds_declaration_and_uses() {
    let workspace = setup_workspace();

    duchain(workspace.path())
        .args([
            "--quiet",
            "query",
            "events",
            "--document",
            "vec.h",
            "--name",
            "ns::Vec::size",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("ns::Vec::size : int"))
        .stdout(predicate::str::contains("used in    main.cpp: [4:0, 4:13)"));
}

#[test]
fn test_query_json_output() {
    let workspace = setup_workspace();

    let output = duchain(workspace.path())
        .args([
            "--quiet", "query", "events", "-d", "main.cpp", "-n", "ns::Vec", "--json",
        ])
        .output()
        .unwrap();
    assert!(output.status.success());

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let reports = reports.as_array().unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0]["name"], "ns::Vec");
    assert_eq!(reports[0]["document"], "vec.h");
}

#[test]
fn test_query_unknown_document_fails() {
    let workspace = setup_workspace();

    duchain(workspace.path())
        .args(["--quiet", "query", "events", "-d", "other.cpp", "-n", "x"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not in the chain"));
}

// ============================================================================
// Stress Command Integration Tests
// ============================================================================

#[test]
fn test_stress_passes_with_seed() {
    let workspace = setup_workspace();

    duchain(workspace.path())
        .args([
            "--quiet",
            "stress",
            "--contexts",
            "16",
            "--cycles",
            "4",
            "--seed",
            "42",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Seed: 42"))
        .stdout(predicate::str::contains("Import structure   ok"))
        .stdout(predicate::str::contains("Set algebra        ok"));
}

// ============================================================================
// Config Command Integration Tests
// ============================================================================

#[test]
fn test_config_init_then_show() {
    let workspace = setup_workspace();

    duchain(workspace.path())
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config.toml"));
    assert!(workspace.path().join(".duchain/config.toml").exists());

    std::fs::write(
        workspace.path().join(".duchain/config.toml"),
        "[chain]\nvisibility = \"declared-before-use\"\n",
    )
    .unwrap();

    duchain(workspace.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("visibility = \"declared-before-use\""))
        .stdout(predicate::str::contains("workspace  "))
        .stdout(predicate::str::contains(".duchain/config.toml"));
}

#[test]
fn test_config_init_global_uses_home() {
    let workspace = setup_workspace();

    duchain(workspace.path())
        .args(["config", "init", "--global"])
        .assert()
        .success();
    assert!(workspace.path().join("home/.duchain/config.toml").exists());
}

#[test]
fn test_config_show_applies_cli_overrides() {
    let workspace = setup_workspace();

    let output = duchain(workspace.path())
        .args(["--sequential", "config", "show", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let shown: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(shown["config"]["replay"]["parallel"], false);
    assert_eq!(shown["config"]["chain"]["visibility"], "class-members-visible");
    assert_eq!(shown["layers"], serde_json::json!([]));
}

#[test]
fn test_invalid_config_file_fails() {
    let workspace = setup_workspace();
    let config = workspace.path().join("custom.toml");
    std::fs::write(&config, "[observers]\ncapacity = \"many\"\n").unwrap();

    duchain(workspace.path())
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("custom.toml"));
}
