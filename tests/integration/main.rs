//! Integration tests for Grove
//!
//! These tests drive the workspace, watcher, and CLI together against
//! projects written to a temporary directory.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use grove_core::normalize_path;
use grove_watcher::{WatchEvent, apply_event, coalesce, scan_files};
use grove_workspace::{ChangeKind, ManifestProject, RecordingListener, WatchConfig, Workspace, WorkspaceConfig};
use tempfile::TempDir;

const MANIFEST: &str = r#"
[project]
name = "app"

[[units]]
path = "src/A.as"
definitions = ["app.A"]

[[units]]
path = "src/B.as"
definitions = ["app.B"]
[[units.dependencies]]
target = "app.A"
kind = "inheritance"

[[units]]
path = "src/C.as"
definitions = ["app.C"]
[[units.dependencies]]
target = "app.B"
kind = "expression"

[[units]]
path = "src/D.as"
definitions = ["app.D"]
[[units.dependencies]]
target = "app.C"
kind = "signature"
"#;

fn write_project(dir: &Path) {
    std::fs::create_dir_all(dir.join("src")).unwrap();
    for name in ["A", "B", "C", "D"] {
        std::fs::write(dir.join(format!("src/{name}.as")), format!("class {name} {{}}")).unwrap();
    }
    std::fs::write(dir.join("grove-project.toml"), MANIFEST).unwrap();
    std::fs::write(dir.join("grove.toml"), "worker_threads = 2\n").unwrap();
}

fn grove(dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_grove"))
        .arg("--root")
        .arg(dir)
        .args(args)
        .output()
        .expect("failed to run grove")
}

#[test]
fn test_cli_help() {
    let output = Command::new(env!("CARGO_BIN_EXE_grove"))
        .arg("--help")
        .output()
        .expect("failed to run grove");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Incremental invalidation for multi-project workspaces"));
    for command in ["check", "invalidate", "watch", "version"] {
        assert!(stdout.contains(command), "missing {command} in help");
    }
}

#[test]
fn test_cli_version() {
    let output = Command::new(env!("CARGO_BIN_EXE_grove"))
        .arg("version")
        .output()
        .expect("failed to run grove");
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("Grove v"));
}

#[test]
fn test_cli_check() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path());

    let output = grove(dir.path(), &["check"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let outcomes: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let order: Vec<&str> = outcomes["app"]["order"]
        .as_array()
        .unwrap()
        .iter()
        .map(|name| name.as_str().unwrap())
        .collect();
    assert_eq!(order.len(), 4);
    let position = |name: &str| order.iter().position(|n| *n == name).unwrap();
    assert!(position("A") < position("B"));
    assert_eq!(outcomes["app"]["unresolved"], serde_json::json!([]));
}

#[test]
fn test_cli_invalidate() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path());

    let changed = dir.path().join("src/A.as");
    let output = grove(dir.path(), &["invalidate", changed.to_str().unwrap()]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["kind"], "changed");
    let names: Vec<&str> = report["invalidated"]
        .as_array()
        .unwrap()
        .iter()
        .map(|unit| unit["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["A", "B", "C"]);
}

#[test]
fn test_cli_missing_manifest_fails() {
    let dir = TempDir::new().unwrap();
    let output = grove(dir.path(), &["check"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("grove-project.toml"));
}

/// A burst of watch events reaches the workspace as one event per file.
#[test]
fn test_watch_events_invalidate_units() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path());

    let workspace = Workspace::new(WorkspaceConfig {
        worker_threads: 2,
        ..WorkspaceConfig::default()
    })
    .unwrap();
    let listener = Arc::new(RecordingListener::new());
    workspace.add_invalidation_listener(listener.clone());
    let project = ManifestProject::load(&workspace, &dir.path().join("grove-project.toml")).unwrap();

    let a = normalize_path(dir.path().join("src/A.as"));
    let burst = vec![
        WatchEvent::Modified(a.clone()),
        WatchEvent::Removed(a.clone()),
        WatchEvent::Created(a.clone()),
    ];
    let events = coalesce(burst);
    assert_eq!(events, vec![WatchEvent::Modified(a.clone())]);

    let report = apply_event(&workspace, &events[0]);
    assert_eq!(report.kind, ChangeKind::Changed);
    assert_eq!(report.unit_names(), vec!["A", "B", "C"]);
    assert_eq!(listener.notification_count(), 1);
    assert!(listener.invalidated_names().contains(&"app.A".to_string()));

    let outcome = project.build().unwrap();
    assert_eq!(outcome.resolved, 3);
    assert!(outcome.unresolved.is_empty());
}

#[test]
fn test_scan_respects_watch_config() {
    let dir = TempDir::new().unwrap();
    write_project(dir.path());
    std::fs::create_dir_all(dir.path().join("target")).unwrap();
    std::fs::write(dir.path().join("target/Stale.as"), "").unwrap();

    let files = scan_files(dir.path(), &WatchConfig::default());
    assert_eq!(files.len(), 4);
    assert!(files.iter().all(|file| file.ends_with(".as") && !file.contains("/target/")));
}
