use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;

use assert_cmd::prelude::*;
use chrono::Utc;
use predicates::str::contains;
use tempfile::TempDir;

use tandem_sync::local::{read_store, write_store, StoredRecord};

fn tandem_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("tandem"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env_remove("TANDEM_POLL_INTERVAL")
        .env_remove("TANDEM_REFERENCE_TTL");
    cmd
}

fn store_path(home: &Path, name: &str) -> PathBuf {
    home.join(".tandem/stores").join(format!("{name}.json"))
}

fn init(home: &TempDir) {
    tandem_cmd(home.path())
        .arg("init")
        .assert()
        .success()
        .stdout(contains("Config saved"));
}

fn add_document(home: &Path, id: &str, title: &str) {
    let path = store_path(home, "documents");
    let mut store = read_store(&path).expect("read documents");
    store.records.insert(
        id.to_string(),
        StoredRecord {
            id: id.into(),
            link: String::new(),
            title: title.into(),
            status_id: Some("in-progress".into()),
            priority: "High".into(),
            body: "Steps to reproduce\n".into(),
            label_ids: Vec::new(),
            assignee_id: None,
            due: None,
            edited_at: Utc::now(),
            archived: false,
        },
    );
    write_store(&path, &store).expect("write documents");
}

#[test]
fn init_writes_config_and_store_files() {
    let home = TempDir::new().expect("home");
    init(&home);

    assert!(home.path().join(".tandem/config.yaml").exists());
    let documents = read_store(&store_path(home.path(), "documents")).expect("documents");
    assert!(documents.records.is_empty());
    assert_eq!(documents.reference.status_id("Done"), Some("done"));
    assert!(store_path(home.path(), "tracker").exists());
}

#[test]
fn cycle_without_config_points_at_init() {
    let home = TempDir::new().expect("home");
    tandem_cmd(home.path())
        .arg("cycle")
        .assert()
        .failure()
        .stderr(contains("tandem init"));
}

#[test]
fn cycle_creates_linked_tracker_issue() {
    let home = TempDir::new().expect("home");
    init(&home);
    add_document(home.path(), "doc-1", "Login fails");

    let assert = tandem_cmd(home.path())
        .args(["cycle", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let summary: serde_json::Value = serde_json::from_str(&stdout).expect("parse summary");
    assert_eq!(summary["created"], 1);
    assert_eq!(summary["failed"], 0);
    assert_eq!(summary["seeded"], true);

    let tracker = read_store(&store_path(home.path(), "tracker")).expect("tracker");
    let issue = tracker.records.values().next().expect("created issue");
    assert_eq!(issue.link, "doc-1");
    assert_eq!(issue.title, "Login fails");
    assert_eq!(issue.status_id.as_deref(), Some("in-progress"));

    let documents = read_store(&store_path(home.path(), "documents")).expect("documents");
    assert_eq!(documents.records["doc-1"].link, issue.id);
}

#[test]
fn plan_previews_without_writing() {
    let home = TempDir::new().expect("home");
    init(&home);
    add_document(home.path(), "doc-1", "Login fails");

    tandem_cmd(home.path())
        .arg("plan")
        .assert()
        .success()
        .stdout(contains("create tracker \"Login fails\""))
        .stdout(contains("+Steps to reproduce"))
        .stdout(contains("1 write(s) pending"));

    let tracker = read_store(&store_path(home.path(), "tracker")).expect("tracker");
    assert!(tracker.records.is_empty(), "plan must not write to the tracker");
    assert!(!home.path().join(".tandem/baseline.json").exists());
}

#[test]
fn dry_run_cycle_lists_actions_and_writes_nothing() {
    let home = TempDir::new().expect("home");
    init(&home);
    add_document(home.path(), "doc-1", "Login fails");

    tandem_cmd(home.path())
        .args(["cycle", "--dry-run"])
        .assert()
        .success()
        .stdout(contains("[dry-run] create tracker"));

    assert!(read_store(&store_path(home.path(), "tracker"))
        .expect("tracker")
        .records
        .is_empty());
}

#[test]
fn status_json_reports_baseline_items() {
    let home = TempDir::new().expect("home");
    init(&home);
    add_document(home.path(), "doc-1", "Login fails");
    tandem_cmd(home.path()).arg("cycle").assert().success();

    let assert = tandem_cmd(home.path())
        .args(["status", "--json"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let payload: serde_json::Value = serde_json::from_str(&stdout).expect("parse status json");

    let top_keys: BTreeSet<String> = payload
        .as_object()
        .expect("status root object")
        .keys()
        .cloned()
        .collect();
    let expected: BTreeSet<String> = ["documents", "tracker", "daemon_running", "synced_at", "items"]
        .into_iter()
        .map(str::to_string)
        .collect();
    assert_eq!(top_keys, expected, "status root schema changed");
    assert_eq!(payload["daemon_running"], false);

    let items = payload["items"].as_array().expect("items array");
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["key"], "doc-1");
    assert_eq!(items[0]["status"], "In Progress");
    assert!(!items[0]["tracker_id"].as_str().expect("tracker id").is_empty());
}

#[test]
fn daemon_status_when_not_running() {
    let home = TempDir::new().expect("home");

    let assert = tandem_cmd(home.path())
        .args(["daemon", "status"])
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("stdout utf8");
    let payload: serde_json::Value = serde_json::from_str(&stdout).expect("parse json");
    assert_eq!(payload["running"], false);

    tandem_cmd(home.path())
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(contains("not running"));
}
