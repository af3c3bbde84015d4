use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::str::contains;

use dandimirror_core::AssetPath;
use dandimirror_sync::locator::hash_bytes;
use dandimirror_sync::store::MirrorStore;
use tempfile::TempDir;

fn dandimirror_cmd(home: &Path) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("dandimirror"));
    cmd.env("HOME", home)
        .env("USERPROFILE", home)
        .env("RUST_LOG", "warn");
    cmd
}

fn committed_mirror(root: &Path) {
    let mut store = MirrorStore::open(root).expect("open mirror");
    fs::create_dir_all(root.join("sub-01")).expect("mkdir");
    fs::write(root.join("sub-01").join("a.nwb"), b"data").expect("write");
    store
        .stage(&AssetPath::parse("sub-01/a.nwb").expect("path"), &hash_bytes(b"data"))
        .expect("stage");
    let when = chrono::DateTime::parse_from_rfc3339("2021-05-01T00:00:00Z")
        .expect("timestamp")
        .with_timezone(&chrono::Utc);
    store.commit(when, "sync").expect("commit");
}

#[test]
fn instances_lists_known_archives() {
    let home = TempDir::new().expect("home");
    dandimirror_cmd(home.path())
        .arg("instances")
        .assert()
        .success()
        .stdout(contains("dandi-staging:"))
        .stdout(contains("https://api.dandiarchive.org/api"));
}

#[test]
fn status_on_empty_target() {
    let home = TempDir::new().expect("home");
    let target = TempDir::new().expect("target");
    dandimirror_cmd(home.path())
        .args(["status", "--target"])
        .arg(target.path())
        .assert()
        .success()
        .stdout(contains("No mirrors found."));
}

#[test]
fn status_json_reports_committed_mirror() {
    let home = TempDir::new().expect("home");
    let target = TempDir::new().expect("target");
    committed_mirror(&target.path().join("000027"));
    MirrorStore::open(&target.path().join("000042")).expect("empty mirror");

    let output = dandimirror_cmd(home.path())
        .args(["status", "--json", "--target"])
        .arg(target.path())
        .output()
        .expect("run status");
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("status JSON");
    let mirrors = json["mirrors"].as_array().expect("mirrors array");
    assert_eq!(mirrors.len(), 2);
    assert_eq!(mirrors[0]["collection"], "000027");
    assert_eq!(mirrors[0]["snapshots"], 1);
    assert_eq!(mirrors[0]["tracked"], 1);
    assert_eq!(mirrors[0]["author_timestamp"], "2021-05-01T00:00:00Z");
    assert_eq!(mirrors[1]["collection"], "000042");
    assert!(mirrors[1].get("head").is_none());
}

#[test]
fn status_table_marks_uncommitted_mirrors() {
    let home = TempDir::new().expect("home");
    let target = TempDir::new().expect("target");
    MirrorStore::open(&target.path().join("000042")).expect("empty mirror");
    dandimirror_cmd(home.path())
        .args(["status", "--target"])
        .arg(target.path())
        .assert()
        .success()
        .stdout(contains("000042"))
        .stdout(contains("no snapshot yet"));
}

#[test]
fn unknown_instance_is_a_hard_failure() {
    let home = TempDir::new().expect("home");
    let target = TempDir::new().expect("target");
    dandimirror_cmd(home.path())
        .args(["sync", "000027", "--instance", "nowhere", "--target"])
        .arg(target.path())
        .assert()
        .code(1)
        .stderr(contains("unknown archive instance 'nowhere'"));
}

#[test]
fn invalid_config_is_rejected_before_any_network_access() {
    let home = TempDir::new().expect("home");
    let config_dir = home.path().join(".dandimirror");
    fs::create_dir_all(&config_dir).expect("mkdir");
    fs::write(config_dir.join("config.yaml"), "jobs: 0\n").expect("write config");

    dandimirror_cmd(home.path())
        .args(["sync", "000027"])
        .assert()
        .code(1)
        .stderr(contains("jobs"));
}
