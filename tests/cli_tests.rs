mod common;

use anyhow::Result;
use assert_cmd::Command;
use colsync::fingerprint::Fingerprint;
use colsync::{SETTINGS_FILE, STATE_FILE};
use common::{listing, write_file};
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn colsync() -> Result<Command> {
    let mut cmd = Command::cargo_bin("colsync")?;
    cmd.env_remove("COLSYNC_LOG");
    Ok(cmd)
}

/// Put a root into the shared test collection
fn join_collection(root: &Path, extra: &str) -> Result<()> {
    let id = Fingerprint::digest(b"cli collection").to_base64();
    fs::write(root.join(SETTINGS_FILE), format!("id:{id}\n{extra}"))?;
    Ok(())
}

#[test]
fn test_help_lists_commands() -> Result<()> {
    colsync()?
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("sync"))
        .stdout(predicate::str::contains("update"))
        .stdout(predicate::str::contains("check"));
    Ok(())
}

#[test]
fn test_update_creates_state_file() -> Result<()> {
    let root = TempDir::new()?;
    write_file(&root.path().join("docs/readme.txt"), b"hello")?;

    colsync()?
        .arg("update")
        .arg(root.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("2 added"));

    assert!(root.path().join(STATE_FILE).exists());
    let settings = fs::read_to_string(root.path().join(SETTINGS_FILE))?;
    assert!(settings.contains("static:true"));
    assert!(settings.contains("id:"));
    assert!(!root.path().join(colsync::LOCK_FILE).exists());
    Ok(())
}

#[test]
fn test_status_reports_without_writing() -> Result<()> {
    let root = TempDir::new()?;
    write_file(&root.path().join("new.txt"), b"fresh")?;

    colsync()?
        .arg("status")
        .arg(root.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("new.txt"));

    assert!(!root.path().join(STATE_FILE).exists());
    Ok(())
}

#[test]
fn test_sync_copies_between_roots() -> Result<()> {
    let a = TempDir::new()?;
    let b = TempDir::new()?;
    join_collection(a.path(), "")?;
    join_collection(b.path(), "")?;
    write_file(&a.path().join("album/one.jpg"), b"one")?;
    write_file(&b.path().join("two.jpg"), b"two")?;

    colsync()?
        .arg("sync")
        .arg(a.path())
        .arg(b.path())
        .assert()
        .success();

    assert_eq!(listing(a.path())?, vec!["album", "two.jpg"]);
    assert_eq!(listing(b.path())?, vec!["album", "two.jpg"]);
    assert_eq!(fs::read(b.path().join("album/one.jpg"))?, b"one");
    assert!(a.path().join(STATE_FILE).exists());
    assert!(b.path().join(STATE_FILE).exists());

    colsync()?
        .arg("check")
        .arg(a.path())
        .arg(b.path())
        .assert()
        .success();
    Ok(())
}

#[test]
fn test_dry_run_prints_plan_only() -> Result<()> {
    let a = TempDir::new()?;
    let b = TempDir::new()?;
    join_collection(a.path(), "")?;
    join_collection(b.path(), "")?;
    write_file(&a.path().join("x.txt"), b"x")?;

    colsync()?
        .args(["sync", "-n"])
        .arg(a.path())
        .arg(b.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("copy"));

    assert!(!b.path().join("x.txt").exists());
    assert!(!a.path().join(STATE_FILE).exists());
    assert!(!b.path().join(STATE_FILE).exists());
    Ok(())
}

#[test]
fn test_read_only_root_only_gives() -> Result<()> {
    let source = TempDir::new()?;
    let target = TempDir::new()?;
    join_collection(source.path(), "read only\n")?;
    join_collection(target.path(), "")?;
    write_file(&source.path().join("from-source.txt"), b"source")?;
    write_file(&target.path().join("from-target.txt"), b"target")?;

    colsync()?
        .arg("sync")
        .arg(source.path())
        .arg(target.path())
        .assert()
        .success();

    assert_eq!(listing(source.path())?, vec!["from-source.txt"]);
    assert!(!source.path().join(STATE_FILE).exists());
    assert_eq!(
        listing(target.path())?,
        vec!["from-source.txt", "from-target.txt"]
    );
    Ok(())
}

#[test]
fn test_missing_root_fails() -> Result<()> {
    let temp = TempDir::new()?;
    colsync()?
        .arg("update")
        .arg(temp.path().join("nowhere"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("Cannot access root"));
    Ok(())
}

#[test]
fn test_check_consistent_fresh_root() -> Result<()> {
    let root = TempDir::new()?;
    colsync()?
        .arg("check")
        .arg(root.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("consistent"));
    Ok(())
}

#[test]
fn test_completion_bash() -> Result<()> {
    colsync()?
        .args(["completion", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("colsync"));
    Ok(())
}

#[test]
fn test_quiet_conflicts_with_verbose() -> Result<()> {
    let root = TempDir::new()?;
    colsync()?
        .args(["-q", "-v", "status"])
        .arg(root.path())
        .assert()
        .failure();
    Ok(())
}
