mod common;

use anyhow::{Context, Result};
use colsync::fingerprint::Fingerprint;
use colsync::model::EntryRef;
use colsync::scan::self_update;
use colsync::sync::naming::has_collision_prefix;
use colsync::sync::{Action, Side, Sync};
use common::{TestPair, listing, write_file};
use std::fs;

#[test]
fn test_copy_carries_tombstones() -> Result<()> {
    let mut pair = TestPair::new()?;
    write_file(&pair.path_a("md5test.txt"), b"md5 test content")?;
    write_file(&pair.path_a("deleted.bar"), b"soon gone")?;
    self_update(&mut pair.a)?;
    fs::remove_file(pair.path_a("deleted.bar"))?;
    self_update(&mut pair.a)?;

    {
        let mut sync = Sync::new(&mut pair.a, &mut pair.b);
        sync.diff()?;
        sync.run()?;
    }

    let h1 = Fingerprint::digest(b"md5 test content");
    let h2 = Fingerprint::digest(b"soon gone");

    let live = pair
        .b
        .resources()
        .values()
        .find(|r| r.content_hash == h1)
        .context("copied file not recorded")?;
    let node = live.current().context("empty history")?;
    assert_eq!(pair.b.relative_path_of(node)?.relative_string(), "/md5test.txt");
    assert_eq!(fs::read(pair.path_b("md5test.txt"))?, b"md5 test content");

    let gone = pair
        .b
        .resources()
        .values()
        .find(|r| r.content_hash == h2)
        .context("tombstoned record not copied")?;
    assert!(gone.history.is_deleted());
    assert_eq!(
        pair.a.history(EntryRef::file(gone.id)),
        Some(&gone.history)
    );
    assert!(!pair.path_b("deleted.bar").exists());

    // the tombstone keeps the next pass from copying anything again
    let mut sync = Sync::new(&mut pair.a, &mut pair.b);
    assert!(sync.diff()?.is_empty());
    Ok(())
}

#[test]
fn test_name_conflict_gets_prefixed_copy() -> Result<()> {
    let mut pair = TestPair::new()?;
    write_file(&pair.path_a("notes.txt"), b"written on a")?;
    write_file(&pair.path_b("notes.txt"), b"written on b")?;

    let report = pair.sync()?;
    assert_eq!(report.renamed, 2);
    assert_eq!(report.failed, 0);

    for (dir, own) in [
        (pair.dir_a.path(), b"written on a"),
        (pair.dir_b.path(), b"written on b"),
    ] {
        let names = listing(dir)?;
        assert_eq!(names.len(), 2, "{names:?}");
        assert_eq!(fs::read(dir.join("notes.txt"))?, own);

        let parked = names
            .iter()
            .find(|name| name.as_str() != "notes.txt")
            .context("no parked copy")?;
        assert!(has_collision_prefix(parked));
        assert!(parked.ends_with("_notes.txt"));
        assert_eq!(parked.len(), "0ABCDE_notes.txt".len());
    }

    // the clash is permanent: the parked copies keep their identity
    let ids_before: Vec<_> = pair.a.resources().keys().copied().collect();
    let report = pair.sync()?;
    assert_eq!(report.executed, 0);
    assert_eq!(pair.a.resources().keys().copied().collect::<Vec<_>>(), ids_before);
    for (instance, dir) in [
        (&pair.a, pair.dir_a.path()),
        (&pair.b, pair.dir_b.path()),
    ] {
        let live = instance
            .resources()
            .values()
            .filter(|r| !r.history.is_deleted())
            .count();
        assert_eq!(live, listing(dir)?.len());
        assert!(instance.bad_instance_scan().is_empty());
    }
    Ok(())
}

#[test]
fn test_parked_directory_receives_its_children() -> Result<()> {
    let mut pair = TestPair::new()?;
    write_file(&pair.path_a("album/cover.jpg"), b"cover")?;
    write_file(&pair.path_b("album"), b"a plain file named album")?;

    let report = pair.sync()?;
    assert_eq!(report.failed, 0);

    let names = listing(pair.dir_b.path())?;
    let parked = names
        .iter()
        .find(|name| has_collision_prefix(name))
        .context("directory not parked")?;
    assert!(parked.ends_with("_album"));
    assert_eq!(fs::read(pair.path_b(parked).join("cover.jpg"))?, b"cover");
    assert_eq!(fs::read(pair.path_b("album"))?, b"a plain file named album");
    assert!(pair.b.bad_instance_scan().is_empty());

    let report = pair.sync()?;
    assert_eq!(report.executed, 0);
    Ok(())
}

#[test]
fn test_move_into_new_directory_propagates() -> Result<()> {
    let mut pair = TestPair::new()?;
    write_file(&pair.path_a("f.txt"), b"payload")?;
    pair.sync()?;

    fs::create_dir(pair.path_a("new"))?;
    fs::rename(pair.path_a("f.txt"), pair.path_a("new/f.txt"))?;
    pair.update()?;

    let mut sync = Sync::new(&mut pair.a, &mut pair.b);
    let plan = sync.diff()?.clone();
    let labels: Vec<(i32, &str)> = plan.iter().map(|(d, a)| (d, a.label())).collect();
    assert_eq!(labels, vec![(1, "mkdir"), (2, "move")]);
    sync.run()?;

    assert!(!pair.path_b("f.txt").exists());
    assert_eq!(fs::read(pair.path_b("new/f.txt"))?, b"payload");
    Ok(())
}

#[test]
fn test_deleted_directory_is_removed_children_first() -> Result<()> {
    let mut pair = TestPair::new()?;
    write_file(&pair.path_a("old/inner/f.txt"), b"x")?;
    pair.sync()?;
    assert!(pair.path_b("old/inner/f.txt").exists());

    fs::remove_dir_all(pair.path_a("old"))?;
    pair.update()?;

    let mut sync = Sync::new(&mut pair.a, &mut pair.b);
    let order = sync.diff()?.schedule_order();
    assert_eq!(order, vec![-4, -3, -2]);
    let report = sync.run()?;
    assert_eq!(report.failed, 0);

    assert!(!pair.path_b("old").exists());
    assert!(pair.b.resources().values().all(|r| r.history.is_deleted()));
    Ok(())
}

#[test]
fn test_concurrent_moves_longer_path_wins() -> Result<()> {
    let mut pair = TestPair::new()?;
    write_file(&pair.path_a("f.txt"), b"contested")?;
    pair.sync()?;

    fs::rename(pair.path_a("f.txt"), pair.path_a("short.txt"))?;
    fs::rename(pair.path_b("f.txt"), pair.path_b("a-much-longer-name.txt"))?;
    pair.update()?;

    let mut sync = Sync::new(&mut pair.a, &mut pair.b);
    let plan = sync.diff()?.clone();
    assert!(plan.iter().any(|(_, action)| matches!(
        action,
        Action::MoveOrDelete { from: Side::B, .. }
    )));
    sync.run()?;

    assert_eq!(listing(pair.dir_a.path())?, vec!["a-much-longer-name.txt"]);
    assert_eq!(listing(pair.dir_b.path())?, vec!["a-much-longer-name.txt"]);
    Ok(())
}

#[test]
fn test_live_move_beats_concurrent_delete() -> Result<()> {
    let mut pair = TestPair::new()?;
    write_file(&pair.path_a("f.txt"), b"survivor")?;
    pair.sync()?;

    fs::remove_file(pair.path_a("f.txt"))?;
    fs::rename(pair.path_b("f.txt"), pair.path_b("kept.txt"))?;
    pair.sync()?;

    assert_eq!(fs::read(pair.path_a("kept.txt"))?, b"survivor");
    assert_eq!(listing(pair.dir_b.path())?, vec!["kept.txt"]);
    let id = *pair.a.resources().keys().next().context("no record")?;
    assert_eq!(
        pair.a.history(EntryRef::file(id)),
        pair.b.history(EntryRef::file(id))
    );
    Ok(())
}

#[test]
fn test_tagged_directory_rename_is_one_move() -> Result<()> {
    let mut pair = TestPair::new()?;
    write_file(&pair.path_a("photos/p1.jpg"), b"one")?;
    write_file(&pair.path_a("photos/p2.jpg"), b"two")?;
    pair.sync()?;
    pair.write()?;
    assert!(pair.path_a("photos").join(colsync::TAG_FILE).exists());
    assert!(pair.path_b("photos").join(colsync::TAG_FILE).exists());

    fs::rename(pair.path_a("photos"), pair.path_a("pictures"))?;
    let summary = self_update(&mut pair.a)?;
    assert_eq!(summary.moved, 1);
    assert_eq!(summary.added, 0);

    let mut sync = Sync::new(&mut pair.a, &mut pair.b);
    assert_eq!(sync.diff()?.len(), 1);
    sync.run()?;

    assert_eq!(listing(pair.dir_b.path())?, vec!["pictures"]);
    assert_eq!(fs::read(pair.path_b("pictures/p2.jpg"))?, b"two");
    Ok(())
}

#[test]
fn test_second_pass_is_quiet() -> Result<()> {
    let mut pair = TestPair::new()?;
    write_file(&pair.path_a("a/b/c.txt"), b"deep")?;
    write_file(&pair.path_b("top.txt"), b"top")?;
    pair.sync()?;

    let report = pair.sync()?;
    assert_eq!(report.executed, 0);
    assert!(pair.path_a("top.txt").exists());
    assert!(pair.path_b("a/b/c.txt").exists());
    Ok(())
}
