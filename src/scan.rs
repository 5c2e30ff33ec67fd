//! Local diff engine.
//!
//! Compares an instance's tables against a fresh walk of its root. Every live
//! record starts out "removed"; walking the tree crosses off the ones still in
//! place. What is left over is either a move (its fingerprint turns up at a
//! new path) or a deletion.
//!
//! Directories are handled in a full pass before files so that a renamed
//! directory is recorded as one move instead of one move per file inside it.

use crate::error::InvariantError;
use crate::fingerprint::{Fingerprint, Stat, fingerprint_of};
use crate::instance::Instance;
use crate::model::{EntryKind, EntryRef};
use crate::path::{CollectionPath, by_length, to_slash};
use anyhow::{Result, bail};
use rayon::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{Level, debug, span, warn};
use walkdir::WalkDir;

/// Suffix of every bookkeeping file; such files are never tracked.
const RESERVED_SUFFIX: &str = ".collection";

/// Result of comparing one table against the filesystem.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalDiff {
    /// Full paths found on disk without an unchanged record, shortest first.
    pub added: Vec<String>,
    /// Records not found unchanged, keyed by their recorded full path.
    pub removed: BTreeMap<String, EntryRef>,
    /// The same records keyed by the fingerprint a move would present: the id
    /// for directories, the content hash for files. When several records share
    /// a key the one with the smallest recorded path wins.
    pub removed_by_hash: BTreeMap<Fingerprint, EntryRef>,
    /// Ids of records that were already deleted.
    pub deleted: BTreeSet<Fingerprint>,
}

impl LocalDiff {
    /// Whether the table matches the filesystem.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Directory and file halves of a local diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelfDiff {
    /// Directory table.
    pub directories: LocalDiff,
    /// File table.
    pub files: LocalDiff,
}

impl SelfDiff {
    /// Whether nothing changed on disk.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.directories.is_clean() && self.files.is_clean()
    }
}

/// Counts of what a self update recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    /// New records.
    pub added: usize,
    /// Records given a new location.
    pub moved: usize,
    /// Records tombstoned.
    pub deleted: usize,
    /// Paths that could not be fingerprinted.
    pub skipped: usize,
}

impl UpdateSummary {
    /// Whether anything was recorded.
    #[must_use]
    pub const fn has_changes(&self) -> bool {
        self.added + self.moved + self.deleted > 0
    }
}

/// Compares both tables against the filesystem without changing anything.
///
/// Files inside a renamed directory show up as removed and added here; the
/// directory move is only applied by [`self_update`].
///
/// # Errors
///
/// Fails if the root is missing or a recorded path cannot be reconstructed.
pub fn self_diff(instance: &Instance) -> Result<SelfDiff> {
    ensure_root(instance)?;
    Ok(SelfDiff {
        directories: diff_pass(instance, EntryKind::Directory)?,
        files: diff_pass(instance, EntryKind::File)?,
    })
}

/// Brings the instance's tables in line with the filesystem.
///
/// Moves append a node to the existing record, new paths mint identities,
/// and whatever was not found is tombstoned. Directories are fully resolved
/// (including their deletions) before files are looked at.
///
/// # Errors
///
/// Fails if the root is missing or an invariant is violated. Paths that
/// cannot be read are logged and skipped.
pub fn self_update(instance: &mut Instance) -> Result<UpdateSummary> {
    let span = span!(Level::DEBUG, "self_update", root = %instance.root_path());
    let _enter = span.enter();

    ensure_root(instance)?;
    let mut summary = UpdateSummary::default();

    for kind in [EntryKind::Directory, EntryKind::File] {
        let diff = diff_pass(instance, kind)?;
        apply_pass(instance, kind, diff, &mut summary)?;
    }

    debug!(
        added = summary.added,
        moved = summary.moved,
        deleted = summary.deleted,
        skipped = summary.skipped,
        "Self update complete"
    );
    Ok(summary)
}

fn ensure_root(instance: &Instance) -> Result<()> {
    let root = instance.root_dir();
    if !root.is_dir() {
        bail!("Instance root is not a directory: {}", root.display());
    }
    Ok(())
}

/// Seeds `removed` from the table, walks the tree and crosses off every
/// record found unchanged.
fn diff_pass(instance: &Instance, kind: EntryKind) -> Result<LocalDiff> {
    let mut diff = seed(instance, kind)?;

    for full in walk(instance, kind) {
        let path = CollectionPath::from_string(&full, instance.root_path());
        match diff.removed.get(&full) {
            Some(&entry) if instance.path_equals_entry(entry, &path) => {
                diff.removed.remove(&full);
            }
            _ => diff.added.push(full),
        }
    }
    diff.added.sort_by(by_length);

    // BTreeMap order makes the smallest recorded path win
    for &entry in diff.removed.values() {
        if let Some(key) = move_key(instance, entry) {
            diff.removed_by_hash.entry(key).or_insert(entry);
        }
    }

    Ok(diff)
}

fn seed(instance: &Instance, kind: EntryKind) -> Result<LocalDiff, InvariantError> {
    let mut diff = LocalDiff::default();

    let entries: Vec<EntryRef> = match kind {
        EntryKind::Directory => instance
            .directories()
            .keys()
            .map(|id| EntryRef::directory(*id))
            .collect(),
        EntryKind::File => instance
            .resources()
            .keys()
            .map(|id| EntryRef::file(*id))
            .collect(),
    };

    for entry in entries {
        let node = instance.current_node(entry)?;
        if node.is_tombstone() {
            diff.deleted.insert(entry.id);
            continue;
        }
        let path = instance.full_path_of(node)?;
        diff.removed.insert(path.to_full_string(), entry);
    }

    Ok(diff)
}

/// Fingerprint a moved record would present at its new path.
fn move_key(instance: &Instance, entry: EntryRef) -> Option<Fingerprint> {
    match entry.kind {
        EntryKind::Directory => instance.directory(&entry.id).map(|d| d.id()),
        EntryKind::File => instance.resource(&entry.id).map(|r| r.content_hash),
    }
}

/// Full path strings of every entry of `kind` under the root. Directories end
/// with `/`; the root itself is included. Symlinks and bookkeeping files are
/// skipped.
fn walk(instance: &Instance, kind: EntryKind) -> Vec<String> {
    let root = instance.root_dir();
    let mut found = Vec::new();

    for entry in WalkDir::new(&root).follow_links(false) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Failed to read directory entry");
                continue;
            }
        };
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            continue;
        }

        let raw = to_slash(&entry.path().to_string_lossy());
        match kind {
            EntryKind::Directory if file_type.is_dir() => {
                let full = format!("{}/", raw.trim_end_matches('/'));
                found.push(CollectionPath::from_string(&full, instance.root_path()).to_full_string());
            }
            EntryKind::File if file_type.is_file() => {
                let path = CollectionPath::from_string(&raw, instance.root_path());
                if path.name.ends_with(RESERVED_SUFFIX) {
                    continue;
                }
                found.push(path.to_full_string());
            }
            _ => {}
        }
    }

    found
}

/// Records moves and additions for one table, then tombstones what is left.
fn apply_pass(
    instance: &mut Instance,
    kind: EntryKind,
    mut diff: LocalDiff,
    summary: &mut UpdateSummary,
) -> Result<()> {
    let root = instance.root_path().to_string();
    let stats: Vec<(CollectionPath, Result<Stat>)> = diff
        .added
        .par_iter()
        .map(|full| {
            let path = CollectionPath::from_string(full, &root);
            let stat = fingerprint_of(&path.to_path_buf(), &path.relative_string());
            (path, stat)
        })
        .collect();

    for (path, stat) in stats {
        let stat = match stat {
            Ok(stat) => stat,
            Err(e) => {
                warn!(path = %path, error = %e, "Skipping path that could not be fingerprinted");
                summary.skipped += 1;
                continue;
            }
        };
        let node = instance.path_to_node(&path)?;

        if let Some(entry) = diff.removed_by_hash.remove(&stat.fingerprint) {
            diff.removed.retain(|_, e| *e != entry);
            let current = instance.current_node(entry)?;
            if current.same_location(&node) {
                debug!(path = %path, kind = entry.kind.as_str(), "Found under renamed parent");
            } else {
                debug!(path = %path, kind = entry.kind.as_str(), "Moved");
                instance.push_node(entry, node)?;
                summary.moved += 1;
            }
            continue;
        }

        debug!(path = %path, kind = kind.as_str(), "Added");
        match kind {
            EntryKind::Directory => {
                instance.add_directory(stat.fingerprint, node, stat.pinned)?;
            }
            EntryKind::File => {
                instance.add_resource(stat.fingerprint, stat.size, node)?;
            }
        }
        summary.added += 1;
    }

    for (full, entry) in diff.removed {
        debug!(path = %full, kind = entry.kind.as_str(), "Deleted");
        instance.tombstone(entry)?;
        summary.deleted += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PathHistory;
    use std::fs;
    use tempfile::tempdir;

    fn fresh(root: &std::path::Path) -> Instance {
        Instance::new(&crate::path::root_string(root), Fingerprint::digest(b"col"))
    }

    #[test]
    fn test_new_files_and_directories() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("sub"))?;
        fs::write(dir.path().join("sub/a.txt"), b"alpha")?;
        fs::write(dir.path().join("top.txt"), b"top")?;

        let mut ins = fresh(dir.path());
        let summary = self_update(&mut ins)?;
        assert_eq!(summary.added, 3);
        assert_eq!(ins.resources().len(), 2);
        assert_eq!(ins.directories().len(), 2);
        assert!(ins.bad_instance_scan().is_empty());

        // nothing changed
        let again = self_update(&mut ins)?;
        assert!(!again.has_changes());
        assert!(self_diff(&ins)?.is_clean());
        Ok(())
    }

    #[test]
    fn test_bookkeeping_files_are_ignored() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join(".collection"), b"state")?;
        fs::write(dir.path().join("config.collection"), b"static")?;
        fs::write(dir.path().join("real.txt"), b"x")?;

        let mut ins = fresh(dir.path());
        self_update(&mut ins)?;
        assert_eq!(ins.resources().len(), 1);
        Ok(())
    }

    #[test]
    fn test_move_keeps_identity() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.txt"), b"same bytes")?;
        let mut ins = fresh(dir.path());
        self_update(&mut ins)?;
        let id = *ins.resources().keys().next().ok_or_else(|| anyhow::anyhow!("no record"))?;

        fs::create_dir(dir.path().join("sub"))?;
        fs::rename(dir.path().join("a.txt"), dir.path().join("sub/b.txt"))?;
        let summary = self_update(&mut ins)?;

        assert_eq!(summary.moved, 1);
        assert_eq!(summary.deleted, 0);
        assert_eq!(ins.resources().len(), 1);
        let path = ins.current_path(EntryRef::file(id))?;
        assert_eq!(path.relative_string(), "/sub/b.txt");
        assert_eq!(ins.resource(&id).map(|r| r.history.len()), Some(2));
        Ok(())
    }

    #[test]
    fn test_deletion_tombstones_once() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("gone.txt"), b"bye")?;
        let mut ins = fresh(dir.path());
        self_update(&mut ins)?;
        fs::remove_file(dir.path().join("gone.txt"))?;

        let summary = self_update(&mut ins)?;
        assert_eq!(summary.deleted, 1);
        let res = ins.resources().values().next().ok_or_else(|| anyhow::anyhow!("no record"))?;
        assert_eq!(res.history.len(), 2);
        assert!(res.history.is_deleted());

        // already deleted records stay as they are
        self_update(&mut ins)?;
        let res = ins.resources().values().next().ok_or_else(|| anyhow::anyhow!("no record"))?;
        assert_eq!(res.history.len(), 2);
        Ok(())
    }

    #[test]
    fn test_smallest_path_wins_for_shared_content() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("a.txt"), b"twin")?;
        fs::write(dir.path().join("b.txt"), b"twin")?;
        let mut ins = fresh(dir.path());
        self_update(&mut ins)?;
        fs::remove_file(dir.path().join("a.txt"))?;
        fs::remove_file(dir.path().join("b.txt"))?;

        let diff = self_diff(&ins)?;
        assert_eq!(diff.files.removed.len(), 2);
        let winner = diff.files.removed_by_hash.values().next().copied();
        let expected = diff.files.removed.values().next().copied();
        assert_eq!(winner, expected);
        Ok(())
    }

    #[test]
    fn test_renamed_directory_is_one_move() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir_all(dir.path().join("a/inner"))?;
        fs::write(dir.path().join("a/inner/f.txt"), b"deep")?;
        let mut ins = fresh(dir.path());
        self_update(&mut ins)?;
        // pin directory identities
        ins.write()?;

        fs::rename(dir.path().join("a"), dir.path().join("b"))?;
        let summary = self_update(&mut ins)?;
        assert_eq!(summary.moved, 1);
        assert_eq!(summary.added, 0);
        assert_eq!(summary.deleted, 0);

        let file = ins.resources().keys().next().copied().ok_or_else(|| anyhow::anyhow!("no record"))?;
        assert_eq!(
            ins.current_path(EntryRef::file(file))?.relative_string(),
            "/b/inner/f.txt"
        );
        assert!(ins.bad_instance_scan().is_empty());
        Ok(())
    }

    #[test]
    fn test_recreated_directory_reparents_files() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("d"))?;
        fs::write(dir.path().join("d/f.txt"), b"keep")?;
        let mut ins = fresh(dir.path());
        self_update(&mut ins)?;
        ins.write()?;

        // replace the tagged directory with an untagged one holding the same file
        fs::remove_dir_all(dir.path().join("d"))?;
        fs::create_dir(dir.path().join("e"))?;
        fs::write(dir.path().join("e/f.txt"), b"keep")?;

        self_update(&mut ins)?;
        let file = ins.resources().keys().next().copied().ok_or_else(|| anyhow::anyhow!("no record"))?;
        assert_eq!(ins.resources().len(), 1);
        assert_eq!(
            ins.current_path(EntryRef::file(file))?.relative_string(),
            "/e/f.txt"
        );
        assert!(ins.root().is_some_and(|r| r.dirs.contains_key("e/")));
        assert!(ins.bad_instance_scan().is_empty());
        Ok(())
    }

    fn configured(root: &std::path::Path, settings: &str) -> Instance {
        let mut ins = fresh(root);
        ins.apply_settings(crate::config::InstanceSettings::from_map(
            crate::config::parser::parse_settings_str(settings),
        ));
        ins
    }

    fn only_file(ins: &Instance) -> Result<EntryRef> {
        let id = ins
            .resources()
            .keys()
            .next()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no record"))?;
        Ok(EntryRef::file(id))
    }

    #[test]
    fn test_static_root_trusts_unchanged_path() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("f.txt"), b"before")?;
        let mut ins = fresh(dir.path());
        self_update(&mut ins)?;
        let entry = only_file(&ins)?;

        // same path, different size and content: static mode never looks
        fs::write(dir.path().join("f.txt"), b"edited in place")?;
        let path = ins.current_path(entry)?;
        assert!(ins.path_equals_entry(entry, &path));
        assert!(!self_update(&mut ins)?.has_changes());
        Ok(())
    }

    #[test]
    fn test_same_size_edit_detected_when_not_static() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("f.txt"), b"aaaa")?;
        let mut ins = configured(dir.path(), "static:false");
        self_update(&mut ins)?;
        let old = only_file(&ins)?;

        fs::write(dir.path().join("f.txt"), b"bbbb")?;
        let path = ins.current_path(old)?;
        assert!(!ins.path_equals_entry(old, &path));

        let summary = self_update(&mut ins)?;
        assert_eq!(summary.added, 1);
        assert_eq!(summary.deleted, 1);
        assert!(ins.history(old).is_some_and(PathHistory::is_deleted));
        let live: Vec<_> = ins
            .resources()
            .values()
            .filter(|r| !r.history.is_deleted())
            .collect();
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].content_hash, Fingerprint::digest(b"bbbb"));
        Ok(())
    }

    #[test]
    fn test_length_check_alone_catches_size_change_only() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("f.txt"), b"1234")?;
        let mut ins = configured(dir.path(), "check file length");
        self_update(&mut ins)?;
        let entry = only_file(&ins)?;
        let path = ins.current_path(entry)?;

        // same size: trusted without hashing
        fs::write(dir.path().join("f.txt"), b"abcd")?;
        assert!(ins.path_equals_entry(entry, &path));

        // size mismatch is conclusive
        fs::write(dir.path().join("f.txt"), b"abcdef")?;
        assert!(!ins.path_equals_entry(entry, &path));
        Ok(())
    }

    #[test]
    fn test_hash_check_on_static_root() -> Result<()> {
        let dir = tempdir()?;
        fs::write(dir.path().join("f.txt"), b"1234")?;
        let mut ins = configured(dir.path(), "check file hash:true");
        self_update(&mut ins)?;
        let entry = only_file(&ins)?;
        let path = ins.current_path(entry)?;
        assert!(ins.path_equals_entry(entry, &path));

        fs::write(dir.path().join("f.txt"), b"abcd")?;
        assert!(!ins.path_equals_entry(entry, &path));
        Ok(())
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let ins = Instance::new("/definitely/not/here", Fingerprint::ZERO);
        assert!(self_diff(&ins).is_err());
    }
}
