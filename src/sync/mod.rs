//! Cross-instance reconciler.
//!
//! [`Sync::diff`] compares the tables of two instances and fills a
//! depth-bucketed [`Plan`]; [`Sync::run`] executes it. Each action touches the
//! filesystem first and the destination's tables second, so a failed action
//! leaves the tables as they were and the next pass finds the same
//! difference again.

/// Collision-safe destination names.
pub mod naming;
/// Actions and the depth-ordered plan.
pub mod plan;
/// Winner selection for divergent histories.
pub mod resolve;

pub use plan::{Action, Plan, Side};
pub use resolve::{Resolution, resolve_difference};

use crate::error::InvariantError;
use crate::fingerprint::{Fingerprint, write_tag};
use crate::instance::{Instance, display_path};
use crate::model::{Directory, EntryKind, EntryRef, PathNode};
use anyhow::{Context, Result, anyhow};
use naming::available_name;
use std::fmt;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{Level, debug, info, span, warn};

/// Depth of deferred rename retries: after every other action.
const RETRY_DEPTH: i32 = -1;

/// Outcome of [`Sync::run`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Actions that completed.
    pub executed: usize,
    /// Actions abandoned after an environmental failure.
    pub failed: usize,
    /// Entries placed under a collision name.
    pub renamed: usize,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} executed, {} failed, {} renamed",
            self.executed, self.failed, self.renamed
        )
    }
}

/// Reconciles two instances of one collection.
pub struct Sync<'a> {
    a: &'a mut Instance,
    b: &'a mut Instance,
    plan: Plan,
}

impl<'a> Sync<'a> {
    /// Pairs two instances with an empty plan.
    pub fn new(a: &'a mut Instance, b: &'a mut Instance) -> Self {
        Self {
            a,
            b,
            plan: Plan::new(),
        }
    }

    /// The plan built so far.
    #[must_use]
    pub const fn plan(&self) -> &Plan {
        &self.plan
    }

    /// Instance on `side`.
    #[must_use]
    pub fn instance(&self, side: Side) -> &Instance {
        match side {
            Side::A => &*self.a,
            Side::B => &*self.b,
        }
    }

    /// Source (`from`) and destination (the other side).
    fn pair_mut(&mut self, from: Side) -> (&Instance, &mut Instance) {
        match from {
            Side::A => (&*self.a, &mut *self.b),
            Side::B => (&*self.b, &mut *self.a),
        }
    }

    /// Builds the action plan.
    ///
    /// With exactly one read-only side, entries only that side knows are
    /// copied into the writable one and nothing else happens. With two
    /// read-only sides nothing is planned.
    ///
    /// # Errors
    ///
    /// Fails with an [`InvariantError`] if either instance is inconsistent.
    pub fn diff(&mut self) -> Result<&Plan> {
        let span = span!(
            Level::DEBUG,
            "sync_diff",
            a = %self.a.root_path(),
            b = %self.b.root_path()
        );
        let _enter = span.enter();

        match (self.a.is_read_only_session(), self.b.is_read_only_session()) {
            (true, true) => {
                debug!("Both instances are read-only, nothing to do");
            }
            (true, false) => self.diff_one_way(Side::A)?,
            (false, true) => self.diff_one_way(Side::B)?,
            (false, false) => {
                for kind in [EntryKind::Directory, EntryKind::File] {
                    self.diff_shared(kind)?;
                    self.diff_missing(kind, Side::A)?;
                    self.diff_missing(kind, Side::B)?;
                }
            }
        }

        debug!(actions = self.plan.len(), "Plan built");
        Ok(&self.plan)
    }

    fn diff_one_way(&mut self, from: Side) -> Result<(), InvariantError> {
        debug!(source = ?from, "One-way diff from read-only instance");
        for kind in [EntryKind::Directory, EntryKind::File] {
            self.diff_missing(kind, from)?;
        }
        Ok(())
    }

    /// Ids of `kind` known to `side`.
    fn ids(&self, kind: EntryKind, side: Side) -> Vec<Fingerprint> {
        let instance = self.instance(side);
        match kind {
            EntryKind::Directory => instance.directories().keys().copied().collect(),
            EntryKind::File => instance.resources().keys().copied().collect(),
        }
    }

    /// Schedules copies for entries `from` has and the other side lacks.
    fn diff_missing(&mut self, kind: EntryKind, from: Side) -> Result<(), InvariantError> {
        let to = from.other();
        for id in self.ids(kind, from) {
            let entry = EntryRef { kind, id };
            if self.instance(to).history(entry).is_some() {
                continue;
            }
            self.schedule_copy(entry, from)?;
        }
        Ok(())
    }

    /// Resolves entries both sides know but whose histories differ.
    fn diff_shared(&mut self, kind: EntryKind) -> Result<(), InvariantError> {
        for id in self.ids(kind, Side::A) {
            let entry = EntryRef { kind, id };
            let (Some(a_history), Some(b_history)) =
                (self.a.history(entry), self.b.history(entry))
            else {
                continue;
            };
            let Some(divergence) = a_history.diff_at(b_history) else {
                continue;
            };

            let a_len = self
                .a
                .relative_path_of(self.a.current_node(entry)?)?
                .relative_string()
                .len();
            let b_len = self
                .b
                .relative_path_of(self.b.current_node(entry)?)?
                .relative_string()
                .len();
            let resolution = resolve_difference(a_history, b_history, divergence, a_len, b_len)
                .map_err(|e| match e {
                    InvariantError::EmptyHistory { .. } => InvariantError::EmptyHistory { id },
                    other => other,
                })?;
            debug!(id = %id, kind = kind.as_str(), divergence, ?resolution, "Histories diverge");

            match resolution {
                Resolution::Copy { from } => self.schedule_copy(entry, from)?,
                Resolution::Move { from } => self.schedule_move(entry, from, divergence)?,
            }
        }
        Ok(())
    }

    fn schedule_copy(&mut self, entry: EntryRef, from: Side) -> Result<(), InvariantError> {
        let source = self.instance(from);
        let depth = source.depth_of(source.current_node(entry)?)?;
        let action = match entry.kind {
            EntryKind::Directory => Action::CopyDirectory { id: entry.id, from },
            EntryKind::File => Action::CopyResource { id: entry.id, from },
        };
        self.plan.push(depth, action);
        self.pair_mut(from).1.mark_dirty();
        Ok(())
    }

    /// A move runs at the winner's depth; a deletion runs after every
    /// constructive action, deepest entries first.
    fn schedule_move(
        &mut self,
        entry: EntryRef,
        from: Side,
        start: usize,
    ) -> Result<(), InvariantError> {
        let (source, destination) = self.pair_mut(from);
        let winner = source.current_node(entry)?;
        let depth = if winner.is_tombstone() {
            -destination.depth_of(destination.current_node(entry)?)? - 1
        } else {
            source.depth_of(winner)?
        };
        destination.mark_dirty();
        self.plan.push(
            depth,
            Action::MoveOrDelete {
                kind: entry.kind,
                id: entry.id,
                from,
                start,
            },
        );
        Ok(())
    }

    /// Executes the plan bucket by bucket.
    ///
    /// Environmental failures abandon the action and are counted; the
    /// destination stays dirty. An [`InvariantError`] aborts the pass.
    ///
    /// # Errors
    ///
    /// Returns the first [`InvariantError`] raised by an action.
    pub fn run(&mut self) -> Result<RunReport> {
        let span = span!(Level::DEBUG, "sync_run", actions = self.plan.len());
        let _enter = span.enter();

        let mut report = RunReport::default();
        while let Some((depth, actions)) = self.plan.pop_next() {
            debug!(depth, count = actions.len(), "Running bucket");
            for action in actions {
                match self.execute(&action) {
                    Ok(follow_ups) => {
                        report.executed += 1;
                        report.renamed += follow_ups.len();
                        for (depth, follow_up) in follow_ups {
                            self.plan.push(depth, follow_up);
                        }
                    }
                    Err(e) if e.is::<InvariantError>() => {
                        return Err(e.context(format!("Sync aborted at `{action}`")));
                    }
                    Err(e) => {
                        warn!(action = %action, error = %format!("{e:#}"), "Action failed");
                        report.failed += 1;
                        self.mark_destination_dirty(&action);
                    }
                }
            }
        }

        info!(
            a = %self.a.root_path(),
            b = %self.b.root_path(),
            executed = report.executed,
            failed = report.failed,
            renamed = report.renamed,
            "Sync finished"
        );
        Ok(report)
    }

    fn mark_destination_dirty(&mut self, action: &Action) {
        match action {
            Action::CopyResource { from, .. }
            | Action::CopyDirectory { from, .. }
            | Action::MoveOrDelete { from, .. } => self.pair_mut(*from).1.mark_dirty(),
            Action::RetryRename { on, .. } => self.instance_mut(*on).mark_dirty(),
        }
    }

    fn instance_mut(&mut self, side: Side) -> &mut Instance {
        match side {
            Side::A => &mut *self.a,
            Side::B => &mut *self.b,
        }
    }

    /// Runs one action and returns the follow-ups it schedules.
    fn execute(&mut self, action: &Action) -> Result<Vec<(i32, Action)>> {
        match action {
            Action::CopyResource { id, from } => self.copy_resource(*id, *from),
            Action::CopyDirectory { id, from } => self.copy_directory(*id, *from),
            Action::MoveOrDelete {
                kind,
                id,
                from,
                start,
            } => self.move_or_delete(EntryRef { kind: *kind, id: *id }, *from, *start),
            Action::RetryRename { kind, id, on, name } => {
                self.retry_rename(EntryRef { kind: *kind, id: *id }, *on, name)?;
                Ok(Vec::new())
            }
        }
    }

    /// Copies the bytes, then records the name actually used on disk.
    fn copy_resource(&mut self, id: Fingerprint, from: Side) -> Result<Vec<(i32, Action)>> {
        let (source, destination) = self.pair_mut(from);
        let resource = source
            .resource(&id)
            .cloned()
            .ok_or(InvariantError::UnknownEntry { id })?;
        let node = resource
            .current()
            .cloned()
            .ok_or(InvariantError::EmptyHistory { id })?;

        if node.parent.is_none() || !source.is_attached(&node)? {
            destination.insert_resource(resource)?;
            return Ok(Vec::new());
        }
        require_parent(destination, &node)?;

        let source_path = source.full_path_of(&node)?.to_path_buf();
        let target_dir = destination.full_path_of(&node)?.dir_path_buf();
        let (name, renamed) = available_name(&target_dir, &node.name);
        let target_path = target_dir.join(&name);

        std::fs::copy(&source_path, &target_path).with_context(|| {
            format!(
                "Failed to copy {} to {}",
                source_path.display(),
                target_path.display()
            )
        })?;
        std::fs::File::open(&target_path)
            .and_then(|file| file.sync_all())
            .with_context(|| format!("Failed to flush {}", target_path.display()))?;

        debug!(from = %source_path.display(), to = %target_path.display(), "Copied file");
        destination.insert_resource(resource)?;

        let entry = EntryRef::file(id);
        if !renamed {
            return Ok(Vec::new());
        }
        destination.rename_current(entry, name)?;
        Ok(vec![retry_for(entry, from.other(), node.name)])
    }

    fn copy_directory(&mut self, id: Fingerprint, from: Side) -> Result<Vec<(i32, Action)>> {
        let (source, destination) = self.pair_mut(from);
        let dir = source
            .directory(&id)
            .ok_or(InvariantError::UnknownEntry { id })?;
        let record = Directory::new(dir.resource.clone(), dir.tagged);
        let node = record
            .current()
            .cloned()
            .ok_or(InvariantError::EmptyHistory { id })?;

        if node.parent.is_none() || !source.is_attached(&node)? {
            destination.insert_directory(record)?;
            return Ok(Vec::new());
        }
        require_parent(destination, &node)?;

        let target_dir = destination.full_path_of(&node)?.dir_path_buf();
        let (name, renamed) = available_name(&target_dir, &node.name);
        let target_path = target_dir.join(name.trim_end_matches('/'));

        match std::fs::create_dir(&target_path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists && !renamed => {}
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to create directory {}", target_path.display())
                });
            }
        }
        if record.tagged {
            write_tag(&target_path, &id)?;
        }

        debug!(path = %target_path.display(), tagged = record.tagged, "Created directory");
        destination.insert_directory(record)?;

        // children placed later in this pass resolve their path through
        // this record, so they land under the name used on disk
        let entry = EntryRef::directory(id);
        if !renamed {
            return Ok(Vec::new());
        }
        destination.rename_current(entry, name)?;
        Ok(vec![retry_for(entry, from.other(), node.name)])
    }

    fn move_or_delete(
        &mut self,
        entry: EntryRef,
        from: Side,
        start: usize,
    ) -> Result<Vec<(i32, Action)>> {
        let (source, destination) = self.pair_mut(from);
        let history = source
            .history(entry)
            .cloned()
            .ok_or(InvariantError::UnknownEntry { id: entry.id })?;
        let winner = history
            .current()
            .cloned()
            .ok_or(InvariantError::EmptyHistory { id: entry.id })?;
        let loser = destination.current_node(entry)?.clone();
        let mut on_disk = None;
        let mut follow_ups = Vec::new();

        if winner.is_tombstone() {
            if !loser.is_tombstone() && destination.is_attached(&loser)? {
                let path = destination.full_path_of(&loser)?.to_path_buf();
                remove_entry(&path, entry.kind)?;
                debug!(path = %path.display(), "Deleted");
            }
        } else if loser.same_origin(&winner) {
            // already in place, possibly under a collision name
            on_disk = Some(loser.name.clone());
        } else if destination.is_attached(&loser)? {
            require_parent(destination, &winner)?;
            let current = destination.full_path_of(&loser)?.to_path_buf();
            let target_dir = destination.full_path_of(&winner)?.dir_path_buf();
            let (name, renamed) = available_name(&target_dir, &winner.name);
            let target = target_dir.join(name.trim_end_matches('/'));

            std::fs::rename(&current, &target).with_context(|| {
                format!("Failed to move {} to {}", current.display(), target.display())
            })?;
            debug!(
                from = %current.display(),
                to = %display_path(destination, &winner),
                "Moved"
            );
            if renamed {
                follow_ups.push(retry_for(entry, from.other(), winner.name.clone()));
                on_disk = Some(name);
            }
        }

        destination.adopt_history(entry, &history, start)?;
        if let Some(name) = on_disk
            && name != winner.name
        {
            destination.rename_current(entry, name)?;
        }
        Ok(follow_ups)
    }

    /// Gives a parked entry its intended name back once that name is free.
    fn retry_rename(&mut self, entry: EntryRef, on: Side, name: &str) -> Result<()> {
        let instance = self.instance_mut(on);
        let node = instance.current_node(entry)?.clone();
        if node.is_tombstone() || node.name == name || !instance.is_attached(&node)? {
            debug!(id = %entry.id, "Nothing left to rename");
            return Ok(());
        }

        let dir = instance.full_path_of(&node)?.dir_path_buf();
        let current = dir.join(node.name.trim_end_matches('/'));
        let target = dir.join(name.trim_end_matches('/'));
        if rename_if_free(&current, &target)? {
            instance.rename_current(entry, name)?;
        }
        Ok(())
    }
}

/// Fails recoverably when the destination lacks the parent directory, e.g.
/// because copying it failed earlier in the pass.
fn require_parent(instance: &Instance, node: &PathNode) -> Result<()> {
    match node.parent {
        Some(parent) if instance.directory(&parent).is_none() => Err(anyhow!(
            "Parent directory {parent} of `{}` is not present in {}",
            node.name,
            instance.root_path()
        )),
        _ => Ok(()),
    }
}

fn retry_for(entry: EntryRef, on: Side, name: String) -> (i32, Action) {
    (
        RETRY_DEPTH,
        Action::RetryRename {
            kind: entry.kind,
            id: entry.id,
            on,
            name,
        },
    )
}

fn remove_entry(path: &Path, kind: EntryKind) -> Result<()> {
    let result = match kind {
        EntryKind::Directory => std::fs::remove_dir_all(path),
        EntryKind::File => std::fs::remove_file(path),
    };
    match result {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to delete {}", path.display())),
    }
}

/// Moves `current` to `target` if `target` is free. Returns whether it moved.
fn rename_if_free(current: &Path, target: &Path) -> Result<bool> {
    if std::fs::symlink_metadata(target).is_ok() {
        debug!(target = %target.display(), "Original name still taken");
        return Ok(false);
    }
    if std::fs::symlink_metadata(current).is_err() {
        debug!(current = %current.display(), "Renamed entry is gone");
        return Ok(false);
    }
    std::fs::rename(current, target).with_context(|| {
        format!(
            "Failed to rename {} back to {}",
            current.display(),
            target.display()
        )
    })?;
    Ok(true)
}
