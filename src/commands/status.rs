use super::Session;
use crate::output::{self, ChangeKind};
use crate::scan::{LocalDiff, self_diff};
use anyhow::Result;
use std::path::PathBuf;

/// Execute status command - list what an update would record
///
/// Nothing is written; the state file stays as it was.
///
/// # Errors
///
/// Returns an error if a root cannot be opened or walked.
pub fn execute(roots: &[PathBuf]) -> Result<()> {
    let mut session = Session::open(roots)?;

    for root in session.roots.clone() {
        let instance = session.registry.open(&root)?;
        let diff = self_diff(instance)?;

        output::action("Root", instance.root_path());
        if diff.is_clean() {
            output::info("  nothing changed");
            continue;
        }
        print_changes(&diff.directories);
        print_changes(&diff.files);
    }

    Ok(())
}

fn print_changes(diff: &LocalDiff) {
    for path in &diff.added {
        output::change(ChangeKind::Added, path);
    }
    for path in diff.removed.keys() {
        output::change(ChangeKind::Removed, path);
    }
    if !diff.deleted.is_empty() {
        output::verbose(&format!(
            "  {} already deleted",
            output::plural(diff.deleted.len(), "record")
        ));
    }
}
