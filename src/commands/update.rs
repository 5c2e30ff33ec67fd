use super::Session;
use crate::output;
use crate::scan::self_update;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Execute update command - record local changes and save each root
///
/// # Errors
///
/// Returns an error if a root cannot be opened, scanned, or written.
pub fn execute(roots: &[PathBuf]) -> Result<()> {
    let mut session = Session::open(roots)?;

    for root in session.roots.clone() {
        let instance = session.registry.open(&root)?;
        let summary = self_update(instance)
            .with_context(|| format!("Failed to update {}", root.display()))?;
        let written = instance.write()?;

        if summary.has_changes() {
            output::action(
                "Updated",
                &format!(
                    "{}: {} added, {} moved, {} deleted",
                    instance.root_path(),
                    summary.added,
                    summary.moved,
                    summary.deleted
                ),
            );
        } else if written {
            output::action("Saved", instance.root_path());
        } else {
            output::info(&format!("{}: up to date", instance.root_path()));
        }
        if summary.skipped > 0 {
            output::warning(&format!(
                "{}: skipped {}",
                instance.root_path(),
                output::plural(summary.skipped, "unreadable path")
            ));
        }
    }

    Ok(())
}
