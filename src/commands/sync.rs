use super::Session;
use crate::output;
use anyhow::Result;
use std::path::PathBuf;

/// Execute sync command - update every root, reconcile the roots of each
/// collection, and save them
///
/// With `dry_run` the roots are scanned in memory and the planned actions are
/// printed; nothing on disk changes.
///
/// # Errors
///
/// Returns an error if a root cannot be opened, or a collection fails with
/// an inconsistency or a write error.
pub fn execute(roots: &[PathBuf], dry_run: bool) -> Result<()> {
    let mut session = Session::open(roots)?;

    if session.registry.collections().values().all(|c| c.instances().len() < 2) {
        output::warning("No two roots belong to the same collection; nothing to reconcile");
    }

    if dry_run {
        for pair in session.registry.preview()? {
            output::action("Plan", &format!("{} <-> {}", pair.a, pair.b));
            if pair.plan.is_empty() {
                output::info("  in sync");
            }
            for (depth, action) in pair.plan.iter() {
                println!("{depth:>4} {action}");
            }
        }
        return Ok(());
    }

    for (id, report) in session.registry.sync_all()? {
        for root in &report.unavailable {
            output::warning(&format!("{root}: unavailable, skipped"));
        }
        for (root, summary) in &report.updates {
            if summary.has_changes() {
                output::verbose(&format!(
                    "{root}: {} added, {} moved, {} deleted",
                    summary.added, summary.moved, summary.deleted
                ));
            }
        }
        let message = format!("Collection {id}: {}, {} saved", report.run, output::plural(report.written, "root"));
        if report.run.failed > 0 {
            output::warning(&message);
        } else {
            output::success(&message);
        }
    }

    Ok(())
}
