use super::Session;
use crate::output;
use anyhow::{Result, bail};
use std::path::PathBuf;

/// Execute check command - report every inconsistency in the recorded state
///
/// # Errors
///
/// Returns an error if a root cannot be opened or any problem is found.
pub fn execute(roots: &[PathBuf]) -> Result<()> {
    let mut session = Session::open(roots)?;
    let mut total = 0;

    for root in session.roots.clone() {
        let instance = session.registry.open(&root)?;
        let problems = instance.bad_instance_scan();
        if problems.is_empty() {
            output::success(&format!("{}: consistent", instance.root_path()));
            continue;
        }
        output::error(&format!(
            "{}: {}",
            instance.root_path(),
            output::plural(problems.len(), "problem")
        ));
        for problem in &problems {
            output::error(&format!("  {problem}"));
        }
        total += problems.len();
    }

    if total > 0 {
        bail!("Found {}", output::plural(total, "problem"));
    }
    Ok(())
}
