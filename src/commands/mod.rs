//! Driver commands. Each one locks the roots it touches, opens them through a
//! [`Registry`] and reports through the [`output`](crate::output) module.

/// `colsync check`
pub mod check;
/// `colsync status`
pub mod status;
/// `colsync sync`
pub mod sync;
/// `colsync update`
pub mod update;

use crate::lock::RootLock;
use crate::registry::Registry;
use anyhow::{Context, Result};
use std::path::PathBuf;

/// Held locks plus the registry the roots were opened in.
pub struct Session {
    /// Open instances.
    pub registry: Registry,
    /// Roots as opened, in command-line order.
    pub roots: Vec<PathBuf>,
    /// Released on drop.
    _locks: Vec<RootLock>,
}

impl Session {
    /// Locks and opens every root.
    ///
    /// # Errors
    ///
    /// Returns an error if a root cannot be locked or opened.
    pub fn open(roots: &[PathBuf]) -> Result<Self> {
        let mut registry = Registry::new();
        let mut locks = Vec::with_capacity(roots.len());
        let mut opened = Vec::with_capacity(roots.len());

        for root in roots {
            let root = root
                .canonicalize()
                .with_context(|| format!("Cannot access root: {}", root.display()))?;
            if opened.contains(&root) {
                continue;
            }
            locks.push(RootLock::acquire(&root)?);
            registry.open(&root)?;
            opened.push(root);
        }

        Ok(Self {
            registry,
            roots: opened,
            _locks: locks,
        })
    }
}
