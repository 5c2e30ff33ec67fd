//! Open instances grouped by collection.
//!
//! A [`Registry`] is created by the driver at start-up and passed to whatever
//! opens roots, so opening the same root twice returns the same instance.
//! Call [`Registry::clear`] to drop every instance (e.g. between tests).

use crate::config::InstanceSettings;
use crate::error::InvariantError;
use crate::fingerprint::Fingerprint;
use crate::instance::Instance;
use crate::path::root_string;
use crate::scan::{UpdateSummary, self_update};
use crate::storage;
use crate::sync::{Plan, RunReport, Sync};
use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{Level, debug, info, span, warn};

/// Outcome of one [`Collection::sync_all`] pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Local changes found per root.
    pub updates: BTreeMap<String, UpdateSummary>,
    /// Roots skipped because they could not be scanned.
    pub unavailable: Vec<String>,
    /// Summed reconciliation results.
    pub run: RunReport,
    /// Instances persisted.
    pub written: usize,
}

/// The instances of one collection, keyed by root path.
#[derive(Debug, Clone)]
pub struct Collection {
    id: Fingerprint,
    instances: BTreeMap<String, Instance>,
}

impl Collection {
    /// Empty collection.
    #[must_use]
    pub const fn new(id: Fingerprint) -> Self {
        Self {
            id,
            instances: BTreeMap::new(),
        }
    }

    /// Collection identity.
    #[must_use]
    pub const fn id(&self) -> Fingerprint {
        self.id
    }

    /// Instances by root path.
    #[must_use]
    pub const fn instances(&self) -> &BTreeMap<String, Instance> {
        &self.instances
    }

    /// Instance rooted at `root`.
    #[must_use]
    pub fn instance(&self, root: &str) -> Option<&Instance> {
        self.instances.get(root)
    }

    /// Mutable instance rooted at `root`.
    pub fn instance_mut(&mut self, root: &str) -> Option<&mut Instance> {
        self.instances.get_mut(root)
    }

    /// Adds an instance, returning it.
    pub fn insert(&mut self, instance: Instance) -> &mut Instance {
        let root = instance.root_path().to_string();
        self.instances.entry(root).or_insert(instance)
    }

    /// Self-updates every instance, reconciles each with the one before it,
    /// then writes every dirty instance.
    ///
    /// A root that cannot be scanned (e.g. an unmounted drive) sits the pass
    /// out.
    ///
    /// # Errors
    ///
    /// Returns an error on an [`InvariantError`] or if a write fails.
    pub fn sync_all(&mut self) -> Result<PassReport> {
        let span = span!(Level::INFO, "collection_sync", id = %self.id, instances = self.instances.len());
        let _enter = span.enter();

        let mut report = PassReport::default();
        let mut available = self.update_all(&mut report)?;

        for i in 1..available.len() {
            let (before, after) = available.split_at_mut(i);
            let (Some(previous), Some(current)) = (before.last_mut(), after.first_mut()) else {
                continue;
            };
            let mut sync = Sync::new(current, previous);
            sync.diff()?;
            let run = sync.run()?;
            report.run.executed += run.executed;
            report.run.failed += run.failed;
            report.run.renamed += run.renamed;
        }

        for instance in self.instances.values_mut() {
            if instance.write()? {
                report.written += 1;
            }
        }

        info!(
            written = report.written,
            executed = report.run.executed,
            failed = report.run.failed,
            "Collection pass finished"
        );
        Ok(report)
    }

    /// Self-updates every instance and returns the pairs' plans without
    /// running them. Nothing is written.
    ///
    /// # Errors
    ///
    /// Returns an error on an [`InvariantError`].
    pub fn preview(&mut self) -> Result<Vec<PairPlan>> {
        let mut report = PassReport::default();
        let mut available = self.update_all(&mut report)?;
        let mut plans = Vec::new();
        for i in 1..available.len() {
            let (before, after) = available.split_at_mut(i);
            let (Some(previous), Some(current)) = (before.last_mut(), after.first_mut()) else {
                continue;
            };
            let a = current.root_path().to_string();
            let b = previous.root_path().to_string();
            let mut sync = Sync::new(current, previous);
            let plan = sync.diff()?.clone();
            plans.push(PairPlan { a, b, plan });
        }
        Ok(plans)
    }

    /// Self-updates every instance; returns the ones that could be scanned.
    fn update_all(&mut self, report: &mut PassReport) -> Result<Vec<&mut Instance>> {
        let mut available = Vec::new();
        for (root, instance) in &mut self.instances {
            match self_update(instance) {
                Ok(summary) => {
                    report.updates.insert(root.clone(), summary);
                    available.push(instance);
                }
                Err(e) if e.is::<InvariantError>() => {
                    return Err(e.context(format!("Instance at {root} is inconsistent")));
                }
                Err(e) => {
                    warn!(root = %root, error = %format!("{e:#}"), "Skipping unavailable instance");
                    report.unavailable.push(root.clone());
                }
            }
        }
        Ok(available)
    }
}

/// Planned actions between two roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairPlan {
    /// Root of side A.
    pub a: String,
    /// Root of side B.
    pub b: String,
    /// Actions that would run.
    pub plan: Plan,
}

/// Every open collection.
#[derive(Debug, Default)]
pub struct Registry {
    collections: BTreeMap<Fingerprint, Collection>,
}

impl Registry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open collections.
    #[must_use]
    pub const fn collections(&self) -> &BTreeMap<Fingerprint, Collection> {
        &self.collections
    }

    /// A collection by id.
    #[must_use]
    pub fn collection(&self, id: &Fingerprint) -> Option<&Collection> {
        self.collections.get(id)
    }

    /// Mutable collection by id.
    pub fn collection_mut(&mut self, id: &Fingerprint) -> Option<&mut Collection> {
        self.collections.get_mut(id)
    }

    /// Collection id of the instance already open at `root`, if any.
    fn find(&self, root: &str) -> Option<Fingerprint> {
        self.collections
            .values()
            .find(|c| c.instances.contains_key(root))
            .map(Collection::id)
    }

    /// Opens the instance rooted at `root`, loading its state file or
    /// creating it.
    ///
    /// A new root joins the collection named by the `id` setting, or starts a
    /// collection of its own. A `read only` root gets a session token.
    ///
    /// # Errors
    ///
    /// Returns an error if the root is not a directory, or the state or
    /// settings cannot be read.
    pub fn open(&mut self, root: &Path) -> Result<&mut Instance> {
        if !root.is_dir() {
            bail!("Not a directory: {}", root.display());
        }
        let root_str = root_string(root);

        let collection_id = match self.find(&root_str) {
            Some(id) => id,
            None => {
                let settings = InstanceSettings::load(root)?;
                let mut instance = match storage::load(root)? {
                    Some(instance) => instance,
                    None => {
                        let id = match &settings.id {
                            Some(encoded) => Fingerprint::from_base64(encoded).with_context(|| {
                                format!("Invalid collection id in settings of {}", root.display())
                            })?,
                            None => Fingerprint::random(),
                        };
                        debug!(root = %root_str, collection = %id, "Creating instance");
                        let mut instance = Instance::new(&root_str, id);
                        instance.mark_dirty();
                        instance
                    }
                };
                if let Some(encoded) = &settings.id
                    && encoded != &instance.collection_id().to_base64()
                {
                    warn!(root = %root_str, setting = %encoded, "Settings id disagrees with state file, keeping state");
                }
                instance.apply_settings(settings);

                let id = instance.collection_id();
                self.collections
                    .entry(id)
                    .or_insert_with(|| Collection::new(id))
                    .insert(instance);
                id
            }
        };

        self.collections
            .get_mut(&collection_id)
            .and_then(|c| c.instance_mut(&root_str))
            .with_context(|| format!("Instance at {root_str} vanished from the registry"))
    }

    /// Runs [`Collection::sync_all`] on every collection. Collections share
    /// nothing, so they run in parallel.
    ///
    /// # Errors
    ///
    /// Returns the first collection failure.
    pub fn sync_all(&mut self) -> Result<Vec<(Fingerprint, PassReport)>> {
        self.collections
            .par_iter_mut()
            .map(|(id, collection)| {
                collection
                    .sync_all()
                    .with_context(|| format!("Failed to sync collection {id}"))
                    .map(|report| (*id, report))
            })
            .collect()
    }

    /// [`Collection::preview`] for every collection.
    ///
    /// # Errors
    ///
    /// Returns the first collection failure.
    pub fn preview(&mut self) -> Result<Vec<PairPlan>> {
        let mut plans = Vec::new();
        for (id, collection) in &mut self.collections {
            plans.extend(
                collection
                    .preview()
                    .with_context(|| format!("Failed to plan collection {id}"))?,
            );
        }
        Ok(plans)
    }

    /// Writes every dirty instance.
    ///
    /// # Errors
    ///
    /// Returns an error if a write fails.
    pub fn write_all(&mut self) -> Result<usize> {
        let mut written = 0;
        for instance in self
            .collections
            .values_mut()
            .flat_map(|c| c.instances.values_mut())
        {
            if instance.write()? {
                written += 1;
            }
        }
        Ok(written)
    }

    /// Drops every open collection.
    pub fn clear(&mut self) {
        self.collections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_open_twice_returns_same_instance() -> Result<()> {
        let dir = tempdir()?;
        let mut registry = Registry::new();
        let first = registry.open(dir.path())?.collection_id();
        let second = registry.open(dir.path())?.collection_id();
        assert_eq!(first, second);
        assert_eq!(registry.collections().len(), 1);
        Ok(())
    }

    #[test]
    fn test_new_root_joins_by_settings_id() -> Result<()> {
        let (a, b) = (tempdir()?, tempdir()?);
        let mut registry = Registry::new();
        let id = {
            let instance = registry.open(a.path())?;
            assert!(instance.is_dirty());
            instance.write()?;
            instance.collection_id()
        };

        std::fs::write(b.path().join(crate::SETTINGS_FILE), format!("id:{}\n", id.to_base64()))?;
        assert_eq!(registry.open(b.path())?.collection_id(), id);
        assert_eq!(registry.collection(&id).map(|c| c.instances().len()), Some(2));
        Ok(())
    }

    #[test]
    fn test_reopen_after_clear_loads_state() -> Result<()> {
        let dir = tempdir()?;
        std::fs::write(dir.path().join("kept.txt"), b"kept")?;
        let mut registry = Registry::new();
        let id = {
            let instance = registry.open(dir.path())?;
            self_update(instance)?;
            instance.write()?;
            instance.collection_id()
        };

        registry.clear();
        let instance = registry.open(dir.path())?;
        assert_eq!(instance.collection_id(), id);
        assert_eq!(instance.resources().len(), 1);
        assert!(!instance.is_dirty());
        Ok(())
    }

    #[test]
    fn test_open_rejects_missing_root() {
        let mut registry = Registry::new();
        assert!(registry.open(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_sync_all_spreads_files() -> Result<()> {
        let (a, b) = (tempdir()?, tempdir()?);
        std::fs::write(a.path().join("one.txt"), b"1")?;
        std::fs::write(b.path().join("two.txt"), b"2")?;

        let mut registry = Registry::new();
        let id = {
            let instance = registry.open(a.path())?;
            instance.write()?;
            instance.collection_id()
        };
        std::fs::write(b.path().join(crate::SETTINGS_FILE), format!("id:{}\n", id.to_base64()))?;
        registry.open(b.path())?;

        let reports = registry.sync_all()?;
        assert_eq!(reports.len(), 1);
        assert!(a.path().join("two.txt").exists());
        assert!(b.path().join("one.txt").exists());
        assert!(b.path().join(crate::STATE_FILE).exists());
        Ok(())
    }
}
