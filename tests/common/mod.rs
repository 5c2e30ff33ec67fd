#![allow(dead_code)]

use anyhow::Result;
use colsync::fingerprint::Fingerprint;
use colsync::instance::Instance;
use colsync::path::root_string;
use colsync::scan::self_update;
use colsync::sync::{RunReport, Sync};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Two empty roots of one collection, backed by temporary directories.
pub struct TestPair {
    pub dir_a: TempDir,
    pub dir_b: TempDir,
    pub a: Instance,
    pub b: Instance,
}

impl TestPair {
    /// Create two empty instances sharing a collection id
    pub fn new() -> Result<Self> {
        let dir_a = TempDir::new()?;
        let dir_b = TempDir::new()?;
        let collection = Fingerprint::digest(b"test collection");
        let a = Instance::new(&root_string(dir_a.path()), collection);
        let b = Instance::new(&root_string(dir_b.path()), collection);
        Ok(Self { dir_a, dir_b, a, b })
    }

    pub fn path_a(&self, relative: &str) -> PathBuf {
        self.dir_a.path().join(relative)
    }

    pub fn path_b(&self, relative: &str) -> PathBuf {
        self.dir_b.path().join(relative)
    }

    /// Self-update both sides
    pub fn update(&mut self) -> Result<()> {
        self_update(&mut self.a)?;
        self_update(&mut self.b)?;
        Ok(())
    }

    /// Self-update both sides, then diff and run A against B
    pub fn sync(&mut self) -> Result<RunReport> {
        self.update()?;
        let mut sync = Sync::new(&mut self.a, &mut self.b);
        sync.diff()?;
        sync.run()
    }

    /// Persist both sides
    pub fn write(&mut self) -> Result<()> {
        self.a.write()?;
        self.b.write()?;
        Ok(())
    }
}

/// Write a file, creating parent directories
pub fn write_file(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

/// Names in a directory, bookkeeping files excluded, sorted
pub fn listing(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name().to_string_lossy().into_owned();
        if !name.ends_with(".collection") {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
