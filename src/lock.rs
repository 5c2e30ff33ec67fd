//! Per-root locking so that two processes never scan or reconcile the same
//! instance at once.
//!
//! The lock is an advisory exclusive lock on `.lock.collection` in the root.
//! It is released and the file removed when the guard is dropped.

use crate::LOCK_FILE;
use anyhow::{Context, Result, bail};
use fs4::fs_std::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Holds the exclusive lock of one instance root.
#[derive(Debug)]
pub struct RootLock {
    /// Lock file handle
    lock_file: File,
    /// Path to the lock file (for error messages)
    lock_path: PathBuf,
}

impl RootLock {
    /// Acquires the lock of `root`, waiting a bounded time for another
    /// holder to finish.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The lock file cannot be created
    /// - Another process still holds the lock after the timeout
    pub fn acquire(root: &Path) -> Result<Self> {
        let lock_path = root.join(LOCK_FILE);
        let lock_file = Self::try_acquire_lock(&lock_path)?;
        debug!(path = %lock_path.display(), "Acquired root lock");
        Ok(Self {
            lock_file,
            lock_path,
        })
    }

    /// Try to acquire the lock file
    fn try_acquire_lock(lock_path: &Path) -> Result<File> {
        // Use shorter timeouts in test mode for faster test execution
        let lock_timeout = if cfg!(test) {
            Duration::from_millis(100)
        } else {
            Duration::from_secs(30)
        };
        let retry_interval = if cfg!(test) {
            Duration::from_millis(10)
        } else {
            Duration::from_millis(100)
        };

        let start = Instant::now();

        loop {
            let file = File::options()
                .create(true)
                .truncate(false)
                .write(true)
                .open(lock_path)
                .with_context(|| format!("Failed to create lock file: {}", lock_path.display()))?;

            match file.try_lock_exclusive() {
                Ok(true) => {
                    use std::io::Write;
                    let mut file_ref = &file;
                    let since = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .map_or(0, |d| d.as_secs());
                    let _ = file.set_len(0);
                    let _ = writeln!(file_ref, "pid={}\ntime={since}", std::process::id());
                    return Ok(file);
                }
                Ok(false) | Err(_) if start.elapsed() < lock_timeout => {
                    std::thread::sleep(retry_interval);
                }
                Ok(false) | Err(_) => {
                    bail!(
                        "Another process is already working on this root. \
                         Wait for it to finish or remove the stale lock at: {}",
                        lock_path.display()
                    );
                }
            }
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.lock_path
    }

    /// Releases the lock explicitly (normally handled by Drop).
    ///
    /// # Errors
    ///
    /// Returns an error if the unlock operation fails.
    pub fn release(self) -> Result<()> {
        self.lock_file.unlock()?;
        Ok(())
    }
}

impl Drop for RootLock {
    fn drop(&mut self) {
        let _ = self.lock_file.unlock();
        if let Err(e) = fs::remove_file(&self.lock_path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.lock_path.display(), error = %e, "Failed to remove lock file");
        }
    }
}
