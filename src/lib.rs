#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]
// Allow pedantic strict lints that create false positives in this codebase
#![allow(clippy::arithmetic_side_effects)] // Counters and depths cannot overflow
#![allow(clippy::indexing_slicing)] // Bounds checked by logic

//! # colsync - identity-tracking directory synchronisation
//!
//! colsync keeps several copies ("instances") of one directory tree (a
//! "collection") in step. Every file and directory gets a stable 16-byte
//! identity and an append-only history of where it has been, so renames,
//! moves and deletions made on any copy can be replayed on the others.
//!
//! ## Architecture
//!
//! - [`fingerprint`]: xxHash3-128 digests of content and paths
//! - [`model`]: path nodes, histories and records
//! - [`instance`]: one root's identity tables
//! - [`scan`]: local diff and self-update against the filesystem
//! - [`sync`]: cross-instance reconciliation plan and executor
//! - [`storage`]: the binary `.collection` state file
//! - [`config`]: the `config.collection` settings file
//! - [`registry`]: open instances grouped by collection
//!
//! ## Example Usage
//!
//! ```no_run
//! use colsync::registry::Registry;
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! let mut registry = Registry::new();
//! registry.open(Path::new("/mnt/a/photos"))?;
//! registry.open(Path::new("/mnt/b/photos"))?;
//!
//! for (collection, report) in registry.sync_all()? {
//!     println!("{collection}: {}", report.run);
//! }
//! # Ok(())
//! # }
//! ```

/// Command-line interface definitions (argument parsing structures).
pub mod cli;

/// Driver command implementations.
pub mod commands;

/// Settings file parsing and merged per-instance settings.
pub mod config;

/// Fatal consistency errors.
pub mod error;

/// Content and identity digests.
pub mod fingerprint;

/// Per-root locking.
pub mod lock;

/// Path nodes, histories and records.
pub mod model;

/// Output formatting and verbosity.
pub mod output;

/// Collection-relative paths.
pub mod path;

/// Instance tables, identity generation and path reconstruction.
pub mod instance;

/// Open instances grouped by collection.
pub mod registry;

/// Local diff engine.
pub mod scan;

/// Persisted instance state.
pub mod storage;

/// Cross-instance reconciliation.
pub mod sync;

pub use error::InvariantError;
pub use instance::Instance;
pub use registry::Registry;

/// Current version of the colsync binary.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Binary state file at each instance root.
pub const STATE_FILE: &str = ".collection";

/// Settings file at each instance root.
pub const SETTINGS_FILE: &str = "config.collection";

/// Identity marker inside each tagged directory.
pub const TAG_FILE: &str = ".tag.collection";

/// Lock file held while a root is in use.
pub const LOCK_FILE: &str = ".lock.collection";

/// Name of the tombstone node.
pub const TOMBSTONE_NAME: &str = ".deleted";

/// Length of a read-only session token.
pub const SESSION_TOKEN_LEN: usize = 10;
