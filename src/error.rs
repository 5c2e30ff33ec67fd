//! Fatal invariant violations.
//!
//! These indicate corrupted in-memory or persisted state. Any pass that hits
//! one aborts instead of carrying on. Environmental failures (missing files,
//! permissions, I/O) are ordinary `anyhow` errors and never use this type;
//! callers tell the two apart with `anyhow::Error::is::<InvariantError>()`.

use crate::fingerprint::Fingerprint;
use thiserror::Error;

/// A broken structural invariant of an instance's identity tables.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantError {
    /// A path node names a parent directory that is not in the table.
    #[error("path node '{name}' refers to unknown parent directory {parent}")]
    UnresolvedParent {
        /// Name of the orphaned node.
        name: String,
        /// The parent id that could not be resolved.
        parent: Fingerprint,
    },

    /// A directory node whose name lacks the trailing separator.
    #[error("directory name '{name}' does not end with '/'")]
    DirectoryName {
        /// Offending name.
        name: String,
    },

    /// Walking parent links came back to a directory already visited.
    #[error("cyclic parent chain through directory {id}")]
    Cycle {
        /// First directory seen twice.
        id: Fingerprint,
    },

    /// A node without a parent that is neither the root nor a tombstone.
    #[error("parentless node '{name}' is neither the root nor a tombstone")]
    MalformedTombstone {
        /// Offending name.
        name: String,
    },

    /// A record with no history at all.
    #[error("entry {id} has an empty path history")]
    EmptyHistory {
        /// Offending record.
        id: Fingerprint,
    },

    /// An id referenced by a plan or index is missing from the table.
    #[error("unknown entry {id}")]
    UnknownEntry {
        /// The missing id.
        id: Fingerprint,
    },

    /// A scanned path lives under a directory the instance does not track.
    #[error("no tracked directory for '{path}'")]
    UntrackedParent {
        /// Relative path whose parent could not be found.
        path: String,
    },

    /// A live entry whose parent chain never reaches the instance root.
    #[error("entry {id} is not reachable from the instance root")]
    Detached {
        /// Offending record.
        id: Fingerprint,
    },

    /// Two live records claim one name in the same directory.
    #[error("'{name}' in directory {parent} is claimed by both {first} and {second}")]
    SharedLocation {
        /// Contested name.
        name: String,
        /// Containing directory.
        parent: Fingerprint,
        /// Record seen first.
        first: Fingerprint,
        /// Record seen second.
        second: Fingerprint,
    },
}
