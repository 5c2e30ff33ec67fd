//! Identity and history model.
//!
//! A [`Resource`] keeps a stable id and an append-only [`PathHistory`]: one
//! [`PathNode`] per location it has ever occupied, oldest first. Deletion is
//! itself a location (the tombstone), so a deleted resource keeps its record.
//!
//! Nodes refer to their parent directory by id only. Resolving that id is
//! always done against the owning instance's directory table.

use crate::TOMBSTONE_NAME;
use crate::fingerprint::{Fingerprint, optional_eq};
use crate::sync::naming::original_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the root node.
pub const ROOT_NAME: &str = "/";

/// One recorded location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathNode {
    /// Leaf name; directories end with `/`.
    pub name: String,
    /// Id of the containing directory, `None` for the root and tombstones.
    pub parent: Option<Fingerprint>,
}

impl PathNode {
    /// A node inside `parent`.
    #[must_use]
    pub fn new(name: impl Into<String>, parent: Option<Fingerprint>) -> Self {
        Self {
            name: name.into(),
            parent,
        }
    }

    /// The logical-deletion marker.
    #[must_use]
    pub fn tombstone() -> Self {
        Self::new(TOMBSTONE_NAME, None)
    }

    /// The instance root's node.
    #[must_use]
    pub fn root() -> Self {
        Self::new(ROOT_NAME, None)
    }

    /// Whether this node marks a deletion.
    #[must_use]
    pub fn is_tombstone(&self) -> bool {
        self.parent.is_none() && self.name == TOMBSTONE_NAME
    }

    /// Whether this is the root node.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none() && self.name == ROOT_NAME
    }

    /// Same name and same parent (two absent parents compare equal).
    #[must_use]
    pub fn same_location(&self, other: &Self) -> bool {
        self.name == other.name && optional_eq(self.parent.as_ref(), other.parent.as_ref())
    }

    /// Same location once collision prefixes are stripped from both names.
    ///
    /// An entry parked under `0XXXXX_name` on one instance is the same
    /// location as `name` on another.
    #[must_use]
    pub fn same_origin(&self, other: &Self) -> bool {
        original_name(&self.name) == original_name(&other.name)
            && optional_eq(self.parent.as_ref(), other.parent.as_ref())
    }
}

/// Ordered locations of one resource, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PathHistory {
    nodes: Vec<PathNode>,
}

impl PathHistory {
    /// History starting at `first`.
    #[must_use]
    pub fn new(first: PathNode) -> Self {
        Self { nodes: vec![first] }
    }

    /// History from a list of nodes, oldest first.
    #[must_use]
    pub fn from_nodes(nodes: Vec<PathNode>) -> Self {
        Self { nodes }
    }

    /// The current location.
    #[must_use]
    pub fn current(&self) -> Option<&PathNode> {
        self.nodes.last()
    }

    /// Appends a location.
    pub fn push(&mut self, node: PathNode) {
        self.nodes.push(node);
    }

    /// Number of recorded locations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, oldest first.
    #[must_use]
    pub fn nodes(&self) -> &[PathNode] {
        &self.nodes
    }

    /// Whether the current location is a tombstone.
    #[must_use]
    pub fn is_deleted(&self) -> bool {
        self.current().is_some_and(PathNode::is_tombstone)
    }

    /// First index at which two histories differ.
    ///
    /// Returns `None` when they are identical, the first index whose name or
    /// parent differs, or the shorter length when one is a strict prefix of
    /// the other. Names are compared without their collision prefix.
    #[must_use]
    pub fn diff_at(&self, other: &Self) -> Option<usize> {
        let shared = self.nodes.len().min(other.nodes.len());
        if let Some(idx) = self
            .nodes
            .iter()
            .zip(&other.nodes)
            .position(|(a, b)| !a.same_origin(b))
        {
            return Some(idx);
        }
        (self.nodes.len() != other.nodes.len()).then_some(shared)
    }

    /// Renames the current location in place.
    pub fn rename_current(&mut self, name: impl Into<String>) {
        if let Some(last) = self.nodes.last_mut() {
            last.name = name.into();
        }
    }

    /// Makes this history match `from` from index `start` onward: nodes are
    /// overwritten or appended, and any excess tail is truncated.
    pub fn adopt_tail(&mut self, from: &Self, start: usize) {
        for (idx, node) in from.nodes.iter().enumerate().skip(start) {
            if idx < self.nodes.len() {
                self.nodes[idx] = node.clone();
            } else {
                self.nodes.push(node.clone());
            }
        }
        self.nodes.truncate(from.nodes.len());
    }
}

/// A tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    /// Stable identity.
    pub id: Fingerprint,
    /// Digest of the content (or of the path, for directories).
    pub content_hash: Fingerprint,
    /// Byte length; 0 for directories.
    pub size: i64,
    /// Every location ever occupied.
    pub history: PathHistory,
}

impl Resource {
    /// Current location.
    #[must_use]
    pub fn current(&self) -> Option<&PathNode> {
        self.history.current()
    }
}

/// A tracked directory: a resource plus name-indexed child maps.
///
/// The child maps hold ids, never records; the records live in the owning
/// instance's tables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    /// Identity, hash and history.
    pub resource: Resource,
    /// Sub-directory name (with trailing `/`) to id.
    pub dirs: BTreeMap<String, Fingerprint>,
    /// File name to id.
    pub files: BTreeMap<String, Fingerprint>,
    /// Whether the id has been pinned in a tag marker on disk.
    pub tagged: bool,
}

impl Directory {
    /// A directory with empty child maps.
    #[must_use]
    pub fn new(resource: Resource, tagged: bool) -> Self {
        Self {
            resource,
            dirs: BTreeMap::new(),
            files: BTreeMap::new(),
            tagged,
        }
    }

    /// Stable identity.
    #[must_use]
    pub const fn id(&self) -> Fingerprint {
        self.resource.id
    }

    /// Current location.
    #[must_use]
    pub fn current(&self) -> Option<&PathNode> {
        self.resource.current()
    }

    /// Child map for the given kind.
    pub fn children_mut(&mut self, kind: EntryKind) -> &mut BTreeMap<String, Fingerprint> {
        match kind {
            EntryKind::Directory => &mut self.dirs,
            EntryKind::File => &mut self.files,
        }
    }
}

/// Which table an entry lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntryKind {
    /// Directory table.
    Directory,
    /// Resource (file) table.
    File,
}

impl EntryKind {
    /// Lower-case label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Directory => "directory",
            Self::File => "file",
        }
    }
}

/// A typed index into one of an instance's tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryRef {
    /// Table.
    pub kind: EntryKind,
    /// Id within the table.
    pub id: Fingerprint,
}

impl EntryRef {
    /// A directory reference.
    #[must_use]
    pub const fn directory(id: Fingerprint) -> Self {
        Self {
            kind: EntryKind::Directory,
            id,
        }
    }

    /// A file reference.
    #[must_use]
    pub const fn file(id: Fingerprint) -> Self {
        Self {
            kind: EntryKind::File,
            id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(name: &str, parent: u8) -> PathNode {
        PathNode::new(name, Some(Fingerprint::from_bytes([parent; 16])))
    }

    #[test]
    fn test_tombstone_shape() {
        assert!(PathNode::tombstone().is_tombstone());
        assert!(!PathNode::root().is_tombstone());
        assert!(PathNode::root().is_root());
        assert!(!PathNode::new(".deleted", Some(Fingerprint::ZERO)).is_tombstone());
    }

    #[test]
    fn test_diff_at_identical() {
        let a = PathHistory::from_nodes(vec![node("a", 1), node("b", 1)]);
        assert_eq!(a.diff_at(&a.clone()), None);
    }

    #[test]
    fn test_diff_at_after_shared_prefix() {
        let a = PathHistory::from_nodes(vec![node("a", 1), node("b", 1), node("c", 1)]);
        let b = PathHistory::from_nodes(vec![node("a", 1), node("b", 1), node("d", 1)]);
        assert_eq!(a.diff_at(&b), Some(2));
    }

    #[test]
    fn test_diff_at_parent_differs() {
        let a = PathHistory::from_nodes(vec![node("a", 1), node("b", 1)]);
        let b = PathHistory::from_nodes(vec![node("a", 1), node("b", 2)]);
        assert_eq!(a.diff_at(&b), Some(1));
    }

    #[test]
    fn test_diff_at_strict_prefix() {
        let short = PathHistory::from_nodes(vec![node("a", 1)]);
        let long = PathHistory::from_nodes(vec![node("a", 1), PathNode::tombstone()]);
        assert_eq!(short.diff_at(&long), Some(1));
        assert_eq!(long.diff_at(&short), Some(1));
    }

    #[test]
    fn test_diff_at_ignores_collision_prefix() {
        let a = PathHistory::from_nodes(vec![node("a", 1), node("notes.txt", 1)]);
        let b = PathHistory::from_nodes(vec![node("a", 1), node("0QWERT_notes.txt", 1)]);
        assert_eq!(a.diff_at(&b), None);

        let moved = PathHistory::from_nodes(vec![node("a", 1), node("0QWERT_notes.txt", 2)]);
        assert_eq!(a.diff_at(&moved), Some(1));
        assert!(!node("notes.txt", 1).same_location(&node("0QWERT_notes.txt", 1)));
    }

    #[test]
    fn test_rename_current_keeps_length() {
        let mut history = PathHistory::from_nodes(vec![node("a", 1), node("0QWERT_b", 1)]);
        history.rename_current("b");
        assert_eq!(history.len(), 2);
        assert_eq!(history.current(), Some(&node("b", 1)));
    }

    #[test]
    fn test_adopt_tail_truncates_and_overwrites() {
        let mut to = PathHistory::from_nodes(vec![node("a", 1), node("x", 1), node("y", 1)]);
        let from = PathHistory::from_nodes(vec![node("a", 1), node("b", 2)]);
        to.adopt_tail(&from, 1);
        assert_eq!(to, from);
    }

    #[test]
    fn test_adopt_tail_appends() {
        let mut to = PathHistory::from_nodes(vec![node("a", 1)]);
        let from =
            PathHistory::from_nodes(vec![node("a", 1), node("b", 2), PathNode::tombstone()]);
        to.adopt_tail(&from, 1);
        assert_eq!(to, from);
        assert!(to.is_deleted());
    }
}
