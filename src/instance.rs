//! One root's view of a collection.
//!
//! An [`Instance`] owns two id-keyed tables: resources (files) and
//! directories. Directory child maps are name indexes into those tables and
//! are kept in step with each record's current location by the `link`/`unlink`
//! helpers below. Nothing outside this module edits a history in place.

use crate::config::InstanceSettings;
use crate::error::InvariantError;
use crate::fingerprint::{Fingerprint, fingerprint_of, write_tag};
use crate::model::{Directory, EntryKind, EntryRef, PathHistory, PathNode, Resource};
use crate::path::{CollectionPath, normalize_root};
use crate::{SESSION_TOKEN_LEN, TOMBSTONE_NAME};
use anyhow::{Context, Result};
use rand::Rng;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use tracing::{debug, warn};

/// Identity of every instance's root directory.
#[must_use]
pub fn root_id() -> Fingerprint {
    Fingerprint::digest_parts(&[Fingerprint::ZERO.as_bytes(), b"/"])
}

/// A filesystem root's identity tables and settings.
#[derive(Debug, Clone)]
pub struct Instance {
    collection_id: Fingerprint,
    root_path: String,
    resources: BTreeMap<Fingerprint, Resource>,
    directories: BTreeMap<Fingerprint, Directory>,
    settings: InstanceSettings,
    session_token: Option<String>,
    dirty: bool,
}

impl Instance {
    /// Empty instance holding only its root directory.
    #[must_use]
    pub fn new(root: &str, collection_id: Fingerprint) -> Self {
        let root_dir = Directory::new(
            Resource {
                id: root_id(),
                content_hash: Fingerprint::ZERO,
                size: 0,
                history: PathHistory::new(PathNode::root()),
            },
            false,
        );

        let mut directories = BTreeMap::new();
        directories.insert(root_dir.id(), root_dir);

        Self {
            collection_id,
            root_path: normalize_root(root),
            resources: BTreeMap::new(),
            directories,
            settings: InstanceSettings::default(),
            session_token: None,
            dirty: false,
        }
    }

    /// Collection this instance belongs to.
    #[must_use]
    pub const fn collection_id(&self) -> Fingerprint {
        self.collection_id
    }

    /// Normalised root path (forward slashes, no trailing separator).
    #[must_use]
    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// Root path as a filesystem path.
    #[must_use]
    pub fn root_dir(&self) -> PathBuf {
        crate::path::fs_path(&format!("{}/", self.root_path))
    }

    /// File table.
    #[must_use]
    pub const fn resources(&self) -> &BTreeMap<Fingerprint, Resource> {
        &self.resources
    }

    /// Directory table, root included.
    #[must_use]
    pub const fn directories(&self) -> &BTreeMap<Fingerprint, Directory> {
        &self.directories
    }

    /// A file record.
    #[must_use]
    pub fn resource(&self, id: &Fingerprint) -> Option<&Resource> {
        self.resources.get(id)
    }

    /// A directory record.
    #[must_use]
    pub fn directory(&self, id: &Fingerprint) -> Option<&Directory> {
        self.directories.get(id)
    }

    /// The root directory record.
    #[must_use]
    pub fn root(&self) -> Option<&Directory> {
        self.directories.get(&root_id())
    }

    /// Merged settings.
    #[must_use]
    pub const fn settings(&self) -> &InstanceSettings {
        &self.settings
    }

    /// Replaces the settings. A `read only` root gets a fresh session token.
    pub fn apply_settings(&mut self, settings: InstanceSettings) {
        self.session_token = settings.read_only.then(mint_session_token);
        self.settings = settings;
    }

    /// Token minted for this read-only session, if any.
    #[must_use]
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Whether this instance is an active one-way source.
    #[must_use]
    pub fn is_read_only_session(&self) -> bool {
        self.session_token
            .as_ref()
            .is_some_and(|token| token.len() == SESSION_TOKEN_LEN)
    }

    /// Whether unsaved changes exist.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flags the instance as needing a write.
    pub const fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// History of any entry.
    #[must_use]
    pub fn history(&self, entry: EntryRef) -> Option<&PathHistory> {
        match entry.kind {
            EntryKind::File => self.resources.get(&entry.id).map(|r| &r.history),
            EntryKind::Directory => self.directories.get(&entry.id).map(|d| &d.resource.history),
        }
    }

    /// Whether an id is taken in either table.
    #[must_use]
    pub fn contains_id(&self, id: &Fingerprint) -> bool {
        self.resources.contains_key(id) || self.directories.contains_key(id)
    }

    /// Derives a stable identity for content found at `node`.
    ///
    /// Read-only sessions scope ids to the session token. Without duplicates
    /// the id is the content hash itself. Otherwise it mixes in name and
    /// parent and is re-digested until unused.
    #[must_use]
    pub fn generate_id(&self, content_hash: &Fingerprint, node: &PathNode) -> Fingerprint {
        if self.is_read_only_session()
            && let Some(token) = &self.session_token
        {
            let id = Fingerprint::digest_parts(&[content_hash.as_bytes(), token.as_bytes()]);
            return self.first_free(id);
        }

        if !self.settings.allow_duplicates {
            return *content_hash;
        }

        self.derive_unique(content_hash, node)
    }

    /// `digest(content ++ name ++ parent)`, re-digested until unused.
    fn derive_unique(&self, content_hash: &Fingerprint, node: &PathNode) -> Fingerprint {
        let parent = node.parent.unwrap_or(Fingerprint::ZERO);
        let id = Fingerprint::digest_parts(&[
            content_hash.as_bytes(),
            node.name.as_bytes(),
            parent.as_bytes(),
        ]);
        self.first_free(id)
    }

    fn first_free(&self, mut id: Fingerprint) -> Fingerprint {
        while self.contains_id(&id) {
            id = Fingerprint::digest(id.as_bytes());
        }
        id
    }

    /// Registers a newly found file at `node`.
    ///
    /// An id that already belongs to a deleted record resurrects it. A live
    /// record with the same id (identical content without duplicates) is left
    /// as it is and the new copy stays untracked.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::UnresolvedParent`] if the parent is unknown.
    pub fn add_resource(
        &mut self,
        content_hash: Fingerprint,
        size: i64,
        node: PathNode,
    ) -> Result<Fingerprint, InvariantError> {
        self.require_parent(&node)?;
        let id = self.generate_id(&content_hash, &node);

        if let Some(existing) = self.resources.get(&id) {
            if !existing.history.is_deleted() {
                warn!(id = %id, name = %node.name, "Identical content already tracked, leaving copy untracked");
                return Ok(id);
            }
            debug!(id = %id, name = %node.name, "Resurrecting deleted file");
            if let Some(existing) = self.resources.get_mut(&id) {
                existing.content_hash = content_hash;
                existing.size = size;
            }
            self.push_node(EntryRef::file(id), node)?;
            return Ok(id);
        }

        self.resources.insert(
            id,
            Resource {
                id,
                content_hash,
                size,
                history: PathHistory::new(node),
            },
        );
        self.link(EntryRef::file(id))?;
        self.dirty = true;
        Ok(id)
    }

    /// Registers a newly found directory at `node`.
    ///
    /// A `pinned` fingerprint came from a tag marker and is used as the id
    /// directly, unless a live directory already owns it (the marker was
    /// copied along with the directory), in which case a fresh id is minted
    /// and the marker will be rewritten.
    ///
    /// # Errors
    ///
    /// Returns an error if the name lacks its trailing `/` or the parent is
    /// unknown.
    pub fn add_directory(
        &mut self,
        content_hash: Fingerprint,
        node: PathNode,
        pinned: bool,
    ) -> Result<Fingerprint, InvariantError> {
        if !node.name.ends_with('/') {
            return Err(InvariantError::DirectoryName { name: node.name });
        }
        self.require_parent(&node)?;

        let (mut id, mut tagged) = if pinned {
            (content_hash, true)
        } else {
            (self.generate_id(&content_hash, &node), false)
        };

        if let Some(existing) = self.directories.get(&id) {
            if existing.resource.history.is_deleted() {
                debug!(id = %id, name = %node.name, "Resurrecting deleted directory");
                if let Some(existing) = self.directories.get_mut(&id) {
                    existing.tagged = tagged;
                }
                self.push_node(EntryRef::directory(id), node)?;
                return Ok(id);
            }
            warn!(id = %id, name = %node.name, "Directory identity already in use, minting a new one");
            id = self.derive_unique(&content_hash, &node);
            tagged = false;
        }

        let resource = Resource {
            id,
            content_hash,
            size: 0,
            history: PathHistory::new(node),
        };
        self.directories.insert(id, Directory::new(resource, tagged));
        self.link(EntryRef::directory(id))?;
        self.dirty = true;
        Ok(id)
    }

    fn require_parent(&self, node: &PathNode) -> Result<(), InvariantError> {
        match node.parent {
            Some(parent) if !self.directories.contains_key(&parent) => {
                Err(InvariantError::UnresolvedParent {
                    name: node.name.clone(),
                    parent,
                })
            }
            _ => Ok(()),
        }
    }

    /// Node for a path whose directories are all tracked.
    ///
    /// # Errors
    ///
    /// Returns [`InvariantError::UntrackedParent`] if a directory segment of
    /// the path is not a child of the one before it.
    pub fn path_to_node(&self, path: &CollectionPath) -> Result<PathNode, InvariantError> {
        let mut current = root_id();
        for segment in path.dir_segments() {
            current = self
                .directories
                .get(&current)
                .and_then(|dir| dir.dirs.get(segment))
                .copied()
                .ok_or_else(|| InvariantError::UntrackedParent {
                    path: path.relative_string(),
                })?;
        }
        Ok(PathNode::new(path.name.clone(), Some(current)))
    }

    /// Reconstructs the relative path of `node` by walking parent links.
    ///
    /// A deleted ancestor shows up as a `/.deleted/` segment.
    ///
    /// # Errors
    ///
    /// Fails on unknown parents, cycles and parentless nodes that are neither
    /// the root nor a tombstone.
    pub fn relative_path_of(&self, node: &PathNode) -> Result<CollectionPath, InvariantError> {
        if node.parent.is_none() {
            return if node.is_root() {
                Ok(CollectionPath::relative("/", ""))
            } else if node.is_tombstone() {
                Ok(CollectionPath::relative("/", TOMBSTONE_NAME))
            } else {
                Err(InvariantError::MalformedTombstone {
                    name: node.name.clone(),
                })
            };
        }

        let mut segments = Vec::new();
        let mut visited = BTreeSet::new();
        let mut parent = node.parent;

        while let Some(parent_id) = parent {
            if !visited.insert(parent_id) {
                return Err(InvariantError::Cycle { id: parent_id });
            }
            let dir = self.directories.get(&parent_id).ok_or_else(|| {
                InvariantError::UnresolvedParent {
                    name: node.name.clone(),
                    parent: parent_id,
                }
            })?;
            let current = dir
                .current()
                .ok_or(InvariantError::EmptyHistory { id: parent_id })?;

            if current.is_root() {
                break;
            }
            if current.is_tombstone() {
                segments.push(format!("{TOMBSTONE_NAME}/"));
                break;
            }
            if current.parent.is_none() {
                return Err(InvariantError::MalformedTombstone {
                    name: current.name.clone(),
                });
            }
            segments.push(current.name.clone());
            parent = current.parent;
        }

        let mut rel_dir = String::from("/");
        for segment in segments.iter().rev() {
            rel_dir.push_str(segment);
        }
        Ok(CollectionPath::relative(rel_dir, node.name.clone()))
    }

    /// [`Instance::relative_path_of`] rooted at this instance.
    ///
    /// # Errors
    ///
    /// Same as [`Instance::relative_path_of`].
    pub fn full_path_of(&self, node: &PathNode) -> Result<CollectionPath, InvariantError> {
        Ok(self.relative_path_of(node)?.with_root(&self.root_path))
    }

    /// Full path of an entry's current location.
    ///
    /// # Errors
    ///
    /// Fails if the entry is unknown or its path cannot be reconstructed.
    pub fn current_path(&self, entry: EntryRef) -> Result<CollectionPath, InvariantError> {
        let node = self.current_node(entry)?;
        self.full_path_of(node)
    }

    /// Current node of an entry.
    ///
    /// # Errors
    ///
    /// Fails if the entry is unknown or has no history.
    pub fn current_node(&self, entry: EntryRef) -> Result<&PathNode, InvariantError> {
        self.history(entry)
            .ok_or(InvariantError::UnknownEntry { id: entry.id })?
            .current()
            .ok_or(InvariantError::EmptyHistory { id: entry.id })
    }

    /// Number of parent hops from `node` to a parentless node (the root or a
    /// tombstone). The root is at depth 0.
    ///
    /// # Errors
    ///
    /// Fails on unknown parents and cycles.
    pub fn depth_of(&self, node: &PathNode) -> Result<i32, InvariantError> {
        let mut depth = 0;
        let mut visited = BTreeSet::new();
        let mut parent = node.parent;

        while let Some(parent_id) = parent {
            if !visited.insert(parent_id) {
                return Err(InvariantError::Cycle { id: parent_id });
            }
            let dir = self.directories.get(&parent_id).ok_or_else(|| {
                InvariantError::UnresolvedParent {
                    name: node.name.clone(),
                    parent: parent_id,
                }
            })?;
            depth += 1;
            parent = dir.current().and_then(|n| n.parent);
        }

        Ok(depth)
    }

    /// Decides whether the entry recorded at `full_path` is unchanged.
    ///
    /// Sizes are compared when content may change in place or a check is
    /// enabled; a mismatch is conclusive. With hash checking the content is
    /// re-fingerprinted (never for the root).
    #[must_use]
    pub fn path_equals_entry(&self, entry: EntryRef, path: &CollectionPath) -> bool {
        let (size, expected) = match entry.kind {
            EntryKind::File => match self.resources.get(&entry.id) {
                Some(res) => (res.size, res.content_hash),
                None => return false,
            },
            EntryKind::Directory => match self.directories.get(&entry.id) {
                Some(dir) if dir.tagged => (0, dir.id()),
                Some(dir) => (0, dir.resource.content_hash),
                None => return false,
            },
        };
        let full_path = path.to_path_buf();

        if self.settings.compares_size() {
            match std::fs::metadata(&full_path) {
                Ok(metadata) => {
                    let on_disk = if metadata.is_dir() {
                        0
                    } else {
                        i64::try_from(metadata.len()).unwrap_or(i64::MAX)
                    };
                    if on_disk != size {
                        debug!(path = %path, on_disk, recorded = size, "Size did not match");
                        return false;
                    }
                }
                Err(e) => warn!(path = %path, error = %e, "Could not stat path"),
            }
        }

        if entry.id != root_id() && self.settings.compares_hash() {
            return match fingerprint_of(&full_path, &path.relative_string()) {
                Ok(stat) if stat.fingerprint == expected => true,
                Ok(stat) => {
                    debug!(path = %path, found = %stat.fingerprint, recorded = %expected, "Hash did not match");
                    false
                }
                Err(e) => {
                    warn!(path = %path, error = %e, "Could not fingerprint path");
                    false
                }
            };
        }

        true
    }

    /// Appends a location to an entry's history and re-links it.
    ///
    /// # Errors
    ///
    /// Fails if the entry is unknown.
    pub fn push_node(&mut self, entry: EntryRef, node: PathNode) -> Result<(), InvariantError> {
        self.unlink(entry);
        self.history_mut(entry)
            .ok_or(InvariantError::UnknownEntry { id: entry.id })?
            .push(node);
        self.link(entry)?;
        self.dirty = true;
        Ok(())
    }

    /// Marks an entry as deleted.
    ///
    /// # Errors
    ///
    /// Fails if the entry is unknown.
    pub fn tombstone(&mut self, entry: EntryRef) -> Result<(), InvariantError> {
        self.push_node(entry, PathNode::tombstone())
    }

    /// Makes an entry's history match `from` from index `start` onward.
    ///
    /// # Errors
    ///
    /// Fails if the entry is unknown.
    pub fn adopt_history(
        &mut self,
        entry: EntryRef,
        from: &PathHistory,
        start: usize,
    ) -> Result<(), InvariantError> {
        self.unlink(entry);
        self.history_mut(entry)
            .ok_or(InvariantError::UnknownEntry { id: entry.id })?
            .adopt_tail(from, start);
        self.link(entry)?;
        self.dirty = true;
        Ok(())
    }

    /// Renames an entry's current location in place, without adding a
    /// history node. Used when the name on disk differs from the intended one
    /// only by a collision prefix.
    ///
    /// # Errors
    ///
    /// Fails if the entry is unknown.
    pub fn rename_current(
        &mut self,
        entry: EntryRef,
        name: impl Into<String>,
    ) -> Result<(), InvariantError> {
        self.unlink(entry);
        self.history_mut(entry)
            .ok_or(InvariantError::UnknownEntry { id: entry.id })?
            .rename_current(name);
        self.link(entry)?;
        self.dirty = true;
        Ok(())
    }

    /// Inserts (or replaces) a file record taken from another instance.
    ///
    /// # Errors
    ///
    /// Fails if the record's parent directory is unknown here.
    pub fn insert_resource(&mut self, resource: Resource) -> Result<(), InvariantError> {
        let entry = EntryRef::file(resource.id);
        if let Some(node) = resource.current() {
            self.require_parent(node)?;
        }
        self.unlink(entry);
        self.resources.insert(resource.id, resource);
        self.link(entry)?;
        self.dirty = true;
        Ok(())
    }

    /// Inserts (or replaces) a directory record taken from another instance.
    /// Existing child indexes are kept.
    ///
    /// # Errors
    ///
    /// Fails if the record's parent directory is unknown here.
    pub fn insert_directory(&mut self, mut directory: Directory) -> Result<(), InvariantError> {
        let entry = EntryRef::directory(directory.id());
        if let Some(node) = directory.current() {
            self.require_parent(node)?;
        }
        self.unlink(entry);
        if let Some(old) = self.directories.remove(&directory.id()) {
            directory.dirs = old.dirs;
            directory.files = old.files;
        }
        self.directories.insert(directory.id(), directory);
        self.link(entry)?;
        self.dirty = true;
        Ok(())
    }

    /// Inserts loaded records without linking; call [`Instance::relink_all`]
    /// once every record is in place.
    pub(crate) fn insert_loaded(&mut self, resources: Vec<Resource>, directories: Vec<Directory>) {
        for dir in directories {
            self.directories.insert(dir.id(), dir);
        }
        for res in resources {
            self.resources.insert(res.id, res);
        }
    }

    /// Rebuilds every child index from the records' current nodes. Records
    /// whose parent is missing are left unlinked and reported by
    /// [`Instance::bad_instance_scan`].
    pub(crate) fn relink_all(&mut self) {
        for dir in self.directories.values_mut() {
            dir.dirs.clear();
            dir.files.clear();
        }
        let entries: Vec<EntryRef> = self
            .directories
            .keys()
            .map(|id| EntryRef::directory(*id))
            .chain(self.resources.keys().map(|id| EntryRef::file(*id)))
            .collect();
        for entry in entries {
            if let Err(e) = self.link(entry) {
                warn!(error = %e, "Record left unlinked");
            }
        }
    }

    fn history_mut(&mut self, entry: EntryRef) -> Option<&mut PathHistory> {
        match entry.kind {
            EntryKind::File => self.resources.get_mut(&entry.id).map(|r| &mut r.history),
            EntryKind::Directory => self
                .directories
                .get_mut(&entry.id)
                .map(|d| &mut d.resource.history),
        }
    }

    /// Adds the entry to its current parent's child index.
    fn link(&mut self, entry: EntryRef) -> Result<(), InvariantError> {
        let Some(node) = self.history(entry).and_then(PathHistory::current).cloned() else {
            return Ok(());
        };
        let Some(parent) = node.parent else {
            return Ok(());
        };
        let dir = self
            .directories
            .get_mut(&parent)
            .ok_or(InvariantError::UnresolvedParent {
                name: node.name.clone(),
                parent,
            })?;
        dir.children_mut(entry.kind).insert(node.name, entry.id);
        Ok(())
    }

    /// Removes the entry from its current parent's child index, only if the
    /// slot still points at it.
    fn unlink(&mut self, entry: EntryRef) {
        let Some(node) = self.history(entry).and_then(PathHistory::current).cloned() else {
            return;
        };
        let Some(parent) = node.parent else {
            return;
        };
        if let Some(dir) = self.directories.get_mut(&parent) {
            let children = dir.children_mut(entry.kind);
            if children.get(&node.name) == Some(&entry.id) {
                children.remove(&node.name);
            }
        }
    }

    /// Diagnostic consistency check. Returns every violated invariant
    /// instead of failing on the first.
    #[must_use]
    pub fn bad_instance_scan(&self) -> Vec<InvariantError> {
        let mut problems = Vec::new();
        let mut claimed: BTreeMap<(Fingerprint, String), Fingerprint> = BTreeMap::new();

        let entries = self
            .directories
            .keys()
            .map(|id| EntryRef::directory(*id))
            .chain(self.resources.keys().map(|id| EntryRef::file(*id)));

        for entry in entries {
            let node = match self.current_node(entry) {
                Ok(node) => node,
                Err(e) => {
                    problems.push(e);
                    continue;
                }
            };
            if node.is_tombstone() || entry.id == root_id() {
                continue;
            }
            if entry.kind == EntryKind::Directory && !node.name.ends_with('/') {
                problems.push(InvariantError::DirectoryName {
                    name: node.name.clone(),
                });
            }
            match self.reaches_root(node) {
                Ok(true) => {}
                Ok(false) => problems.push(InvariantError::Detached { id: entry.id }),
                Err(e) => problems.push(e),
            }
            if let Some(parent) = node.parent {
                let name = node.name.trim_end_matches('/').to_string();
                if let Some(first) = claimed.insert((parent, name.clone()), entry.id) {
                    problems.push(InvariantError::SharedLocation {
                        name,
                        parent,
                        first,
                        second: entry.id,
                    });
                }
            }
        }

        problems
    }

    /// Whether `node` sits under the root rather than under a deleted
    /// directory.
    ///
    /// # Errors
    ///
    /// Fails on unknown parents, cycles and malformed parentless nodes.
    pub fn is_attached(&self, node: &PathNode) -> Result<bool, InvariantError> {
        self.reaches_root(node)
    }

    /// Whether the parent chain ends at the root rather than a tombstone.
    fn reaches_root(&self, node: &PathNode) -> Result<bool, InvariantError> {
        if node.parent.is_none() {
            return if node.is_root() || node.is_tombstone() {
                Ok(node.is_root())
            } else {
                Err(InvariantError::MalformedTombstone {
                    name: node.name.clone(),
                })
            };
        }

        let mut visited = BTreeSet::new();
        let mut parent = node.parent;
        while let Some(parent_id) = parent {
            if !visited.insert(parent_id) {
                return Err(InvariantError::Cycle { id: parent_id });
            }
            let current = self
                .directories
                .get(&parent_id)
                .ok_or_else(|| InvariantError::UnresolvedParent {
                    name: node.name.clone(),
                    parent: parent_id,
                })?
                .current()
                .ok_or(InvariantError::EmptyHistory { id: parent_id })?;
            if current.parent.is_none() {
                return Ok(current.is_root());
            }
            parent = current.parent;
        }
        Ok(false)
    }

    /// Persists the instance if dirty: tag markers for untagged live
    /// directories, the state file, and the settings file with every default
    /// made explicit. Read-only sources are never written to.
    ///
    /// Returns whether anything was written.
    ///
    /// # Errors
    ///
    /// Returns an error if the state or settings file cannot be written.
    pub fn write(&mut self) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        if self.is_read_only_session() {
            debug!(root = %self.root_path, "Skipping write of read-only source");
            self.dirty = false;
            return Ok(false);
        }

        let root = self.root_dir();

        let untagged: Vec<Fingerprint> = self
            .directories
            .values()
            .filter(|dir| !dir.tagged && dir.id() != root_id())
            .filter(|dir| !dir.resource.history.is_deleted())
            .map(Directory::id)
            .collect();
        for id in untagged {
            let entry = EntryRef::directory(id);
            if !self
                .current_node(entry)
                .and_then(|node| self.is_attached(node))
                .unwrap_or(false)
            {
                continue;
            }
            let path = match self.current_path(entry) {
                Ok(path) => path,
                Err(e) => {
                    warn!(id = %id, error = %e, "Cannot place tag marker");
                    continue;
                }
            };
            match write_tag(&path.to_path_buf(), &id) {
                Ok(()) => {
                    if let Some(dir) = self.directories.get_mut(&id) {
                        dir.tagged = true;
                    }
                }
                Err(e) => warn!(path = %path, error = %e, "Failed to write tag marker"),
            }
        }

        crate::storage::save(self)
            .with_context(|| format!("Failed to persist instance at {}", self.root_path))?;

        let mut settings = self.settings.clone();
        settings.id = Some(self.collection_id.to_base64());
        settings.save(&root)?;

        self.dirty = false;
        Ok(true)
    }
}

/// Ten random upper-case letters.
fn mint_session_token() -> String {
    let mut rng = rand::rng();
    (0..SESSION_TOKEN_LEN)
        .map(|_| char::from(rng.random_range(b'A'..=b'Z')))
        .collect()
}

/// Absolute filesystem path of `node` in `instance`, for logging.
#[must_use]
pub fn display_path(instance: &Instance, node: &PathNode) -> String {
    instance
        .full_path_of(node)
        .map_or_else(|_| format!("<{}>", node.name), |p| p.to_full_string())
}
