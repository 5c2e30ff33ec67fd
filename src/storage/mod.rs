//! Persisted instance state.
//!
//! One `.collection` file per instance root holds a version envelope around
//! the collection id and every non-root record. The root directory is never
//! stored; it is recreated on load, and the child indexes are rebuilt from
//! each record's current node.

/// Bincode encoding and the version envelope.
pub mod codec;

use crate::STATE_FILE;
use crate::fingerprint::Fingerprint;
use crate::instance::{Instance, root_id};
use crate::model::{Directory, PathHistory, PathNode, Resource};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// Parent id written for parentless nodes.
const NO_PARENT: [u8; 1] = [0];

/// Stored form of one location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialPathNode {
    /// UTF-8 name bytes.
    pub name: Vec<u8>,
    /// 16-byte parent id, or a single zero byte for none.
    pub parent_id: Vec<u8>,
}

/// Stored form of a file or directory record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialResource {
    /// 16-byte id.
    pub id: Vec<u8>,
    /// 16-byte content hash.
    pub content_hash: Vec<u8>,
    /// Byte length.
    pub size: i64,
    /// History, oldest first.
    pub path_history: Vec<SerialPathNode>,
    /// Directory tag marker already written.
    pub tagged: bool,
}

/// Stored form of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialInstance {
    /// 16-byte collection id.
    pub collection_id: Vec<u8>,
    /// File records.
    pub resources: Vec<SerialResource>,
    /// Directory records, root excluded.
    pub directories: Vec<SerialResource>,
}

impl SerialPathNode {
    fn from_node(node: &PathNode) -> Self {
        Self {
            name: node.name.as_bytes().to_vec(),
            parent_id: node
                .parent
                .map_or_else(|| NO_PARENT.to_vec(), |p| p.as_bytes().to_vec()),
        }
    }

    fn to_node(&self) -> Result<PathNode> {
        let name = String::from_utf8(self.name.clone()).context("Path node name is not UTF-8")?;
        Ok(PathNode::new(name, Fingerprint::from_slice(&self.parent_id)))
    }
}

impl SerialResource {
    fn from_resource(resource: &Resource, tagged: bool) -> Self {
        Self {
            id: resource.id.as_bytes().to_vec(),
            content_hash: resource.content_hash.as_bytes().to_vec(),
            size: resource.size,
            path_history: resource
                .history
                .nodes()
                .iter()
                .map(SerialPathNode::from_node)
                .collect(),
            tagged,
        }
    }

    fn to_resource(&self) -> Result<Resource> {
        let id = decode_fingerprint(&self.id, "id")?;
        let content_hash = decode_fingerprint(&self.content_hash, "content hash")?;
        let nodes = self
            .path_history
            .iter()
            .map(SerialPathNode::to_node)
            .collect::<Result<Vec<_>>>()
            .with_context(|| format!("Corrupt history for {id}"))?;
        Ok(Resource {
            id,
            content_hash,
            size: self.size,
            history: PathHistory::from_nodes(nodes),
        })
    }
}

fn decode_fingerprint(bytes: &[u8], what: &str) -> Result<Fingerprint> {
    Fingerprint::from_slice(bytes)
        .ok_or_else(|| anyhow!("Stored {what} has {} bytes, expected 16", bytes.len()))
}

/// Encodes an instance.
///
/// # Errors
///
/// Returns an error if encoding fails.
pub fn marshal(instance: &Instance) -> Result<Vec<u8>> {
    let serial = SerialInstance {
        collection_id: instance.collection_id().as_bytes().to_vec(),
        resources: instance
            .resources()
            .values()
            .map(|r| SerialResource::from_resource(r, false))
            .collect(),
        directories: instance
            .directories()
            .values()
            .filter(|d| d.id() != root_id())
            .map(|d| SerialResource::from_resource(&d.resource, d.tagged))
            .collect(),
    };
    codec::seal(&serial)
}

/// Decodes an instance rooted at `root`.
///
/// # Errors
///
/// Returns an error if the bytes are not a readable state file.
pub fn unmarshal(bytes: &[u8], root: &str) -> Result<Instance> {
    let serial: SerialInstance = codec::open(bytes)?;
    let collection_id = decode_fingerprint(&serial.collection_id, "collection id")?;

    let directories = serial
        .directories
        .iter()
        .map(|sd| Ok(Directory::new(sd.to_resource()?, sd.tagged)))
        .collect::<Result<Vec<_>>>()?;
    let resources = serial
        .resources
        .iter()
        .map(SerialResource::to_resource)
        .collect::<Result<Vec<_>>>()?;

    let mut instance = Instance::new(root, collection_id);
    instance.insert_loaded(resources, directories);
    instance.relink_all();
    Ok(instance)
}

/// Loads the state file of `root`, if there is one.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read or decoded.
pub fn load(root: &Path) -> Result<Option<Instance>> {
    let path = root.join(STATE_FILE);
    if !path.exists() {
        return Ok(None);
    }

    let data = std::fs::read(&path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;
    let instance = unmarshal(&data, &crate::path::root_string(root))
        .with_context(|| format!("Failed to decode state file: {}", path.display()))?;
    debug!(
        root = %root.display(),
        resources = instance.resources().len(),
        directories = instance.directories().len(),
        "Loaded instance state"
    );
    Ok(Some(instance))
}

/// Writes the state file atomically: a temporary file in the root is
/// flushed and then renamed over `.collection`.
///
/// # Errors
///
/// Returns an error if encoding or any filesystem step fails.
pub fn save(instance: &Instance) -> Result<()> {
    let root = instance.root_dir();
    let data = marshal(instance).context("Failed to encode instance")?;

    let mut temp = tempfile::Builder::new()
        .prefix(".state-")
        .suffix(STATE_FILE)
        .tempfile_in(&root)
        .with_context(|| format!("Failed to create temporary state in {}", root.display()))?;
    temp.write_all(&data)
        .context("Failed to write temporary state")?;
    temp.as_file()
        .sync_all()
        .context("Failed to flush temporary state")?;

    let target = root.join(STATE_FILE);
    temp.persist(&target)
        .with_context(|| format!("Failed to replace state file: {}", target.display()))?;
    Ok(())
}
