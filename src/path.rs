//! Collection path model.
//!
//! Every path inside an instance is split into three parts:
//!
//! - `root`: the instance root, forward slashes, no trailing separator
//! - `rel_dir`: the relative directory, always starting and ending with `/`
//! - `name`: the leaf name; directory names carry a trailing `/`
//!
//! The instance root itself is `rel_dir = "/"` with an empty name.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};

/// A path split into root, relative directory and leaf name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CollectionPath {
    /// Instance root prefix.
    pub root: String,
    /// Relative directory, `/`-delimited on both ends.
    pub rel_dir: String,
    /// Leaf name, with a trailing `/` for directories.
    pub name: String,
}

impl CollectionPath {
    /// Splits `full_path` into its parts relative to `root`.
    ///
    /// Separators are normalised before splitting, so Windows-style input is
    /// accepted.
    #[must_use]
    pub fn from_string(full_path: &str, root: &str) -> Self {
        let full_path = to_slash(full_path);
        let root = normalize_root(root);
        let relative = full_path.strip_prefix(root.as_str()).unwrap_or(&full_path);
        let (rel_dir, name) = split(relative);
        Self {
            root,
            rel_dir,
            name,
        }
    }

    /// Builds a relative path (empty root).
    #[must_use]
    pub fn relative(rel_dir: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            root: String::new(),
            rel_dir: rel_dir.into(),
            name: name.into(),
        }
    }

    /// `rel_dir + name`.
    #[must_use]
    pub fn relative_string(&self) -> String {
        format!("{}{}", self.rel_dir, self.name)
    }

    /// `root + rel_dir + name`, the inverse of [`CollectionPath::from_string`].
    #[must_use]
    pub fn to_full_string(&self) -> String {
        format!("{}{}{}", self.root, self.rel_dir, self.name)
    }

    /// Same path re-rooted at another instance root.
    #[must_use]
    pub fn with_root(&self, root: &str) -> Self {
        Self {
            root: normalize_root(root),
            rel_dir: self.rel_dir.clone(),
            name: self.name.clone(),
        }
    }

    /// Filesystem form of [`CollectionPath::to_full_string`], without the
    /// trailing separator of a directory.
    #[must_use]
    pub fn to_path_buf(&self) -> PathBuf {
        fs_path(&self.to_full_string())
    }

    /// Filesystem path of the containing directory.
    #[must_use]
    pub fn dir_path_buf(&self) -> PathBuf {
        fs_path(&format!("{}{}", self.root, self.rel_dir))
    }

    /// Whether the leaf is a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.name.is_empty() || self.name.ends_with('/')
    }

    /// Directory segments of `rel_dir`, each keeping its trailing `/`.
    pub fn dir_segments(&self) -> impl Iterator<Item = &str> {
        self.rel_dir
            .split_inclusive('/')
            .filter(|segment| *segment != "/")
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_full_string())
    }
}

/// Converts every separator to `/`.
#[must_use]
pub fn to_slash(path: &str) -> String {
    path.replace('\\', "/")
}

/// Normalises an instance root: forward slashes, no trailing separator.
#[must_use]
pub fn normalize_root(root: &str) -> String {
    let root = to_slash(root);
    root.trim_end_matches('/').to_string()
}

/// Turns a slash path into a filesystem path, dropping a trailing separator
/// unless the whole path is `/`.
#[must_use]
pub fn fs_path(path: &str) -> PathBuf {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        PathBuf::from(path)
    } else {
        PathBuf::from(trimmed)
    }
}

/// Normalised string form of a filesystem root.
#[must_use]
pub fn root_string(root: &Path) -> String {
    normalize_root(&root.to_string_lossy())
}

/// Splits a relative path into `(rel_dir, name)`, keeping a trailing `/` on
/// directory names.
fn split(relative: &str) -> (String, String) {
    let (body, slash) = match relative.strip_suffix('/') {
        Some(body) => (body, "/"),
        None => (relative, ""),
    };

    match body.rfind('/') {
        Some(idx) => (
            body[..=idx].to_string(),
            format!("{}{slash}", &body[idx + 1..]),
        ),
        None if body.is_empty() => ("/".to_string(), String::new()),
        None => ("/".to_string(), format!("{body}{slash}")),
    }
}

/// Orders paths by length, then lexically. Sorting with this guarantees a
/// parent directory precedes anything inside it.
#[must_use]
pub fn by_length(a: &String, b: &String) -> Ordering {
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}
