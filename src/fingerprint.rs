//! Content and path fingerprints.
//!
//! A [`Fingerprint`] is a 16-byte xxh3-128 digest. It serves both as a
//! content hash (files are streamed through the hasher block by block) and
//! as raw material for resource identities.
//!
//! Directories have no content of their own. Their fingerprint is either the
//! id pinned in a tag marker (`<dir>/.tag.collection`, exactly 16 bytes) or a
//! digest of the directory's relative path.

use crate::TAG_FILE;
use anyhow::{Context, Result};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use xxhash_rust::xxh3::{Xxh3, xxh3_128};

/// Size of every fingerprint in bytes.
pub const FINGERPRINT_LEN: usize = 16;

/// Read buffer used when streaming file contents through the hasher.
const BLOCK_SIZE: usize = 65536;

/// A fixed-size 16-byte digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// The all-zero fingerprint.
    pub const ZERO: Self = Self([0; FINGERPRINT_LEN]);

    /// Wraps raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Builds a fingerprint from a slice that must be exactly 16 bytes long.
    #[must_use]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        <[u8; FINGERPRINT_LEN]>::try_from(bytes).ok().map(Self)
    }

    /// Digests arbitrary bytes.
    #[must_use]
    pub fn digest(data: &[u8]) -> Self {
        Self(xxh3_128(data).to_be_bytes())
    }

    /// Digests the concatenation of several byte slices.
    #[must_use]
    pub fn digest_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Xxh3::new();
        for part in parts {
            hasher.update(part);
        }
        Self(hasher.digest128().to_be_bytes())
    }

    /// Streams a reader through the hasher in fixed-size blocks.
    ///
    /// # Errors
    ///
    /// Returns an error if reading fails.
    pub fn of_reader<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut hasher = Xxh3::new();
        let mut buffer = vec![0u8; BLOCK_SIZE];

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self(hasher.digest128().to_be_bytes()))
    }

    /// Random fingerprint, used for fresh collection ids.
    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    /// Raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }

    /// Standard base64 rendering, the form used in settings files and logs.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }

    /// Parses the standard base64 rendering.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not base64 or does not decode to 16 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .with_context(|| format!("Invalid base64 identity: {encoded}"))?;
        Self::from_slice(&bytes).with_context(|| {
            format!(
                "Identity must decode to {FINGERPRINT_LEN} bytes, got {}",
                bytes.len()
            )
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_base64())
    }
}

/// Compares two optional fingerprints: two absent values are equal by
/// convention, an absent value never equals a present one.
#[must_use]
pub fn optional_eq(a: Option<&Fingerprint>, b: Option<&Fingerprint>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

/// Result of fingerprinting one filesystem path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Content digest, tag-pinned id, or path digest.
    pub fingerprint: Fingerprint,
    /// Whether the path is a directory.
    pub is_dir: bool,
    /// Byte length for files, 0 for directories.
    pub size: i64,
    /// Whether the fingerprint came from a well-formed tag marker.
    pub pinned: bool,
}

/// Fingerprints the path `full_path`, whose collection-relative form is
/// `relative` (used for the path-derived directory digest).
///
/// # Errors
///
/// Returns an error if the path cannot be opened or read.
pub fn fingerprint_of(full_path: &Path, relative: &str) -> Result<Stat> {
    let metadata = std::fs::metadata(full_path)
        .with_context(|| format!("Failed to get metadata for: {}", full_path.display()))?;

    if metadata.is_dir() {
        if let Some(pinned) = read_tag(full_path) {
            return Ok(Stat {
                fingerprint: pinned,
                is_dir: true,
                size: 0,
                pinned: true,
            });
        }
        return Ok(Stat {
            fingerprint: Fingerprint::digest(relative.as_bytes()),
            is_dir: true,
            size: 0,
            pinned: false,
        });
    }

    let file = File::open(full_path)
        .with_context(|| format!("Failed to open file: {}", full_path.display()))?;
    let fingerprint = Fingerprint::of_reader(file)
        .with_context(|| format!("Failed to hash file: {}", full_path.display()))?;
    let size = i64::try_from(metadata.len()).context("File size too large")?;

    Ok(Stat {
        fingerprint,
        is_dir: false,
        size,
        pinned: false,
    })
}

/// Reads a directory's tag marker. Anything other than exactly 16 bytes is
/// treated as absent.
#[must_use]
pub fn read_tag(dir: &Path) -> Option<Fingerprint> {
    let bytes = std::fs::read(dir.join(TAG_FILE)).ok()?;
    Fingerprint::from_slice(&bytes)
}

/// Writes a directory's tag marker.
///
/// # Errors
///
/// Returns an error if the marker cannot be written.
pub fn write_tag(dir: &Path, id: &Fingerprint) -> Result<()> {
    let tag_path = dir.join(TAG_FILE);
    std::fs::write(&tag_path, id.as_bytes())
        .with_context(|| format!("Failed to write tag marker: {}", tag_path.display()))
}
