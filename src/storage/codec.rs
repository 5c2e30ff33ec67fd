use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Current on-disk format version.
pub const STATE_VERSION: u32 = 1;

/// Get the bincode configuration
fn get_config() -> impl bincode::config::Config {
    // Legacy configuration for serde compatibility
    // Limit allocation to prevent memory exhaustion on corrupt data
    bincode::config::legacy().with_limit::<{ 100 * 1024 * 1024 }>() // 100MB limit
}

/// Outer wrapper that lets future versions change the payload layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEnvelope {
    /// Format version of `payload`.
    pub version: u32,
    /// Encoded payload.
    pub payload: Vec<u8>,
}

/// Encode a value
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn serialize<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    bincode::serde::encode_to_vec(data, get_config()).map_err(Into::into)
}

/// Decode a value
///
/// # Errors
///
/// Returns an error if the data is malformed or incompatible
pub fn deserialize<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let (result, _bytes_read) = bincode::serde::decode_from_slice(bytes, get_config())?;
    Ok(result)
}

/// Encode a value inside a current-version envelope.
///
/// # Errors
///
/// Returns an error if serialization fails
pub fn seal<T: Serialize>(data: &T) -> Result<Vec<u8>> {
    let envelope = VersionEnvelope {
        version: STATE_VERSION,
        payload: serialize(data).context("Failed to encode payload")?,
    };
    serialize(&envelope).context("Failed to encode version envelope")
}

/// Decode an envelope and its payload. An unexpected version is reported and
/// decoding is still attempted.
///
/// # Errors
///
/// Returns an error if the envelope or payload cannot be decoded
pub fn open<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let envelope: VersionEnvelope =
        deserialize(bytes).context("Failed to decode version envelope")?;
    if envelope.version != STATE_VERSION {
        warn!(
            expected = STATE_VERSION,
            found = envelope.version,
            "Unknown state version, attempting to read anyway"
        );
    }
    deserialize(&envelope.payload)
        .with_context(|| format!("Failed to decode version {} payload", envelope.version))
}
