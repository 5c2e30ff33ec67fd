use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Reads a settings file into raw key/value pairs.
///
/// A missing file yields an empty map.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be read.
pub fn parse_settings_file(path: &Path) -> Result<BTreeMap<String, String>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
    Ok(parse_settings_str(&content))
}

/// Parses `key:value` lines.
///
/// Blank lines and lines starting with `#` are skipped. Keys are lower-cased
/// and trimmed; only the first `:` separates key from value, and a bare key
/// means `"true"`. Later duplicates win.
#[must_use]
pub fn parse_settings_str(content: &str) -> BTreeMap<String, String> {
    let mut settings = BTreeMap::new();

    for line in content.lines() {
        let line = trim_ws(line);
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = line.split_once(':').unwrap_or((line, "true"));
        let key = trim_ws(key).to_lowercase();
        if key.is_empty() {
            continue;
        }
        settings.insert(key, trim_ws(value).to_string());
    }

    settings
}

fn trim_ws(s: &str) -> &str {
    s.trim_matches([' ', '\t', '\r', '\n'])
}
