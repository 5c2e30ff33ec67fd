/// Settings file parsing.
pub mod parser;

use crate::SETTINGS_FILE;
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

/// Setting keys understood by the engine.
pub mod keys {
    /// When false, every scan re-hashes content to detect edits in place.
    pub const STATIC: &str = "static";
    /// Marks a root as a one-way source.
    pub const READ_ONLY: &str = "read only";
    /// When false, identical content shares one identity everywhere.
    pub const ALLOW_DUPLICATES: &str = "allow duplicates";
    /// Compare sizes during the equality check.
    pub const CHECK_FILE_LENGTH: &str = "check file length";
    /// Compare content digests during the equality check.
    pub const CHECK_FILE_HASH: &str = "check file hash";
    /// Base64 collection identity.
    pub const ID: &str = "id";
}

/// Settings of one instance root, merged with defaults once at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceSettings {
    /// Content never changes in place (`static`, default true).
    pub static_content: bool,
    /// One-way source (`read only`, default false).
    pub read_only: bool,
    /// Distinct identities for identical content (`allow duplicates`, default true).
    pub allow_duplicates: bool,
    /// `check file length`, default false.
    pub check_file_length: bool,
    /// `check file hash`, default false.
    pub check_file_hash: bool,
    /// Collection identity, base64.
    pub id: Option<String>,
    /// Keys this crate does not interpret, preserved on write-back.
    pub extra: BTreeMap<String, String>,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            static_content: true,
            read_only: false,
            allow_duplicates: true,
            check_file_length: false,
            check_file_hash: false,
            id: None,
            extra: BTreeMap::new(),
        }
    }
}

impl InstanceSettings {
    /// Loads `config.collection` from an instance root.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file exists but cannot be read.
    pub fn load(root: &Path) -> Result<Self> {
        let raw = parser::parse_settings_file(&root.join(SETTINGS_FILE))?;
        Ok(Self::from_map(raw))
    }

    /// Merges raw key/value pairs over the defaults.
    #[must_use]
    pub fn from_map(raw: BTreeMap<String, String>) -> Self {
        let mut settings = Self::default();
        for (key, value) in raw {
            settings.set(&key, value);
        }
        settings
    }

    /// Applies one key. Recognised flags only change on `true`/`false`
    /// (any case); other values leave the default in place.
    pub fn set(&mut self, key: &str, value: String) {
        let flag = parse_flag(&value);
        match key {
            keys::STATIC => self.static_content = flag.unwrap_or(self.static_content),
            keys::READ_ONLY => self.read_only = flag.unwrap_or(self.read_only),
            keys::ALLOW_DUPLICATES => self.allow_duplicates = flag.unwrap_or(self.allow_duplicates),
            keys::CHECK_FILE_LENGTH => {
                self.check_file_length = flag.unwrap_or(self.check_file_length);
            }
            keys::CHECK_FILE_HASH => self.check_file_hash = flag.unwrap_or(self.check_file_hash),
            keys::ID => self.id = Some(value),
            _ => {
                self.extra.insert(key.to_string(), value);
            }
        }
    }

    /// Value of a key as it would be written back.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        match key {
            keys::STATIC => Some(self.static_content.to_string()),
            keys::READ_ONLY => Some(self.read_only.to_string()),
            keys::ALLOW_DUPLICATES => Some(self.allow_duplicates.to_string()),
            keys::CHECK_FILE_LENGTH => Some(self.check_file_length.to_string()),
            keys::CHECK_FILE_HASH => Some(self.check_file_hash.to_string()),
            keys::ID => self.id.clone(),
            _ => self.extra.get(key).cloned(),
        }
    }

    /// Whether the equality check compares sizes.
    #[must_use]
    pub const fn compares_size(&self) -> bool {
        !self.static_content || self.check_file_length || self.check_file_hash
    }

    /// Whether the equality check re-hashes content.
    #[must_use]
    pub const fn compares_hash(&self) -> bool {
        !self.static_content || self.check_file_hash
    }

    /// Every setting with defaults made explicit, sorted by key.
    #[must_use]
    pub fn to_lines(&self) -> Vec<String> {
        let mut all: BTreeMap<&str, String> = self
            .extra
            .iter()
            .map(|(k, v)| (k.as_str(), v.clone()))
            .collect();
        for key in [
            keys::STATIC,
            keys::READ_ONLY,
            keys::ALLOW_DUPLICATES,
            keys::CHECK_FILE_LENGTH,
            keys::CHECK_FILE_HASH,
            keys::ID,
        ] {
            if let Some(value) = self.get(key) {
                all.insert(key, value);
            }
        }
        all.into_iter().map(|(k, v)| format!("{k}:{v}")).collect()
    }

    /// Writes `config.collection` into an instance root.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be created or written.
    pub fn save(&self, root: &Path) -> Result<()> {
        let path = root.join(SETTINGS_FILE);
        let mut file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create settings file: {}", path.display()))?;
        for line in self.to_lines() {
            writeln!(file, "{line}")
                .with_context(|| format!("Failed to write settings file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = InstanceSettings::default();
        assert!(settings.static_content);
        assert!(!settings.read_only);
        assert!(settings.allow_duplicates);
        assert!(!settings.compares_size());
        assert!(!settings.compares_hash());
    }

    #[test]
    fn test_non_static_compares_everything() {
        let settings =
            InstanceSettings::from_map(parser::parse_settings_str("static: false\n"));
        assert!(settings.compares_size());
        assert!(settings.compares_hash());
    }

    #[test]
    fn test_unknown_keys_survive_write_back() -> Result<()> {
        let dir = tempfile::tempdir()?;
        std::fs::write(
            dir.path().join(SETTINGS_FILE),
            "favourite colour: blue\nread only\n",
        )?;

        let settings = InstanceSettings::load(dir.path())?;
        assert!(settings.read_only);
        settings.save(dir.path())?;

        let written = std::fs::read_to_string(dir.path().join(SETTINGS_FILE))?;
        assert!(written.contains("favourite colour:blue"));
        assert!(written.contains("read only:true"));
        assert!(written.contains("static:true"));
        assert!(written.contains("allow duplicates:true"));
        Ok(())
    }
}
