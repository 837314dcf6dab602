//! Secrets file parsing and discovery.
//!
//! # Supported Shapes
//!
//! - Array: `["NAME_A", "NAME_B"]`
//! - Object: `{"secrets": ["NAME_A"], "prefix": "APP_", "overrideExisting": true}`
//!
//! Parsing is total: anything else degrades to a file with every field absent.

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Well-known filename looked up by auto-discovery
pub const DISCOVERY_FILENAME: &str = ".gcp-secrets.json";

/// Number of directories inspected, starting with the working directory
pub const MAX_DISCOVERY_DEPTH: usize = 10;

/// Parsed contents of a secrets file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SecretsFile {
    /// Secret names, absent when the file carries no usable array
    pub secrets: Option<Vec<String>>,

    /// Prefix to backfill into the configuration
    pub prefix: Option<String>,

    /// Override flag to backfill into the configuration
    pub override_existing: Option<bool>,
}

impl SecretsFile {
    /// Parse file content. Never fails.
    pub fn parse(content: &str) -> Self {
        let json: serde_json::Value = match serde_json::from_str(content) {
            Ok(json) => json,
            Err(_) => return Self::default(),
        };

        if let Some(items) = json.as_array() {
            return Self {
                secrets: Some(string_items(items)),
                ..Self::default()
            };
        }

        let Some(obj) = json.as_object() else {
            return Self::default();
        };

        Self {
            secrets: obj
                .get("secrets")
                .and_then(|v| v.as_array())
                .map(|items| string_items(items)),
            prefix: obj
                .get("prefix")
                .and_then(|v| v.as_str())
                .map(str::to_string),
            override_existing: obj.get("overrideExisting").and_then(|v| v.as_bool()),
        }
    }

    /// Load an explicitly configured file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not carry a
    /// secrets array in one of the two accepted shapes.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::SecretsFileIo {
            path: path.to_path_buf(),
            source,
        })?;

        let file = Self::parse(&content);
        if file.secrets.is_none() {
            return Err(Error::SecretsFileFormat(path.to_path_buf()));
        }

        Ok(file)
    }

    /// Whether the file names at least one secret.
    pub fn has_names(&self) -> bool {
        self.secrets.as_ref().is_some_and(|names| !names.is_empty())
    }
}

fn string_items(items: &[serde_json::Value]) -> Vec<String> {
    items
        .iter()
        .filter_map(|item| item.as_str())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Find the nearest discovery file, walking up from `start`.
pub fn discover(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .take(MAX_DISCOVERY_DEPTH)
        .map(|dir| dir.join(DISCOVERY_FILENAME))
        .find(|candidate| candidate.is_file())
}
