//! Upstream channel documents: `channeldata.json` and per-subdir `repodata.json`.

use crate::package::validate_subdir;
use crate::types::Subdir;
use crate::SchemaError;
use serde_json::{Map, Value};
use tracing::warn;

/// Subdirectories assumed when an upstream channel does not publish a usable
/// `channeldata.json`.
pub const KNOWN_SUBDIRS: &[&str] = &[
    "noarch",
    "linux-32",
    "linux-64",
    "linux-aarch64",
    "linux-armv6l",
    "linux-armv7l",
    "linux-ppc64",
    "linux-ppc64le",
    "linux-s390x",
    "osx-64",
    "osx-arm64",
    "win-32",
    "win-64",
    "win-arm64",
    "zos-z",
];

/// Parsed top-level channel-data document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelData {
    pub subdirs: Vec<Subdir>,
}

impl ChannelData {
    /// Parse a channel-data body. Any JSON object is accepted; a missing
    /// `subdirs` key means the channel advertises no subdirectories.
    /// Entries that are not valid subdir names are dropped.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_slice(data)
            .map_err(|e| SchemaError::Malformed(format!("channeldata.json: {e}")))?;
        let Value::Object(obj) = value else {
            return Err(SchemaError::Malformed(
                "channeldata.json: expected a JSON object".to_owned(),
            ));
        };
        let subdirs = match obj.get("subdirs") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| match validate_subdir(s) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("channeldata.json: ignoring {e}");
                        false
                    }
                })
                .map(Subdir::from)
                .collect(),
            Some(_) => {
                return Err(SchemaError::Malformed(
                    "channeldata.json: 'subdirs' must be an array".to_owned(),
                ))
            }
        };
        Ok(Self { subdirs })
    }

    /// The fixed fallback set.
    pub fn known() -> Self {
        Self {
            subdirs: KNOWN_SUBDIRS.iter().map(|s| Subdir::from(*s)).collect(),
        }
    }
}

/// One package entry of a subdir index.
#[derive(Debug, Clone, PartialEq)]
pub struct RepoEntry {
    pub filename: String,
    /// Upstream modification time; absent entries count as 0.
    pub time_modified: Option<i64>,
    pub name: Option<String>,
    pub size: Option<u64>,
    pub raw: Map<String, Value>,
}

impl RepoEntry {
    pub fn time_modified_or_zero(&self) -> i64 {
        self.time_modified.unwrap_or(0)
    }

    /// Package name from the entry metadata, falling back to the filename
    /// stem (`name-version-build.ext` → `name`).
    pub fn package_name(&self) -> Option<&str> {
        if let Some(ref name) = self.name {
            return Some(name.as_str());
        }
        let stem = self
            .filename
            .strip_suffix(".tar.bz2")
            .or_else(|| self.filename.strip_suffix(".conda"))?;
        let mut parts = stem.rsplitn(3, '-');
        let _build = parts.next()?;
        let _version = parts.next()?;
        parts.next()
    }
}

/// Parsed subdir index. Entries keep upstream document order,
/// `packages` before `packages.conda`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepoData {
    pub entries: Vec<RepoEntry>,
}

impl RepoData {
    pub fn from_bytes(data: &[u8]) -> Result<Self, SchemaError> {
        let value: Value = serde_json::from_slice(data)
            .map_err(|e| SchemaError::Malformed(format!("repodata.json: {e}")))?;
        let Value::Object(obj) = value else {
            return Err(SchemaError::Malformed(
                "repodata.json: expected a JSON object".to_owned(),
            ));
        };

        let mut entries = Vec::new();
        for key in ["packages", "packages.conda"] {
            match obj.get(key) {
                None | Some(Value::Null) => {}
                Some(Value::Object(packages)) => {
                    for (filename, meta) in packages {
                        entries.push(parse_entry(filename, meta));
                    }
                }
                Some(_) => {
                    return Err(SchemaError::Malformed(format!(
                        "repodata.json: '{key}' must be an object"
                    )))
                }
            }
        }
        Ok(Self { entries })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_entry(filename: &str, meta: &Value) -> RepoEntry {
    let raw = meta.as_object().cloned().unwrap_or_default();
    RepoEntry {
        filename: filename.to_owned(),
        time_modified: raw.get("time_modified").and_then(Value::as_i64),
        name: raw.get("name").and_then(Value::as_str).map(str::to_owned),
        size: raw.get("size").and_then(Value::as_u64),
        raw,
    }
}
