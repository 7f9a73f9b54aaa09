use crate::StoreError;
use condor_schema::{ChannelName, ChannelSource, MirrorFilter, MirrorMode, Subdir};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub name: ChannelName,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(flatten)]
    pub source: ChannelSource,
    #[serde(default, skip_serializing_if = "MirrorFilter::is_empty")]
    pub mirror_filter: MirrorFilter,
    /// Highest upstream `time_modified` already incorporated. Only the
    /// mirror synchronizer moves it, and never backwards.
    #[serde(default)]
    pub timestamp_mirror_sync: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    /// blake3 checksum over the record with this field unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ChannelRecord {
    pub fn new(name: &str, source: ChannelSource) -> Self {
        let now = crate::now_rfc3339();
        Self {
            name: ChannelName::new(name),
            description: None,
            private: false,
            source,
            mirror_filter: MirrorFilter::default(),
            timestamp_mirror_sync: 0,
            owner: None,
            created_at: now.clone(),
            updated_at: now,
            checksum: None,
        }
    }

    pub fn mode(&self) -> MirrorMode {
        self.source.mode()
    }

    pub(crate) fn compute_checksum(&self) -> Result<String, StoreError> {
        let mut copy = self.clone();
        copy.checksum = None;
        let json = serde_json::to_string_pretty(&copy)?;
        Ok(blake3::hash(json.as_bytes()).to_hex().to_string())
    }
}

/// One archive of a package in one subdir.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageVersion {
    pub subdir: Subdir,
    pub filename: String,
    pub version: String,
    pub build: String,
    #[serde(default)]
    pub build_number: u64,
    pub size: u64,
    pub sha256: String,
    pub md5: String,
    #[serde(default)]
    pub time_modified: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    /// Repodata entry for this archive, as served to clients.
    pub info: Map<String, Value>,
}

impl PackageVersion {
    /// Same archive content and metadata; upload bookkeeping is ignored.
    pub fn same_content(&self, other: &PackageVersion) -> bool {
        self.subdir == other.subdir
            && self.filename == other.filename
            && self.sha256 == other.sha256
            && self.time_modified == other.time_modified
            && self.info == other.info
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageRecord {
    pub channel: ChannelName,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_build: Option<String>,
    #[serde(default)]
    pub versions: Vec<PackageVersion>,
    pub created_at: String,
    pub updated_at: String,
}

impl PackageRecord {
    pub fn new(channel: &str, name: &str) -> Self {
        let now = crate::now_rfc3339();
        Self {
            channel: ChannelName::new(channel),
            name: name.to_owned(),
            summary: None,
            latest_version: None,
            latest_build: None,
            versions: Vec::new(),
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Subdirs this package currently has archives in, sorted.
    pub fn subdirs(&self) -> Vec<Subdir> {
        let mut out: Vec<Subdir> = self.versions.iter().map(|v| v.subdir.clone()).collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn find_version(&self, subdir: &str, filename: &str) -> Option<&PackageVersion> {
        self.versions
            .iter()
            .find(|v| v.subdir == subdir && v.filename == filename)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    pub created_at: String,
}

impl UserRecord {
    pub fn new(name: &str, role: Option<&str>) -> Self {
        Self {
            name: name.to_owned(),
            role: role.map(str::to_owned),
            created_at: crate::now_rfc3339(),
        }
    }
}
