use crate::layout::StoreLayout;
use crate::lock::IndexLock;
use crate::records::{ChannelRecord, PackageRecord, PackageVersion, UserRecord};
use crate::{write_atomic, StoreError};
use std::collections::BTreeMap;
use std::fs;

/// Result of [`PackageIndex::upsert_package_version`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// An identical archive entry was already recorded; nothing was written.
    Unchanged,
}

/// Transactional owner of channel, package, and user records.
///
/// Each mutating call is one transaction: it either commits fully or leaves
/// the previous state in place.
pub trait PackageIndex: Send + Sync {
    /// Insert a new channel. Fails with `ChannelExists` if the name is taken.
    fn create_channel(&self, record: &ChannelRecord) -> Result<(), StoreError>;

    fn get_channel(&self, name: &str) -> Result<ChannelRecord, StoreError>;

    fn channel_exists(&self, name: &str) -> Result<bool, StoreError>;

    fn list_channels(&self) -> Result<Vec<ChannelRecord>, StoreError>;

    /// Raise `timestamp_mirror_sync` to `candidate` if it is larger.
    /// Returns the stored value after the call.
    fn advance_mirror_watermark(&self, name: &str, candidate: i64) -> Result<i64, StoreError>;

    /// Create an empty package record. Fails with `PackageExists`.
    fn create_package(
        &self,
        channel: &str,
        name: &str,
        summary: Option<&str>,
    ) -> Result<PackageRecord, StoreError>;

    /// Insert or update one archive entry, keyed by (subdir, filename).
    /// Creates the package record on first use. Idempotent.
    fn upsert_package_version(
        &self,
        channel: &str,
        package: &str,
        version: PackageVersion,
    ) -> Result<UpsertOutcome, StoreError>;

    fn get_package(&self, channel: &str, name: &str) -> Result<PackageRecord, StoreError>;

    fn list_packages(&self, channel: &str) -> Result<Vec<PackageRecord>, StoreError>;

    /// Record a user. Returns `false` if a user with that name already exists.
    fn register_user(&self, user: &UserRecord) -> Result<bool, StoreError>;
}

/// [`PackageIndex`] over checksummed JSON files in a [`StoreLayout`].
pub struct FileIndex {
    layout: StoreLayout,
}

impl FileIndex {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    fn lock(&self) -> Result<IndexLock, StoreError> {
        IndexLock::acquire(&self.layout.lock_file())
    }

    fn write_channel(&self, record: &ChannelRecord) -> Result<(), StoreError> {
        let mut with_checksum = record.clone();
        with_checksum.checksum = Some(with_checksum.compute_checksum()?);
        let content = serde_json::to_string_pretty(&with_checksum)?;
        write_atomic(&self.layout.channel_record(&record.name), content.as_bytes())
    }

    fn read_channel(&self, name: &str) -> Result<ChannelRecord, StoreError> {
        condor_schema::validate_channel_name(name)
            .map_err(|_| StoreError::ChannelNotFound(name.to_owned()))?;
        let path = self.layout.channel_record(name);
        if !path.exists() {
            return Err(StoreError::ChannelNotFound(name.to_owned()));
        }
        let content = fs::read_to_string(&path)?;
        let record: ChannelRecord = serde_json::from_str(&content)?;

        if let Some(ref expected) = record.checksum {
            let actual = record.compute_checksum()?;
            if actual != *expected {
                return Err(StoreError::IntegrityFailure {
                    key: format!("channel:{name}"),
                    expected: expected.clone(),
                    actual,
                });
            }
        }
        Ok(record)
    }

    fn write_package(&self, record: &PackageRecord) -> Result<(), StoreError> {
        let content = serde_json::to_string_pretty(record)?;
        write_atomic(
            &self.layout.package_record(&record.channel, &record.name),
            content.as_bytes(),
        )
    }

    fn read_package(&self, channel: &str, name: &str) -> Result<Option<PackageRecord>, StoreError> {
        condor_schema::validate_package_name(name).map_err(|_| StoreError::PackageNotFound {
            channel: channel.to_owned(),
            package: name.to_owned(),
        })?;
        let path = self.layout.package_record(channel, name);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn read_users(&self) -> Result<BTreeMap<String, UserRecord>, StoreError> {
        let path = self.layout.users_file();
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

impl PackageIndex for FileIndex {
    fn create_channel(&self, record: &ChannelRecord) -> Result<(), StoreError> {
        condor_schema::validate_channel_name(&record.name)?;
        let _lock = self.lock()?;
        if self.layout.channel_record(&record.name).exists() {
            return Err(StoreError::ChannelExists(record.name.to_string()));
        }
        self.write_channel(record)?;
        tracing::info!("created channel '{}' ({})", record.name, record.mode());
        Ok(())
    }

    fn get_channel(&self, name: &str) -> Result<ChannelRecord, StoreError> {
        self.read_channel(name)
    }

    fn channel_exists(&self, name: &str) -> Result<bool, StoreError> {
        if condor_schema::validate_channel_name(name).is_err() {
            return Ok(false);
        }
        Ok(self.layout.channel_record(name).exists())
    }

    fn list_channels(&self) -> Result<Vec<ChannelRecord>, StoreError> {
        let dir = self.layout.channels_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match self.read_channel(name) {
                Ok(record) => results.push(record),
                Err(e) => tracing::warn!("skipping corrupted channel record '{name}': {e}"),
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    fn advance_mirror_watermark(&self, name: &str, candidate: i64) -> Result<i64, StoreError> {
        let _lock = self.lock()?;
        let mut record = self.read_channel(name)?;
        if candidate <= record.timestamp_mirror_sync {
            return Ok(record.timestamp_mirror_sync);
        }
        tracing::debug!(
            "channel '{name}': watermark {} -> {candidate}",
            record.timestamp_mirror_sync
        );
        record.timestamp_mirror_sync = candidate;
        record.updated_at = crate::now_rfc3339();
        self.write_channel(&record)?;
        Ok(candidate)
    }

    fn create_package(
        &self,
        channel: &str,
        name: &str,
        summary: Option<&str>,
    ) -> Result<PackageRecord, StoreError> {
        condor_schema::validate_package_name(name)?;
        let _lock = self.lock()?;
        self.read_channel(channel)?;
        if self.read_package(channel, name)?.is_some() {
            return Err(StoreError::PackageExists {
                channel: channel.to_owned(),
                package: name.to_owned(),
            });
        }
        let mut record = PackageRecord::new(channel, name);
        record.summary = summary.map(str::to_owned);
        self.write_package(&record)?;
        Ok(record)
    }

    fn upsert_package_version(
        &self,
        channel: &str,
        package: &str,
        version: PackageVersion,
    ) -> Result<UpsertOutcome, StoreError> {
        condor_schema::validate_package_name(package)?;
        let _lock = self.lock()?;
        self.read_channel(channel)?;
        let mut record = self
            .read_package(channel, package)?
            .unwrap_or_else(|| PackageRecord::new(channel, package));

        let existing = record
            .versions
            .iter()
            .position(|v| v.subdir == version.subdir && v.filename == version.filename);
        let outcome = match existing {
            Some(idx) if record.versions[idx].same_content(&version) => {
                return Ok(UpsertOutcome::Unchanged);
            }
            Some(idx) => {
                record.versions[idx] = version;
                UpsertOutcome::Updated
            }
            None => {
                record.versions.push(version);
                UpsertOutcome::Inserted
            }
        };

        if let Some(latest) = record.versions.iter().max_by_key(|v| v.time_modified) {
            record.latest_version = Some(latest.version.clone());
            record.latest_build = Some(latest.build.clone());
        }
        record.updated_at = crate::now_rfc3339();
        self.write_package(&record)?;
        Ok(outcome)
    }

    fn get_package(&self, channel: &str, name: &str) -> Result<PackageRecord, StoreError> {
        self.read_package(channel, name)?
            .ok_or_else(|| StoreError::PackageNotFound {
                channel: channel.to_owned(),
                package: name.to_owned(),
            })
    }

    fn list_packages(&self, channel: &str) -> Result<Vec<PackageRecord>, StoreError> {
        self.read_channel(channel)?;
        let dir = self.layout.packages_dir(channel);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut results = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            match self.read_package(channel, name) {
                Ok(Some(record)) => results.push(record),
                Ok(None) => {}
                Err(e) => tracing::warn!("skipping corrupted package record '{channel}/{name}': {e}"),
            }
        }
        results.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(results)
    }

    fn register_user(&self, user: &UserRecord) -> Result<bool, StoreError> {
        let _lock = self.lock()?;
        let mut users = self.read_users()?;
        if users.contains_key(&user.name) {
            return Ok(false);
        }
        users.insert(user.name.clone(), user.clone());
        let content = serde_json::to_string_pretty(&users)?;
        write_atomic(&self.layout.users_file(), content.as_bytes())?;
        Ok(true)
    }
}
