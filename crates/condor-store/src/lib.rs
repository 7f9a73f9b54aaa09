//! Durable state for condor: the content cache and the channel/package index.
//!
//! `FileStore` keeps raw files keyed by (channel, relative path) and is what
//! the proxy and mirror paths write through to. `FileIndex` owns channel,
//! package, and user records as checksummed JSON documents; every mutation
//! runs under an exclusive `IndexLock`, which is the transaction boundary the
//! mirror synchronizer relies on. Both sit behind the `ContentStore` and
//! `PackageIndex` traits so the engine can be exercised against other
//! backends.

pub mod files;
pub mod index;
pub mod layout;
pub mod lock;
pub mod records;

pub use files::{ContentStore, FileStore, StoredFile};
pub use index::{FileIndex, PackageIndex, UpsertOutcome};
pub use layout::{StoreLayout, STORE_FORMAT_VERSION};
pub use lock::IndexLock;
pub use records::{ChannelRecord, PackageRecord, PackageVersion, UserRecord};

use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

/// Write `data` to `dest` through a temp file in the same directory.
pub(crate) fn write_atomic(dest: &Path, data: &[u8]) -> Result<(), StoreError> {
    let dir = dest
        .parent()
        .ok_or_else(|| StoreError::InvalidPath(dest.display().to_string()))?;
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| StoreError::Io(e.error))?;
    fsync_dir(dir)?;
    Ok(())
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("integrity check failed for '{key}': expected {expected}, got {actual}")]
    IntegrityFailure {
        key: String,
        expected: String,
        actual: String,
    },
    #[error("channel not found: {0}")]
    ChannelNotFound(String),
    #[error("channel '{0}' already exists")]
    ChannelExists(String),
    #[error("package '{package}' not found in channel '{channel}'")]
    PackageNotFound { channel: String, package: String },
    #[error("package '{package}' already exists in channel '{channel}'")]
    PackageExists { channel: String, package: String },
    #[error("file not found: {channel}/{path}")]
    FileNotFound { channel: String, path: String },
    #[error("invalid store path: {0}")]
    InvalidPath(String),
    #[error("lock acquisition failed: {0}")]
    LockFailed(String),
    #[error("store format version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("schema error: {0}")]
    Schema(#[from] condor_schema::SchemaError),
}
