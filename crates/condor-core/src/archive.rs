//! Structural validation of downloaded or uploaded package archives.
//!
//! [`validate`] is a pure function over the payload bytes: it detects the
//! container by magic bytes, locates the embedded `info/index.json`, checks
//! the declared name, version, build and subdir, and computes the checksums
//! recorded alongside the package.

use condor_schema::{validate_subdir, ArchiveKind, PackageInfo, Subdir};
use md5::Md5;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::io::{Cursor, Read};
use thiserror::Error;

const INDEX_JSON: &str = "info/index.json";
const BZIP2_MAGIC: &[u8] = b"BZh";
const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Upper bound for the descriptor; anything larger is not a real index.json.
const MAX_INDEX_JSON: u64 = 4 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ArchiveError {
    #[error("archive payload is empty")]
    EmptyPayload,
    #[error("unrecognized archive format")]
    UnrecognizedFormat,
    #[error("archive has no info/index.json")]
    MissingMetadata,
    #[error("malformed package metadata: {0}")]
    MalformedMetadata(String),
}

/// A payload that passed validation, with everything needed to persist it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPackage {
    pub info: PackageInfo,
    pub kind: ArchiveKind,
    pub subdir: Subdir,
    /// Canonical `{name}-{version}-{build}{ext}`.
    pub filename: String,
    pub size: u64,
    pub sha256: String,
    pub md5: String,
}

impl ValidatedPackage {
    /// Channel-relative path the archive is stored under.
    pub fn path(&self) -> String {
        format!("{}/{}", self.subdir, self.filename)
    }

    /// Repodata entry for this archive: the descriptor fields plus checksums.
    pub fn repodata_entry(&self, time_modified: Option<i64>) -> Map<String, Value> {
        let mut entry = match serde_json::to_value(&self.info) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        entry.insert("subdir".to_owned(), Value::from(self.subdir.as_str()));
        entry.insert("size".to_owned(), Value::from(self.size));
        entry.insert("sha256".to_owned(), Value::from(self.sha256.as_str()));
        entry.insert("md5".to_owned(), Value::from(self.md5.as_str()));
        if let Some(ts) = time_modified {
            entry.insert("time_modified".to_owned(), Value::from(ts));
        }
        entry
    }
}

/// Extract and parse the embedded descriptor without checking its fields.
pub fn read_info(bytes: &[u8]) -> Result<(ArchiveKind, PackageInfo), ArchiveError> {
    if bytes.is_empty() {
        return Err(ArchiveError::EmptyPayload);
    }
    let kind = detect_kind(bytes).ok_or(ArchiveError::UnrecognizedFormat)?;
    let raw = match kind {
        ArchiveKind::TarBz2 => index_from_tar_bz2(bytes)?,
        ArchiveKind::Conda => index_from_conda(bytes)?,
    };
    let info = PackageInfo::from_bytes(&raw)
        .map_err(|e| ArchiveError::MalformedMetadata(e.to_string()))?;
    Ok((kind, info))
}

/// Validate `bytes` as a package archive destined for `expected_subdir`.
pub fn validate(bytes: &[u8], expected_subdir: &str) -> Result<ValidatedPackage, ArchiveError> {
    let (kind, info) = read_info(bytes)?;
    info.validate()
        .and_then(|()| validate_subdir(expected_subdir))
        .map_err(|e| ArchiveError::MalformedMetadata(e.to_string()))?;

    let subdir = match info.subdir.as_deref() {
        None | Some("") => expected_subdir,
        Some(declared) if declared == expected_subdir => declared,
        Some(declared) => {
            return Err(ArchiveError::MalformedMetadata(format!(
                "declared subdir '{declared}' does not match '{expected_subdir}'"
            )))
        }
    };

    Ok(ValidatedPackage {
        filename: info.filename(kind),
        subdir: Subdir::new(subdir),
        kind,
        size: bytes.len() as u64,
        sha256: hex::encode(Sha256::digest(bytes)),
        md5: hex::encode(Md5::digest(bytes)),
        info,
    })
}

fn detect_kind(bytes: &[u8]) -> Option<ArchiveKind> {
    if bytes.starts_with(BZIP2_MAGIC) {
        Some(ArchiveKind::TarBz2)
    } else if bytes.starts_with(ZIP_MAGIC) {
        Some(ArchiveKind::Conda)
    } else {
        None
    }
}

fn index_from_tar_bz2(bytes: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let decoder = bzip2::read::BzDecoder::new(bytes);
    find_index_in_tar(decoder)
}

/// `.conda` is a zip whose `info-*.tar.zst` member carries the metadata.
fn index_from_conda(bytes: &[u8]) -> Result<Vec<u8>, ArchiveError> {
    let mut zip =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|_| ArchiveError::UnrecognizedFormat)?;
    let member = zip
        .file_names()
        .find(|n| n.starts_with("info-") && n.ends_with(".tar.zst"))
        .map(str::to_owned)
        .ok_or(ArchiveError::MissingMetadata)?;

    let mut inner = Vec::new();
    zip.by_name(&member)
        .and_then(|mut f| f.read_to_end(&mut inner).map_err(Into::into))
        .map_err(|_| ArchiveError::UnrecognizedFormat)?;
    let decoder =
        zstd::Decoder::new(inner.as_slice()).map_err(|_| ArchiveError::UnrecognizedFormat)?;
    find_index_in_tar(decoder)
}

fn find_index_in_tar<R: Read>(reader: R) -> Result<Vec<u8>, ArchiveError> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|_| ArchiveError::UnrecognizedFormat)?;
    for entry in entries {
        let mut entry = entry.map_err(|_| ArchiveError::UnrecognizedFormat)?;
        let is_index = entry
            .path()
            .map(|p| p.to_string_lossy().trim_start_matches("./") == INDEX_JSON)
            .unwrap_or(false);
        if !is_index {
            continue;
        }
        if entry.size() > MAX_INDEX_JSON {
            return Err(ArchiveError::MalformedMetadata(
                "info/index.json is too large".to_owned(),
            ));
        }
        let mut buf = Vec::new();
        entry
            .read_to_end(&mut buf)
            .map_err(|_| ArchiveError::UnrecognizedFormat)?;
        return Ok(buf);
    }
    Err(ArchiveError::MissingMetadata)
}
