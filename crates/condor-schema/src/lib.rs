//! Data model for condor channels, upstream repository documents, and package metadata.
//!
//! This crate is the pure schema layer: channel modes and mirror-URL validation
//! (`ChannelSource`, `MirrorUrl`), the upstream `channeldata.json` and
//! `repodata.json` documents (`ChannelData`, `RepoData`), the embedded
//! `info/index.json` descriptor of a package archive (`PackageInfo`), and the
//! string newtypes shared by the other crates. Nothing here performs I/O.

pub mod channel;
pub mod package;
pub mod repodata;
pub mod types;

pub use channel::{
    validate_channel_name, ChannelSource, ChannelSpec, MirrorFilter, MirrorMode, MirrorUrl,
};
pub use package::{
    canonical_filename, validate_build_string, validate_package_name, validate_subdir,
    validate_version, ArchiveKind, PackageInfo,
};
pub use repodata::{ChannelData, RepoData, RepoEntry, KNOWN_SUBDIRS};
pub use types::{ChannelName, Subdir};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema (http/https) missing in mirror url '{0}'")]
    MissingUrlScheme(String),
    #[error("unsupported schema in mirror url '{0}', expected http/https")]
    UnsupportedUrlScheme(String),
    #[error("host missing in mirror url '{0}'")]
    MissingUrlHost(String),
    #[error("invalid channel name: {0}")]
    InvalidChannelName(String),
    #[error("invalid mirror configuration: {0}")]
    MirrorConfig(String),
    #[error("invalid package {field} '{value}': {reason}")]
    InvalidPackageField {
        field: &'static str,
        value: String,
        reason: &'static str,
    },
    #[error("malformed document: {0}")]
    Malformed(String),
}
