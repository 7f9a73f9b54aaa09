//! Channel engine for condor: mirroring, proxying, and archive validation.
//!
//! [`ChannelService`] is the entry point used by the HTTP layer. It resolves a
//! channel's [`ChannelSource`](condor_schema::ChannelSource) and dispatches to
//! the [`proxy`] handler for read-through channels, the [`mirror`]
//! synchronizer for replicated channels, and the local upload path otherwise.
//! Downloaded and uploaded archives pass through [`archive::validate`] before
//! anything is persisted. Per-package work is handed to a [`TaskQueue`] so
//! that requests triggering a sync return once the upstream indices are read.

pub mod archive;
pub mod bootstrap;
pub mod channels;
pub mod indexing;
pub mod mirror;
pub mod proxy;
pub mod tasks;

pub use archive::{read_info, validate, ArchiveError, ValidatedPackage};
pub use bootstrap::{provision_users, BootstrapConfig, BootstrapUser};
pub use channels::{ChannelService, UploadTarget};
pub use mirror::{
    discover_subdirs, sync_mirror, SubdirSelection, SyncContext, SyncOptions, SyncReport,
};
pub use proxy::{is_index_file, serve_proxy_file};
pub use tasks::{DeferredQueue, InlineQueue, Task, TaskQueue, WorkerPool};

use condor_schema::MirrorMode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid channel configuration: {0}")]
    InvalidConfig(#[from] condor_schema::SchemaError),
    #[error("method not implemented for {mode} channels")]
    NotImplemented { mode: MirrorMode },
    #[error("channel '{channel}' is a {mode} channel; only mirror channels can be synchronized")]
    NotAMirror { channel: String, mode: MirrorMode },
    #[error("archive name '{found}' does not match package '{expected}'")]
    PackageMismatch { expected: String, found: String },
    #[error("invalid package archive: {0}")]
    Archive(#[from] ArchiveError),
    #[error("store error: {0}")]
    Store(#[from] condor_store::StoreError),
    #[error("{0}")]
    Remote(#[from] condor_remote::RemoteError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// True when the upstream host could not be contacted at all.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CoreError::Remote(condor_remote::RemoteError::Unavailable { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use condor_remote::RemoteError;

    #[test]
    fn not_implemented_names_mode() {
        let e = CoreError::NotImplemented {
            mode: MirrorMode::Proxy,
        };
        assert_eq!(e.to_string(), "method not implemented for proxy channels");
    }

    #[test]
    fn remote_unavailable_keeps_upstream_message() {
        let e = CoreError::from(RemoteError::Unavailable {
            url: "http://fantasy_host".to_owned(),
            reason: "dns failure".to_owned(),
        });
        assert!(e.is_unavailable());
        assert!(e.to_string().contains("http://fantasy_host"));
        assert!(e.to_string().contains("unavailable"));
    }

    #[test]
    fn invalid_url_message_is_preserved() {
        let e = CoreError::from(condor_schema::MirrorUrl::parse("no-schema-host").unwrap_err());
        assert!(e.to_string().contains("schema (http/https) missing"));
        assert!(!e.is_unavailable());
    }
}
