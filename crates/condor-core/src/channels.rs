use crate::archive::{self, ValidatedPackage};
use crate::indexing;
use crate::mirror::{self, SubdirSelection, SyncContext, SyncOptions, SyncReport};
use crate::proxy;
use crate::tasks::TaskQueue;
use crate::CoreError;
use condor_remote::{RemoteRepository, Session};
use condor_schema::{validate_channel_name, ChannelSource, ChannelSpec, MirrorUrl, Subdir};
use condor_store::{
    ChannelRecord, ContentStore, PackageIndex, PackageRecord, PackageVersion, StoreError,
    StoredFile,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Where an uploaded archive goes. Both fields are optional: the subdir
/// defaults to the one declared in the archive, and `package`, when set,
/// must match the archive's name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadTarget {
    pub subdir: Option<String>,
    pub package: Option<String>,
}

/// Channel operations, dispatched on each channel's [`ChannelSource`].
#[derive(Clone)]
pub struct ChannelService {
    ctx: SyncContext,
    session: Arc<dyn Session>,
}

impl ChannelService {
    pub fn new(
        index: Arc<dyn PackageIndex>,
        store: Arc<dyn ContentStore>,
        queue: Arc<dyn TaskQueue>,
        session: Arc<dyn Session>,
    ) -> Self {
        Self {
            ctx: SyncContext {
                index,
                store,
                queue,
            },
            session,
        }
    }

    pub fn index(&self) -> &dyn PackageIndex {
        self.ctx.index.as_ref()
    }

    pub fn store(&self) -> &dyn ContentStore {
        self.ctx.store.as_ref()
    }

    fn remote(&self, url: &MirrorUrl) -> RemoteRepository {
        RemoteRepository::new(url.clone(), Arc::clone(&self.session))
    }

    /// Create a channel from a request body.
    ///
    /// The URL and mode are validated before any network access. A mirror
    /// channel is only recorded once its upstream has answered; its initial
    /// sync then runs with archive downloads on the task queue.
    pub fn create_channel(
        &self,
        spec: &ChannelSpec,
        owner: Option<&str>,
    ) -> Result<(ChannelRecord, Option<SyncReport>), CoreError> {
        validate_channel_name(&spec.name)?;
        let source = spec.source()?;
        if self.ctx.index.channel_exists(&spec.name)? {
            return Err(StoreError::ChannelExists(spec.name.clone()).into());
        }

        let discovered = match source {
            ChannelSource::Mirror {
                ref mirror_channel_url,
            } => Some(mirror::discover_subdirs(&self.remote(mirror_channel_url))?),
            ChannelSource::Proxy { .. } | ChannelSource::Local => None,
        };

        let mut record = ChannelRecord::new(&spec.name, source);
        record.description.clone_from(&spec.description);
        record.private = spec.private;
        record.mirror_filter = spec.metadata.clone();
        record.owner = owner.map(str::to_owned);
        self.ctx.index.create_channel(&record)?;

        let report = match (discovered, &record.source) {
            (
                Some(subdirs),
                ChannelSource::Mirror {
                    mirror_channel_url,
                },
            ) => {
                let options = SyncOptions {
                    uploader: owner.map(str::to_owned),
                    skip_errors: true,
                };
                let remote = self.remote(mirror_channel_url);
                Some(mirror::sync_subdirs(
                    &self.ctx,
                    &spec.name,
                    &remote,
                    subdirs,
                    &options,
                )?)
            }
            _ => None,
        };
        Ok((self.ctx.index.get_channel(&spec.name)?, report))
    }

    /// Re-run synchronization of a mirror channel.
    pub fn resync(
        &self,
        channel: &str,
        selection: SubdirSelection,
        options: &SyncOptions,
    ) -> Result<SyncReport, CoreError> {
        let record = self.ctx.index.get_channel(channel)?;
        match record.source {
            ChannelSource::Mirror {
                ref mirror_channel_url,
            } => mirror::sync_mirror(
                &self.ctx,
                channel,
                &self.remote(mirror_channel_url),
                selection,
                options,
            ),
            ChannelSource::Proxy { .. } | ChannelSource::Local => Err(CoreError::NotAMirror {
                channel: channel.to_owned(),
                mode: record.mode(),
            }),
        }
    }

    /// Reject writes to proxy and mirror channels.
    pub fn ensure_writable(&self, channel: &str) -> Result<ChannelRecord, CoreError> {
        let record = self.ctx.index.get_channel(channel)?;
        match record.source {
            ChannelSource::Local => Ok(record),
            ChannelSource::Proxy { .. } | ChannelSource::Mirror { .. } => {
                Err(CoreError::NotImplemented {
                    mode: record.mode(),
                })
            }
        }
    }

    pub fn create_package(
        &self,
        channel: &str,
        name: &str,
        summary: Option<&str>,
    ) -> Result<PackageRecord, CoreError> {
        self.ensure_writable(channel)?;
        Ok(self.ctx.index.create_package(channel, name, summary)?)
    }

    /// Validate and store an uploaded archive in a local channel.
    pub fn upload(
        &self,
        channel: &str,
        target: &UploadTarget,
        bytes: &[u8],
        uploader: Option<&str>,
    ) -> Result<ValidatedPackage, CoreError> {
        self.ensure_writable(channel)?;

        let subdir = match target.subdir {
            Some(ref subdir) => subdir.clone(),
            None => archive::read_info(bytes)?
                .1
                .subdir
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "noarch".to_owned()),
        };
        let pkg = archive::validate(bytes, &subdir)?;
        if let Some(ref expected) = target.package {
            if *expected != pkg.info.name {
                return Err(CoreError::PackageMismatch {
                    expected: expected.clone(),
                    found: pkg.info.name.clone(),
                });
            }
        }

        let now = chrono::Utc::now().timestamp();
        self.ctx.store.put(channel, &pkg.path(), bytes)?;
        let version = PackageVersion {
            subdir: pkg.subdir.clone(),
            filename: pkg.filename.clone(),
            version: pkg.info.version.clone(),
            build: pkg.info.build.clone(),
            build_number: pkg.info.build_number,
            size: pkg.size,
            sha256: pkg.sha256.clone(),
            md5: pkg.md5.clone(),
            time_modified: now,
            uploader: uploader.map(str::to_owned),
            info: pkg.repodata_entry(Some(now)),
        };
        self.ctx
            .index
            .upsert_package_version(channel, &pkg.info.name, version)?;
        info!("uploaded {channel}/{}", pkg.path());

        if let Err(e) = indexing::reindex(
            self.index(),
            self.store(),
            channel,
            &[Subdir::new(pkg.subdir.as_str())],
        ) {
            warn!("reindexing {channel}/{} failed: {e}", pkg.subdir);
        }
        Ok(pkg)
    }

    /// Serve a channel file: read-through for proxies, from the store otherwise.
    pub fn serve_file(&self, channel: &str, path: &str) -> Result<StoredFile, CoreError> {
        let record = self.ctx.index.get_channel(channel)?;
        match record.source {
            ChannelSource::Proxy {
                ref mirror_channel_url,
            } => proxy::serve_proxy_file(
                self.store(),
                &self.remote(mirror_channel_url),
                channel,
                path,
            ),
            ChannelSource::Mirror { .. } | ChannelSource::Local => {
                Ok(self.ctx.store.open(channel, path)?)
            }
        }
    }

    pub fn get_channel(&self, channel: &str) -> Result<ChannelRecord, CoreError> {
        Ok(self.ctx.index.get_channel(channel)?)
    }

    pub fn list_channels(&self) -> Result<Vec<ChannelRecord>, CoreError> {
        Ok(self.ctx.index.list_channels()?)
    }

    pub fn list_packages(&self, channel: &str) -> Result<Vec<PackageRecord>, CoreError> {
        Ok(self.ctx.index.list_packages(channel)?)
    }
}
