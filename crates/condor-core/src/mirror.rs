//! Mirror synchronization: replicate an upstream channel's indices and
//! archives into the local index and content store.
//!
//! One pass reads `channeldata.json` (or falls back to [`KNOWN_SUBDIRS`]),
//! then each subdir's `repodata.json`. Entries newer than the channel's
//! watermark are queued one task per archive; the watermark itself is
//! advanced from the index alone, whether or not the archives validate.
//!
//! Two passes over the same channel are not serialized here. They can both
//! read the same watermark and download the same archives; the upsert is
//! idempotent so the result is redundant work, not corruption.

use crate::archive::{self, ValidatedPackage};
use crate::indexing;
use crate::tasks::TaskQueue;
use crate::CoreError;
use condor_remote::{RemoteError, RemoteRepository};
use condor_schema::{
    validate_subdir, ChannelData, ChannelSource, MirrorFilter, RepoData, RepoEntry, Subdir,
};
use condor_store::{ContentStore, PackageIndex, PackageVersion, UpsertOutcome};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Shared collaborators for sync passes and the tasks they spawn.
#[derive(Clone)]
pub struct SyncContext {
    pub index: Arc<dyn PackageIndex>,
    pub store: Arc<dyn ContentStore>,
    pub queue: Arc<dyn TaskQueue>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubdirSelection {
    /// Every subdir advertised upstream (or the fallback set).
    All,
    /// A single subdir; `channeldata.json` is not consulted.
    One(Subdir),
}

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Recorded as the uploader of every mirrored archive.
    pub uploader: Option<String>,
    /// Report per-package failures as warnings rather than errors.
    pub skip_errors: bool,
}

/// What a pass decided synchronously. Archive downloads may still be
/// running on the queue when this is returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub subdirs: Vec<Subdir>,
    /// Subdirs whose index could not be fetched or parsed.
    pub failed_subdirs: Vec<Subdir>,
    pub queued: usize,
    pub up_to_date: usize,
    pub filtered: usize,
    /// Stored watermark after the pass.
    pub watermark: i64,
}

/// Read the upstream subdir list.
///
/// A missing or unparsable `channeldata.json` yields the fallback set; only
/// a transport failure is an error.
pub fn discover_subdirs(remote: &RemoteRepository) -> Result<Vec<Subdir>, RemoteError> {
    let resp = remote.fetch("channeldata.json")?;
    if !resp.is_success() {
        warn!(
            "{}: channeldata.json returned HTTP {}, using known subdirs",
            remote.base(),
            resp.status
        );
        return Ok(ChannelData::known().subdirs);
    }
    let body = match resp.into_bytes() {
        Ok(body) => body,
        Err(e) => {
            warn!("{}: reading channeldata.json failed ({e}), using known subdirs", remote.base());
            return Ok(ChannelData::known().subdirs);
        }
    };
    match ChannelData::from_bytes(&body) {
        Ok(data) => Ok(data.subdirs),
        Err(e) => {
            warn!("{}: {e}, using known subdirs", remote.base());
            Ok(ChannelData::known().subdirs)
        }
    }
}

/// Run one synchronization pass of a mirror channel.
pub fn sync_mirror(
    ctx: &SyncContext,
    channel: &str,
    remote: &RemoteRepository,
    selection: SubdirSelection,
    options: &SyncOptions,
) -> Result<SyncReport, CoreError> {
    let subdirs = match selection {
        SubdirSelection::All => discover_subdirs(remote)?,
        SubdirSelection::One(subdir) => {
            validate_subdir(&subdir)?;
            vec![subdir]
        }
    };
    sync_subdirs(ctx, channel, remote, subdirs, options)
}

/// Sync an already-discovered subdir list.
pub(crate) fn sync_subdirs(
    ctx: &SyncContext,
    channel: &str,
    remote: &RemoteRepository,
    subdirs: Vec<Subdir>,
    options: &SyncOptions,
) -> Result<SyncReport, CoreError> {
    let record = ctx.index.get_channel(channel)?;
    if !matches!(record.source, ChannelSource::Mirror { .. }) {
        return Err(CoreError::NotAMirror {
            channel: channel.to_owned(),
            mode: record.mode(),
        });
    }
    let baseline = record.timestamp_mirror_sync;
    info!(
        "syncing mirror '{channel}' from {} ({} subdirs, watermark {baseline})",
        remote.base(),
        subdirs.len()
    );

    let mut report = SyncReport {
        watermark: baseline,
        ..SyncReport::default()
    };
    for subdir in subdirs {
        let repodata = match fetch_repodata(remote, &subdir) {
            Ok(repodata) => repodata,
            Err(reason) => {
                warn!("channel '{channel}': skipping subdir {subdir}: {reason}");
                report.failed_subdirs.push(subdir.clone());
                report.subdirs.push(subdir);
                continue;
            }
        };

        let plan = plan_subdir(&repodata, baseline, &record.mirror_filter);
        report.up_to_date += plan.up_to_date;
        report.filtered += plan.filtered;
        report.queued += plan.queued.len();
        debug!(
            "channel '{channel}' {subdir}: {} queued, {} up to date, {} filtered",
            plan.queued.len(),
            plan.up_to_date,
            plan.filtered
        );

        dispatch(ctx, channel, remote, &subdir, plan.queued, options);
        report.watermark = ctx.index.advance_mirror_watermark(channel, plan.max_seen)?;
        report.subdirs.push(subdir);
    }

    info!(
        "mirror '{channel}': {} archives queued, watermark {}",
        report.queued, report.watermark
    );
    Ok(report)
}

fn fetch_repodata(remote: &RemoteRepository, subdir: &Subdir) -> Result<RepoData, String> {
    let body = remote
        .fetch_bytes(&subdir.repodata_path())
        .map_err(|e| e.to_string())?;
    RepoData::from_bytes(&body).map_err(|e| e.to_string())
}

#[derive(Debug, Default)]
struct SubdirPlan {
    queued: Vec<RepoEntry>,
    up_to_date: usize,
    filtered: usize,
    max_seen: i64,
}

/// Decide which entries need downloading, in upstream order.
fn plan_subdir(repodata: &RepoData, watermark: i64, filter: &MirrorFilter) -> SubdirPlan {
    let mut plan = SubdirPlan::default();
    for entry in &repodata.entries {
        if !filter.is_empty() && !entry.package_name().is_some_and(|n| filter.allows(n)) {
            plan.filtered += 1;
            continue;
        }
        let ts = entry.time_modified_or_zero();
        plan.max_seen = plan.max_seen.max(ts);
        if watermark != 0 && ts <= watermark {
            plan.up_to_date += 1;
        } else {
            plan.queued.push(entry.clone());
        }
    }
    plan
}

fn dispatch(
    ctx: &SyncContext,
    channel: &str,
    remote: &RemoteRepository,
    subdir: &Subdir,
    entries: Vec<RepoEntry>,
    options: &SyncOptions,
) {
    if entries.is_empty() {
        return;
    }
    let batch = Arc::new(SubdirBatch::new(ctx, channel, subdir, entries.len()));
    for entry in entries {
        let batch = Arc::clone(&batch);
        let task_ctx = ctx.clone();
        let remote = remote.clone();
        let options = options.clone();
        ctx.queue.submit(Box::new(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                mirror_package(
                    &task_ctx,
                    &batch.channel,
                    &remote,
                    &batch.subdir,
                    &entry,
                    &options,
                )
            }));
            match outcome {
                Ok(outcome) => batch.record(&entry.filename, outcome, options.skip_errors),
                Err(_) => batch.record_panic(&entry.filename),
            }
        }));
    }
}

/// Download, validate, store and upsert one archive.
fn mirror_package(
    ctx: &SyncContext,
    channel: &str,
    remote: &RemoteRepository,
    subdir: &Subdir,
    entry: &RepoEntry,
    options: &SyncOptions,
) -> Result<UpsertOutcome, CoreError> {
    let bytes = remote.fetch_bytes(&format!("{subdir}/{}", entry.filename))?;
    let pkg = archive::validate(&bytes, subdir)?;
    ctx.store.put(channel, &pkg.path(), &bytes)?;
    let version = mirrored_version(&pkg, entry, options.uploader.as_deref());
    let outcome = ctx
        .index
        .upsert_package_version(channel, &pkg.info.name, version)?;
    Ok(outcome)
}

/// Upstream fields are kept; values derived from the payload take precedence.
fn mirrored_version(
    pkg: &ValidatedPackage,
    entry: &RepoEntry,
    uploader: Option<&str>,
) -> PackageVersion {
    let mut info = entry.raw.clone();
    info.extend(pkg.repodata_entry(entry.time_modified));
    PackageVersion {
        subdir: pkg.subdir.clone(),
        filename: pkg.filename.clone(),
        version: pkg.info.version.clone(),
        build: pkg.info.build.clone(),
        build_number: pkg.info.build_number,
        size: pkg.size,
        sha256: pkg.sha256.clone(),
        md5: pkg.md5.clone(),
        time_modified: entry.time_modified_or_zero(),
        uploader: uploader.map(str::to_owned),
        info,
    }
}

/// Outcome counters for one subdir's queued archives. The task that
/// finishes last regenerates the subdir's indices.
struct SubdirBatch {
    index: Arc<dyn PackageIndex>,
    store: Arc<dyn ContentStore>,
    channel: String,
    subdir: Subdir,
    remaining: AtomicUsize,
    stored: AtomicUsize,
    unchanged: AtomicUsize,
    invalid: AtomicUsize,
    failed: AtomicUsize,
}

impl SubdirBatch {
    fn new(ctx: &SyncContext, channel: &str, subdir: &Subdir, size: usize) -> Self {
        Self {
            index: Arc::clone(&ctx.index),
            store: Arc::clone(&ctx.store),
            channel: channel.to_owned(),
            subdir: subdir.clone(),
            remaining: AtomicUsize::new(size),
            stored: AtomicUsize::new(0),
            unchanged: AtomicUsize::new(0),
            invalid: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        }
    }

    fn record(&self, filename: &str, outcome: Result<UpsertOutcome, CoreError>, skip_errors: bool) {
        match outcome {
            Ok(UpsertOutcome::Unchanged) => {
                self.unchanged.fetch_add(1, Ordering::Relaxed);
            }
            Ok(_) => {
                self.stored.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let counter = if matches!(e, CoreError::Archive(_)) {
                    &self.invalid
                } else {
                    &self.failed
                };
                counter.fetch_add(1, Ordering::Relaxed);
                if skip_errors {
                    warn!("{}/{}/{filename}: skipped: {e}", self.channel, self.subdir);
                } else {
                    error!("{}/{}/{filename}: {e}", self.channel, self.subdir);
                }
            }
        }
        self.complete_one();
    }

    fn record_panic(&self, filename: &str) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        error!("{}/{}/{filename}: download task panicked", self.channel, self.subdir);
        self.complete_one();
    }

    fn complete_one(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
    }

    fn finish(&self) {
        let stored = self.stored.load(Ordering::Relaxed);
        info!(
            "mirror '{}' {}: {stored} stored, {} unchanged, {} invalid, {} failed",
            self.channel,
            self.subdir,
            self.unchanged.load(Ordering::Relaxed),
            self.invalid.load(Ordering::Relaxed),
            self.failed.load(Ordering::Relaxed),
        );
        if stored == 0 {
            return;
        }
        if let Err(e) = indexing::reindex(
            self.index.as_ref(),
            self.store.as_ref(),
            &self.channel,
            std::slice::from_ref(&self.subdir),
        ) {
            error!("reindexing {}/{} failed: {e}", self.channel, self.subdir);
        }
    }
}
