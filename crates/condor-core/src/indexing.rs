//! Regeneration of the client-facing `repodata.json` and `channeldata.json`
//! documents from the package index.

use crate::CoreError;
use condor_schema::{ArchiveKind, Subdir};
use condor_store::{ContentStore, PackageIndex, PackageVersion};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

pub const REPODATA_VERSION: u64 = 1;
pub const CHANNELDATA_VERSION: u64 = 1;

/// Build the `repodata.json` document for one subdir of `channel`.
pub fn build_repodata(
    index: &dyn PackageIndex,
    channel: &str,
    subdir: &str,
) -> Result<Value, CoreError> {
    let mut versions: Vec<PackageVersion> = index
        .list_packages(channel)?
        .into_iter()
        .flat_map(|p| p.versions)
        .filter(|v| v.subdir == subdir)
        .collect();
    versions.sort_by(|a, b| a.filename.cmp(&b.filename));

    let mut packages = Map::new();
    let mut packages_conda = Map::new();
    for v in versions {
        let target = match ArchiveKind::from_filename(&v.filename) {
            Some(ArchiveKind::Conda) => &mut packages_conda,
            _ => &mut packages,
        };
        target.insert(v.filename, Value::Object(v.info));
    }

    Ok(json!({
        "info": { "subdir": subdir },
        "packages": packages,
        "packages.conda": packages_conda,
        "repodata_version": REPODATA_VERSION,
    }))
}

/// Build `channeldata.json`: per-package summary plus the subdir list.
pub fn build_channeldata(index: &dyn PackageIndex, channel: &str) -> Result<Value, CoreError> {
    let mut all_subdirs: BTreeSet<Subdir> = BTreeSet::new();
    let mut packages = BTreeMap::new();
    for pkg in index.list_packages(channel)? {
        let subdirs = pkg.subdirs();
        if subdirs.is_empty() {
            continue;
        }
        all_subdirs.extend(subdirs.iter().cloned());
        let mut entry = Map::new();
        entry.insert("subdirs".to_owned(), json!(subdirs));
        if let Some(ref v) = pkg.latest_version {
            entry.insert("version".to_owned(), json!(v));
        }
        if let Some(ref s) = pkg.summary {
            entry.insert("summary".to_owned(), json!(s));
        }
        packages.insert(pkg.name, Value::Object(entry));
    }
    Ok(json!({
        "channeldata_version": CHANNELDATA_VERSION,
        "packages": packages,
        "subdirs": all_subdirs,
    }))
}

/// Rewrite `repodata.json` for each of `subdirs` and then `channeldata.json`.
pub fn reindex(
    index: &dyn PackageIndex,
    store: &dyn ContentStore,
    channel: &str,
    subdirs: &[Subdir],
) -> Result<(), CoreError> {
    for subdir in subdirs {
        let doc = build_repodata(index, channel, subdir)?;
        store.put(channel, &subdir.repodata_path(), &serde_json::to_vec(&doc)?)?;
        debug!("channel '{channel}': wrote {}", subdir.repodata_path());
    }
    let doc = build_channeldata(index, channel)?;
    store.put(channel, "channeldata.json", &serde_json::to_vec(&doc)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use condor_schema::ChannelSource;
    use condor_store::{ChannelRecord, FileIndex, FileStore, StoreLayout};

    fn version(subdir: &str, filename: &str, ts: i64) -> PackageVersion {
        let mut info = Map::new();
        info.insert("name".to_owned(), json!("demo"));
        PackageVersion {
            subdir: Subdir::new(subdir),
            filename: filename.to_owned(),
            version: "1.0".to_owned(),
            build: "0".to_owned(),
            build_number: 0,
            size: 3,
            sha256: "aa".to_owned(),
            md5: "bb".to_owned(),
            time_modified: ts,
            uploader: None,
            info,
        }
    }

    fn setup() -> (tempfile::TempDir, FileIndex, FileStore) {
        let dir = tempfile::tempdir().unwrap();
        let layout = StoreLayout::new(dir.path());
        layout.initialize().unwrap();
        let index = FileIndex::new(layout.clone());
        let store = FileStore::new(layout);
        index
            .create_channel(&ChannelRecord::new("local", ChannelSource::Local))
            .unwrap();
        (dir, index, store)
    }

    #[test]
    fn repodata_splits_by_archive_kind() {
        let (_dir, index, _store) = setup();
        index
            .upsert_package_version("local", "demo", version("linux-64", "demo-1.0-0.tar.bz2", 1))
            .unwrap();
        index
            .upsert_package_version("local", "demo", version("linux-64", "demo-1.0-0.conda", 2))
            .unwrap();
        index
            .upsert_package_version("local", "demo", version("noarch", "demo-1.0-1.tar.bz2", 3))
            .unwrap();

        let doc = build_repodata(&index, "local", "linux-64").unwrap();
        assert_eq!(doc["info"]["subdir"], "linux-64");
        assert_eq!(doc["packages"].as_object().unwrap().len(), 1);
        assert_eq!(doc["packages.conda"].as_object().unwrap().len(), 1);
        assert!(doc["packages"]["demo-1.0-0.tar.bz2"].is_object());
    }

    #[test]
    fn channeldata_lists_subdirs_and_latest() {
        let (_dir, index, _store) = setup();
        index
            .upsert_package_version("local", "demo", version("noarch", "demo-1.0-0.tar.bz2", 5))
            .unwrap();
        index.create_package("local", "empty", None).unwrap();

        let doc = build_channeldata(&index, "local").unwrap();
        assert_eq!(doc["subdirs"], json!(["noarch"]));
        assert_eq!(doc["packages"]["demo"]["version"], "1.0");
        assert!(doc["packages"].get("empty").is_none());
    }

    #[test]
    fn reindex_writes_documents_to_store() {
        let (_dir, index, store) = setup();
        index
            .upsert_package_version("local", "demo", version("noarch", "demo-1.0-0.tar.bz2", 5))
            .unwrap();
        reindex(&index, &store, "local", &[Subdir::new("noarch")]).unwrap();

        let raw = store.open("local", "noarch/repodata.json").unwrap().into_bytes().unwrap();
        let doc: Value = serde_json::from_slice(&raw).unwrap();
        assert!(doc["packages"]["demo-1.0-0.tar.bz2"].is_object());
        assert!(store.exists("local", "channeldata.json").unwrap());
    }
}
