//! Read-through serving for proxy channels.
//!
//! Archives are served from the content store when present and otherwise
//! fetched once and written through. Index documents are re-fetched on every
//! request; the cached copy is advisory and never served by this path.

use crate::CoreError;
use condor_remote::RemoteRepository;
use condor_store::{ContentStore, StoreError, StoredFile};
use std::io::Cursor;
use tracing::{debug, warn};

const INDEX_SUFFIXES: &[&str] = &[".json", ".json.bz2", ".json.zst", ".jlap"];

/// Whether `path` names repository metadata that must always be fresh.
pub fn is_index_file(path: &str) -> bool {
    let name = path.rsplit('/').next().unwrap_or(path);
    INDEX_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

fn check_path(path: &str) -> Result<(), StoreError> {
    let trimmed = path.trim_start_matches('/');
    if trimmed.is_empty()
        || trimmed.contains('\\')
        || trimmed.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..")
    {
        return Err(StoreError::InvalidPath(path.to_owned()));
    }
    Ok(())
}

/// Serve `path` of proxy channel `channel` backed by `remote`.
pub fn serve_proxy_file(
    store: &dyn ContentStore,
    remote: &RemoteRepository,
    channel: &str,
    path: &str,
) -> Result<StoredFile, CoreError> {
    check_path(path)?;

    if is_index_file(path) {
        debug!("proxy '{channel}': refreshing index {path}");
        let body = remote.fetch_bytes(path)?;
        if let Err(e) = store.put(channel, path, &body) {
            warn!("proxy '{channel}': caching {path} failed: {e}");
        }
        return Ok(StoredFile {
            size: body.len() as u64,
            reader: Box::new(Cursor::new(body)),
        });
    }

    if store.exists(channel, path)? {
        debug!("proxy '{channel}': cache hit {path}");
        return Ok(store.open(channel, path)?);
    }

    debug!("proxy '{channel}': cache miss {path}");
    let mut resp = remote.open(path)?;
    let written = store.put_reader(channel, path, &mut resp.body)?;
    debug!("proxy '{channel}': cached {path} ({written} bytes)");
    Ok(store.open(channel, path)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_files_detected_by_name() {
        assert!(is_index_file("linux-64/repodata.json"));
        assert!(is_index_file("channeldata.json"));
        assert!(is_index_file("noarch/repodata.json.bz2"));
        assert!(is_index_file("noarch/repodata.json.zst"));
        assert!(is_index_file("noarch/repodata.jlap"));
        assert!(!is_index_file("linux-64/pkg-1.0-0.tar.bz2"));
        assert!(!is_index_file("somefile.txt"));
        assert!(!is_index_file("json/readme"));
    }

    #[test]
    fn traversal_paths_rejected() {
        assert!(check_path("../etc/passwd").is_err());
        assert!(check_path("a/./b").is_err());
        assert!(check_path("a//b").is_err());
        assert!(check_path("").is_err());
        assert!(check_path("linux-64/x.tar.bz2").is_ok());
        assert!(check_path("/somefile.txt").is_ok());
    }
}
